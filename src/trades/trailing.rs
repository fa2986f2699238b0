//! Trailing-stop state machine
//!
//! An active trade arms its trailing stop once unrealized gain reaches the
//! activation threshold; arming raises the stop to entry exactly once.
//! While armed, new price highs produce candidate stops via one of three
//! strategies, and the stop only ever moves up.

use super::types::Trade;
use crate::config::Settings;
use crate::exchange::Candle;
use crate::indicators;
use serde::{Deserialize, Serialize};

/// How a candidate stop is computed while the trail is armed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrailingStrategy {
    /// Fixed callback below the highest price seen
    Percentage,
    /// EMA of close on the scan timeframe
    Ema,
    /// ATR multiple below the highest price seen
    Atr,
}

impl TrailingStrategy {
    /// True when computing a candidate stop requires a candle series
    pub fn needs_candles(&self) -> bool {
        matches!(self, TrailingStrategy::Ema | TrailingStrategy::Atr)
    }
}

/// What the tracking pass should do with a trade's stop
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TrailingAction {
    /// Nothing to change this pass
    Hold,
    /// Gain crossed the activation threshold: arm and raise stop to entry
    Activate { new_stop: f64 },
    /// Armed trail produced a strictly better stop
    Raise { new_stop: f64 },
}

/// Pick the trailing strategy for a trade from its primary signal reason
pub fn strategy_for_trade(trade: &Trade, settings: &Settings) -> TrailingStrategy {
    let advanced = &settings.trailing_sl_advanced;
    if advanced.use_strategy_mapping {
        advanced
            .strategy_tsl_mapping
            .get(trade.primary_reason())
            .copied()
            .unwrap_or(advanced.default_tsl_strategy)
    } else {
        advanced.strategy
    }
}

/// Candidate stop for an armed trade, `None` when the data is too thin
pub fn candidate_stop(
    strategy: TrailingStrategy,
    trade: &Trade,
    candles: &[Candle],
    settings: &Settings,
) -> Option<f64> {
    let advanced = &settings.trailing_sl_advanced;
    match strategy {
        TrailingStrategy::Percentage => {
            Some(trade.highest_price * (1.0 - settings.trailing_sl_callback_percent / 100.0))
        }
        TrailingStrategy::Ema => {
            let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
            let ema = indicators::ema(&closes, advanced.tsl_ema_period);
            ema.last().copied().filter(|v| v.is_finite())
        }
        TrailingStrategy::Atr => {
            let atr = indicators::atr(candles, advanced.tsl_atr_period);
            atr.last()
                .copied()
                .filter(|v| v.is_finite())
                .map(|atr| trade.highest_price - atr * advanced.tsl_atr_multiplier)
        }
    }
}

/// Advance the trailing state machine for one price observation.
///
/// `candles` may be empty for the percentage strategy. The caller applies
/// the returned action (exchange orders first for real trades, then the
/// database).
pub fn advance(
    trade: &Trade,
    current_price: f64,
    candles: &[Candle],
    settings: &Settings,
) -> TrailingAction {
    if !settings.trailing_sl_enabled {
        return TrailingAction::Hold;
    }

    if !trade.trailing_active {
        // Idempotent arming: a repeated pass at the same gain does nothing
        // once trailing_active is set
        if trade.gain_percent(current_price) >= settings.trailing_sl_activation_percent
            && trade.entry_price > trade.stop_loss
        {
            return TrailingAction::Activate {
                new_stop: trade.entry_price,
            };
        }
        return TrailingAction::Hold;
    }

    let peak = trade.highest_price.max(current_price);
    let strategy = strategy_for_trade(trade, settings);
    let observed = Trade {
        highest_price: peak,
        ..trade.clone()
    };
    match candidate_stop(strategy, &observed, candles, settings) {
        // Only ever raise, and never past the current price
        Some(candidate) if candidate > trade.stop_loss && candidate < current_price => {
            TrailingAction::Raise {
                new_stop: candidate,
            }
        }
        _ => TrailingAction::Hold,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::ExchangeId;
    use crate::trades::types::TradeMode;

    fn trade() -> Trade {
        Trade::open(
            ExchangeId::Binance,
            "BTC/USDT",
            100.0,
            110.0,
            95.0,
            1.0,
            TradeMode::Virtual,
            "support_rebound", // maps to the percentage strategy
        )
        .unwrap()
    }

    #[test]
    fn test_arming_threshold() {
        let settings = Settings::default(); // activation at 1.5%
        let t = trade();

        assert_eq!(advance(&t, 101.4, &[], &settings), TrailingAction::Hold);
        assert_eq!(
            advance(&t, 101.6, &[], &settings),
            TrailingAction::Activate { new_stop: 100.0 }
        );
    }

    #[test]
    fn test_arming_is_idempotent() {
        let settings = Settings::default();
        let mut t = trade();
        t.trailing_active = true;
        t.stop_loss = 100.0;
        t.highest_price = 101.6;

        // Same price again: percentage candidate 101.6 * 0.99 = 100.584,
        // above the stop but it must also stay below the current price
        match advance(&t, 101.6, &[], &settings) {
            TrailingAction::Raise { new_stop } => {
                assert!(new_stop > 100.0 && new_stop < 101.6);
            }
            other => panic!("unexpected action: {:?}", other),
        }
        // And a repeat at the raised stop holds
        t.stop_loss = 100.584;
        assert_eq!(advance(&t, 101.6, &[], &settings), TrailingAction::Hold);
    }

    #[test]
    fn test_stop_only_moves_up() {
        let settings = Settings::default();
        let mut t = trade();
        t.trailing_active = true;
        t.stop_loss = 104.0;
        t.highest_price = 105.0;

        // Price fell back: candidate 105 * 0.99 = 103.95 < current stop
        assert_eq!(advance(&t, 104.2, &[], &settings), TrailingAction::Hold);
    }

    #[test]
    fn test_disabled_trailing_never_acts() {
        let mut settings = Settings::default();
        settings.trailing_sl_enabled = false;
        assert_eq!(advance(&trade(), 150.0, &[], &settings), TrailingAction::Hold);
    }

    #[test]
    fn test_strategy_mapping_lookup() {
        let settings = Settings::default();
        let t = trade();
        assert_eq!(strategy_for_trade(&t, &settings), TrailingStrategy::Percentage);

        let mut whale = t.clone();
        whale.reason = "whale_radar + sniper".to_string();
        assert_eq!(strategy_for_trade(&whale, &settings), TrailingStrategy::Atr);

        let mut unknown = t.clone();
        unknown.reason = "something_new".to_string();
        // Falls back to the configured default
        assert_eq!(
            strategy_for_trade(&unknown, &settings),
            settings.trailing_sl_advanced.default_tsl_strategy
        );

        let mut flat = Settings::default();
        flat.trailing_sl_advanced.use_strategy_mapping = false;
        flat.trailing_sl_advanced.strategy = TrailingStrategy::Ema;
        assert_eq!(strategy_for_trade(&t, &flat), TrailingStrategy::Ema);
    }

    #[test]
    fn test_atr_candidate_tracks_peak() {
        let settings = Settings::default(); // ATR period 14, multiplier 2.5
        let mut t = trade();
        t.reason = "whale_radar".to_string();
        t.trailing_active = true;
        t.stop_loss = 100.0;
        t.highest_price = 120.0;

        // Constant 2.0 range candles give ATR = 2.0 => stop 120 - 5 = 115
        let candles: Vec<Candle> = (0..20)
            .map(|_| Candle {
                timestamp: 0,
                open: 119.0,
                high: 120.0,
                low: 118.0,
                close: 119.0,
                volume: 1.0,
            })
            .collect();
        match advance(&t, 119.5, &candles, &settings) {
            TrailingAction::Raise { new_stop } => assert!((new_stop - 115.0).abs() < 1e-9),
            other => panic!("unexpected action: {:?}", other),
        }
    }
}
