//! Position rescue: adopt an untracked real position into the engine
//!
//! When a market buy landed but the engine lost track of it (exit-order
//! placement failed, crash between fill and insert), the position exists
//! on the exchange with no row watching it. Rescue reconstructs the entry
//! from account fills and re-opens tracking with fresh ATR-based bounds.

use super::db::Database;
use super::types::{Trade, TradeMode};
use crate::config::{Settings, TIMEFRAME};
use crate::errors::{EngineError, EngineResult};
use crate::exchange::{Fill, MarketData, OrderSide};
use crate::indicators;
use crate::logger::{self, LogTag};
use crate::notifications::{Notification, Notifier};
use std::sync::Arc;

/// Candle window for the rescue ATR
const RESCUE_CANDLE_LIMIT: usize = 60;

/// Volume-weighted entry price and total quantity of the buy fills
pub fn vwap_of_fills(fills: &[Fill]) -> Option<(f64, f64)> {
    let mut notional = 0.0;
    let mut quantity = 0.0;
    for fill in fills {
        if fill.side == OrderSide::Buy && fill.price > 0.0 && fill.quantity > 0.0 {
            notional += fill.price * fill.quantity;
            quantity += fill.quantity;
        }
    }
    if quantity > 0.0 {
        Some((notional / quantity, quantity))
    } else {
        None
    }
}

/// Reconstruct and persist a trade for an untracked position.
///
/// Returns the adopted trade, or `None` when the symbol is already being
/// tracked on that exchange.
pub async fn rescue_position(
    client: &Arc<dyn MarketData>,
    db: &Database,
    settings: &Settings,
    notifier: &dyn Notifier,
    symbol: &str,
) -> EngineResult<Option<Trade>> {
    let exchange = client.exchange();
    if db.has_active_trade_for(exchange, symbol)? {
        logger::debug(
            LogTag::Trades,
            &format!("Rescue skipped: {} on {} is already tracked", symbol, exchange),
        );
        return Ok(None);
    }

    let fills = client.fetch_my_fills(Some(symbol)).await?;
    let (entry_price, quantity) = vwap_of_fills(&fills).ok_or_else(|| {
        EngineError::DataInsufficient(format!("no buy fills for {} on {}", symbol, exchange))
    })?;

    let candles = client
        .fetch_ohlcv(symbol, TIMEFRAME, RESCUE_CANDLE_LIMIT)
        .await?;
    let atr = indicators::atr(&candles, settings.atr_period)
        .last()
        .copied()
        .filter(|v| v.is_finite() && *v > 0.0)
        .ok_or_else(|| {
            EngineError::DataInsufficient(format!(
                "not enough candles to size a rescue stop for {}",
                symbol
            ))
        })?;

    // Wider stop than fresh signals get: the entry may be stale and the
    // position should survive ordinary noise while it is re-adopted
    let stop_loss = entry_price - atr * settings.rescue_sl_multiplier;
    let take_profit = entry_price + (entry_price - stop_loss) * settings.risk_reward_ratio;

    let mut trade = Trade::open(
        exchange,
        symbol,
        entry_price,
        take_profit,
        stop_loss,
        quantity,
        TradeMode::Real,
        "rescued",
    )?;
    trade.id = db.insert_trade(&trade)?;

    logger::info(
        LogTag::Trades,
        &format!(
            "🛟 Rescued {} on {} as trade #{}: qty {} entry {:.8} TP {:.8} SL {:.8}",
            symbol, exchange, trade.id, quantity, entry_price, take_profit, stop_loss
        ),
    );
    notifier
        .notify(Notification::TradeRescued {
            trade_id: trade.id,
            symbol: symbol.to_string(),
            entry_price,
            quantity,
        })
        .await;

    Ok(Some(trade))
}
