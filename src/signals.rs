//! Signal arbitration and trade opening
//!
//! Raw strategy hits from one scan pass are grouped per symbol, scored by
//! how many distinct strategies agree, and turned into sized trades with
//! ATR-based bounds. Every rejection is cheap and logged; only accepted
//! signals touch the exchange.

use crate::config::{Settings, TIMEFRAME};
use crate::errors::{EngineError, EngineResult};
use crate::exchange::adapter::exit_adapter_for;
use crate::exchange::{
    ExchangeClients, MarketData, OrderKind, OrderRequest, OrderSide,
};
use crate::indicators;
use crate::logger::{self, LogTag};
use crate::markets::MarketCandidate;
use crate::notifications::{Notification, Notifier};
use crate::scanner::RawHit;
use crate::strategies::StrategyKind;
use crate::trades::db::Database;
use crate::trades::types::{Trade, TradeMode};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;

/// Candle window for entry ATR sizing
const SIZING_CANDLE_LIMIT: usize = 60;

/// One symbol's merged scan result
#[derive(Debug, Clone)]
pub struct Signal {
    pub candidate: MarketCandidate,
    pub strategies: Vec<StrategyKind>,
}

impl Signal {
    /// Number of distinct strategies that agree on this symbol
    pub fn strength(&self) -> usize {
        self.strategies.len()
    }

    /// Human-readable reason string, stable order
    pub fn reasons(&self) -> String {
        self.strategies
            .iter()
            .map(|s| s.tag())
            .collect::<Vec<_>>()
            .join(" + ")
    }
}

/// What one arbitration pass did
#[derive(Debug, Default, PartialEq)]
pub struct SignalReport {
    pub signals: usize,
    pub trades_opened: usize,
    pub rejected_weak: usize,
    pub rejected_cooldown: usize,
    pub rejected_bounds: usize,
    pub skipped_active: usize,
    pub failures: usize,
}

/// Merge raw hits into one signal per symbol, strongest first
pub fn arbitrate(hits: Vec<RawHit>) -> Vec<Signal> {
    let mut by_symbol: HashMap<String, Signal> = HashMap::new();
    for hit in hits {
        let entry = by_symbol
            .entry(hit.candidate.symbol.clone())
            .or_insert_with(|| Signal {
                candidate: hit.candidate.clone(),
                strategies: Vec::new(),
            });
        if !entry.strategies.contains(&hit.reason) {
            entry.strategies.push(hit.reason);
        }
    }

    let mut signals: Vec<Signal> = by_symbol.into_values().collect();
    for signal in &mut signals {
        signal.strategies.sort_by_key(|s| s.tag());
    }
    signals.sort_by(|a, b| {
        b.strength().cmp(&a.strength()).then(
            b.candidate
                .quote_volume_24h
                .total_cmp(&a.candidate.quote_volume_24h),
        )
    });
    signals
}

/// Turn the hits of one scan pass into trades.
///
/// Mutates `settings` only for the per-symbol cooldown bookkeeping; the
/// caller persists it after the pass.
pub async fn process_hits(
    hits: Vec<RawHit>,
    clients: &ExchangeClients,
    db: &Database,
    settings: &mut Settings,
    notifier: &dyn Notifier,
) -> SignalReport {
    let mut report = SignalReport::default();
    let signals = arbitrate(hits);
    report.signals = signals.len();

    for signal in signals {
        if signal.strength() < settings.min_signal_strength {
            report.rejected_weak += 1;
            continue;
        }

        match db.count_active_trades() {
            Ok(count) if count >= settings.max_concurrent_trades => {
                logger::info(
                    LogTag::Signals,
                    &format!(
                        "Concurrent trade cap reached ({}), holding remaining signals",
                        settings.max_concurrent_trades
                    ),
                );
                break;
            }
            Ok(_) => {}
            Err(e) => {
                logger::error(LogTag::Signals, &format!("Cannot count trades: {}", e));
                report.failures += 1;
                break;
            }
        }

        match open_trade_for(&signal, clients, db, settings, notifier).await {
            Ok(Opened::Trade) => report.trades_opened += 1,
            Ok(Opened::OnCooldown) => report.rejected_cooldown += 1,
            Ok(Opened::BoundsTooTight) => report.rejected_bounds += 1,
            Ok(Opened::AlreadyTracked) => report.skipped_active += 1,
            Err(e) => {
                report.failures += 1;
                logger::warning(
                    LogTag::Signals,
                    &format!("Signal {} dropped: {}", signal.candidate.symbol, e),
                );
            }
        }
    }

    if report.signals > 0 {
        logger::info(
            LogTag::Signals,
            &format!(
                "🎯 Arbitration: {} signals -> {} trades ({} weak, {} cooldown, {} bounds, {} tracked, {} failures)",
                report.signals,
                report.trades_opened,
                report.rejected_weak,
                report.rejected_cooldown,
                report.rejected_bounds,
                report.skipped_active,
                report.failures
            ),
        );
    }
    report
}

enum Opened {
    Trade,
    OnCooldown,
    BoundsTooTight,
    AlreadyTracked,
}

async fn open_trade_for(
    signal: &Signal,
    clients: &ExchangeClients,
    db: &Database,
    settings: &mut Settings,
    notifier: &dyn Notifier,
) -> EngineResult<Opened> {
    let candidate = &signal.candidate;
    let symbol = candidate.symbol.as_str();

    if db.has_active_trade_for(candidate.exchange, symbol)? {
        return Ok(Opened::AlreadyTracked);
    }

    let now = Utc::now().timestamp();
    if let Some(last) = settings.internal_state.last_signal_time.get(symbol) {
        if now - last < settings.signal_cooldown_seconds() {
            logger::debug(
                LogTag::Signals,
                &format!("{} still on cooldown ({}s since last signal)", symbol, now - last),
            );
            return Ok(Opened::OnCooldown);
        }
    }

    let client = clients.get(&candidate.exchange).ok_or_else(|| {
        EngineError::Config(format!("no client connected for {}", candidate.exchange))
    })?;

    let candles = client
        .fetch_ohlcv(symbol, TIMEFRAME, SIZING_CANDLE_LIMIT)
        .await?;
    let entry_price = candles
        .last()
        .map(|c| c.close)
        .filter(|p| p.is_finite() && *p > 0.0)
        .unwrap_or(candidate.last_price);
    let atr = indicators::atr(&candles, settings.atr_period)
        .last()
        .copied()
        .filter(|v| v.is_finite() && *v > 0.0)
        .ok_or_else(|| {
            EngineError::DataInsufficient(format!("not enough candles to size {}", symbol))
        })?;

    let stop_loss = entry_price - atr * settings.atr_sl_multiplier;
    let take_profit = entry_price + (entry_price - stop_loss) * settings.risk_reward_ratio;
    if stop_loss <= 0.0 {
        return Ok(Opened::BoundsTooTight);
    }

    let tp_percent = (take_profit - entry_price) / entry_price * 100.0;
    let sl_percent = (entry_price - stop_loss) / entry_price * 100.0;
    if tp_percent < settings.min_tp_sl_filter.min_tp_percent
        || sl_percent < settings.min_tp_sl_filter.min_sl_percent
    {
        logger::debug(
            LogTag::Signals,
            &format!(
                "{} bounds too tight: TP {:.2}% SL {:.2}%",
                symbol, tp_percent, sl_percent
            ),
        );
        return Ok(Opened::BoundsTooTight);
    }

    let mode = pick_trade_mode(candidate, client, settings).await;
    let trade = match mode {
        TradeMode::Real => {
            open_real_trade(
                signal, entry_price, take_profit, stop_loss, client, settings,
            )
            .await?
        }
        TradeMode::Virtual => {
            let size = settings.virtual_trade_size_usdt();
            if size <= 0.0 {
                return Err(EngineError::Config(
                    "virtual portfolio is exhausted".to_string(),
                ));
            }
            Trade::open(
                candidate.exchange,
                symbol,
                entry_price,
                take_profit,
                stop_loss,
                size / entry_price,
                TradeMode::Virtual,
                &signal.reasons(),
            )?
        }
    };

    let mut trade = trade;
    trade.id = db.insert_trade(&trade)?;
    settings
        .internal_state
        .last_signal_time
        .insert(symbol.to_string(), now);

    logger::info(
        LogTag::Signals,
        &format!(
            "🚨 Trade #{} opened: {} on {} [{}⭐ {}] entry {:.8} TP {:.8} SL {:.8}",
            trade.id,
            symbol,
            candidate.exchange,
            signal.strength(),
            signal.reasons(),
            trade.entry_price,
            trade.take_profit,
            trade.stop_loss
        ),
    );
    notifier
        .notify(Notification::NewSignal {
            trade_id: trade.id,
            symbol: symbol.to_string(),
            exchange: candidate.exchange,
            strength: signal.strength(),
            reasons: signal.reasons(),
            entry_price: trade.entry_price,
            take_profit: trade.take_profit,
            stop_loss: trade.stop_loss,
            is_real_trade: trade.is_real(),
        })
        .await;

    if trade.needs_intervention {
        notifier
            .notify(Notification::ExitProtectionLost {
                trade_id: trade.id,
                symbol: symbol.to_string(),
                detail: "position is live without exit orders".to_string(),
            })
            .await;
    }
    Ok(Opened::Trade)
}

/// Real mode needs the global automation switch on, the exchange enabled
/// AND enough quote balance; anything short of that downgrades to virtual
/// rather than dropping the signal
async fn pick_trade_mode(
    candidate: &MarketCandidate,
    client: &Arc<dyn MarketData>,
    settings: &Settings,
) -> TradeMode {
    if !settings.automate_real_tsl || !settings.is_real_trading_enabled(candidate.exchange) {
        return TradeMode::Virtual;
    }
    match client.fetch_balance("USDT").await {
        Ok(balance) if balance >= settings.real_trade_size_usdt => TradeMode::Real,
        Ok(balance) => {
            logger::warning(
                LogTag::Signals,
                &format!(
                    "⚠️ {} balance {:.2} USDT below trade size {:.2}, falling back to virtual",
                    candidate.exchange, balance, settings.real_trade_size_usdt
                ),
            );
            TradeMode::Virtual
        }
        Err(e) => {
            logger::warning(
                LogTag::Signals,
                &format!(
                    "⚠️ Balance check failed on {}, falling back to virtual: {}",
                    candidate.exchange, e
                ),
            );
            TradeMode::Virtual
        }
    }
}

/// Market buy, then exit orders. A failed buy aborts the signal; a failed
/// exit placement keeps the trade but freezes it for a human.
async fn open_real_trade(
    signal: &Signal,
    entry_price: f64,
    take_profit: f64,
    stop_loss: f64,
    client: &Arc<dyn MarketData>,
    settings: &Settings,
) -> EngineResult<Trade> {
    let candidate = &signal.candidate;
    let quantity = settings.real_trade_size_usdt / entry_price;

    let receipt = client
        .create_order(&OrderRequest {
            symbol: candidate.symbol.clone(),
            side: OrderSide::Buy,
            kind: OrderKind::Market,
            quantity,
        })
        .await?;

    // The fill is the truth: re-anchor bounds on the actual average price
    let filled_entry = receipt.average_price.unwrap_or(entry_price);
    let filled_quantity = if receipt.filled_quantity > 0.0 {
        receipt.filled_quantity
    } else {
        quantity
    };
    let scale = filled_entry / entry_price;
    let stop_loss = stop_loss * scale;
    let take_profit = take_profit * scale;

    let mut trade = Trade::open(
        candidate.exchange,
        &candidate.symbol,
        filled_entry,
        take_profit,
        stop_loss,
        filled_quantity,
        TradeMode::Real,
        &signal.reasons(),
    )?;

    let adapter = exit_adapter_for(client.clone());
    match adapter
        .place_exit_orders(&candidate.symbol, filled_quantity, take_profit, stop_loss)
        .await
    {
        Ok(refs) => {
            trade.exit_order_refs = Some(refs);
        }
        Err(e) => {
            // The position exists on the exchange either way. Track it,
            // but stop automation until a human places exits.
            logger::error(
                LogTag::Signals,
                &format!(
                    "Exit orders failed for {} on {}: {}",
                    candidate.symbol, candidate.exchange, e
                ),
            );
            trade.needs_intervention = true;
        }
    }
    Ok(trade)
}
