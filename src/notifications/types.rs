//! Notification payloads emitted by the engine
//!
//! Delivery is fire-and-forget; a failed send never touches engine state.

use crate::exchange::ExchangeId;
use crate::trades::types::TradeStatus;
use serde::{Deserialize, Serialize};

/// Events the engine reports to the outside world
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Notification {
    /// A new signal was accepted and a trade opened
    NewSignal {
        trade_id: i64,
        symbol: String,
        exchange: ExchangeId,
        strength: usize,
        reasons: String,
        entry_price: f64,
        take_profit: f64,
        stop_loss: f64,
        is_real_trade: bool,
    },

    /// The trailing stop armed and the stop was raised to entry
    TrailingActivated { trade_id: i64, symbol: String },

    /// A real trade without automation needs its stop moved by hand
    TrailingManualAction {
        trade_id: i64,
        symbol: String,
        current_price: f64,
        new_stop: f64,
    },

    /// A trade reached a terminal state
    TradeClosed {
        trade_id: i64,
        symbol: String,
        status: TradeStatus,
        is_real_trade: bool,
        pnl_usdt: f64,
        pnl_percent: f64,
        duration: String,
    },

    /// Exit orders were cancelled but could not be recreated
    ExitProtectionLost {
        trade_id: i64,
        symbol: String,
        detail: String,
    },

    /// An untracked exchange position was reconstructed into a trade
    TradeRescued {
        trade_id: i64,
        symbol: String,
        entry_price: f64,
        quantity: f64,
    },

    EngineStarted,
    EngineStopped,
}

impl Notification {
    /// Short human-readable line used by log-backed delivery
    pub fn summary(&self) -> String {
        match self {
            Notification::NewSignal {
                trade_id,
                symbol,
                exchange,
                strength,
                reasons,
                entry_price,
                take_profit,
                stop_loss,
                is_real_trade,
            } => {
                let mode = if *is_real_trade { "REAL" } else { "virtual" };
                format!(
                    "🚨 New {} signal #{} {} on {} [{}⭐ {}] entry {:.6} TP {:.6} SL {:.6}",
                    mode, trade_id, symbol, exchange, strength, reasons, entry_price, take_profit, stop_loss
                )
            }
            Notification::TrailingActivated { trade_id, symbol } => format!(
                "🚀 Trade #{} {} secured: stop raised to entry",
                trade_id, symbol
            ),
            Notification::TrailingManualAction {
                trade_id,
                symbol,
                current_price,
                new_stop,
            } => format!(
                "🔔 Trade #{} {}: price {:.6}, move stop to {:.6} manually",
                trade_id, symbol, current_price, new_stop
            ),
            Notification::TradeClosed {
                trade_id,
                symbol,
                status,
                is_real_trade,
                pnl_usdt,
                pnl_percent,
                duration,
            } => {
                let icon = if status.is_win() { "✅" } else { "❌" };
                let mode = if *is_real_trade { " (real)" } else { "" };
                format!(
                    "📦 Trade #{} {}{} closed {} {}: {:+.2} USDT ({:+.2}%) after {}",
                    trade_id,
                    symbol,
                    mode,
                    icon,
                    status,
                    pnl_usdt,
                    pnl_percent,
                    duration
                )
            }
            Notification::ExitProtectionLost {
                trade_id,
                symbol,
                detail,
            } => format!(
                "🆘 Trade #{} {} has NO exit protection: {}",
                trade_id, symbol, detail
            ),
            Notification::TradeRescued {
                trade_id,
                symbol,
                entry_price,
                quantity,
            } => format!(
                "🛟 Rescued untracked position as trade #{}: {} qty {} @ {:.6}",
                trade_id, symbol, quantity, entry_price
            ),
            Notification::EngineStarted => "🚀 Engine started".to_string(),
            Notification::EngineStopped => "🛑 Engine stopped".to_string(),
        }
    }
}
