//! Trade entity and its state set
//!
//! A trade is the one durable record the engine owns. It is created by
//! signal acceptance (or by rescue), mutated only through the lifecycle
//! layer and immutable once a terminal status is written.

use crate::errors::{EngineError, EngineResult};
use crate::exchange::adapter::ExitOrderRefs;
use crate::exchange::ExchangeId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Trade states. Exactly one holds at any time; the three closed states
/// are terminal.
///
/// A raised stop that fires while the position is still profitable closes
/// as [`TradeStatus::ClosedStopProfit`], a win. Classification of a
/// stop-triggered exit follows the sign of the realized PnL, not the fact
/// that the stop fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeStatus {
    Active,
    /// Take-profit reached
    ClosedWin,
    /// Stop fired with positive PnL (stop was trailed above break-even)
    ClosedStopProfit,
    /// Stop fired with zero or negative PnL
    ClosedStopLoss,
}

impl TradeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeStatus::Active => "active",
            TradeStatus::ClosedWin => "closed_win",
            TradeStatus::ClosedStopProfit => "closed_stop_profit",
            TradeStatus::ClosedStopLoss => "closed_stop_loss",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(TradeStatus::Active),
            "closed_win" => Some(TradeStatus::ClosedWin),
            "closed_stop_profit" => Some(TradeStatus::ClosedStopProfit),
            "closed_stop_loss" => Some(TradeStatus::ClosedStopLoss),
            _ => None,
        }
    }

    pub fn is_closed(&self) -> bool {
        !matches!(self, TradeStatus::Active)
    }

    pub fn is_win(&self) -> bool {
        matches!(self, TradeStatus::ClosedWin | TradeStatus::ClosedStopProfit)
    }
}

impl std::fmt::Display for TradeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Whether the position exists on the exchange or only on paper
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeMode {
    Virtual,
    Real,
}

impl TradeMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeMode::Virtual => "virtual",
            TradeMode::Real => "real",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "virtual" => Some(TradeMode::Virtual),
            "real" => Some(TradeMode::Real),
            _ => None,
        }
    }
}

/// One long position, virtual or real
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    /// Database key; 0 until persisted
    pub id: i64,
    pub exchange: ExchangeId,
    pub symbol: String,
    pub entry_price: f64,
    pub take_profit: f64,
    pub stop_loss: f64,
    pub quantity: f64,
    pub entry_value_usdt: f64,
    pub status: TradeStatus,
    pub trade_mode: TradeMode,
    /// Set once the trailing stop arms; never unset while active
    pub trailing_active: bool,
    /// Highest price observed while active; monotonically non-decreasing
    pub highest_price: f64,
    /// Exit-order handle for real trades with protection placed
    pub exit_order_refs: Option<ExitOrderRefs>,
    /// " + "-joined strategy tags, or "rescued"
    pub reason: String,
    pub opened_at: DateTime<Utc>,
    /// Exit protection was lost; automation is suspended for this trade
    pub needs_intervention: bool,
}

impl Trade {
    /// Build a new active trade, enforcing the opening invariants
    #[allow(clippy::too_many_arguments)]
    pub fn open(
        exchange: ExchangeId,
        symbol: &str,
        entry_price: f64,
        take_profit: f64,
        stop_loss: f64,
        quantity: f64,
        trade_mode: TradeMode,
        reason: &str,
    ) -> EngineResult<Self> {
        if entry_price <= 0.0 || quantity <= 0.0 {
            return Err(EngineError::InvariantViolation(format!(
                "{}: entry {} and quantity {} must be positive",
                symbol, entry_price, quantity
            )));
        }
        if !(stop_loss < entry_price && entry_price < take_profit) {
            return Err(EngineError::InvariantViolation(format!(
                "{}: require stop {} < entry {} < target {}",
                symbol, stop_loss, entry_price, take_profit
            )));
        }

        Ok(Self {
            id: 0,
            exchange,
            symbol: symbol.to_string(),
            entry_price,
            take_profit,
            stop_loss,
            quantity,
            entry_value_usdt: entry_price * quantity,
            status: TradeStatus::Active,
            trade_mode,
            trailing_active: false,
            highest_price: entry_price,
            exit_order_refs: None,
            reason: reason.to_string(),
            opened_at: Utc::now(),
            needs_intervention: false,
        })
    }

    pub fn is_real(&self) -> bool {
        self.trade_mode == TradeMode::Real
    }

    pub fn unrealized_pnl(&self, price: f64) -> f64 {
        (price - self.entry_price) * self.quantity
    }

    /// Unrealized gain as a percentage of entry
    pub fn gain_percent(&self, price: f64) -> f64 {
        (price - self.entry_price) / self.entry_price * 100.0
    }

    /// First strategy tag in the reason, used for trailing-strategy lookup
    pub fn primary_reason(&self) -> &str {
        self.reason.split(" + ").next().unwrap_or(&self.reason)
    }

    /// "2d 4h 13m" style age, for closure notifications
    pub fn duration_string(&self, now: DateTime<Utc>) -> String {
        let total = (now - self.opened_at).num_seconds().max(0);
        let days = total / 86_400;
        let hours = (total % 86_400) / 3_600;
        let minutes = (total % 3_600) / 60;
        if days > 0 {
            format!("{}d {}h {}m", days, hours, minutes)
        } else {
            format!("{}h {}m", hours, minutes)
        }
    }
}
