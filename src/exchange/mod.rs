//! Exchange identity, market data contract and exit-order adapters
//!
//! The engine talks to exchanges exclusively through the [`MarketData`]
//! trait; connection bootstrap and credentials live outside the core. All
//! failures carry a distinguishable kind (rate limited / transient /
//! not-found / other) so callers can apply the right policy.

pub mod adapter;
pub mod rest;
pub mod types;

#[cfg(test)]
pub mod mock;

pub use adapter::{exit_adapter_for, AdapterFamily, ExitOrderAdapter};
pub use types::{
    BookLevel, Candle, Fill, OrderBook, OrderKind, OrderReceipt, OrderRequest, OrderSide, Ticker,
};

use crate::errors::EngineResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// The closed set of supported exchanges
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeId {
    Binance,
    Okx,
    Bybit,
    Kucoin,
    Gate,
    Mexc,
}

impl ExchangeId {
    pub fn all() -> &'static [ExchangeId] {
        &[
            ExchangeId::Binance,
            ExchangeId::Okx,
            ExchangeId::Bybit,
            ExchangeId::Kucoin,
            ExchangeId::Gate,
            ExchangeId::Mexc,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExchangeId::Binance => "binance",
            ExchangeId::Okx => "okx",
            ExchangeId::Bybit => "bybit",
            ExchangeId::Kucoin => "kucoin",
            ExchangeId::Gate => "gate",
            ExchangeId::Mexc => "mexc",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "binance" => Some(ExchangeId::Binance),
            "okx" => Some(ExchangeId::Okx),
            "bybit" => Some(ExchangeId::Bybit),
            "kucoin" => Some(ExchangeId::Kucoin),
            "gate" => Some(ExchangeId::Gate),
            "mexc" => Some(ExchangeId::Mexc),
            _ => None,
        }
    }
}

impl std::fmt::Display for ExchangeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Market and account data provider contract
///
/// One implementation per connected exchange. Methods suspend only on the
/// network call itself; every error is an [`crate::errors::EngineError`]
/// with a classified kind.
#[async_trait]
pub trait MarketData: Send + Sync {
    /// Exchange this client is connected to
    fn exchange(&self) -> ExchangeId;

    /// All spot tickers with 24h stats
    async fn fetch_tickers(&self) -> EngineResult<Vec<Ticker>>;

    /// Candle series for a symbol, oldest first
    async fn fetch_ohlcv(
        &self,
        symbol: &str,
        timeframe: &str,
        limit: usize,
    ) -> EngineResult<Vec<Candle>>;

    /// Order book snapshot limited to `depth` levels per side
    async fn fetch_order_book(&self, symbol: &str, depth: usize) -> EngineResult<OrderBook>;

    /// Free balance of one currency
    async fn fetch_balance(&self, currency: &str) -> EngineResult<f64>;

    /// Place an order
    async fn create_order(&self, request: &OrderRequest) -> EngineResult<OrderReceipt>;

    /// Cancel an order by id
    async fn cancel_order(&self, order_id: &str, symbol: &str) -> EngineResult<()>;

    /// Recent account fills, newest last
    async fn fetch_my_fills(&self, symbol: Option<&str>) -> EngineResult<Vec<Fill>>;
}

/// Connected exchange clients keyed by identity
pub type ExchangeClients = HashMap<ExchangeId, Arc<dyn MarketData>>;
