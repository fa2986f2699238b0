//! Normalized market data types shared across exchange clients
//!
//! Every client maps its native payloads into these shapes so the engine
//! never sees per-exchange field names.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 24h ticker snapshot for one market on one exchange
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticker {
    /// Unified symbol, e.g. "BTC/USDT"
    pub symbol: String,
    pub last_price: f64,
    pub quote_volume_24h: f64,
    pub bid: Option<f64>,
    pub ask: Option<f64>,
}

impl Ticker {
    /// Base currency part of the unified symbol
    pub fn base(&self) -> &str {
        self.symbol.split('/').next().unwrap_or(&self.symbol)
    }

    /// Quote currency part of the unified symbol
    pub fn quote(&self) -> &str {
        self.symbol.split('/').nth(1).unwrap_or("")
    }

    /// Bid/ask spread as a percentage of the mid price, if both sides exist
    pub fn spread_percent(&self) -> Option<f64> {
        match (self.bid, self.ask) {
            (Some(bid), Some(ask)) if bid > 0.0 && ask >= bid => {
                let mid = (bid + ask) / 2.0;
                Some((ask - bid) / mid * 100.0)
            }
            _ => None,
        }
    }
}

/// One OHLCV candle
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// One side level of an order book
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BookLevel {
    pub price: f64,
    pub quantity: f64,
}

/// Order book snapshot, best levels first
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderBook {
    pub bids: Vec<BookLevel>,
    pub asks: Vec<BookLevel>,
}

impl OrderBook {
    /// USD value resting on the top `depth` bid levels
    pub fn top_bid_value(&self, depth: usize) -> f64 {
        self.bids
            .iter()
            .take(depth)
            .map(|level| level.price * level.quantity)
            .sum()
    }
}

/// Order side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

/// Exchange-native order variants the engine places
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OrderKind {
    /// Plain market order
    Market,
    /// Limit order at a price
    Limit { price: f64 },
    /// Market order triggered when price crosses the stop
    StopMarket { trigger_price: f64 },
    /// Combined take-profit limit + stop-loss, one cancels the other
    Oco { price: f64, stop_price: f64 },
}

/// Request to place one order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: OrderSide,
    pub kind: OrderKind,
    pub quantity: f64,
}

/// Exchange acknowledgment of a placed order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderReceipt {
    pub order_id: String,
    pub filled_quantity: f64,
    pub average_price: Option<f64>,
}

/// One executed fill from account trade history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fill {
    pub symbol: String,
    pub side: OrderSide,
    pub price: f64,
    pub quantity: f64,
    pub timestamp: DateTime<Utc>,
}
