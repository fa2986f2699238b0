//! Public REST market-data client
//!
//! Covers the read-only half of the [`MarketData`] contract against
//! Binance-compatible spot APIs (binance and mexc share the wire format).
//! Account endpoints require signed requests that the surrounding
//! connection bootstrap owns; calling them on this client yields a
//! configuration error instead of a silent no-op.

use super::types::{BookLevel, Candle, Fill, OrderBook, OrderReceipt, OrderRequest, Ticker};
use super::{ExchangeId, MarketData};
use crate::errors::{EngineError, EngineResult};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

pub struct RestExchange {
    exchange: ExchangeId,
    base_url: String,
    client: Client,
}

impl RestExchange {
    /// Build a public client for a Binance-compatible exchange
    pub fn new(exchange: ExchangeId) -> EngineResult<Self> {
        let base_url = match exchange {
            ExchangeId::Binance => "https://api.binance.com".to_string(),
            ExchangeId::Mexc => "https://api.mexc.com".to_string(),
            other => {
                return Err(EngineError::Config(format!(
                    "no public REST endpoint wired for {}",
                    other
                )))
            }
        };

        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| EngineError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            exchange,
            base_url,
            client,
        })
    }

    async fn get_json(&self, path: &str) -> EngineResult<Value> {
        let url = format!("{}{}", self.base_url, path);
        let response = self.client.get(&url).send().await.map_err(|e| {
            if e.is_timeout() {
                EngineError::Timeout {
                    operation: url.clone(),
                    seconds: REQUEST_TIMEOUT.as_secs(),
                }
            } else {
                EngineError::Transient(format!("request to {} failed: {}", url, e))
            }
        })?;

        let status = response.status();
        if status.as_u16() == 429 || status.as_u16() == 418 {
            return Err(EngineError::RateLimited {
                exchange: self.exchange.to_string(),
                message: format!("HTTP {} from {}", status, url),
            });
        }
        if status.as_u16() == 404 {
            return Err(EngineError::NotFound(url));
        }
        if !status.is_success() {
            return Err(EngineError::Exchange(format!(
                "HTTP {} from {}",
                status, url
            )));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| EngineError::Transient(format!("invalid JSON from {}: {}", url, e)))
    }

    /// "BTC/USDT" -> "BTCUSDT"
    fn native_symbol(symbol: &str) -> String {
        symbol.replace('/', "")
    }

    /// "BTCUSDT" -> "BTC/USDT" for USDT-quoted pairs only
    fn unified_symbol(native: &str) -> Option<String> {
        native
            .strip_suffix("USDT")
            .map(|base| format!("{}/USDT", base))
    }
}

fn field_f64(value: &Value, key: &str) -> f64 {
    value[key]
        .as_str()
        .and_then(|s| s.parse().ok())
        .or_else(|| value[key].as_f64())
        .unwrap_or(0.0)
}

fn level_from_pair(pair: &Value) -> Option<BookLevel> {
    let price: f64 = pair.get(0)?.as_str()?.parse().ok()?;
    let quantity: f64 = pair.get(1)?.as_str()?.parse().ok()?;
    Some(BookLevel { price, quantity })
}

#[async_trait]
impl MarketData for RestExchange {
    fn exchange(&self) -> ExchangeId {
        self.exchange
    }

    async fn fetch_tickers(&self) -> EngineResult<Vec<Ticker>> {
        let json = self.get_json("/api/v3/ticker/24hr").await?;
        let rows = json
            .as_array()
            .ok_or_else(|| EngineError::Transient("ticker payload is not an array".to_string()))?;

        let mut tickers = Vec::with_capacity(rows.len());
        for row in rows {
            let native = row["symbol"].as_str().unwrap_or_default();
            let symbol = match Self::unified_symbol(native) {
                Some(s) => s,
                None => continue,
            };
            let bid = field_f64(row, "bidPrice");
            let ask = field_f64(row, "askPrice");
            tickers.push(Ticker {
                symbol,
                last_price: field_f64(row, "lastPrice"),
                quote_volume_24h: field_f64(row, "quoteVolume"),
                bid: (bid > 0.0).then_some(bid),
                ask: (ask > 0.0).then_some(ask),
            });
        }
        Ok(tickers)
    }

    async fn fetch_ohlcv(
        &self,
        symbol: &str,
        timeframe: &str,
        limit: usize,
    ) -> EngineResult<Vec<Candle>> {
        let path = format!(
            "/api/v3/klines?symbol={}&interval={}&limit={}",
            Self::native_symbol(symbol),
            timeframe,
            limit
        );
        let json = self.get_json(&path).await?;
        let rows = json
            .as_array()
            .ok_or_else(|| EngineError::Transient("kline payload is not an array".to_string()))?;

        let mut candles = Vec::with_capacity(rows.len());
        for row in rows {
            let parse = |idx: usize| -> f64 {
                row.get(idx)
                    .and_then(|v| v.as_str())
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(0.0)
            };
            candles.push(Candle {
                timestamp: row.get(0).and_then(|v| v.as_i64()).unwrap_or(0),
                open: parse(1),
                high: parse(2),
                low: parse(3),
                close: parse(4),
                volume: parse(5),
            });
        }
        if candles.is_empty() {
            return Err(EngineError::DataInsufficient(format!(
                "no candles returned for {}",
                symbol
            )));
        }
        Ok(candles)
    }

    async fn fetch_order_book(&self, symbol: &str, depth: usize) -> EngineResult<OrderBook> {
        let path = format!(
            "/api/v3/depth?symbol={}&limit={}",
            Self::native_symbol(symbol),
            depth
        );
        let json = self.get_json(&path).await?;

        let parse_side = |key: &str| -> Vec<BookLevel> {
            json[key]
                .as_array()
                .map(|rows| rows.iter().filter_map(level_from_pair).collect())
                .unwrap_or_default()
        };

        Ok(OrderBook {
            bids: parse_side("bids"),
            asks: parse_side("asks"),
        })
    }

    async fn fetch_balance(&self, _currency: &str) -> EngineResult<f64> {
        Err(EngineError::Config(format!(
            "{}: balance queries need an authenticated client",
            self.exchange
        )))
    }

    async fn create_order(&self, request: &OrderRequest) -> EngineResult<OrderReceipt> {
        Err(EngineError::Config(format!(
            "{}: cannot place {} order without an authenticated client",
            self.exchange, request.symbol
        )))
    }

    async fn cancel_order(&self, _order_id: &str, symbol: &str) -> EngineResult<()> {
        Err(EngineError::Config(format!(
            "{}: cannot cancel order for {} without an authenticated client",
            self.exchange, symbol
        )))
    }

    async fn fetch_my_fills(&self, _symbol: Option<&str>) -> EngineResult<Vec<Fill>> {
        Err(EngineError::Config(format!(
            "{}: trade history needs an authenticated client",
            self.exchange
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symbol_mapping() {
        assert_eq!(RestExchange::native_symbol("BTC/USDT"), "BTCUSDT");
        assert_eq!(
            RestExchange::unified_symbol("BTCUSDT").as_deref(),
            Some("BTC/USDT")
        );
        assert_eq!(RestExchange::unified_symbol("BTCBUSD"), None);
    }

    #[test]
    fn test_unsupported_exchange_rejected() {
        assert!(RestExchange::new(ExchangeId::Okx).is_err());
    }
}
