//! In-memory exchange used by unit tests
//!
//! Records placed and cancelled orders and can be primed with tickers,
//! candles, books, balances, fills and one-shot failures.

use super::types::{Candle, Fill, OrderBook, OrderReceipt, OrderRequest, Ticker};
use super::{ExchangeId, MarketData};
use crate::errors::{EngineError, EngineResult};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

#[derive(Default)]
struct MockState {
    tickers: Vec<Ticker>,
    candles: HashMap<String, Vec<Candle>>,
    books: HashMap<String, OrderBook>,
    balances: HashMap<String, f64>,
    fills: Vec<Fill>,
    placed: Vec<OrderRequest>,
    cancelled: Vec<String>,
    fail_next_cancel_not_found: bool,
    fail_next_create_transient: bool,
    fail_tickers_rate_limited: bool,
}

pub struct MockExchange {
    exchange: ExchangeId,
    state: Mutex<MockState>,
    next_order_id: AtomicU64,
}

impl MockExchange {
    pub fn new(exchange: ExchangeId) -> Self {
        Self {
            exchange,
            state: Mutex::new(MockState::default()),
            next_order_id: AtomicU64::new(1),
        }
    }

    pub fn set_tickers(&self, tickers: Vec<Ticker>) {
        self.state.lock().unwrap().tickers = tickers;
    }

    pub fn set_candles(&self, symbol: &str, candles: Vec<Candle>) {
        self.state
            .lock()
            .unwrap()
            .candles
            .insert(symbol.to_string(), candles);
    }

    pub fn set_order_book(&self, symbol: &str, book: OrderBook) {
        self.state
            .lock()
            .unwrap()
            .books
            .insert(symbol.to_string(), book);
    }

    pub fn set_balance(&self, currency: &str, amount: f64) {
        self.state
            .lock()
            .unwrap()
            .balances
            .insert(currency.to_string(), amount);
    }

    pub fn set_fills(&self, fills: Vec<Fill>) {
        self.state.lock().unwrap().fills = fills;
    }

    pub fn fail_next_cancel_with_not_found(&self) {
        self.state.lock().unwrap().fail_next_cancel_not_found = true;
    }

    pub fn fail_next_create_with_transient(&self) {
        self.state.lock().unwrap().fail_next_create_transient = true;
    }

    pub fn fail_tickers_with_rate_limit(&self) {
        self.state.lock().unwrap().fail_tickers_rate_limited = true;
    }

    pub fn placed_orders(&self) -> Vec<OrderRequest> {
        self.state.lock().unwrap().placed.clone()
    }

    pub fn cancelled_ids(&self) -> Vec<String> {
        self.state.lock().unwrap().cancelled.clone()
    }
}

#[async_trait]
impl MarketData for MockExchange {
    fn exchange(&self) -> ExchangeId {
        self.exchange
    }

    async fn fetch_tickers(&self) -> EngineResult<Vec<Ticker>> {
        let mut state = self.state.lock().unwrap();
        if state.fail_tickers_rate_limited {
            state.fail_tickers_rate_limited = false;
            return Err(EngineError::RateLimited {
                exchange: self.exchange.to_string(),
                message: "mock 429".to_string(),
            });
        }
        Ok(state.tickers.clone())
    }

    async fn fetch_ohlcv(
        &self,
        symbol: &str,
        _timeframe: &str,
        limit: usize,
    ) -> EngineResult<Vec<Candle>> {
        let state = self.state.lock().unwrap();
        match state.candles.get(symbol) {
            Some(candles) => {
                let start = candles.len().saturating_sub(limit);
                Ok(candles[start..].to_vec())
            }
            None => Err(EngineError::DataInsufficient(format!(
                "no candles for {}",
                symbol
            ))),
        }
    }

    async fn fetch_order_book(&self, symbol: &str, depth: usize) -> EngineResult<OrderBook> {
        let state = self.state.lock().unwrap();
        match state.books.get(symbol) {
            Some(book) => Ok(OrderBook {
                bids: book.bids.iter().take(depth).copied().collect(),
                asks: book.asks.iter().take(depth).copied().collect(),
            }),
            None => Err(EngineError::NotFound(format!("no book for {}", symbol))),
        }
    }

    async fn fetch_balance(&self, currency: &str) -> EngineResult<f64> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .balances
            .get(currency)
            .copied()
            .unwrap_or(0.0))
    }

    async fn create_order(&self, request: &OrderRequest) -> EngineResult<OrderReceipt> {
        let mut state = self.state.lock().unwrap();
        if state.fail_next_create_transient {
            state.fail_next_create_transient = false;
            return Err(EngineError::Transient("mock network error".to_string()));
        }
        state.placed.push(request.clone());
        let id = self.next_order_id.fetch_add(1, Ordering::SeqCst);
        Ok(OrderReceipt {
            order_id: format!("{}-{}", self.exchange, id),
            filled_quantity: request.quantity,
            average_price: None,
        })
    }

    async fn cancel_order(&self, order_id: &str, _symbol: &str) -> EngineResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_next_cancel_not_found {
            state.fail_next_cancel_not_found = false;
            return Err(EngineError::NotFound(format!("order {}", order_id)));
        }
        state.cancelled.push(order_id.to_string());
        Ok(())
    }

    async fn fetch_my_fills(&self, symbol: Option<&str>) -> EngineResult<Vec<Fill>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .fills
            .iter()
            .filter(|f| symbol.map_or(true, |s| f.symbol == s))
            .cloned()
            .collect())
    }
}
