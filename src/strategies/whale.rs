//! Whale radar: aggregate USD value resting on the top bid levels above a
//! configurable wall threshold.

use super::EvaluationContext;
use crate::logger::{self, LogTag};

const BOOK_DEPTH: usize = 20;
const BID_LEVELS_COUNTED: usize = 10;

pub async fn evaluate(ctx: &EvaluationContext<'_>) -> bool {
    let threshold = ctx.settings.whale_radar.wall_threshold_usdt;

    let book = match ctx.client.fetch_order_book(ctx.symbol, BOOK_DEPTH).await {
        Ok(book) => book,
        Err(e) => {
            logger::debug(
                LogTag::Strategy,
                &format!("whale radar: order book fetch failed for {}: {}", ctx.symbol, e),
            );
            return false;
        }
    };

    if book.bids.is_empty() {
        return false;
    }
    book.top_bid_value(BID_LEVELS_COUNTED) > threshold
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::exchange::mock::MockExchange;
    use crate::exchange::{BookLevel, ExchangeId, MarketData, OrderBook};
    use std::sync::Arc;

    fn book(levels: usize, price: f64, quantity: f64) -> OrderBook {
        OrderBook {
            bids: (0..levels)
                .map(|i| BookLevel {
                    price: price - i as f64,
                    quantity,
                })
                .collect(),
            asks: vec![],
        }
    }

    fn ctx<'a>(
        settings: &'a Settings,
        client: &'a Arc<dyn MarketData>,
    ) -> EvaluationContext<'a> {
        EvaluationContext {
            symbol: "BTC/USDT",
            candles: &[],
            rvol: None,
            client,
            settings,
        }
    }

    #[tokio::test]
    async fn test_wall_above_threshold_fires() {
        let settings = Settings::default(); // threshold 30k
        let mock = MockExchange::new(ExchangeId::Binance);
        // 10 levels near 100.0 holding 40 units each: ~40k of bids
        mock.set_order_book("BTC/USDT", book(15, 100.0, 40.0));
        let client: Arc<dyn MarketData> = Arc::new(mock);

        assert!(evaluate(&ctx(&settings, &client)).await);
    }

    #[tokio::test]
    async fn test_thin_book_does_not_fire() {
        let settings = Settings::default();
        let mock = MockExchange::new(ExchangeId::Binance);
        mock.set_order_book("BTC/USDT", book(10, 100.0, 1.0)); // ~1k of bids
        let client: Arc<dyn MarketData> = Arc::new(mock);

        assert!(!evaluate(&ctx(&settings, &client)).await);
    }

    #[tokio::test]
    async fn test_fetch_failure_yields_no_signal() {
        let settings = Settings::default();
        let mock = MockExchange::new(ExchangeId::Binance); // no book primed
        let client: Arc<dyn MarketData> = Arc::new(mock);

        assert!(!evaluate(&ctx(&settings, &client)).await);
    }
}
