//! Momentum breakout: MACD crossing above its signal while price clears
//! the upper Bollinger band and VWAP, with RSI under a ceiling and
//! relative volume above threshold.

use super::EvaluationContext;
use crate::indicators;

pub fn evaluate(ctx: &EvaluationContext<'_>) -> bool {
    let params = &ctx.settings.momentum_breakout;
    let last = match ctx.last_closed() {
        Some(i) if i >= 1 => i,
        _ => return false,
    };
    let prev = last - 1;

    let closes: Vec<f64> = ctx.candles.iter().map(|c| c.close).collect();
    let vwap = indicators::vwap(ctx.candles);
    let (_, _, bbu) = indicators::bollinger(&closes, params.bbands_period, params.bbands_stddev);
    let (macd_line, signal_line) =
        indicators::macd(&closes, params.macd_fast, params.macd_slow, params.macd_signal);
    let rsi = indicators::rsi(&closes, params.rsi_period);

    let values = [
        macd_line[last],
        macd_line[prev],
        signal_line[last],
        signal_line[prev],
        bbu[last],
        vwap[last],
        rsi[last],
    ];
    if values.iter().any(|v| !v.is_finite()) {
        return false;
    }

    let crossed_up = macd_line[prev] <= signal_line[prev] && macd_line[last] > signal_line[last];

    crossed_up
        && closes[last] > bbu[last]
        && closes[last] > vwap[last]
        && rsi[last] < params.rsi_max_level
        && ctx.rvol_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::exchange::mock::MockExchange;
    use crate::exchange::{Candle, ExchangeId, MarketData};
    use std::sync::Arc;

    fn flat_candles(n: usize) -> Vec<Candle> {
        (0..n)
            .map(|i| Candle {
                timestamp: i as i64,
                open: 100.0,
                high: 101.0,
                low: 99.0,
                close: 100.0,
                volume: 1000.0,
            })
            .collect()
    }

    #[test]
    fn test_no_signal_on_flat_market() {
        let settings = Settings::default();
        let client: Arc<dyn MarketData> = Arc::new(MockExchange::new(ExchangeId::Binance));
        let candles = flat_candles(120);
        let ctx = EvaluationContext {
            symbol: "BTC/USDT",
            candles: &candles,
            rvol: Some(3.0),
            client: &client,
            settings: &settings,
        };
        assert!(!evaluate(&ctx));
    }

    #[test]
    fn test_no_signal_on_short_series() {
        let settings = Settings::default();
        let client: Arc<dyn MarketData> = Arc::new(MockExchange::new(ExchangeId::Binance));
        let candles = flat_candles(10);
        let ctx = EvaluationContext {
            symbol: "BTC/USDT",
            candles: &candles,
            rvol: Some(3.0),
            client: &client,
            settings: &settings,
        };
        assert!(!evaluate(&ctx));
    }
}
