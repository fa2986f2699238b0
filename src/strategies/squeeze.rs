//! Breakout squeeze: Bollinger bands fully inside the Keltner channel on
//! the previous bar, then a close above the upper Bollinger band with
//! rising on-balance volume and a volume spike.

use super::EvaluationContext;
use crate::indicators;

pub fn evaluate(ctx: &EvaluationContext<'_>) -> bool {
    let params = &ctx.settings.breakout_squeeze;
    let last = match ctx.last_closed() {
        Some(i) if i >= 1 => i,
        _ => return false,
    };
    let prev = last - 1;

    let closes: Vec<f64> = ctx.candles.iter().map(|c| c.close).collect();
    let volumes: Vec<f64> = ctx.candles.iter().map(|c| c.volume).collect();

    let (bbl, _, bbu) = indicators::bollinger(&closes, params.bbands_period, params.bbands_stddev);
    let (kcl, kcu) =
        indicators::keltner(ctx.candles, params.keltner_period, params.keltner_atr_multiplier);
    let obv = indicators::obv(ctx.candles);
    let volume_mean = indicators::sma(&volumes, 20);

    let values = [bbl[prev], bbu[prev], kcl[prev], kcu[prev], bbu[last]];
    if values.iter().any(|v| !v.is_finite()) {
        return false;
    }

    let in_squeeze = bbl[prev] > kcl[prev] && bbu[prev] < kcu[prev];
    if !in_squeeze {
        return false;
    }

    let breakout_fired = closes[last] > bbu[last];
    let volume_ok = !params.volume_confirmation_enabled
        || (volume_mean[last].is_finite() && volumes[last] > volume_mean[last] * 1.5);
    let obv_rising = obv[last] > obv[prev];

    breakout_fired && ctx.rvol_ok() && obv_rising && volume_ok
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::exchange::mock::MockExchange;
    use crate::exchange::{Candle, ExchangeId, MarketData};
    use std::sync::Arc;

    fn candle(close: f64, spread: f64, volume: f64) -> Candle {
        Candle {
            timestamp: 0,
            open: close,
            high: close + spread,
            low: close - spread,
            close,
            volume,
        }
    }

    #[test]
    fn test_squeeze_then_breakout_fires() {
        // Long tight range (narrow bands inside a wider Keltner channel
        // held open by earlier volatility), then a high-volume breakout.
        let mut candles: Vec<Candle> = Vec::new();
        for i in 0..30 {
            // Early volatility to widen ATR
            let close = 100.0 + if i % 2 == 0 { 2.0 } else { -2.0 };
            candles.push(candle(close, 3.0, 1000.0));
        }
        for _ in 0..25 {
            // Tight compression: closes pinned at 100 with tiny range
            candles.push(candle(100.0, 0.2, 1000.0));
        }
        // Breakout candle (last closed), then the forming candle
        candles.push(candle(106.0, 1.0, 5000.0));
        candles.push(candle(106.0, 1.0, 100.0));

        let settings = Settings::default();
        let client: Arc<dyn MarketData> = Arc::new(MockExchange::new(ExchangeId::Binance));
        let ctx = EvaluationContext {
            symbol: "BTC/USDT",
            candles: &candles,
            rvol: Some(3.0),
            client: &client,
            settings: &settings,
        };
        assert!(evaluate(&ctx));
    }

    #[test]
    fn test_no_signal_without_breakout() {
        // Oscillating closes never clear the upper Bollinger band
        let mut candles: Vec<Candle> = Vec::new();
        for i in 0..60 {
            let close = 100.0 + if i % 2 == 0 { 5.0 } else { -5.0 };
            candles.push(candle(close, 1.0, 1000.0));
        }
        let settings = Settings::default();
        let client: Arc<dyn MarketData> = Arc::new(MockExchange::new(ExchangeId::Binance));
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
