//! Support rebound: price sitting within 1% above a clustered pivot-low
//! support on the hourly chart, confirmed by a bullish scan-timeframe
//! candle on elevated volume.

use super::EvaluationContext;
use crate::config::HIGHER_TIMEFRAME;
use crate::indicators;
use crate::logger::{self, LogTag};

const HOURLY_LOOKBACK: usize = 100;
const MIN_HOURLY_CANDLES: usize = 50;
const PIVOT_WINDOW: usize = 5;

pub async fn evaluate(ctx: &EvaluationContext<'_>) -> bool {
    let hourly = match ctx
        .client
        .fetch_ohlcv(ctx.symbol, HIGHER_TIMEFRAME, HOURLY_LOOKBACK)
        .await
    {
        Ok(candles) => candles,
        Err(e) => {
            logger::debug(
                LogTag::Strategy,
                &format!("support rebound: 1h fetch failed for {}: {}", ctx.symbol, e),
            );
            return false;
        }
    };
    if hourly.len() < MIN_HOURLY_CANDLES {
        return false;
    }

    let current_price = hourly[hourly.len() - 1].close;
    let highs: Vec<f64> = hourly.iter().map(|c| c.high).collect();
    let lows: Vec<f64> = hourly.iter().map(|c| c.low).collect();
    let (supports, _) = indicators::support_resistance(&highs, &lows, PIVOT_WINDOW);

    let closest_support = supports
        .into_iter()
        .filter(|s| *s < current_price)
        .fold(None, |best: Option<f64>, s| match best {
            Some(b) if b >= s => Some(b),
            _ => Some(s),
        });
    let support = match closest_support {
        Some(s) if s > 0.0 => s,
        _ => return false,
    };

    if (current_price - support) / support * 100.0 >= 1.0 {
        return false;
    }

    // Bullish confirmation candle on the scan timeframe with volume push
    let last = match ctx.last_closed() {
        Some(i) => i,
        None => return false,
    };
    let volumes: Vec<f64> = ctx.candles.iter().map(|c| c.volume).collect();
    let volume_mean = indicators::sma(&volumes, 20);
    if !volume_mean[last].is_finite() {
        return false;
    }

    let confirmation = &ctx.candles[last];
    confirmation.close > confirmation.open && confirmation.volume > volume_mean[last] * 1.5
}
