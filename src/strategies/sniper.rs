//! Sniper: N hours of tight price compression followed by a close above
//! the compression range on at least double the average volume.

use super::EvaluationContext;

/// Candles per hour on the 15m scan timeframe
const CANDLES_PER_HOUR: f64 = 4.0;

pub fn evaluate(ctx: &EvaluationContext<'_>) -> bool {
    let params = &ctx.settings.sniper;
    let compression_candles = (params.compression_hours * CANDLES_PER_HOUR) as usize;
    let n = ctx.candles.len();
    if compression_candles == 0 || n < compression_candles + 3 {
        return false;
    }

    // Breakout candle is the last closed one; the compression window ends
    // just before it so the breakout cannot shadow its own range.
    let breakout = &ctx.candles[n - 2];
    let window = &ctx.candles[n - 2 - compression_candles..n - 2];

    let highest_high = window.iter().fold(f64::MIN, |a, c| a.max(c.high));
    let lowest_low = window.iter().fold(f64::MAX, |a, c| a.min(c.low));
    if lowest_low <= 0.0 {
        return false;
    }

    let volatility = (highest_high - lowest_low) / lowest_low * 100.0;
    if volatility >= params.max_volatility_percent {
        return false;
    }

    let avg_volume = window.iter().map(|c| c.volume).sum::<f64>() / window.len() as f64;
    breakout.close > highest_high && breakout.volume > avg_volume * 2.0
}
