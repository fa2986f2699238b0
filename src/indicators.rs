//! Technical indicator math over candle series
//!
//! All series functions return a vector aligned with the input; positions
//! inside the warm-up window are `f64::NAN` so callers can index relative
//! to the end without off-by-one bookkeeping. Inputs are oldest first.

use crate::exchange::Candle;

/// Simple moving average
pub fn sma(values: &[f64], period: usize) -> Vec<f64> {
    let mut out = vec![f64::NAN; values.len()];
    if period == 0 || values.len() < period {
        return out;
    }
    let mut sum: f64 = values[..period].iter().sum();
    out[period - 1] = sum / period as f64;
    for i in period..values.len() {
        sum += values[i] - values[i - period];
        out[i] = sum / period as f64;
    }
    out
}

/// Exponential moving average, seeded with the SMA of the first period
pub fn ema(values: &[f64], period: usize) -> Vec<f64> {
    let mut out = vec![f64::NAN; values.len()];
    if period == 0 || values.len() < period {
        return out;
    }
    let alpha = 2.0 / (period as f64 + 1.0);
    let mut current: f64 = values[..period].iter().sum::<f64>() / period as f64;
    out[period - 1] = current;
    for i in period..values.len() {
        current = alpha * values[i] + (1.0 - alpha) * current;
        out[i] = current;
    }
    out
}

/// Relative strength index with Wilder smoothing
pub fn rsi(closes: &[f64], period: usize) -> Vec<f64> {
    let mut out = vec![f64::NAN; closes.len()];
    if period == 0 || closes.len() <= period {
        return out;
    }

    let mut avg_gain = 0.0;
    let mut avg_loss = 0.0;
    for i in 1..=period {
        let change = closes[i] - closes[i - 1];
        if change > 0.0 {
            avg_gain += change;
        } else {
            avg_loss -= change;
        }
    }
    avg_gain /= period as f64;
    avg_loss /= period as f64;
    out[period] = rsi_from_averages(avg_gain, avg_loss);

    for i in (period + 1)..closes.len() {
        let change = closes[i] - closes[i - 1];
        let (gain, loss) = if change > 0.0 {
            (change, 0.0)
        } else {
            (0.0, -change)
        };
        avg_gain = (avg_gain * (period as f64 - 1.0) + gain) / period as f64;
        avg_loss = (avg_loss * (period as f64 - 1.0) + loss) / period as f64;
        out[i] = rsi_from_averages(avg_gain, avg_loss);
    }
    out
}

fn rsi_from_averages(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 {
        return 100.0;
    }
    100.0 - 100.0 / (1.0 + avg_gain / avg_loss)
}

/// MACD line and its signal line
pub fn macd(closes: &[f64], fast: usize, slow: usize, signal: usize) -> (Vec<f64>, Vec<f64>) {
    let fast_ema = ema(closes, fast);
    let slow_ema = ema(closes, slow);
    let macd_line: Vec<f64> = fast_ema
        .iter()
        .zip(slow_ema.iter())
        .map(|(f, s)| f - s)
        .collect();

    // Signal EMA runs over the finite part of the MACD line only
    let first_finite = macd_line.iter().position(|v| v.is_finite());
    let mut signal_line = vec![f64::NAN; closes.len()];
    if let Some(start) = first_finite {
        let finite = &macd_line[start..];
        let signal_ema = ema(finite, signal);
        for (i, value) in signal_ema.into_iter().enumerate() {
            signal_line[start + i] = value;
        }
    }
    (macd_line, signal_line)
}

/// True range of one candle against the previous close
fn true_range(candle: &Candle, prev_close: f64) -> f64 {
    let hl = candle.high - candle.low;
    let hc = (candle.high - prev_close).abs();
    let lc = (candle.low - prev_close).abs();
    hl.max(hc).max(lc)
}

/// Average true range with Wilder smoothing
pub fn atr(candles: &[Candle], period: usize) -> Vec<f64> {
    let mut out = vec![f64::NAN; candles.len()];
    if period == 0 || candles.len() <= period {
        return out;
    }

    let mut current: f64 = (1..=period)
        .map(|i| true_range(&candles[i], candles[i - 1].close))
        .sum::<f64>()
        / period as f64;
    out[period] = current;

    for i in (period + 1)..candles.len() {
        let tr = true_range(&candles[i], candles[i - 1].close);
        current = (current * (period as f64 - 1.0) + tr) / period as f64;
        out[i] = current;
    }
    out
}

/// Volume-weighted average price, cumulative over the series
pub fn vwap(candles: &[Candle]) -> Vec<f64> {
    let mut out = vec![f64::NAN; candles.len()];
    let mut pv_sum = 0.0;
    let mut volume_sum = 0.0;
    for (i, candle) in candles.iter().enumerate() {
        let typical = (candle.high + candle.low + candle.close) / 3.0;
        pv_sum += typical * candle.volume;
        volume_sum += candle.volume;
        if volume_sum > 0.0 {
            out[i] = pv_sum / volume_sum;
        }
    }
    out
}

/// Bollinger bands: (lower, middle, upper)
pub fn bollinger(closes: &[f64], period: usize, stddev: f64) -> (Vec<f64>, Vec<f64>, Vec<f64>) {
    let middle = sma(closes, period);
    let mut lower = vec![f64::NAN; closes.len()];
    let mut upper = vec![f64::NAN; closes.len()];
    if period == 0 || closes.len() < period {
        return (lower, middle, upper);
    }

    for i in (period - 1)..closes.len() {
        let window = &closes[i + 1 - period..=i];
        let mean = middle[i];
        let variance = window.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / period as f64;
        let sd = variance.sqrt();
        lower[i] = mean - stddev * sd;
        upper[i] = mean + stddev * sd;
    }
    (lower, middle, upper)
}

/// Keltner channels around the EMA of typical price: (lower, upper)
pub fn keltner(candles: &[Candle], period: usize, multiplier: f64) -> (Vec<f64>, Vec<f64>) {
    let typical: Vec<f64> = candles
        .iter()
        .map(|c| (c.high + c.low + c.close) / 3.0)
        .collect();
    let basis = ema(&typical, period);
    let range = atr(candles, period);

    let mut lower = vec![f64::NAN; candles.len()];
    let mut upper = vec![f64::NAN; candles.len()];
    for i in 0..candles.len() {
        if basis[i].is_finite() && range[i].is_finite() {
            lower[i] = basis[i] - multiplier * range[i];
            upper[i] = basis[i] + multiplier * range[i];
        }
    }
    (lower, upper)
}

/// On-balance volume
pub fn obv(candles: &[Candle]) -> Vec<f64> {
    let mut out = vec![0.0; candles.len()];
    for i in 1..candles.len() {
        let delta = if candles[i].close > candles[i - 1].close {
            candles[i].volume
        } else if candles[i].close < candles[i - 1].close {
            -candles[i].volume
        } else {
            0.0
        };
        out[i] = out[i - 1] + delta;
    }
    out
}

/// Relative volume of the latest closed candle against the mean of the
/// preceding `period` candles
pub fn rvol(candles: &[Candle], period: usize) -> Option<f64> {
    if period == 0 || candles.len() < period + 2 {
        return None;
    }
    // Latest candle is still forming; compare the last closed one
    let closed = &candles[..candles.len() - 1];
    let last = closed[closed.len() - 1].volume;
    let baseline: f64 = closed[closed.len() - 1 - period..closed.len() - 1]
        .iter()
        .map(|c| c.volume)
        .sum::<f64>()
        / period as f64;
    if baseline <= 0.0 {
        return None;
    }
    Some(last / baseline)
}

/// Pivot-based support and resistance levels: (supports, resistances)
///
/// A pivot low is a bar whose low is the minimum of the surrounding
/// `window` bars on each side; pivots within 0.5% of each other are
/// merged into their mean.
pub fn support_resistance(highs: &[f64], lows: &[f64], window: usize) -> (Vec<f64>, Vec<f64>) {
    let mut supports = Vec::new();
    let mut resistances = Vec::new();
    if highs.len() < 2 * window + 1 || highs.len() != lows.len() {
        return (supports, resistances);
    }

    for i in window..highs.len() - window {
        let slice = i - window..=i + window;
        if highs[i] >= highs[slice.clone()].iter().fold(f64::MIN, |a, &b| a.max(b)) {
            resistances.push(highs[i]);
        }
        if lows[i] <= lows[slice].iter().fold(f64::MAX, |a, &b| a.min(b)) {
            supports.push(lows[i]);
        }
    }

    (cluster_levels(supports, 0.5), cluster_levels(resistances, 0.5))
}

fn cluster_levels(mut levels: Vec<f64>, tolerance_percent: f64) -> Vec<f64> {
    if levels.is_empty() {
        return levels;
    }
    levels.sort_by(|a, b| a.total_cmp(b));

    let mut clustered = Vec::new();
    let mut current = vec![levels[0]];
    for level in levels.into_iter().skip(1) {
        let anchor = current[current.len() - 1];
        if anchor > 0.0 && (level - anchor) / anchor * 100.0 < tolerance_percent {
            current.push(level);
        } else {
            clustered.push(current.iter().sum::<f64>() / current.len() as f64);
            current = vec![level];
        }
    }
    clustered.push(current.iter().sum::<f64>() / current.len() as f64);
    clustered
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candle(high: f64, low: f64, close: f64, volume: f64) -> Candle {
        Candle {
            timestamp: 0,
            open: close,
            high,
            low,
            close,
            volume,
        }
    }

    #[test]
    fn test_sma_alignment() {
        let values = [1.0, 2.0, 3.0, 4.0, 5.0];
        let out = sma(&values, 3);
        assert!(out[0].is_nan() && out[1].is_nan());
        assert_eq!(out[2], 2.0);
        assert_eq!(out[4], 4.0);
    }

    #[test]
    fn test_ema_converges_to_constant() {
        let values = vec![10.0; 50];
        let out = ema(&values, 5);
        assert!((out[49] - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_rsi_bounds() {
        let rising: Vec<f64> = (0..30).map(|i| 100.0 + i as f64).collect();
        let out = rsi(&rising, 14);
        assert_eq!(out[29], 100.0);

        let falling: Vec<f64> = (0..30).map(|i| 100.0 - i as f64).collect();
        let out = rsi(&falling, 14);
        assert!(out[29] < 1.0);
    }

    #[test]
    fn test_atr_on_constant_range() {
        // Every candle spans exactly 2.0 with no gaps, so ATR is 2.0
        let candles: Vec<Candle> = (0..20).map(|_| candle(101.0, 99.0, 100.0, 1.0)).collect();
        let out = atr(&candles, 14);
        assert!((out[19] - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_macd_cross_direction() {
        // Flat then sharply rising closes give a positive MACD above signal
        let mut closes = vec![100.0; 40];
        closes.extend((1..=20).map(|i| 100.0 + i as f64 * 2.0));
        let (line, signal) = macd(&closes, 12, 26, 9);
        let last = closes.len() - 1;
        assert!(line[last] > 0.0);
        assert!(line[last] > signal[last]);
    }

    #[test]
    fn test_bollinger_symmetric_around_mean() {
        let closes = [10.0, 12.0, 11.0, 13.0, 12.0, 14.0];
        let (lower, middle, upper) = bollinger(&closes, 5, 2.0);
        let i = closes.len() - 1;
        assert!((middle[i] - (upper[i] + lower[i]) / 2.0).abs() < 1e-9);
        assert!(upper[i] > middle[i]);
    }

    #[test]
    fn test_obv_accumulates_with_direction() {
        let candles = vec![
            candle(10.0, 9.0, 10.0, 100.0),
            candle(11.0, 10.0, 11.0, 50.0),
            candle(11.0, 10.0, 10.5, 30.0),
            candle(11.0, 10.0, 10.5, 40.0),
        ];
        let out = obv(&candles);
        assert_eq!(out, vec![0.0, 50.0, 20.0, 20.0]);
    }

    #[test]
    fn test_rvol_excludes_forming_candle() {
        let mut candles: Vec<Candle> = (0..10).map(|_| candle(10.0, 9.0, 9.5, 100.0)).collect();
        candles.push(candle(10.0, 9.0, 9.5, 300.0)); // last closed candle
        candles.push(candle(10.0, 9.0, 9.5, 5.0)); // still forming
        let out = rvol(&candles, 5).unwrap();
        assert!((out - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_support_clustering_merges_close_levels() {
        // Sloped baselines so only the injected spikes qualify as pivots
        let mut lows: Vec<f64> = (0..30).map(|i| 100.0 + i as f64 * 0.1).collect();
        let mut highs: Vec<f64> = (0..30).map(|i| 120.0 - i as f64 * 0.1).collect();
        lows[5] = 90.0;
        lows[20] = 90.2; // within 0.5% of the first pivot
        highs[12] = 130.0;
        let (supports, resistances) = support_resistance(&highs, &lows, 3);
        assert_eq!(supports.len(), 1);
        assert!((supports[0] - 90.1).abs() < 1e-9);
        assert_eq!(resistances.len(), 1);
        assert_eq!(resistances[0], 130.0);
    }
}
