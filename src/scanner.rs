//! Concurrent market scanner
//!
//! A bounded pool of workers drains the cycle's candidate queue, runs the
//! active strategies on each symbol and collects raw per-strategy hits.
//! Every per-symbol failure is isolated: rate limits pause the worker,
//! transient errors bump a counter, nothing aborts the cycle.

use crate::config::{Settings, TIMEFRAME};
use crate::errors::EngineError;
use crate::exchange::{Candle, ExchangeClients, MarketData};
use crate::indicators;
use crate::logger::{self, LogTag};
use crate::markets::MarketCandidate;
use crate::strategies::{self, EvaluationContext, StrategyKind};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Candles fetched per symbol; enough for a 200-period trend EMA
const CANDLE_LIMIT: usize = 220;

/// Hard cap on one symbol's evaluation, fetches included
const PER_SYMBOL_TIMEOUT: Duration = Duration::from_secs(30);

/// One strategy agreeing on one market this cycle
#[derive(Debug, Clone)]
pub struct RawHit {
    pub candidate: MarketCandidate,
    pub reason: StrategyKind,
}

/// Everything a scan pass produced
#[derive(Debug, Default)]
pub struct ScanOutcome {
    pub hits: Vec<RawHit>,
    pub symbols_scanned: usize,
    pub failures: usize,
}

/// Drain `candidates` with `settings.concurrent_workers` workers and
/// collect raw strategy hits
pub async fn scan_markets(
    clients: &ExchangeClients,
    settings: &Settings,
    candidates: Vec<MarketCandidate>,
) -> ScanOutcome {
    if settings.active_scanners.is_empty() {
        logger::warning(LogTag::Scanner, "No active strategies, skipping scan");
        return ScanOutcome::default();
    }

    let total = candidates.len();
    let queue = Arc::new(Mutex::new(VecDeque::from(candidates)));
    let results: Arc<Mutex<Vec<RawHit>>> = Arc::new(Mutex::new(Vec::new()));
    let failures = Arc::new(AtomicUsize::new(0));

    let worker_count = settings.concurrent_workers.max(1);
    let mut workers = Vec::with_capacity(worker_count);
    for _ in 0..worker_count {
        let queue = queue.clone();
        let results = results.clone();
        let failures = failures.clone();
        let clients = clients.clone();
        let settings = settings.clone();
        workers.push(tokio::spawn(async move {
            worker_loop(queue, results, failures, clients, settings).await;
        }));
    }
    for worker in workers {
        // A panicked worker loses its in-flight symbol, never the cycle
        if worker.await.is_err() {
            failures.fetch_add(1, Ordering::Relaxed);
            logger::error(LogTag::Scanner, "Scan worker panicked");
        }
    }

    let hits = Arc::try_unwrap(results)
        .map(|m| m.into_inner().unwrap_or_default())
        .unwrap_or_default();
    let failures = failures.load(Ordering::Relaxed);

    logger::info(
        LogTag::Scanner,
        &format!(
            "🔍 Scan finished: {} symbols, {} hits, {} failures",
            total,
            hits.len(),
            failures
        ),
    );

    ScanOutcome {
        hits,
        symbols_scanned: total,
        failures,
    }
}

async fn worker_loop(
    queue: Arc<Mutex<VecDeque<MarketCandidate>>>,
    results: Arc<Mutex<Vec<RawHit>>>,
    failures: Arc<AtomicUsize>,
    clients: ExchangeClients,
    settings: Settings,
) {
    loop {
        let candidate = match queue.lock() {
            Ok(mut q) => match q.pop_front() {
                Some(c) => c,
                None => return,
            },
            Err(_) => return,
        };

        let client = match clients.get(&candidate.exchange) {
            Some(client) => client.clone(),
            None => {
                logger::warning(
                    LogTag::Scanner,
                    &format!("No client for {} ({})", candidate.exchange, candidate.symbol),
                );
                continue;
            }
        };

        let evaluated =
            tokio::time::timeout(PER_SYMBOL_TIMEOUT, evaluate_candidate(&client, &settings, &candidate))
                .await;

        match evaluated {
            Ok(Ok(hits)) => {
                if !hits.is_empty() {
                    if let Ok(mut shared) = results.lock() {
                        shared.extend(hits);
                    }
                }
            }
            Ok(Err(e @ EngineError::RateLimited { .. })) => {
                failures.fetch_add(1, Ordering::Relaxed);
                let pause = e.retry_after_seconds().unwrap_or(10);
                logger::warning(
                    LogTag::Scanner,
                    &format!("⏳ Rate limited on {}, pausing {}s", candidate.exchange, pause),
                );
                tokio::time::sleep(Duration::from_secs(pause)).await;
            }
            Ok(Err(EngineError::DataInsufficient(msg))) => {
                logger::debug(LogTag::Scanner, &format!("{}: {}", candidate.symbol, msg));
            }
            Ok(Err(EngineError::Transient(msg))) => {
                failures.fetch_add(1, Ordering::Relaxed);
                logger::debug(
                    LogTag::Scanner,
                    &format!("Transient failure on {}: {}", candidate.symbol, msg),
                );
            }
            Ok(Err(e)) => {
                failures.fetch_add(1, Ordering::Relaxed);
                logger::error(
                    LogTag::Scanner,
                    &format!(
                        "Scan failed for {} on {}: {}",
                        candidate.symbol, candidate.exchange, e
                    ),
                );
            }
            Err(_) => {
                failures.fetch_add(1, Ordering::Relaxed);
                logger::warning(
                    LogTag::Scanner,
                    &format!(
                        "Scan of {} exceeded {}s, abandoned",
                        candidate.symbol,
                        PER_SYMBOL_TIMEOUT.as_secs()
                    ),
                );
            }
        }
    }
}

/// Fetch candles, apply the cycle filters and run every active strategy
async fn evaluate_candidate(
    client: &Arc<dyn MarketData>,
    settings: &Settings,
    candidate: &MarketCandidate,
) -> Result<Vec<RawHit>, EngineError> {
    let candles = client
        .fetch_ohlcv(&candidate.symbol, TIMEFRAME, CANDLE_LIMIT)
        .await?;
    if candles.len() < 30 {
        return Err(EngineError::DataInsufficient(format!(
            "only {} candles for {}",
            candles.len(),
            candidate.symbol
        )));
    }

    if !passes_cycle_filters(&candles, settings) {
        return Ok(Vec::new());
    }

    let rvol = indicators::rvol(&candles, settings.liquidity_filters.rvol_period);
    let ctx = EvaluationContext {
        symbol: &candidate.symbol,
        candles: &candles,
        rvol,
        client,
        settings,
    };

    let mut hits = Vec::new();
    for kind in &settings.active_scanners {
        if let Some(hit) = strategies::evaluate(*kind, &ctx).await {
            logger::info(
                LogTag::Scanner,
                &format!("🎯 {} hit on {} ({})", hit.reason, candidate.symbol, candidate.exchange),
            );
            hits.push(RawHit {
                candidate: candidate.clone(),
                reason: hit.reason,
            });
        }
    }
    Ok(hits)
}

/// Volatility and trend gates applied before any strategy runs
fn passes_cycle_filters(candles: &[Candle], settings: &Settings) -> bool {
    let last = candles.len() - 2;
    let close = candles[last].close;
    if close <= 0.0 {
        return false;
    }

    let atr = indicators::atr(candles, settings.volatility_filters.atr_period_for_filter);
    match atr.get(last) {
        Some(v) if v.is_finite() => {
            if v / close * 100.0 < settings.volatility_filters.min_atr_percent {
                return false;
            }
        }
        _ => return false,
    }

    if settings.ema_trend_filter.enabled {
        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
        let trend = indicators::ema(&closes, settings.ema_trend_filter.ema_period);
        match trend.get(last) {
            Some(v) if v.is_finite() => {
                if close <= *v {
                    return false;
                }
            }
            // Not enough history to judge the trend: let it pass
            _ => {}
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::mock::MockExchange;
    use crate::exchange::{BookLevel, ExchangeId, OrderBook};

    fn candle(close: f64, volume: f64) -> Candle {
        Candle {
            timestamp: 0,
            open: close,
            high: close * 1.02,
            low: close * 0.98,
            close,
            volume,
        }
    }

    fn whale_only_settings() -> Settings {
        let mut settings = Settings::default();
        settings.active_scanners = vec![StrategyKind::WhaleRadar];
        settings.ema_trend_filter.enabled = false;
        settings.volatility_filters.min_atr_percent = 0.1;
        settings.concurrent_workers = 3;
        settings
    }

    fn market(symbol: &str) -> MarketCandidate {
        MarketCandidate {
            symbol: symbol.to_string(),
            exchange: ExchangeId::Binance,
            quote_volume_24h: 5_000_000.0,
            last_price: 100.0,
        }
    }

    fn big_book() -> OrderBook {
        OrderBook {
            bids: (0..10)
                .map(|i| BookLevel {
                    price: 100.0 - i as f64 * 0.1,
                    quantity: 50.0,
                })
                .collect(),
            asks: vec![],
        }
    }

    #[tokio::test]
    async fn test_scan_collects_hits_across_workers() {
        let settings = whale_only_settings();
        let mock = MockExchange::new(ExchangeId::Binance);
        let candles: Vec<Candle> = (0..60).map(|_| candle(100.0, 1000.0)).collect();
        for symbol in ["AAA/USDT", "BBB/USDT", "CCC/USDT"] {
            mock.set_candles(symbol, candles.clone());
        }
        mock.set_order_book("AAA/USDT", big_book());
        mock.set_order_book("BBB/USDT", big_book());
        // CCC has no book: whale radar stays quiet there

        let mut clients = ExchangeClients::new();
        clients.insert(ExchangeId::Binance, Arc::new(mock) as Arc<dyn MarketData>);

        let outcome = scan_markets(
            &clients,
            &settings,
            vec![market("AAA/USDT"), market("BBB/USDT"), market("CCC/USDT")],
        )
        .await;

        assert_eq!(outcome.symbols_scanned, 3);
        assert_eq!(outcome.hits.len(), 2);
        assert!(outcome.hits.iter().all(|h| h.reason == StrategyKind::WhaleRadar));
    }

    #[tokio::test]
    async fn test_missing_candles_counts_nothing_and_continues() {
        let settings = whale_only_settings();
        let mock = MockExchange::new(ExchangeId::Binance);
        // Only one of two symbols has data
        let candles: Vec<Candle> = (0..60).map(|_| candle(100.0, 1000.0)).collect();
        mock.set_candles("AAA/USDT", candles);
        mock.set_order_book("AAA/USDT", big_book());

        let mut clients = ExchangeClients::new();
        clients.insert(ExchangeId::Binance, Arc::new(mock) as Arc<dyn MarketData>);

        let outcome = scan_markets(
            &clients,
            &settings,
            vec![market("AAA/USDT"), market("MISSING/USDT")],
        )
        .await;

        assert_eq!(outcome.hits.len(), 1);
        assert_eq!(outcome.hits[0].candidate.symbol, "AAA/USDT");
    }

    #[tokio::test]
    async fn test_no_active_strategies_short_circuits() {
        let mut settings = whale_only_settings();
        settings.active_scanners.clear();
        let clients = ExchangeClients::new();

        let outcome = scan_markets(&clients, &settings, vec![market("AAA/USDT")]).await;
        assert_eq!(outcome.symbols_scanned, 0);
        assert!(outcome.hits.is_empty());
    }
}
