//! Market aggregation
//!
//! Builds the ranked, one-candidate-per-symbol scan list for a cycle from
//! ticker snapshots across all connected exchanges. A failing exchange is
//! logged and skipped; aggregation never fails as a whole.

use crate::config::Settings;
use crate::exchange::{ExchangeClients, ExchangeId, Ticker};
use crate::logger::{self, LogTag};
use futures::future::join_all;
use std::collections::HashMap;

const LEVERAGED_SUFFIXES: &[&str] = &["3L", "3S", "4L", "4S", "5L", "5S", "UP", "DOWN", "BULL", "BEAR"];

/// One scannable market picked for this cycle
#[derive(Debug, Clone, PartialEq)]
pub struct MarketCandidate {
    pub symbol: String,
    pub exchange: ExchangeId,
    pub quote_volume_24h: f64,
    pub last_price: f64,
}

/// Result of one aggregation pass
#[derive(Debug, Clone, Default)]
pub struct AggregationOutcome {
    /// Ranked scan list, highest volume first, one entry per symbol
    pub candidates: Vec<MarketCandidate>,
    /// Symbols seen after filtering, before the top-N cut
    pub markets_discovered: usize,
    /// Exchanges that answered the ticker request
    pub exchanges_responded: usize,
}

/// Leveraged-token bases (3L/3S/UP/DOWN/BULL/BEAR families) are never traded
fn is_leveraged_base(base: &str) -> bool {
    LEVERAGED_SUFFIXES
        .iter()
        .any(|suffix| base.len() > suffix.len() && base.ends_with(suffix))
}

fn passes_filters(ticker: &Ticker, settings: &Settings) -> bool {
    if ticker.quote() != "USDT" {
        return false;
    }
    let base = ticker.base();
    if settings
        .stablecoin_filter
        .exclude_bases
        .iter()
        .any(|b| b == base)
    {
        return false;
    }
    if is_leveraged_base(base) {
        return false;
    }
    // Snapshots without quoted bid/ask cannot be judged on spread and pass
    if let Some(spread) = ticker.spread_percent() {
        if spread > settings.liquidity_filters.max_spread_percent {
            return false;
        }
    }
    ticker.quote_volume_24h >= settings.liquidity_filters.min_quote_volume_24h_usd
}

/// Pick one candidate per symbol. Exchanges with real trading enabled win
/// over higher-volume paper-only venues; within a group the highest volume
/// wins.
fn pick_candidate(
    symbol: &str,
    tickers: &[(ExchangeId, &Ticker)],
    real_exchanges: &[ExchangeId],
) -> Option<MarketCandidate> {
    let real_subset: Vec<&(ExchangeId, &Ticker)> = tickers
        .iter()
        .filter(|(ex, _)| real_exchanges.contains(ex))
        .collect();

    let pool: Vec<&(ExchangeId, &Ticker)> = if real_subset.is_empty() {
        tickers.iter().collect()
    } else {
        real_subset
    };

    pool.into_iter()
        .max_by(|a, b| a.1.quote_volume_24h.total_cmp(&b.1.quote_volume_24h))
        .map(|(exchange, ticker)| MarketCandidate {
            symbol: symbol.to_string(),
            exchange: *exchange,
            quote_volume_24h: ticker.quote_volume_24h,
            last_price: ticker.last_price,
        })
}

/// Fetch tickers everywhere, filter, dedupe per symbol, rank by volume and
/// cut to the configured top-N
pub async fn aggregate_markets(
    clients: &ExchangeClients,
    settings: &Settings,
) -> AggregationOutcome {
    let fetches = clients.iter().map(|(exchange, client)| {
        let exchange = *exchange;
        let client = client.clone();
        async move { (exchange, client.fetch_tickers().await) }
    });

    let mut per_exchange: Vec<(ExchangeId, Vec<Ticker>)> = Vec::new();
    for (exchange, result) in join_all(fetches).await {
        match result {
            Ok(tickers) => {
                logger::debug(
                    LogTag::Markets,
                    &format!("{}: {} tickers fetched", exchange, tickers.len()),
                );
                per_exchange.push((exchange, tickers));
            }
            Err(e) => {
                logger::warning(
                    LogTag::Markets,
                    &format!("⚠️ Skipping {} this cycle: {}", exchange, e),
                );
            }
        }
    }

    let exchanges_responded = per_exchange.len();
    let real_exchanges = settings.real_trading_exchanges();

    let mut by_symbol: HashMap<String, Vec<(ExchangeId, &Ticker)>> = HashMap::new();
    for (exchange, tickers) in &per_exchange {
        for ticker in tickers {
            if passes_filters(ticker, settings) {
                by_symbol
                    .entry(ticker.symbol.clone())
                    .or_default()
                    .push((*exchange, ticker));
            }
        }
    }

    let markets_discovered = by_symbol.len();

    let mut candidates: Vec<MarketCandidate> = by_symbol
        .iter()
        .filter_map(|(symbol, tickers)| pick_candidate(symbol, tickers, &real_exchanges))
        .collect();

    candidates.sort_by(|a, b| {
        b.quote_volume_24h
            .total_cmp(&a.quote_volume_24h)
            .then_with(|| a.symbol.cmp(&b.symbol))
    });
    candidates.truncate(settings.top_n_symbols_by_volume);

    logger::info(
        LogTag::Markets,
        &format!(
            "📊 Aggregated {} markets from {} exchanges, scanning top {}",
            markets_discovered,
            exchanges_responded,
            candidates.len()
        ),
    );

    AggregationOutcome {
        candidates,
        markets_discovered,
        exchanges_responded,
    }
}
