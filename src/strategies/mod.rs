//! Strategy evaluators
//!
//! Each evaluator maps a market snapshot to an optional long candidate.
//! Evaluators never propagate failures: a fetch error or a series too
//! short to analyze yields no signal. Adding a strategy means extending
//! [`StrategyKind`] and adding one evaluator module.

pub mod momentum;
pub mod rebound;
pub mod sniper;
pub mod squeeze;
pub mod whale;

use crate::config::Settings;
use crate::exchange::{Candle, MarketData};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// The closed set of shipped strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    MomentumBreakout,
    BreakoutSqueeze,
    Sniper,
    WhaleRadar,
    SupportRebound,
}

impl StrategyKind {
    pub fn all() -> &'static [StrategyKind] {
        &[
            StrategyKind::MomentumBreakout,
            StrategyKind::BreakoutSqueeze,
            StrategyKind::Sniper,
            StrategyKind::WhaleRadar,
            StrategyKind::SupportRebound,
        ]
    }

    /// Stable tag used in signal reasons and the trailing-stop mapping
    pub fn tag(&self) -> &'static str {
        match self {
            StrategyKind::MomentumBreakout => "momentum_breakout",
            StrategyKind::BreakoutSqueeze => "breakout_squeeze",
            StrategyKind::Sniper => "sniper",
            StrategyKind::WhaleRadar => "whale_radar",
            StrategyKind::SupportRebound => "support_rebound",
        }
    }
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.tag())
    }
}

/// One strategy agreeing on a long entry for a symbol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StrategyHit {
    pub reason: StrategyKind,
}

/// Everything an evaluator may look at for one candidate
///
/// `candles` is the scan-timeframe series, oldest first, with the final
/// entry still forming. Evaluators that need more data (order book, a
/// higher timeframe) fetch it through `client` themselves.
pub struct EvaluationContext<'a> {
    pub symbol: &'a str,
    pub candles: &'a [Candle],
    pub rvol: Option<f64>,
    pub client: &'a Arc<dyn MarketData>,
    pub settings: &'a Settings,
}

impl EvaluationContext<'_> {
    /// Index of the last closed candle, if the series is long enough
    pub(crate) fn last_closed(&self) -> Option<usize> {
        self.candles.len().checked_sub(2)
    }

    pub(crate) fn rvol_ok(&self) -> bool {
        self.rvol
            .map(|r| r >= self.settings.liquidity_filters.min_rvol)
            .unwrap_or(false)
    }
}

/// Run one strategy against a candidate
pub async fn evaluate(kind: StrategyKind, ctx: &EvaluationContext<'_>) -> Option<StrategyHit> {
    let hit = match kind {
        StrategyKind::MomentumBreakout => momentum::evaluate(ctx),
        StrategyKind::BreakoutSqueeze => squeeze::evaluate(ctx),
        StrategyKind::Sniper => sniper::evaluate(ctx),
        StrategyKind::WhaleRadar => whale::evaluate(ctx).await,
        StrategyKind::SupportRebound => rebound::evaluate(ctx).await,
    };
    hit.then_some(StrategyHit { reason: kind })
}
