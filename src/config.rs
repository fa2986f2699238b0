use crate::exchange::ExchangeId;
use crate::strategies::StrategyKind;
use crate::trades::trailing::TrailingStrategy;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// Scan trigger interval driving market aggregation + strategy evaluation
pub const SCAN_INTERVAL_SECONDS: u64 = 900;

/// Tracking trigger interval driving open-trade price checks
pub const TRACK_INTERVAL_SECONDS: u64 = 45;

/// Lower timeframe used for strategy evaluation
pub const TIMEFRAME: &str = "15m";

/// Higher timeframe used for trend and support analysis
pub const HIGHER_TIMEFRAME: &str = "1h";

/// Engine settings
///
/// One instance is loaded at startup and snapshotted at the start of each
/// cycle. Mutations from the outer UI take effect on the next cycle; the
/// engine itself only writes back the virtual balance and the last-signal
/// bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub real_trading_per_exchange: HashMap<ExchangeId, bool>,
    pub automate_real_tsl: bool,
    pub real_trade_size_usdt: f64,
    pub virtual_portfolio_balance_usdt: f64,
    pub virtual_trade_size_percentage: f64,
    pub max_concurrent_trades: usize,
    pub top_n_symbols_by_volume: usize,
    pub concurrent_workers: usize,
    pub min_signal_strength: usize,
    pub signal_cooldown_multiplier: f64,
    pub rescue_sl_multiplier: f64,

    pub active_scanners: Vec<StrategyKind>,

    pub atr_period: usize,
    pub atr_sl_multiplier: f64,
    pub risk_reward_ratio: f64,

    pub trailing_sl_enabled: bool,
    pub trailing_sl_activation_percent: f64,
    pub trailing_sl_callback_percent: f64,
    pub trailing_sl_advanced: TrailingStopSettings,

    pub liquidity_filters: LiquidityFilters,
    pub volatility_filters: VolatilityFilters,
    pub stablecoin_filter: StablecoinFilter,
    pub ema_trend_filter: EmaTrendFilter,
    pub min_tp_sl_filter: MinTpSlFilter,

    pub momentum_breakout: MomentumBreakoutParams,
    pub breakout_squeeze: BreakoutSqueezeParams,
    pub sniper: SniperParams,
    pub whale_radar: WhaleRadarParams,

    pub active_preset_name: String,

    /// Engine bookkeeping persisted across restarts
    #[serde(rename = "_internal_state")]
    pub internal_state: InternalState,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrailingStopSettings {
    pub strategy: TrailingStrategy,
    pub tsl_ema_period: usize,
    pub tsl_atr_period: usize,
    pub tsl_atr_multiplier: f64,
    pub use_strategy_mapping: bool,
    pub default_tsl_strategy: TrailingStrategy,
    pub strategy_tsl_mapping: HashMap<String, TrailingStrategy>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LiquidityFilters {
    pub min_quote_volume_24h_usd: f64,
    pub max_spread_percent: f64,
    pub rvol_period: usize,
    pub min_rvol: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VolatilityFilters {
    pub atr_period_for_filter: usize,
    pub min_atr_percent: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StablecoinFilter {
    pub exclude_bases: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmaTrendFilter {
    pub enabled: bool,
    pub ema_period: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MinTpSlFilter {
    pub min_tp_percent: f64,
    pub min_sl_percent: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MomentumBreakoutParams {
    pub macd_fast: usize,
    pub macd_slow: usize,
    pub macd_signal: usize,
    pub bbands_period: usize,
    pub bbands_stddev: f64,
    pub rsi_period: usize,
    pub rsi_max_level: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakoutSqueezeParams {
    pub bbands_period: usize,
    pub bbands_stddev: f64,
    pub keltner_period: usize,
    pub keltner_atr_multiplier: f64,
    pub volume_confirmation_enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SniperParams {
    pub compression_hours: f64,
    pub max_volatility_percent: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WhaleRadarParams {
    pub wall_threshold_usdt: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InternalState {
    /// Per-symbol unix timestamp of the last emitted signal, for cooldowns
    pub last_signal_time: HashMap<String, i64>,
}

impl Default for TrailingStopSettings {
    fn default() -> Self {
        let mut mapping = HashMap::new();
        mapping.insert("momentum_breakout".to_string(), TrailingStrategy::Ema);
        mapping.insert("breakout_squeeze".to_string(), TrailingStrategy::Ema);
        mapping.insert("sniper".to_string(), TrailingStrategy::Ema);
        mapping.insert("whale_radar".to_string(), TrailingStrategy::Atr);
        mapping.insert("support_rebound".to_string(), TrailingStrategy::Percentage);
        mapping.insert("rescued".to_string(), TrailingStrategy::Atr);
        Self {
            strategy: TrailingStrategy::Percentage,
            tsl_ema_period: 21,
            tsl_atr_period: 14,
            tsl_atr_multiplier: 2.5,
            use_strategy_mapping: true,
            default_tsl_strategy: TrailingStrategy::Atr,
            strategy_tsl_mapping: mapping,
        }
    }
}

impl Default for LiquidityFilters {
    fn default() -> Self {
        Self {
            min_quote_volume_24h_usd: 1_000_000.0,
            max_spread_percent: 0.5,
            rvol_period: 20,
            min_rvol: 1.5,
        }
    }
}

impl Default for VolatilityFilters {
    fn default() -> Self {
        Self {
            atr_period_for_filter: 14,
            min_atr_percent: 0.8,
        }
    }
}

impl Default for StablecoinFilter {
    fn default() -> Self {
        Self {
            exclude_bases: [
                "USDT", "USDC", "DAI", "FDUSD", "TUSD", "USDE", "PYUSD", "GUSD", "EURT", "USDJ",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

impl Default for EmaTrendFilter {
    fn default() -> Self {
        Self {
            enabled: true,
            ema_period: 200,
        }
    }
}

impl Default for MinTpSlFilter {
    fn default() -> Self {
        Self {
            min_tp_percent: 1.0,
            min_sl_percent: 0.5,
        }
    }
}

impl Default for MomentumBreakoutParams {
    fn default() -> Self {
        Self {
            macd_fast: 12,
            macd_slow: 26,
            macd_signal: 9,
            bbands_period: 20,
            bbands_stddev: 2.0,
            rsi_period: 14,
            rsi_max_level: 68.0,
        }
    }
}

impl Default for BreakoutSqueezeParams {
    fn default() -> Self {
        Self {
            bbands_period: 20,
            bbands_stddev: 2.0,
            keltner_period: 20,
            keltner_atr_multiplier: 1.5,
            volume_confirmation_enabled: true,
        }
    }
}

impl Default for SniperParams {
    fn default() -> Self {
        Self {
            compression_hours: 6.0,
            max_volatility_percent: 12.0,
        }
    }
}

impl Default for WhaleRadarParams {
    fn default() -> Self {
        Self {
            wall_threshold_usdt: 30_000.0,
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            real_trading_per_exchange: ExchangeId::all()
                .iter()
                .map(|ex| (*ex, false))
                .collect(),
            automate_real_tsl: false,
            real_trade_size_usdt: 15.0,
            virtual_portfolio_balance_usdt: 1000.0,
            virtual_trade_size_percentage: 5.0,
            max_concurrent_trades: 10,
            top_n_symbols_by_volume: 250,
            concurrent_workers: 10,
            min_signal_strength: 1,
            signal_cooldown_multiplier: 4.0,
            rescue_sl_multiplier: 1.5,
            active_scanners: vec![
                StrategyKind::MomentumBreakout,
                StrategyKind::BreakoutSqueeze,
                StrategyKind::SupportRebound,
                StrategyKind::WhaleRadar,
                StrategyKind::Sniper,
            ],
            atr_period: 14,
            atr_sl_multiplier: 2.5,
            risk_reward_ratio: 2.0,
            trailing_sl_enabled: true,
            trailing_sl_activation_percent: 1.5,
            trailing_sl_callback_percent: 1.0,
            trailing_sl_advanced: TrailingStopSettings::default(),
            liquidity_filters: LiquidityFilters::default(),
            volatility_filters: VolatilityFilters::default(),
            stablecoin_filter: StablecoinFilter::default(),
            ema_trend_filter: EmaTrendFilter::default(),
            min_tp_sl_filter: MinTpSlFilter::default(),
            momentum_breakout: MomentumBreakoutParams::default(),
            breakout_squeeze: BreakoutSqueezeParams::default(),
            sniper: SniperParams::default(),
            whale_radar: WhaleRadarParams::default(),
            active_preset_name: "PRO".to_string(),
            internal_state: InternalState::default(),
        }
    }
}

/// Named filter preset overwriting the four filter blocks
#[derive(Debug, Clone)]
pub struct Preset {
    pub liquidity_filters: LiquidityFilters,
    pub volatility_filters: VolatilityFilters,
    pub ema_trend_filter: EmaTrendFilter,
    pub min_tp_sl_filter: MinTpSlFilter,
}

/// Look up a preset by name (PRO, LAX, STRICT, VERY_LAX)
pub fn preset_by_name(name: &str) -> Option<Preset> {
    match name {
        "PRO" => Some(Preset {
            liquidity_filters: LiquidityFilters {
                min_quote_volume_24h_usd: 1_000_000.0,
                max_spread_percent: 0.45,
                rvol_period: 18,
                min_rvol: 1.5,
            },
            volatility_filters: VolatilityFilters {
                atr_period_for_filter: 14,
                min_atr_percent: 0.85,
            },
            ema_trend_filter: EmaTrendFilter {
                enabled: true,
                ema_period: 200,
            },
            min_tp_sl_filter: MinTpSlFilter {
                min_tp_percent: 1.1,
                min_sl_percent: 0.6,
            },
        }),
        "LAX" => Some(Preset {
            liquidity_filters: LiquidityFilters {
                min_quote_volume_24h_usd: 400_000.0,
                max_spread_percent: 1.3,
                rvol_period: 12,
                min_rvol: 1.1,
            },
            volatility_filters: VolatilityFilters {
                atr_period_for_filter: 10,
                min_atr_percent: 0.3,
            },
            ema_trend_filter: EmaTrendFilter {
                enabled: false,
                ema_period: 200,
            },
            min_tp_sl_filter: MinTpSlFilter {
                min_tp_percent: 0.4,
                min_sl_percent: 0.2,
            },
        }),
        "STRICT" => Some(Preset {
            liquidity_filters: LiquidityFilters {
                min_quote_volume_24h_usd: 2_500_000.0,
                max_spread_percent: 0.22,
                rvol_period: 25,
                min_rvol: 2.2,
            },
            volatility_filters: VolatilityFilters {
                atr_period_for_filter: 20,
                min_atr_percent: 1.4,
            },
            ema_trend_filter: EmaTrendFilter {
                enabled: true,
                ema_period: 200,
            },
            min_tp_sl_filter: MinTpSlFilter {
                min_tp_percent: 1.8,
                min_sl_percent: 0.9,
            },
        }),
        "VERY_LAX" => Some(Preset {
            liquidity_filters: LiquidityFilters {
                min_quote_volume_24h_usd: 200_000.0,
                max_spread_percent: 2.0,
                rvol_period: 10,
                min_rvol: 0.8,
            },
            volatility_filters: VolatilityFilters {
                atr_period_for_filter: 10,
                min_atr_percent: 0.2,
            },
            ema_trend_filter: EmaTrendFilter {
                enabled: false,
                ema_period: 200,
            },
            min_tp_sl_filter: MinTpSlFilter {
                min_tp_percent: 0.3,
                min_sl_percent: 0.15,
            },
        }),
        _ => None,
    }
}

impl Settings {
    pub fn load(path: &str) -> Result<Self> {
        if !Path::new(path).exists() {
            let default_settings = Self::default();
            default_settings.save(path)?;
            return Ok(default_settings);
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings file: {}", path))?;

        let settings: Self = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse settings file: {}", path))?;

        Ok(settings)
    }

    pub fn save(&self, path: &str) -> Result<()> {
        let content =
            serde_json::to_string_pretty(self).with_context(|| "Failed to serialize settings")?;

        fs::write(path, content)
            .with_context(|| format!("Failed to write settings file: {}", path))?;

        Ok(())
    }

    /// Apply a named preset, replacing exactly the four filter blocks
    pub fn apply_preset(&mut self, name: &str) -> bool {
        match preset_by_name(name) {
            Some(preset) => {
                self.liquidity_filters = preset.liquidity_filters;
                self.volatility_filters = preset.volatility_filters;
                self.ema_trend_filter = preset.ema_trend_filter;
                self.min_tp_sl_filter = preset.min_tp_sl_filter;
                self.active_preset_name = name.to_string();
                true
            }
            None => false,
        }
    }

    /// Whether real trading is enabled for an exchange
    pub fn is_real_trading_enabled(&self, exchange: ExchangeId) -> bool {
        self.real_trading_per_exchange
            .get(&exchange)
            .copied()
            .unwrap_or(false)
    }

    /// Exchanges with real trading enabled
    pub fn real_trading_exchanges(&self) -> Vec<ExchangeId> {
        self.real_trading_per_exchange
            .iter()
            .filter(|(_, enabled)| **enabled)
            .map(|(ex, _)| *ex)
            .collect()
    }

    /// Cooldown window in seconds between signals for the same symbol
    pub fn signal_cooldown_seconds(&self) -> i64 {
        (self.signal_cooldown_multiplier * SCAN_INTERVAL_SECONDS as f64) as i64
    }

    /// Virtual position size from the current virtual balance
    pub fn virtual_trade_size_usdt(&self) -> f64 {
        self.virtual_portfolio_balance_usdt * self.virtual_trade_size_percentage / 100.0
    }
}
