/// Logger configuration built from command-line arguments
///
/// Holds the minimum level threshold plus the set of tags with debug output
/// enabled. Initialized once at startup via `init_from_args`.
use super::levels::LogLevel;
use super::tags::LogTag;
use crate::arguments;
use once_cell::sync::Lazy;
use std::collections::HashSet;
use std::sync::RwLock;

#[derive(Debug, Clone)]
pub struct LoggerConfig {
    pub min_level: LogLevel,
    pub debug_tags: HashSet<&'static str>,
    pub enabled_tags: HashSet<String>,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            min_level: LogLevel::Info,
            debug_tags: HashSet::new(),
            enabled_tags: HashSet::new(),
        }
    }
}

static LOGGER_CONFIG: Lazy<RwLock<LoggerConfig>> =
    Lazy::new(|| RwLock::new(LoggerConfig::default()));

const ALL_DEBUG_KEYS: &[&str] = &[
    "system",
    "markets",
    "scanner",
    "strategies",
    "signals",
    "trades",
    "exchange",
    "database",
    "notify",
];

/// Build the logger configuration from the current command-line arguments
pub fn init_from_args() {
    let mut config = LoggerConfig::default();

    if arguments::is_quiet_enabled() {
        config.min_level = LogLevel::Error;
    } else if arguments::is_verbose_enabled() {
        config.min_level = LogLevel::Verbose;
    }

    for key in ALL_DEBUG_KEYS {
        if arguments::has_arg(&format!("--debug-{}", key)) {
            config.debug_tags.insert(key);
            // Debug flags imply at least debug level output for that tag
            if config.min_level < LogLevel::Debug {
                config.min_level = LogLevel::Debug;
            }
        }
    }

    // --log-tags system,trades restricts non-error output to those tags
    if let Some(tags) = arguments::get_arg_value("--log-tags") {
        config.enabled_tags = tags
            .split(',')
            .map(|t| t.trim().to_uppercase())
            .filter(|t| !t.is_empty())
            .collect();
    }

    set_logger_config(config);
}

pub fn get_logger_config() -> LoggerConfig {
    LOGGER_CONFIG
        .read()
        .map(|c| c.clone())
        .unwrap_or_default()
}

pub fn set_logger_config(config: LoggerConfig) {
    if let Ok(mut current) = LOGGER_CONFIG.write() {
        *current = config;
    }
}

/// Whether debug output is enabled for a specific tag
pub fn is_debug_enabled_for_tag(tag: &LogTag) -> bool {
    let config = get_logger_config();
    config.min_level >= LogLevel::Verbose || config.debug_tags.contains(tag.to_debug_key())
}
