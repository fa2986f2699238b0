/// Centralized argument handling for marketsweeper
///
/// Consolidates command-line argument access and debug flag checking so the
/// logger and individual modules never parse `env::args()` themselves.
///
/// Features:
/// - Thread-safe CMD_ARGS storage, overridable from tests
/// - Per-module `--debug-<module>` flag checks
/// - Simple flag/value lookup utilities
use once_cell::sync::Lazy;
use std::env;
use std::sync::Mutex;

/// Global command-line arguments storage
pub static CMD_ARGS: Lazy<Mutex<Vec<String>>> = Lazy::new(|| Mutex::new(env::args().collect()));

/// Sets the global command-line arguments
/// Used by tests to override the default env::args() collection
pub fn set_cmd_args(args: Vec<String>) {
    if let Ok(mut cmd_args) = CMD_ARGS.lock() {
        *cmd_args = args;
    }
}

/// Gets a copy of the current command-line arguments
pub fn get_cmd_args() -> Vec<String> {
    match CMD_ARGS.lock() {
        Ok(args) => args.clone(),
        Err(_) => env::args().collect(),
    }
}

/// Checks if a specific argument is present in the command line
pub fn has_arg(arg: &str) -> bool {
    get_cmd_args().iter().any(|a| a == arg)
}

/// Gets the value of a command-line argument that follows a flag
/// Returns None if the flag is not found or has no value
pub fn get_arg_value(flag: &str) -> Option<String> {
    let args = get_cmd_args();
    for (i, arg) in args.iter().enumerate() {
        if arg == flag && i + 1 < args.len() {
            return Some(args[i + 1].clone());
        }
    }
    None
}

// =============================================================================
// DEBUG FLAG CHECKING FUNCTIONS
// =============================================================================

/// Scanner worker pool debug mode
pub fn is_debug_scanner_enabled() -> bool {
    has_arg("--debug-scanner")
}

/// Market aggregation debug mode
pub fn is_debug_markets_enabled() -> bool {
    has_arg("--debug-markets")
}

/// Strategy evaluation debug mode
pub fn is_debug_strategies_enabled() -> bool {
    has_arg("--debug-strategies")
}

/// Signal arbitration debug mode
pub fn is_debug_signals_enabled() -> bool {
    has_arg("--debug-signals")
}

/// Trade lifecycle debug mode
pub fn is_debug_trades_enabled() -> bool {
    has_arg("--debug-trades")
}

/// Exchange client / adapter debug mode
pub fn is_debug_exchange_enabled() -> bool {
    has_arg("--debug-exchange")
}

/// Database debug mode
pub fn is_debug_database_enabled() -> bool {
    has_arg("--debug-database")
}

/// Notifications debug mode
pub fn is_debug_notify_enabled() -> bool {
    has_arg("--debug-notify")
}

/// Global verbose mode
pub fn is_verbose_enabled() -> bool {
    has_arg("--verbose")
}

/// Quiet mode suppresses warnings and below
pub fn is_quiet_enabled() -> bool {
    has_arg("--quiet")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arg_value_lookup() {
        set_cmd_args(vec![
            "marketsweeper".to_string(),
            "--config".to_string(),
            "custom.json".to_string(),
            "--debug-scanner".to_string(),
        ]);
        assert_eq!(get_arg_value("--config").as_deref(), Some("custom.json"));
        assert!(is_debug_scanner_enabled());
        assert!(!is_debug_trades_enabled());
        set_cmd_args(vec!["marketsweeper".to_string()]);
    }
}
