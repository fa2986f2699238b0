//! Structured logging system for marketsweeper
//!
//! This module provides a clean, ergonomic logging API with:
//! - Automatic debug mode filtering from command-line arguments
//! - Standard log levels (Error/Warning/Info/Debug/Verbose)
//! - Per-module debug control via --debug-<module> flags
//! - Dual output: colored console + file persistence
//!
//! ## Usage
//!
//! ```rust
//! use marketsweeper::logger::{self, LogTag};
//!
//! logger::error(LogTag::Exchange, "Connection failed");
//! logger::warning(LogTag::Scanner, "Rate limit approaching");
//! logger::info(LogTag::Trades, "Position opened");
//! logger::debug(LogTag::Markets, "Ticker details: ..."); // Only if --debug-markets
//! ```
//!
//! ## Initialization
//!
//! Call once at startup, before any logging occurs:
//! ```rust
//! marketsweeper::logger::init();
//! ```

mod config;
mod core;
mod file;
mod format;
mod levels;
mod tags;

// Re-export public types
pub use config::{get_logger_config, init_from_args, set_logger_config, LoggerConfig};
pub use levels::LogLevel;
pub use tags::LogTag;

/// Initialize the logger system
///
/// Parses command-line arguments for debug flags, configures per-module debug
/// modes and opens the log file. Call once in main before starting services.
pub fn init() {
    config::init_from_args();
    file::init_file_logging();
}

/// Log at ERROR level (always shown, critical issues)
pub fn error(tag: LogTag, message: &str) {
    core::log_internal(tag, LogLevel::Error, message);
}

/// Log at WARNING level (important issues)
pub fn warning(tag: LogTag, message: &str) {
    core::log_internal(tag, LogLevel::Warning, message);
}

/// Log at INFO level (standard operations)
pub fn info(tag: LogTag, message: &str) {
    core::log_internal(tag, LogLevel::Info, message);
}

/// Log at DEBUG level (detailed diagnostics)
///
/// Only shown when the matching --debug-<module> flag is provided.
pub fn debug(tag: LogTag, message: &str) {
    core::log_internal(tag, LogLevel::Debug, message);
}

/// Log at VERBOSE level (very detailed tracing)
pub fn verbose(tag: LogTag, message: &str) {
    core::log_internal(tag, LogLevel::Verbose, message);
}

/// Force flush all pending log writes
///
/// Call this during shutdown to ensure all logs are written to disk.
pub fn flush() {
    file::flush_file_logging();
}
