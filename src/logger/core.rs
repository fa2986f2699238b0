/// Core logging implementation with automatic filtering
///
/// Central logic that decides whether a log line should be displayed based on
/// level and tag, then delegates formatting and writing to the format module.
use super::config::{get_logger_config, is_debug_enabled_for_tag};
use super::levels::LogLevel;
use super::tags::LogTag;

/// Check if a log message should be displayed
///
/// Filtering rules:
/// 1. Errors are always shown
/// 2. Check against minimum log level threshold
/// 3. Debug level requires --debug-<module> flag for that tag
/// 4. Verbose level requires the --verbose flag
/// 5. If enabled_tags is non-empty, tag must be in the set
pub fn should_log(tag: &LogTag, level: LogLevel) -> bool {
    let config = get_logger_config();

    if level == LogLevel::Error {
        return true;
    }

    if level > config.min_level {
        return false;
    }

    if level == LogLevel::Debug {
        return is_debug_enabled_for_tag(tag);
    }

    if level == LogLevel::Verbose {
        return config.min_level == LogLevel::Verbose;
    }

    if !config.enabled_tags.is_empty() {
        let tag_name = tag.to_plain_string();
        if !config.enabled_tags.contains(tag_name) {
            return false;
        }
    }

    true
}

/// Internal logging function with automatic filtering
pub fn log_internal(tag: LogTag, level: LogLevel, message: &str) {
    if !should_log(&tag, level) {
        return;
    }

    super::format::format_and_log(tag, level.as_str(), message);
}
