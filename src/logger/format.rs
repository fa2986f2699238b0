//! Log formatting and output with ANSI colors
//!
//! Handles:
//! - Colorized console output with tag and level formatting
//! - Dual output (console + file)
//! - Broken pipe handling for piped commands

use super::file::write_to_file;
use super::tags::LogTag;
use chrono::Local;
use colored::*;
use std::io::{stdout, ErrorKind, Write};

/// Log format widths for alignment
const TAG_WIDTH: usize = 9;
const LEVEL_WIDTH: usize = 8;

/// Format and output a log message
pub fn format_and_log(tag: LogTag, level: &str, message: &str) {
    let now = Local::now();
    let time = now.format("%H:%M:%S").to_string();

    let tag_str = format_tag(&tag);
    let level_str = format_level(level);

    let console_line = format!(
        "{} [{}] [{}] {}",
        time.dimmed(),
        tag_str,
        level_str,
        message
    );
    print_stdout_safe(&console_line);

    let timestamp = now.format("%Y-%m-%d %H:%M:%S").to_string();
    let file_line = format!(
        "{} [{}] [{}] {}",
        timestamp,
        tag.to_plain_string(),
        level,
        message
    );
    write_to_file(&file_line);
}

/// Format a tag with appropriate color
fn format_tag(tag: &LogTag) -> ColoredString {
    let padded = format!("{:<width$}", tag.to_plain_string(), width = TAG_WIDTH);
    match tag {
        LogTag::System => padded.bright_yellow().bold(),
        LogTag::Markets => padded.bright_magenta().bold(),
        LogTag::Scanner => padded.bright_cyan().bold(),
        LogTag::Strategy => padded.bright_blue().bold(),
        LogTag::Signals => padded.bright_green().bold(),
        LogTag::Trades => padded.green().bold(),
        LogTag::Exchange => padded.cyan().bold(),
        LogTag::Database => padded.bright_blue().bold(),
        LogTag::Notify => padded.magenta().bold(),
    }
}

/// Format a level string with appropriate color
fn format_level(level: &str) -> ColoredString {
    let padded = format!("{:<width$}", level, width = LEVEL_WIDTH);
    match level {
        "ERROR" => padded.red().bold(),
        "WARNING" => padded.yellow().bold(),
        "INFO" => padded.white(),
        "DEBUG" => padded.purple(),
        "VERBOSE" => padded.dimmed(),
        _ => padded.normal(),
    }
}

/// Print to stdout, swallowing broken-pipe errors when output is piped
fn print_stdout_safe(line: &str) {
    let mut out = stdout();
    if let Err(e) = writeln!(out, "{}", line) {
        if e.kind() != ErrorKind::BrokenPipe {
            eprintln!("{}", line);
        }
    }
    let _ = out.flush();
}
