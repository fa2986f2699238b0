/// File persistence for log output
///
/// Appends plain-text log lines to `marketsweeper.log` in the working
/// directory. File failures never propagate into the engine.
use once_cell::sync::Lazy;
use std::fs::OpenOptions;
use std::io::Write;
use std::sync::Mutex;

const LOG_FILE: &str = "marketsweeper.log";

static LOG_SINK: Lazy<Mutex<Option<std::fs::File>>> = Lazy::new(|| Mutex::new(None));

/// Open the log file for appending. Called once from logger::init.
pub fn init_file_logging() {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(LOG_FILE)
        .ok();
    if let Ok(mut sink) = LOG_SINK.lock() {
        *sink = file;
    }
}

/// Append a line to the log file, ignoring IO errors
pub fn write_to_file(line: &str) {
    if let Ok(mut sink) = LOG_SINK.lock() {
        if let Some(file) = sink.as_mut() {
            let _ = writeln!(file, "{}", line);
        }
    }
}

/// Flush pending writes, called during shutdown
pub fn flush_file_logging() {
    if let Ok(mut sink) = LOG_SINK.lock() {
        if let Some(file) = sink.as_mut() {
            let _ = file.flush();
        }
    }
}
