/// Log tag definitions for structured logging
///
/// Each tag corresponds to one engine subsystem and maps to a
/// `--debug-<module>` command-line flag.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogTag {
    System,
    Markets,
    Scanner,
    Strategy,
    Signals,
    Trades,
    Exchange,
    Database,
    Notify,
}

impl LogTag {
    /// Plain uppercase name used in file output and tag filters
    pub fn to_plain_string(&self) -> &'static str {
        match self {
            LogTag::System => "SYSTEM",
            LogTag::Markets => "MARKETS",
            LogTag::Scanner => "SCANNER",
            LogTag::Strategy => "STRATEGY",
            LogTag::Signals => "SIGNALS",
            LogTag::Trades => "TRADES",
            LogTag::Exchange => "EXCHANGE",
            LogTag::Database => "DATABASE",
            LogTag::Notify => "NOTIFY",
        }
    }

    /// Key used to match a `--debug-<key>` flag
    pub fn to_debug_key(&self) -> &'static str {
        match self {
            LogTag::System => "system",
            LogTag::Markets => "markets",
            LogTag::Scanner => "scanner",
            LogTag::Strategy => "strategies",
            LogTag::Signals => "signals",
            LogTag::Trades => "trades",
            LogTag::Exchange => "exchange",
            LogTag::Database => "database",
            LogTag::Notify => "notify",
        }
    }
}

impl std::fmt::Display for LogTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_plain_string())
    }
}
