use thiserror::Error;

/// Engine-wide error type
///
/// Failure kinds are distinguishable so callers can pick the right policy:
/// rate limits pause the worker, transient failures are counted and skipped,
/// not-found is benign during cancellation, and invariant violations must
/// escalate to a human-visible alert.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Rate limited by {exchange}: {message}")]
    RateLimited { exchange: String, message: String },

    #[error("Transient failure: {0}")]
    Transient(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    #[error("Insufficient data: {0}")]
    DataInsufficient(String),

    /// Exit orders were cancelled but replacements could not be placed;
    /// the position is live without protection
    #[error("Exit protection lost for {symbol}: {message}")]
    ProtectionLost { symbol: String, message: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Exchange error: {0}")]
    Exchange(String),

    #[error("Timeout after {seconds}s: {operation}")]
    Timeout { operation: String, seconds: u64 },

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EngineError {
    /// Failures a cycle may count and continue past
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            EngineError::RateLimited { .. }
                | EngineError::Transient(_)
                | EngineError::Timeout { .. }
                | EngineError::Exchange(_)
        )
    }

    /// Failures that corrupt trade automation and must be escalated,
    /// never silently swallowed
    pub fn is_critical(&self) -> bool {
        matches!(
            self,
            EngineError::InvariantViolation(_)
                | EngineError::ProtectionLost { .. }
                | EngineError::Config(_)
                | EngineError::Database(_)
        )
    }

    /// Bounded backoff hint before the caller may continue
    pub fn retry_after_seconds(&self) -> Option<u64> {
        match self {
            EngineError::RateLimited { .. } => Some(10),
            EngineError::Transient(_) => Some(5),
            EngineError::Timeout { .. } => Some(5),
            _ => None,
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
