use thiserror::Error;

/// Main error type for composition scans
#[derive(Error, Debug)]
pub enum CsError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Oracle error for {metric}: {message}")]
    Oracle { metric: String, message: String },

    #[error("Unknown variable: {0}")]
    UnknownVariable(String),

    #[error("Scan cancelled before any step completed")]
    Cancelled,

    #[error("A scan is already running")]
    AlreadyRunning,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CsError {
    /// Build an oracle failure for the named metric.
    pub fn oracle(metric: impl std::fmt::Display, message: impl Into<String>) -> Self {
        CsError::Oracle {
            metric: metric.to_string(),
            message: message.into(),
        }
    }
}

/// Result type alias for composition-scan operations
pub type CsResult<T> = Result<T, CsError>;

/// Macro for creating validation errors
#[macro_export]
macro_rules! validation_error {
    ($($arg:tt)*) => {
        $crate::CsError::Validation(format!($($arg)*))
    };
}

/// Macro for creating internal errors
#[macro_export]
macro_rules! internal_error {
    ($($arg:tt)*) => {
        $crate::CsError::Internal(format!($($arg)*))
    };
}

/// Macro for creating configuration errors
#[macro_export]
macro_rules! config_error {
    ($($arg:tt)*) => {
        $crate::CsError::Config(format!($($arg)*))
    };
}
