//! Error types for the throttling suite.

use thiserror::Error;

/// Main error type for throttling suite operations.
#[derive(Error, Debug)]
pub enum ThrottleError {
    /// Rate limits that are neither a positive window nor one of the two special cases
    #[error(
        "Invalid limits: time_interval_msec={time_interval_msec}, max_threshold={max_threshold}; \
         both must be positive, or both -1 (unlimited), or both 0 (always block)"
    )]
    InvalidLimits {
        time_interval_msec: i64,
        max_threshold: i64,
    },

    /// Scope item without a usable path or regex
    #[error("Scope item requires a non-blank path or path_regex")]
    MissingPattern,

    /// Scope regex that failed to compile
    #[error("Invalid scope pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// Blank controller or instance name
    #[error("Name must not be empty or whitespace")]
    InvalidName,

    /// Two instances registered under the same name
    #[error("Duplicate controller instance name: {0}")]
    DuplicateInstance(String),

    /// HTTP method outside the supported set
    #[error("Unsupported HTTP method: {0}")]
    UnknownMethod(String),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Layered settings errors
    #[error("Settings error: {0}")]
    Settings(#[from] config::ConfigError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for throttling suite operations.
pub type Result<T> = std::result::Result<T, ThrottleError>;
