//! Error types for logging setup

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoggingError {
    /// A global subscriber is already installed
    #[error("Subscriber already initialized: {0}")]
    AlreadyInitialized(String),

    #[error("Log file error: {0}")]
    Io(#[from] std::io::Error),

    /// The rolling appender could not be set up
    #[error("Log appender error: {0}")]
    Appender(String),
}

/// Result type alias for logging setup
pub type LoggingResult<T> = Result<T, LoggingError>;
