//! Error types for the Customs service.

use thiserror::Error;

/// Main error type for Customs operations.
#[derive(Error, Debug)]
pub enum CustomsError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// The check request is missing a field or could not be parsed.
    /// Raised before any policy runs, so no state has been touched.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The shared counter store could not be reached or timed out
    #[error("Counter store unavailable: {0}")]
    StoreUnavailable(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<redis::RedisError> for CustomsError {
    fn from(err: redis::RedisError) -> Self {
        CustomsError::StoreUnavailable(err.to_string())
    }
}

impl From<config::ConfigError> for CustomsError {
    fn from(err: config::ConfigError) -> Self {
        CustomsError::Config(err.to_string())
    }
}

/// Result type alias for Customs operations.
pub type Result<T> = std::result::Result<T, CustomsError>;
