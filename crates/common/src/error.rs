//! Common error types for KAT components.

use thiserror::Error;

/// Common errors that can occur across KAT components
#[derive(Error, Debug)]
pub enum KatError {
    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl From<serde_json::Error> for KatError {
    fn from(err: serde_json::Error) -> Self {
        KatError::Serialization(err.to_string())
    }
}

/// Result type alias using `KatError`
pub type Result<T> = std::result::Result<T, KatError>;
