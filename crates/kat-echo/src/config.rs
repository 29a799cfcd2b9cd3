//! Echo backend configuration.
//!
//! Configuration is loaded from environment variables.

use std::collections::HashMap;
use std::env;
use thiserror::Error;

/// Default bind address for the echo backend.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8080";

/// Default backend name reported in echo records.
pub const DEFAULT_BACKEND_NAME: &str = "echo";

/// Echo backend configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Name reported as `backend` in every echo record.
    pub backend_name: String,

    /// Server bind address (default: "0.0.0.0:8080").
    pub bind_address: String,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid backend name: {0}")]
    InvalidBackendName(String),
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a HashMap (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let backend_name = vars
            .get("BACKEND")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BACKEND_NAME.to_string());

        if backend_name.trim().is_empty() {
            return Err(ConfigError::InvalidBackendName(
                "BACKEND must not be empty".to_string(),
            ));
        }

        let bind_address = vars
            .get("BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        Ok(Self {
            backend_name,
            bind_address,
        })
    }
}
