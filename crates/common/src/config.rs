//! Common configuration types for KAT components.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Default log level when neither `RUST_LOG` nor `KAT_LOG_LEVEL` is set.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Observability configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Enable JSON-formatted logs
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            json_logs: false,
        }
    }
}

impl ObservabilityConfig {
    /// Load observability settings from the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_vars(&std::env::vars().collect())
    }

    /// Load observability settings from a `HashMap` (for testing).
    ///
    /// `KAT_LOG_JSON` accepts `1`, `true` or `yes` (case-insensitive).
    #[must_use]
    pub fn from_vars(vars: &HashMap<String, String>) -> Self {
        let log_level = vars
            .get("KAT_LOG_LEVEL")
            .cloned()
            .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string());

        let json_logs = vars
            .get("KAT_LOG_JSON")
            .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);

        Self {
            log_level,
            json_logs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_when_unset() {
        let config = ObservabilityConfig::from_vars(&HashMap::new());
        assert_eq!(config, ObservabilityConfig::default());
    }

    #[test]
    fn test_json_logs_flag() {
        let vars = HashMap::from([
            ("KAT_LOG_JSON".to_string(), "TRUE".to_string()),
            ("KAT_LOG_LEVEL".to_string(), "debug".to_string()),
        ]);
        let config = ObservabilityConfig::from_vars(&vars);
        assert!(config.json_logs);
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn test_json_logs_rejects_other_values() {
        let vars = HashMap::from([("KAT_LOG_JSON".to_string(), "0".to_string())]);
        assert!(!ObservabilityConfig::from_vars(&vars).json_logs);
    }
}
