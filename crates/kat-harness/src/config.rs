//! Harness configuration.
//!
//! Configuration is loaded from environment variables with defaults for
//! every setting. Invalid values fail fast with the offending variable named.

use common::config::ObservabilityConfig;
use std::collections::{BTreeMap, HashMap};
use std::env;
use std::time::Duration;
use thiserror::Error;

/// Default ceiling on in-flight queries within one phase.
pub const DEFAULT_CONCURRENCY: usize = 32;

/// Default per-query timeout in milliseconds.
pub const DEFAULT_QUERY_TIMEOUT_MS: u64 = 10_000;

/// Default hard timeout for draining one phase, in seconds.
pub const DEFAULT_PHASE_TIMEOUT_SECONDS: u64 = 120;

/// Default time allowed for a deployment to become ready, in seconds.
pub const DEFAULT_READY_TIMEOUT_SECONDS: u64 = 300;

/// Default number of retries for connection-level query failures.
pub const DEFAULT_QUERY_RETRIES: u32 = 1;

/// Default absolute tolerance, in percentage points, for weighted-split checks.
pub const DEFAULT_CANARY_TOLERANCE: f64 = 25.0;

/// Default gateway readiness path, relative to the gateway base URL.
pub const DEFAULT_READINESS_PATH: &str = "ambassador/v0/check_ready";

/// Default Kubernetes namespace.
pub const DEFAULT_NAMESPACE: &str = "default";

/// Default gateway image referenced by the gateway manifest template.
pub const DEFAULT_GATEWAY_IMAGE: &str = "quay.io/datawire/ambassador:0.40.2";

/// Default echo backend image referenced by the service manifest template.
pub const DEFAULT_BACKEND_IMAGE: &str = "kat-echo:latest";

/// Default tracing directives. Harness events use `kat.*` targets, which the
/// `kat` prefix covers along with the crate-named ones.
pub const DEFAULT_LOG_DIRECTIVES: &str = "kat=info";

/// Maximum accepted concurrency ceiling.
pub const MAX_CONCURRENCY: usize = 1024;

/// Harness configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct HarnessConfig {
    /// Ceiling on concurrently dispatched queries within a phase.
    pub concurrency: usize,

    /// Per-query timeout, unless a query overrides it.
    pub query_timeout: Duration,

    /// Hard timeout for a whole phase; stragglers become failed results.
    pub phase_timeout: Duration,

    /// Time allowed for a deployment's requirements to be satisfied.
    pub ready_timeout: Duration,

    /// Retries for connection-level failures (not for HTTP error statuses).
    pub query_retries: u32,

    /// Absolute tolerance in percentage points for weighted-split checks.
    pub canary_tolerance: f64,

    /// Path polled on each gateway before phase 0 starts.
    pub readiness_path: String,

    /// `k8s-name -> host:port` overrides for reaching deployed services.
    pub endpoints: BTreeMap<String, String>,

    /// Kubernetes namespace the deployment driver targets.
    pub namespace: String,

    /// Gateway image for the gateway manifest template.
    pub gateway_image: String,

    /// Echo backend image for the service manifest template.
    pub backend_image: String,

    /// Logging settings.
    pub observability: ObservabilityConfig,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            query_timeout: Duration::from_millis(DEFAULT_QUERY_TIMEOUT_MS),
            phase_timeout: Duration::from_secs(DEFAULT_PHASE_TIMEOUT_SECONDS),
            ready_timeout: Duration::from_secs(DEFAULT_READY_TIMEOUT_SECONDS),
            query_retries: DEFAULT_QUERY_RETRIES,
            canary_tolerance: DEFAULT_CANARY_TOLERANCE,
            readiness_path: DEFAULT_READINESS_PATH.to_string(),
            endpoints: BTreeMap::new(),
            namespace: DEFAULT_NAMESPACE.to_string(),
            gateway_image: DEFAULT_GATEWAY_IMAGE.to_string(),
            backend_image: DEFAULT_BACKEND_IMAGE.to_string(),
            observability: ObservabilityConfig::default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid concurrency configuration: {0}")]
    InvalidConcurrency(String),

    #[error("Invalid timeout configuration: {0}")]
    InvalidTimeout(String),

    #[error("Invalid retry configuration: {0}")]
    InvalidRetries(String),

    #[error("Invalid canary tolerance configuration: {0}")]
    InvalidTolerance(String),

    #[error("Invalid endpoint configuration: {0}")]
    InvalidEndpoints(String),
}

impl HarnessConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a HashMap (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let concurrency = match vars.get("KAT_CONCURRENCY") {
            Some(value_str) => {
                let value: usize = value_str.parse().map_err(|e| {
                    ConfigError::InvalidConcurrency(format!(
                        "KAT_CONCURRENCY must be a valid positive integer, got '{}': {}",
                        value_str, e
                    ))
                })?;

                if value == 0 || value > MAX_CONCURRENCY {
                    return Err(ConfigError::InvalidConcurrency(format!(
                        "KAT_CONCURRENCY must be between 1 and {}, got {}",
                        MAX_CONCURRENCY, value
                    )));
                }

                value
            }
            None => defaults.concurrency,
        };

        let query_timeout = parse_timeout(vars, "KAT_QUERY_TIMEOUT_MS", Duration::from_millis)?
            .unwrap_or(defaults.query_timeout);

        let phase_timeout = parse_timeout(vars, "KAT_PHASE_TIMEOUT_SECONDS", Duration::from_secs)?
            .unwrap_or(defaults.phase_timeout);

        let ready_timeout = parse_timeout(vars, "KAT_READY_TIMEOUT_SECONDS", Duration::from_secs)?
            .unwrap_or(defaults.ready_timeout);

        if phase_timeout < query_timeout {
            return Err(ConfigError::InvalidTimeout(format!(
                "KAT_PHASE_TIMEOUT_SECONDS ({:?}) must not be shorter than KAT_QUERY_TIMEOUT_MS ({:?})",
                phase_timeout, query_timeout
            )));
        }

        let query_retries = match vars.get("KAT_QUERY_RETRIES") {
            Some(value_str) => {
                let value: u32 = value_str.parse().map_err(|e| {
                    ConfigError::InvalidRetries(format!(
                        "KAT_QUERY_RETRIES must be a valid non-negative integer, got '{}': {}",
                        value_str, e
                    ))
                })?;

                if value > 10 {
                    return Err(ConfigError::InvalidRetries(format!(
                        "KAT_QUERY_RETRIES must not exceed 10, got {}",
                        value
                    )));
                }

                value
            }
            None => defaults.query_retries,
        };

        let canary_tolerance = match vars.get("KAT_CANARY_TOLERANCE") {
            Some(value_str) => {
                let value: f64 = value_str.parse().map_err(|e| {
                    ConfigError::InvalidTolerance(format!(
                        "KAT_CANARY_TOLERANCE must be a number, got '{}': {}",
                        value_str, e
                    ))
                })?;

                if !(0.0..=100.0).contains(&value) {
                    return Err(ConfigError::InvalidTolerance(format!(
                        "KAT_CANARY_TOLERANCE must be between 0 and 100, got {}",
                        value
                    )));
                }

                value
            }
            None => defaults.canary_tolerance,
        };

        let readiness_path = vars
            .get("KAT_READINESS_PATH")
            .map(|p| p.trim_start_matches('/').to_string())
            .unwrap_or(defaults.readiness_path);

        let endpoints = match vars.get("KAT_ENDPOINTS") {
            Some(value) => parse_endpoints(value)?,
            None => defaults.endpoints,
        };

        let namespace = vars
            .get("KAT_NAMESPACE")
            .cloned()
            .unwrap_or(defaults.namespace);

        let gateway_image = vars
            .get("KAT_GATEWAY_IMAGE")
            .cloned()
            .unwrap_or(defaults.gateway_image);

        let backend_image = vars
            .get("KAT_BACKEND_IMAGE")
            .cloned()
            .unwrap_or(defaults.backend_image);

        Ok(Self {
            concurrency,
            query_timeout,
            phase_timeout,
            ready_timeout,
            query_retries,
            canary_tolerance,
            readiness_path,
            endpoints,
            namespace,
            gateway_image,
            backend_image,
            observability: ObservabilityConfig::from_vars(vars),
        })
    }
}

fn parse_timeout(
    vars: &HashMap<String, String>,
    name: &str,
    unit: fn(u64) -> Duration,
) -> Result<Option<Duration>, ConfigError> {
    let Some(value_str) = vars.get(name) else {
        return Ok(None);
    };

    let value: u64 = value_str.parse().map_err(|e| {
        ConfigError::InvalidTimeout(format!(
            "{} must be a valid positive integer, got '{}': {}",
            name, value_str, e
        ))
    })?;

    if value == 0 {
        return Err(ConfigError::InvalidTimeout(format!(
            "{} must be greater than 0",
            name
        )));
    }

    Ok(Some(unit(value)))
}

/// Parse `name=host:port,name2=host:port` into an endpoint map.
fn parse_endpoints(value: &str) -> Result<BTreeMap<String, String>, ConfigError> {
    let mut endpoints = BTreeMap::new();

    for entry in value.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let Some((name, authority)) = entry.split_once('=') else {
            return Err(ConfigError::InvalidEndpoints(format!(
                "KAT_ENDPOINTS entries must look like name=host:port, got '{}'",
                entry
            )));
        };

        let (name, authority) = (name.trim(), authority.trim());
        if name.is_empty() || authority.is_empty() {
            return Err(ConfigError::InvalidEndpoints(format!(
                "KAT_ENDPOINTS entry has an empty name or address: '{}'",
                entry
            )));
        }

        if endpoints
            .insert(name.to_string(), authority.to_string())
            .is_some()
        {
            return Err(ConfigError::InvalidEndpoints(format!(
                "KAT_ENDPOINTS lists '{}' more than once",
                name
            )));
        }
    }

    Ok(endpoints)
}
