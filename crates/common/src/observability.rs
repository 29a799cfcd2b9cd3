//! Tracing subscriber initialization shared by the harness and the echo backend.

use crate::config::ObservabilityConfig;
use crate::error::KatError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins when set; otherwise `default_directives` is used, with the
/// configured log level applied to everything else.
///
/// # Errors
///
/// Returns `KatError::Configuration` if a global subscriber is already set.
pub fn init_tracing(
    config: &ObservabilityConfig,
    default_directives: &str,
) -> Result<(), KatError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("{},{}", config.log_level, default_directives))
    });

    let registry = tracing_subscriber::registry().with(filter);

    let result = if config.json_logs {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
    } else {
        registry.with(tracing_subscriber::fmt::layer()).try_init()
    };

    result.map_err(|e| KatError::Configuration(format!("Failed to install tracing subscriber: {e}")))
}
