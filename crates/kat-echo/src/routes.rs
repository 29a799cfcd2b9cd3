//! HTTP routes for the echo backend.

use crate::config::Config;
use crate::handlers;
use axum::Router;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Service configuration.
    pub config: Config,
}

/// Build the application routes.
///
/// Every path and method falls through to the echo handler.
pub fn build_routes(state: Arc<AppState>) -> Router {
    Router::new()
        .fallback(handlers::echo)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_state_is_clone() {
        fn assert_clone<T: Clone>() {}
        assert_clone::<AppState>();
    }
}
