//! HTTP routes for the IAP gateway.
//!
//! Defines the Axum router and application state.

use crate::auth::{HeaderAuthenticator, HttpKeySource, KeySetCache, TokenVerifier};
use crate::config::Config;
use crate::handlers;
use crate::middleware::{http_metrics_middleware, require_iap_identity, AuthState};
use axum::{middleware, routing::get, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Service configuration.
    pub config: Config,

    /// Authenticator shared by the middleware and the readiness probe.
    pub authenticator: Arc<HeaderAuthenticator>,
}

impl AppState {
    /// Wire the key cache, verifier and authenticator from configuration.
    pub fn from_config(config: Config) -> Self {
        let source = Arc::new(HttpKeySource::new(
            config.jwks_url.clone(),
            Duration::from_secs(config.jwks_fetch_timeout_seconds),
        ));
        let keys = Arc::new(KeySetCache::with_settings(
            source,
            Duration::from_secs(config.jwks_cache_ttl_seconds),
            Duration::from_secs(config.jwks_min_refresh_interval_seconds),
        )
        .with_max_stale(Duration::from_secs(config.jwks_max_stale_seconds)));
        let verifier = Arc::new(
            TokenVerifier::new(keys, config.clock_skew())
                .with_allowed_algorithms(config.allowed_algorithms.clone()),
        );
        let authenticator = Arc::new(HeaderAuthenticator::new(
            config.verification_config(),
            verifier,
        ));

        Self {
            config,
            authenticator,
        }
    }
}

/// Build the application routes.
///
/// Creates an Axum router with:
/// - `/health` - Liveness probe (simple "OK") - public
/// - `/ready` - Readiness probe (config + signing keys) - public
/// - `/metrics` - Prometheus metrics endpoint - public
/// - `/api/v1/identity` - Current identity - requires IAP assertion
/// - TraceLayer for request logging
/// - HTTP metrics middleware
/// - Request timeout from configuration
pub fn build_routes(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let auth_state = Arc::new(AuthState {
        authenticator: Arc::clone(&state.authenticator),
    });
    let request_timeout = Duration::from_secs(state.config.request_timeout_seconds);

    // Public routes (no authentication required)
    let public_routes = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .with_state(state);

    // Metrics route with its own state
    let metrics_routes = Router::new()
        .route("/metrics", get(handlers::metrics_handler))
        .with_state(metrics_handle);

    // Protected routes (IAP assertion required)
    let protected_routes = Router::new()
        .route("/api/v1/identity", get(handlers::get_identity))
        .route_layer(middleware::from_fn_with_state(
            auth_state,
            require_iap_identity,
        ));

    // Layer order (bottom-to-top execution):
    // 1. TimeoutLayer - Timeout the request (innermost)
    // 2. TraceLayer - Log request details
    // 3. http_metrics_middleware - Record ALL responses (outermost)
    public_routes
        .merge(metrics_routes)
        .merge(protected_routes)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(request_timeout))
        .layer(middleware::from_fn(http_metrics_middleware))
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
