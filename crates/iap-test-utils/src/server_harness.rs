//! Test server harness for HTTP-level testing
//!
//! Provides `TestIapServer` for spawning real gateway instances in tests.

use crate::token_builders::{TEST_BACKEND_SERVICE_ID, TEST_ISSUER, TEST_PROJECT_ID};
use axum::Router;
use iap_gateway::config::Config;
use iap_gateway::routes::{self, AppState};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Environment for a gateway that trusts `jwks_url` and the test backend.
///
/// Key cache settings other than the fetch timeout keep their defaults.
pub fn test_vars(jwks_url: &str) -> HashMap<String, String> {
    HashMap::from([
        ("BIND_ADDRESS".to_string(), "127.0.0.1:0".to_string()),
        ("IAP_ISSUER".to_string(), TEST_ISSUER.to_string()),
        ("IAP_PROJECT_ID".to_string(), TEST_PROJECT_ID.to_string()),
        (
            "IAP_BACKEND_SERVICE_ID".to_string(),
            TEST_BACKEND_SERVICE_ID.to_string(),
        ),
        ("IAP_JWKS_URL".to_string(), jwks_url.to_string()),
        ("JWKS_FETCH_TIMEOUT_SECONDS".to_string(), "2".to_string()),
    ])
}

/// Metrics handle that is not installed as the global recorder.
///
/// Tests may build many servers per process; only one recorder can be
/// installed.
pub fn test_metrics_handle() -> PrometheusHandle {
    PrometheusBuilder::new().build_recorder().handle()
}

/// Build the real router for `vars` without binding a port.
///
/// Use with `tower::ServiceExt::oneshot`.
pub fn build_test_app(vars: &HashMap<String, String>) -> Result<(Router, Arc<AppState>), anyhow::Error> {
    let config =
        Config::from_vars(vars).map_err(|e| anyhow::anyhow!("Failed to create config: {}", e))?;
    let state = Arc::new(AppState::from_config(config));
    let app = routes::build_routes(Arc::clone(&state), test_metrics_handle());
    Ok((app, state))
}

/// Test harness for spawning the gateway in integration tests.
///
/// # Example
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_health() -> anyhow::Result<()> {
///     let server = TestIapServer::spawn("http://127.0.0.1:1/jwks").await?;
///     let response = reqwest::get(format!("{}/health", server.url())).await?;
///     assert_eq!(response.status(), 200);
///     Ok(())
/// }
/// ```
pub struct TestIapServer {
    addr: SocketAddr,
    state: Arc<AppState>,
    _handle: JoinHandle<()>,
}

impl TestIapServer {
    /// Spawn a gateway trusting `jwks_url` and the test backend.
    pub async fn spawn(jwks_url: &str) -> Result<Self, anyhow::Error> {
        Self::spawn_with_vars(&test_vars(jwks_url)).await
    }

    /// Spawn a gateway configured from `vars`.
    ///
    /// The server binds to a random port on 127.0.0.1 and runs in the
    /// background until dropped.
    pub async fn spawn_with_vars(vars: &HashMap<String, String>) -> Result<Self, anyhow::Error> {
        let (app, state) = build_test_app(vars)?;

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind test server: {}", e))?;

        let addr = listener
            .local_addr()
            .map_err(|e| anyhow::anyhow!("Failed to get local address: {}", e))?;

        let handle = tokio::spawn(async move {
            let make_service = app.into_make_service_with_connect_info::<SocketAddr>();
            if let Err(e) = axum::serve(listener, make_service).await {
                eprintln!("Test server error: {}", e);
            }
        });

        Ok(Self {
            addr,
            state,
            _handle: handle,
        })
    }

    /// Get the base URL of the test server.
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Get the socket address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Shared application state, including the key cache.
    pub fn state(&self) -> &Arc<AppState> {
        &self.state
    }
}

impl Drop for TestIapServer {
    fn drop(&mut self) {
        self._handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_server_spawns_successfully() -> Result<(), anyhow::Error> {
        // Liveness never touches the key server
        let server = TestIapServer::spawn("http://127.0.0.1:9/unused").await?;

        assert!(server.url().starts_with("http://127.0.0.1:"));
        assert!(server.addr().ip().is_loopback());

        let response = reqwest::get(format!("{}/health", server.url())).await?;
        assert_eq!(response.status(), 200);
        assert_eq!(response.text().await?, "OK");

        Ok(())
    }

    #[test]
    fn test_vars_parse() {
        let config = Config::from_vars(&test_vars("http://localhost/jwks")).unwrap();
        assert!(config.verification_config().is_complete());
        assert_eq!(config.jwks_url, "http://localhost/jwks");
    }
}
