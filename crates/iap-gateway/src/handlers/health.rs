//! Health check handlers.
//!
//! - `/health`: Liveness probe - returns OK if the process is running
//! - `/ready`: Readiness probe - checks configuration and signing keys

use crate::models::ReadinessResponse;
use crate::routes::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use std::sync::Arc;

/// Liveness probe handler.
///
/// Does NOT check any dependencies - failure means the process is hung.
pub async fn health_check() -> &'static str {
    "OK"
}

/// Readiness probe handler.
///
/// Returns 200 only when the gateway can actually authenticate requests.
///
/// ## Checks
///
/// 1. Verification configuration is complete (issuer and audience)
/// 2. Signing keys are cached, or can be fetched now
///
/// ## Security
///
/// Error messages are intentionally generic. Actual errors are logged
/// server-side with `tracing::warn!`.
#[tracing::instrument(skip_all, name = "iap.health.readiness")]
pub async fn readiness_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    // Check 1: configuration. Incomplete config rejects every request.
    if !state.authenticator.config().is_complete() {
        tracing::warn!(
            target: "iap.health",
            "Readiness check failed: IAP project or backend service not configured"
        );
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ReadinessResponse {
                status: "not_ready",
                configuration: Some("incomplete"),
                signing_keys: None,
                error: Some("Service configuration incomplete".to_string()),
            }),
        );
    }

    // Check 2: signing keys. Only fetch when nothing usable is cached.
    let keys = state.authenticator.verifier().key_set();
    let cached = keys
        .time_to_expiry()
        .await
        .is_some_and(|remaining| !remaining.is_zero());
    let keys_check = if cached && keys.key_count().await > 0 {
        Ok(())
    } else {
        keys.force_refresh().await
    };

    if let Err(e) = keys_check {
        tracing::warn!(target: "iap.health", error = %e, "Readiness check failed: signing keys unavailable");
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ReadinessResponse {
                status: "not_ready",
                configuration: Some("complete"),
                signing_keys: Some("unavailable"),
                // Generic error - don't leak infrastructure details
                error: Some("Service dependencies unavailable".to_string()),
            }),
        );
    }

    (
        StatusCode::OK,
        Json(ReadinessResponse {
            status: "ready",
            configuration: Some("complete"),
            signing_keys: Some("available"),
            error: None,
        }),
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_health_check() {
        assert_eq!(health_check().await, "OK");
    }

    #[test]
    fn test_readiness_response_serialization() {
        let ready = ReadinessResponse {
            status: "ready",
            configuration: Some("complete"),
            signing_keys: Some("available"),
            error: None,
        };

        let json = serde_json::to_string(&ready).unwrap();
        assert!(json.contains("\"status\":\"ready\""));
        assert!(json.contains("\"signing_keys\":\"available\""));
        assert!(!json.contains("\"error\""));

        let not_ready = ReadinessResponse {
            status: "not_ready",
            configuration: Some("incomplete"),
            signing_keys: None,
            error: Some("Service configuration incomplete".to_string()),
        };

        let json = serde_json::to_string(&not_ready).unwrap();
        assert!(json.contains("\"configuration\":\"incomplete\""));
        assert!(!json.contains("\"signing_keys\""));
    }

    // Readiness against a live key server is covered in tests/health_tests.rs.
}
