//! Metrics definitions for the IAP gateway.
//!
//! All metrics follow Prometheus naming conventions:
//! - `iap_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded to prevent cardinality explosion:
//! - `method`: 7 values max (GET, POST, PATCH, DELETE, PUT, HEAD, OPTIONS)
//! - `endpoint`: 5 values (known paths plus `/other`)
//! - `status`: 3 values for HTTP (success, error, timeout)
//! - `outcome`: bounded by `RejectionReason` and `VerificationError` labels
//!
//! Usernames, key IDs and token contents never appear in labels.

use metrics::{counter, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Initialize the Prometheus recorder and return the handle for `/metrics`.
///
/// Must be called before any metrics are recorded.
///
/// # Errors
///
/// Returns error if the recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Prefix("iap_http_request".to_string()),
            &[
                0.005, 0.010, 0.025, 0.050, 0.100, 0.150, 0.200, 0.300, 0.500, 1.000, 2.000,
            ],
        )
        .map_err(|e| format!("Failed to set HTTP request buckets: {e}"))?
        // Verification is CPU-bound unless it waits on a key fetch
        .set_buckets_for_metric(
            Matcher::Prefix("iap_token_verification".to_string()),
            &[
                0.0005, 0.001, 0.002, 0.005, 0.010, 0.050, 0.100, 0.500, 1.000, 5.000,
            ],
        )
        .map_err(|e| format!("Failed to set token verification buckets: {e}"))?
        .set_buckets_for_metric(
            Matcher::Prefix("iap_jwks_fetch".to_string()),
            &[
                0.010, 0.025, 0.050, 0.100, 0.200, 0.500, 1.000, 2.000, 5.000, 10.000,
            ],
        )
        .map_err(|e| format!("Failed to set JWKS fetch buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus recorder: {e}"))
}

// ============================================================================
// HTTP Request Metrics
// ============================================================================

/// Record HTTP request completion
///
/// Metric: `iap_http_requests_total`, `iap_http_request_duration_seconds`
/// Labels: `method`, `endpoint`, `status`
pub fn record_http_request(method: &str, endpoint: &str, status_code: u16, duration: Duration) {
    let normalized_endpoint = normalize_endpoint(endpoint);
    let status = categorize_status_code(status_code);

    histogram!("iap_http_request_duration_seconds",
        "method" => method.to_string(),
        "endpoint" => normalized_endpoint,
        "status" => status
    )
    .record(duration.as_secs_f64());

    counter!("iap_http_requests_total",
        "method" => method.to_string(),
        "endpoint" => normalized_endpoint,
        "status_code" => status_code.to_string()
    )
    .increment(1);
}

/// Categorize HTTP status code into success/error/timeout
fn categorize_status_code(status_code: u16) -> &'static str {
    match status_code {
        200..=299 => "success",
        408 | 504 => "timeout",
        _ => "error",
    }
}

/// Map a request path onto a fixed set of labels.
fn normalize_endpoint(path: &str) -> &'static str {
    match path {
        "/health" => "/health",
        "/ready" => "/ready",
        "/metrics" => "/metrics",
        "/api/v1/identity" => "/api/v1/identity",
        _ => "/other",
    }
}

// ============================================================================
// Authentication Metrics
// ============================================================================

/// Record the outcome of one authentication attempt
///
/// Metric: `iap_auth_attempts_total`
/// Labels: `outcome` ("success" or a rejection label)
pub fn record_auth_attempt(outcome: &'static str) {
    counter!("iap_auth_attempts_total", "outcome" => outcome).increment(1);
}

/// Record token verification duration
///
/// Metric: `iap_token_verification_duration_seconds`
/// Labels: `status` ("success" or a `VerificationError` label)
pub fn record_token_verification(status: &'static str, duration: Duration) {
    histogram!("iap_token_verification_duration_seconds", "status" => status)
        .record(duration.as_secs_f64());
}

// ============================================================================
// Key Set Metrics
// ============================================================================

/// Record a key set fetch
///
/// Metric: `iap_jwks_fetch_total`, `iap_jwks_fetch_duration_seconds`
/// Labels: `status` ("success" or a `KeySourceError` label)
pub fn record_jwks_fetch(status: &'static str, duration: Duration) {
    histogram!("iap_jwks_fetch_duration_seconds").record(duration.as_secs_f64());

    counter!("iap_jwks_fetch_total", "status" => status).increment(1);
}
