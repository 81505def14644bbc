//! Response bodies for the IAP gateway HTTP API.

use serde::Serialize;

/// Readiness probe response.
#[derive(Debug, Serialize)]
pub struct ReadinessResponse {
    /// "ready" or "not_ready".
    pub status: &'static str,

    /// "complete" or "incomplete".
    #[serde(skip_serializing_if = "Option::is_none")]
    pub configuration: Option<&'static str>,

    /// "available" or "unavailable".
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signing_keys: Option<&'static str>,

    /// Generic error description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Response for `/api/v1/identity`.
#[derive(Debug, Clone, Serialize)]
pub struct IdentityResponse {
    /// Verified username.
    pub username: String,
}
