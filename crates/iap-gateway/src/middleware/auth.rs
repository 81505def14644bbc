//! Authentication middleware for protected routes.
//!
//! Reads the IAP assertion header, authenticates the request, and injects
//! the `AuthenticatedIdentity` into request extensions.

use crate::auth::HeaderAuthenticator;
use crate::errors::GatewayError;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::IntoResponse,
};
use std::sync::Arc;
use tracing::instrument;

/// State for the authentication middleware.
#[derive(Clone)]
pub struct AuthState {
    /// Authenticator with its verifier and key cache.
    pub authenticator: Arc<HeaderAuthenticator>,
}

/// Authentication middleware that requires a valid IAP assertion.
///
/// # Header Format
///
/// ```text
/// x-goog-iap-jwt-assertion: <token>
/// ```
///
/// # Response
///
/// - Returns 401 Unauthorized with WWW-Authenticate header on any failure,
///   including a missing header
/// - Continues to next handler with the identity in extensions otherwise
#[instrument(skip(state, req, next), name = "iap.middleware.auth")]
pub async fn require_iap_identity(
    State(state): State<Arc<AuthState>>,
    mut req: Request,
    next: Next,
) -> Result<impl IntoResponse, GatewayError> {
    let identity = state.authenticator.authenticate(&req).await.map_err(|e| {
        let err = GatewayError::from(e);
        tracing::debug!(target: "iap.middleware.auth", status = err.status_code(), "Rejecting request");
        err
    })?;

    // Store identity in request extensions for downstream handlers
    req.extensions_mut().insert(identity);

    Ok(next.run(req).await)
}
