//! Current identity handler.

use crate::auth::AuthenticatedIdentity;
use crate::errors::GatewayError;
use crate::models::IdentityResponse;
use axum::{Extension, Json};
use tracing::instrument;

/// Handler for GET /api/v1/identity
///
/// Returns the username established by the auth middleware.
///
/// ```json
/// { "username": "alice@example.com" }
/// ```
#[instrument(skip_all, name = "iap.handlers.identity")]
pub async fn get_identity(
    identity: Option<Extension<AuthenticatedIdentity>>,
) -> Result<Json<IdentityResponse>, GatewayError> {
    let Some(Extension(identity)) = identity else {
        // Route registered without the auth middleware
        tracing::error!(target: "iap.handlers.identity", "No identity on request");
        return Err(GatewayError::Internal);
    };

    Ok(Json(IdentityResponse {
        username: identity.username().to_string(),
    }))
}
