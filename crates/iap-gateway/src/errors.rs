//! IAP gateway error types.
//!
//! All errors map to appropriate HTTP status codes via the `IntoResponse` impl.
//! Error messages returned to clients are intentionally generic to avoid
//! leaking internal details. Actual errors are logged server-side.

use crate::auth::InvalidCredentials;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Challenge sent with every 401 so clients can fall back to other credentials.
pub const WWW_AUTHENTICATE_CHALLENGE: &str = "Bearer realm=\"iap-gateway\"";

/// IAP gateway error type.
///
/// Maps to appropriate HTTP status codes:
/// - InvalidCredentials: 401 Unauthorized
/// - Internal: 500 Internal Server Error
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error(transparent)]
    InvalidCredentials(#[from] InvalidCredentials),

    #[error("Internal server error")]
    Internal,
}

impl GatewayError {
    /// Returns the HTTP status code for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            GatewayError::InvalidCredentials(_) => 401,
            GatewayError::Internal => 500,
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            // Same body for every rejection stage
            GatewayError::InvalidCredentials(e) => {
                (StatusCode::UNAUTHORIZED, "INVALID_CREDENTIALS", e.to_string())
            }
            GatewayError::Internal => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "An internal error occurred".to_string(),
            ),
        };

        let error_response = ErrorResponse {
            error: ErrorDetail { code, message },
        };

        let mut response = (status, Json(error_response)).into_response();

        // Add WWW-Authenticate header for 401 responses
        if status == StatusCode::UNAUTHORIZED {
            if let Ok(header_value) = WWW_AUTHENTICATE_CHALLENGE.parse() {
                response
                    .headers_mut()
                    .insert("WWW-Authenticate", header_value);
            }
        }

        response
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::auth::{RejectionReason, VerificationError};
    use http_body_util::BodyExt;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_invalid_credentials_response_is_generic() {
        let reasons = [
            RejectionReason::MissingHeader,
            RejectionReason::IncompleteConfiguration,
            RejectionReason::Verification(VerificationError::BadSignature),
            RejectionReason::MissingIdentityClaim,
        ];

        let mut bodies = Vec::new();
        for reason in reasons {
            let response =
                GatewayError::from(InvalidCredentials::new(reason)).into_response();

            assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
            assert_eq!(
                response.headers().get("WWW-Authenticate").unwrap(),
                WWW_AUTHENTICATE_CHALLENGE
            );
            bodies.push(body_json(response).await);
        }

        let expected = serde_json::json!({
            "error": {"code": "INVALID_CREDENTIALS", "message": "Invalid login."}
        });
        assert!(bodies.iter().all(|body| *body == expected));
    }

    #[tokio::test]
    async fn test_internal_error_has_no_challenge() {
        let response = GatewayError::Internal.into_response();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(response.headers().get("WWW-Authenticate").is_none());

        let body = body_json(response).await;
        assert_eq!(
            body.pointer("/error/code").and_then(|v| v.as_str()),
            Some("INTERNAL_ERROR")
        );
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(
            GatewayError::InvalidCredentials(InvalidCredentials::new(
                RejectionReason::MissingHeader
            ))
            .status_code(),
            401
        );
        assert_eq!(GatewayError::Internal.status_code(), 500);
    }
}
