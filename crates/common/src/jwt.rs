//! JWT utilities shared across IAP gateway components.
//!
//! This module provides the parts of JWT handling that do not depend on a
//! particular key source:
//! - Size limits for DoS prevention
//! - Clock skew constants for time-claim validation
//! - Unverified header parsing (`alg`, `kid`)
//! - `exp` / `iat` / `nbf` validation against an explicit clock
//! - base64url decoding of JWK key components
//!
//! # Security
//!
//! - Tokens are size-checked BEFORE parsing (DoS prevention)
//! - Header values are untrusted until the signature has been verified; they
//!   are only used to pick the algorithm (from an allow-list) and the key
//! - Error messages are intentionally generic; details are logged at debug
//!
//! # Usage
//!
//! ```rust,ignore
//! use common::jwt::{parse_header, validate_time_claims, DEFAULT_CLOCK_SKEW};
//!
//! let header = parse_header(token)?;
//! let kid = header.kid()?;
//! // look up kid, verify signature with header.alg ...
//! validate_time_claims(claims.exp, claims.iat, claims.nbf, DEFAULT_CLOCK_SKEW)?;
//! ```

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

// =============================================================================
// Constants
// =============================================================================

/// Maximum allowed JWT size in bytes (8KB).
///
/// IAP assertions are well under 1KB. Anything larger is rejected before
/// base64 decoding or signature verification.
pub const MAX_JWT_SIZE_BYTES: usize = 8192; // 8KB

/// Default JWT clock skew tolerance (60 seconds).
///
/// Applied symmetrically: expired tokens get this much grace, and `iat`/`nbf`
/// may be this far in the future.
pub const DEFAULT_CLOCK_SKEW: Duration = Duration::from_secs(60);

/// Maximum allowed JWT clock skew tolerance (10 minutes).
///
/// Configuration above this is rejected at load time.
pub const MAX_CLOCK_SKEW: Duration = Duration::from_secs(600);

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur during structural or time-based JWT validation.
///
/// Note: Display messages are intentionally generic to prevent information
/// leakage. Callers map these into their own taxonomy for diagnostics.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JwtValidationError {
    /// Token size exceeds maximum allowed.
    #[error("The token is invalid or expired")]
    TokenTooLarge,

    /// Token format is invalid (not a valid JWT structure).
    #[error("The token is invalid or expired")]
    MalformedToken,

    /// Token is missing the `kid` header.
    #[error("The token is invalid or expired")]
    MissingKid,

    /// Token `exp` is in the past, beyond clock skew.
    #[error("The token is invalid or expired")]
    Expired,

    /// Token `iat` claim is too far in the future.
    #[error("The token is invalid or expired")]
    IatTooFarInFuture,

    /// Token `nbf` claim is too far in the future.
    #[error("The token is invalid or expired")]
    NotYetValid,
}

// =============================================================================
// Header
// =============================================================================

/// Unverified JOSE header of a compact JWT.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TokenHeader {
    /// Declared signing algorithm, exactly as it appears in the token.
    pub alg: String,

    /// Key ID used to select the verification key. `None` when absent, not
    /// a string, or empty.
    pub kid: Option<String>,

    /// Token type (usually "JWT").
    #[serde(default)]
    pub typ: Option<String>,
}

impl TokenHeader {
    /// The key ID, required before any key lookup.
    ///
    /// # Errors
    ///
    /// Returns `MissingKid` if the header carried no usable `kid`.
    pub fn kid(&self) -> Result<&str, JwtValidationError> {
        self.kid.as_deref().ok_or(JwtValidationError::MissingKid)
    }
}

#[derive(Deserialize)]
struct RawHeader {
    alg: String,
    #[serde(default)]
    kid: Option<serde_json::Value>,
    #[serde(default)]
    typ: Option<String>,
}

/// Parse the header of a compact JWT without verifying the signature.
///
/// Structure rules:
/// - at most `MAX_JWT_SIZE_BYTES`
/// - exactly three `.`-separated segments
/// - header and payload segments non-empty; the signature segment may be
///   empty so that unsigned (`alg: none`) tokens reach the algorithm check
///   and are rejected there
/// - header is base64url JSON with a string `alg`
///
/// A missing `kid` is not an error here; [`TokenHeader::kid`] reports it, so
/// callers can check the algorithm first.
///
/// # Errors
///
/// - `TokenTooLarge` - Token exceeds size limit
/// - `MalformedToken` - Wrong structure, bad base64, invalid JSON, no `alg`
pub fn parse_header(token: &str) -> Result<TokenHeader, JwtValidationError> {
    // Check token size first (DoS prevention)
    if token.len() > MAX_JWT_SIZE_BYTES {
        tracing::debug!(
            target: "common.jwt",
            token_size = token.len(),
            max_size = MAX_JWT_SIZE_BYTES,
            "Token rejected: size exceeds maximum allowed"
        );
        return Err(JwtValidationError::TokenTooLarge);
    }

    let mut parts = token.split('.');
    let (Some(header_part), Some(payload_part), Some(_signature), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        tracing::debug!(target: "common.jwt", "Token rejected: invalid JWT format");
        return Err(JwtValidationError::MalformedToken);
    };

    if header_part.is_empty() || payload_part.is_empty() {
        tracing::debug!(target: "common.jwt", "Token rejected: empty JWT segment");
        return Err(JwtValidationError::MalformedToken);
    }

    let header_bytes = URL_SAFE_NO_PAD.decode(header_part).map_err(|e| {
        tracing::debug!(target: "common.jwt", error = %e, "Failed to decode JWT header base64");
        JwtValidationError::MalformedToken
    })?;

    let raw: RawHeader = serde_json::from_slice(&header_bytes).map_err(|e| {
        tracing::debug!(target: "common.jwt", error = %e, "Failed to parse JWT header JSON");
        JwtValidationError::MalformedToken
    })?;

    // Only a non-empty string counts as a kid
    let kid = raw
        .kid
        .as_ref()
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(ToString::to_string);

    Ok(TokenHeader {
        alg: raw.alg,
        kid,
        typ: raw.typ,
    })
}

// =============================================================================
// Time claims
// =============================================================================

/// Validate `exp`, `iat` and `nbf` against the current time.
///
/// - `exp` must be later than `now - clock_skew`
/// - `iat`, if present, must not be later than `now + clock_skew`
/// - `nbf`, if present, must not be later than `now + clock_skew`
///
/// `clock_skew` is capped at [`MAX_CLOCK_SKEW`].
///
/// # Errors
///
/// Returns `Expired`, `IatTooFarInFuture` or `NotYetValid`.
pub fn validate_time_claims(
    exp: i64,
    iat: Option<i64>,
    nbf: Option<i64>,
    clock_skew: Duration,
) -> Result<(), JwtValidationError> {
    let now = chrono::Utc::now().timestamp();
    validate_time_claims_at(exp, iat, nbf, clock_skew, now)
}

/// Deterministic time-claim validation against an explicit `now` timestamp.
///
/// Prefer [`validate_time_claims`] in production code. This variant lets
/// boundary conditions be tested without wall-clock dependence.
///
/// # Errors
///
/// Same as [`validate_time_claims`].
pub fn validate_time_claims_at(
    exp: i64,
    iat: Option<i64>,
    nbf: Option<i64>,
    clock_skew: Duration,
    now: i64,
) -> Result<(), JwtValidationError> {
    // Clamped to MAX_CLOCK_SKEW (600 seconds) so the cast cannot wrap
    #[allow(clippy::cast_possible_wrap)]
    let clock_skew_secs = clock_skew.min(MAX_CLOCK_SKEW).as_secs() as i64;

    if exp <= now.saturating_sub(clock_skew_secs) {
        tracing::debug!(
            target: "common.jwt",
            exp = exp,
            now = now,
            clock_skew_secs = clock_skew_secs,
            "Token rejected: expired"
        );
        return Err(JwtValidationError::Expired);
    }

    let latest_allowed = now.saturating_add(clock_skew_secs);

    if let Some(iat) = iat {
        if iat > latest_allowed {
            tracing::debug!(
                target: "common.jwt",
                iat = iat,
                now = now,
                max_allowed = latest_allowed,
                "Token rejected: iat too far in the future"
            );
            return Err(JwtValidationError::IatTooFarInFuture);
        }
    }

    if let Some(nbf) = nbf {
        if nbf > latest_allowed {
            tracing::debug!(
                target: "common.jwt",
                nbf = nbf,
                now = now,
                max_allowed = latest_allowed,
                "Token rejected: not yet valid"
            );
            return Err(JwtValidationError::NotYetValid);
        }
    }

    Ok(())
}

// =============================================================================
// Key material
// =============================================================================

/// Decode a base64url JWK component (`x`, `y`, `n`, `e`).
///
/// Trailing `=` padding is tolerated since some key servers emit it.
///
/// # Errors
///
/// Returns `base64::DecodeError` if the content is not base64url.
pub fn decode_key_component(value: &str) -> Result<Vec<u8>, base64::DecodeError> {
    URL_SAFE_NO_PAD.decode(value.trim_end_matches('='))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn token_with_header(header: &str) -> String {
        let header_b64 = URL_SAFE_NO_PAD.encode(header.as_bytes());
        format!("{header_b64}.cGF5bG9hZA.c2lnbmF0dXJl")
    }

    // =========================================================================
    // parse_header
    // =========================================================================

    #[test]
    fn test_parse_header_valid() {
        let token = token_with_header(r#"{"alg":"ES256","typ":"JWT","kid":"0oeLcQ"}"#);

        let header = parse_header(&token).unwrap();

        assert_eq!(header.alg, "ES256");
        assert_eq!(header.kid(), Ok("0oeLcQ"));
        assert_eq!(header.typ.as_deref(), Some("JWT"));
    }

    #[test]
    fn test_parse_header_wrong_segment_count() {
        assert_eq!(
            parse_header("not.a.valid.jwt.format"),
            Err(JwtValidationError::MalformedToken)
        );
        assert_eq!(
            parse_header("only.two"),
            Err(JwtValidationError::MalformedToken)
        );
        assert_eq!(
            parse_header("single"),
            Err(JwtValidationError::MalformedToken)
        );
        assert_eq!(parse_header(""), Err(JwtValidationError::MalformedToken));
    }

    #[test]
    fn test_parse_header_empty_header_or_payload() {
        assert_eq!(
            parse_header(".payload.signature"),
            Err(JwtValidationError::MalformedToken)
        );

        let header_b64 = URL_SAFE_NO_PAD.encode(br#"{"alg":"ES256","kid":"k"}"#);
        assert_eq!(
            parse_header(&format!("{header_b64}..signature")),
            Err(JwtValidationError::MalformedToken)
        );
    }

    #[test]
    fn test_parse_header_allows_empty_signature() {
        // Unsigned tokens must reach the algorithm allow-list check.
        let header_b64 = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","kid":"k"}"#);
        let header = parse_header(&format!("{header_b64}.cGF5bG9hZA.")).unwrap();
        assert_eq!(header.alg, "none");
    }

    #[test]
    fn test_parse_header_invalid_base64() {
        assert_eq!(
            parse_header("!!!invalid!!!.payload.signature"),
            Err(JwtValidationError::MalformedToken)
        );
    }

    #[test]
    fn test_parse_header_invalid_json() {
        let token = token_with_header("not valid json");
        assert_eq!(parse_header(&token), Err(JwtValidationError::MalformedToken));
    }

    #[test]
    fn test_parse_header_missing_alg() {
        let token = token_with_header(r#"{"typ":"JWT","kid":"k"}"#);
        assert_eq!(parse_header(&token), Err(JwtValidationError::MalformedToken));
    }

    #[test]
    fn test_parse_header_kid_variants() {
        let missing = token_with_header(r#"{"alg":"ES256"}"#);
        let numeric = token_with_header(r#"{"alg":"ES256","kid":12345}"#);
        let null = token_with_header(r#"{"alg":"ES256","kid":null}"#);
        let empty = token_with_header(r#"{"alg":"ES256","kid":""}"#);

        for token in [missing, numeric, null, empty] {
            let header = parse_header(&token).unwrap();
            assert_eq!(header.alg, "ES256");
            assert!(header.kid.is_none());
            assert_eq!(header.kid(), Err(JwtValidationError::MissingKid));
        }
    }

    #[test]
    fn test_parse_header_rejects_oversized_token() {
        let token = "a".repeat(MAX_JWT_SIZE_BYTES + 1);
        assert_eq!(parse_header(&token), Err(JwtValidationError::TokenTooLarge));
    }

    // =========================================================================
    // validate_time_claims_at
    // =========================================================================

    const NOW: i64 = 1_700_000_000;
    const SKEW: Duration = Duration::from_secs(60);

    #[test]
    fn test_time_claims_valid() {
        assert!(validate_time_claims_at(NOW + 600, Some(NOW - 10), Some(NOW - 10), SKEW, NOW).is_ok());
        assert!(validate_time_claims_at(NOW + 600, None, None, SKEW, NOW).is_ok());
    }

    #[test]
    fn test_time_claims_expired_beyond_skew() {
        assert_eq!(
            validate_time_claims_at(NOW - 61, None, None, SKEW, NOW),
            Err(JwtValidationError::Expired)
        );
        // Exactly at the skew boundary counts as expired
        assert_eq!(
            validate_time_claims_at(NOW - 60, None, None, SKEW, NOW),
            Err(JwtValidationError::Expired)
        );
    }

    #[test]
    fn test_time_claims_expired_within_skew_accepted() {
        assert!(validate_time_claims_at(NOW - 59, None, None, SKEW, NOW).is_ok());
    }

    #[test]
    fn test_time_claims_iat_in_future() {
        assert!(validate_time_claims_at(NOW + 600, Some(NOW + 60), None, SKEW, NOW).is_ok());
        assert_eq!(
            validate_time_claims_at(NOW + 600, Some(NOW + 61), None, SKEW, NOW),
            Err(JwtValidationError::IatTooFarInFuture)
        );
    }

    #[test]
    fn test_time_claims_nbf_in_future() {
        assert!(validate_time_claims_at(NOW + 600, None, Some(NOW + 60), SKEW, NOW).is_ok());
        assert_eq!(
            validate_time_claims_at(NOW + 600, None, Some(NOW + 61), SKEW, NOW),
            Err(JwtValidationError::NotYetValid)
        );
    }

    #[test]
    fn test_time_claims_expiry_checked_first() {
        assert_eq!(
            validate_time_claims_at(NOW - 3600, Some(NOW + 3600), Some(NOW + 3600), SKEW, NOW),
            Err(JwtValidationError::Expired)
        );
    }

    #[test]
    fn test_oversized_skew_is_capped() {
        let huge = Duration::from_secs(u64::MAX);
        let max = i64::try_from(MAX_CLOCK_SKEW.as_secs()).unwrap();

        assert!(validate_time_claims_at(NOW + 600, Some(NOW), None, huge, NOW).is_ok());
        assert!(validate_time_claims_at(NOW - max + 1, None, None, huge, NOW).is_ok());
        assert_eq!(
            validate_time_claims_at(NOW - max, None, None, huge, NOW),
            Err(JwtValidationError::Expired)
        );
        assert_eq!(
            validate_time_claims_at(NOW + 600, Some(NOW + max + 1), None, huge, NOW),
            Err(JwtValidationError::IatTooFarInFuture)
        );
    }

    #[test]
    fn test_clock_skew_constants() {
        assert_eq!(DEFAULT_CLOCK_SKEW, Duration::from_secs(60));
        assert!(DEFAULT_CLOCK_SKEW <= MAX_CLOCK_SKEW);
    }

    // =========================================================================
    // decode_key_component
    // =========================================================================

    #[test]
    fn test_decode_key_component() {
        let encoded = URL_SAFE_NO_PAD.encode([0xfbu8, 0xff, 0x01]);
        assert_eq!(decode_key_component(&encoded).unwrap(), vec![0xfb, 0xff, 0x01]);
        assert_eq!(
            decode_key_component("AQAB==").unwrap(),
            vec![0x01, 0x00, 0x01]
        );
        assert!(decode_key_component("!!!").is_err());
    }
}
