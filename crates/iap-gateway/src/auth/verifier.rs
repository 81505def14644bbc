//! Signed assertion verification.
//!
//! Verifies a compact JWS against the cached key set and checks issuer,
//! audience and time claims.
//!
//! # Security
//!
//! - Tokens are size-checked BEFORE parsing (DoS prevention)
//! - The header `alg` must be on an explicit allow-list; `none` and HMAC
//!   algorithms never are
//! - The selected key must match the declared algorithm
//! - `exp` is required; `iat` and `nbf` are honoured when present
//! - Issuer and audience checks are exact string comparisons

use crate::auth::claims::{RawClaims, VerifiedClaims};
use crate::auth::jwks::{KeySetCache, KeySourceError};
use crate::observability::metrics;
use common::jwt::{parse_header, validate_time_claims, JwtValidationError, MAX_CLOCK_SKEW};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, Algorithm, Validation};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::instrument;

/// Why a token was not accepted.
///
/// Display strings are short and never contain token contents.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerificationError {
    #[error("token is malformed")]
    MalformedToken,

    #[error("token algorithm is not allowed")]
    AlgorithmNotAllowed,

    #[error("token signing key is unknown")]
    UnknownSigningKey,

    #[error("token signature is invalid")]
    BadSignature,

    #[error("token has expired")]
    TokenExpired,

    #[error("token is not yet valid")]
    TokenNotYetValid,

    #[error("token issuer does not match")]
    IssuerMismatch,

    #[error("token audience does not match")]
    AudienceMismatch,

    #[error("token claim '{0}' is missing")]
    MissingClaim(&'static str),

    #[error("signing keys are unavailable: {0}")]
    KeySourceUnavailable(KeySourceError),
}

impl VerificationError {
    /// Bounded label for logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            VerificationError::MalformedToken => "malformed_token",
            VerificationError::AlgorithmNotAllowed => "algorithm_not_allowed",
            VerificationError::UnknownSigningKey => "unknown_signing_key",
            VerificationError::BadSignature => "bad_signature",
            VerificationError::TokenExpired => "token_expired",
            VerificationError::TokenNotYetValid => "token_not_yet_valid",
            VerificationError::IssuerMismatch => "issuer_mismatch",
            VerificationError::AudienceMismatch => "audience_mismatch",
            VerificationError::MissingClaim(_) => "missing_claim",
            VerificationError::KeySourceUnavailable(_) => "key_source_unavailable",
        }
    }

    /// True when the token itself is at fault rather than our ability to
    /// check it.
    pub fn is_credential_failure(&self) -> bool {
        !matches!(self, VerificationError::KeySourceUnavailable(_))
    }
}

impl From<JwtValidationError> for VerificationError {
    fn from(e: JwtValidationError) -> Self {
        match e {
            JwtValidationError::TokenTooLarge | JwtValidationError::MalformedToken => {
                VerificationError::MalformedToken
            }
            JwtValidationError::MissingKid => VerificationError::UnknownSigningKey,
            JwtValidationError::Expired => VerificationError::TokenExpired,
            JwtValidationError::IatTooFarInFuture | JwtValidationError::NotYetValid => {
                VerificationError::TokenNotYetValid
            }
        }
    }
}

/// Verifies signed assertions using keys from a shared `KeySetCache`.
pub struct TokenVerifier {
    keys: Arc<KeySetCache>,
    allowed_algorithms: Vec<Algorithm>,
    clock_skew: Duration,
}

impl TokenVerifier {
    /// Create a verifier that accepts ES256 only.
    ///
    /// # Arguments
    ///
    /// * `keys` - Shared key set cache
    /// * `clock_skew` - Tolerance applied to `exp`, `iat` and `nbf`, capped
    ///   at `MAX_CLOCK_SKEW`
    pub fn new(keys: Arc<KeySetCache>, clock_skew: Duration) -> Self {
        Self {
            keys,
            allowed_algorithms: vec![Algorithm::ES256],
            clock_skew: clock_skew.min(MAX_CLOCK_SKEW),
        }
    }

    /// Replace the algorithm allow-list.
    ///
    /// Symmetric algorithms are dropped: verification keys come from a
    /// public key set.
    #[must_use]
    pub fn with_allowed_algorithms(mut self, algorithms: Vec<Algorithm>) -> Self {
        self.allowed_algorithms = algorithms
            .into_iter()
            .filter(|alg| !matches!(alg, Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512))
            .collect();
        self
    }

    /// The shared key set cache.
    pub fn key_set(&self) -> &Arc<KeySetCache> {
        &self.keys
    }

    /// Verify `token` against the expected issuer and audience.
    ///
    /// # Checks (in order)
    ///
    /// 1. Expected issuer and audience are non-empty
    /// 2. Compact structure, size limit, decodable header
    /// 3. Header `alg` is on the allow-list
    /// 4. Header `kid` names a key in the key set (refreshing if needed)
    /// 5. Key type matches the algorithm, signature verifies
    /// 6. `exp`, `iat`, `nbf` with clock skew
    /// 7. `iss` equals `issuer`, `aud` contains `audience`
    ///
    /// # Errors
    ///
    /// Returns the first failing check as a `VerificationError`.
    #[instrument(skip_all)]
    pub async fn verify(
        &self,
        token: &str,
        issuer: &str,
        audience: &str,
    ) -> Result<VerifiedClaims, VerificationError> {
        let start = Instant::now();
        let result = self.verify_inner(token, issuer, audience).await;

        let status = match &result {
            Ok(_) => "success",
            Err(e) => e.label(),
        };
        metrics::record_token_verification(status, start.elapsed());

        result
    }

    async fn verify_inner(
        &self,
        token: &str,
        issuer: &str,
        audience: &str,
    ) -> Result<VerifiedClaims, VerificationError> {
        // Nothing can match an empty expectation, so don't touch the key set
        if issuer.is_empty() {
            return Err(VerificationError::IssuerMismatch);
        }
        if audience.is_empty() {
            return Err(VerificationError::AudienceMismatch);
        }

        // 1. Structure and header (includes size check via common::jwt)
        let header = parse_header(token).map_err(|e| {
            tracing::debug!(target: "iap.auth.verifier", error = ?e, "Token header rejected");
            VerificationError::from(e)
        })?;

        // 2. Algorithm allow-list
        let algorithm = header
            .alg
            .parse::<Algorithm>()
            .ok()
            .filter(|alg| self.allowed_algorithms.contains(alg))
            .ok_or_else(|| {
                tracing::debug!(target: "iap.auth.verifier", alg = %header.alg, "Token algorithm not allowed");
                VerificationError::AlgorithmNotAllowed
            })?;

        // 3. Key lookup
        let kid = header.kid().map_err(|e| {
            tracing::debug!(target: "iap.auth.verifier", "Token has no key ID");
            VerificationError::from(e)
        })?;
        let key = self.keys.get_key(kid).await?;

        if !key.supports(algorithm) {
            tracing::debug!(
                target: "iap.auth.verifier",
                kid = %kid,
                alg = ?algorithm,
                "Signing key does not match token algorithm"
            );
            return Err(VerificationError::AlgorithmNotAllowed);
        }

        // 4. Signature; claims are checked below so we control the taxonomy
        let mut validation = Validation::new(algorithm);
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();
        validation.leeway = 0;

        let claims = decode::<RawClaims>(token, &key.decoding_key, &validation)
            .map_err(|e| {
                tracing::debug!(target: "iap.auth.verifier", error = %e, "Token signature verification failed");
                map_decode_error(e.kind())
            })?
            .claims;

        // 5. Time claims
        let exp = claims.exp.ok_or(VerificationError::MissingClaim("exp"))?;
        validate_time_claims(exp, claims.iat, claims.nbf, self.clock_skew).map_err(|e| {
            tracing::debug!(target: "iap.auth.verifier", error = ?e, "Token time claims rejected");
            VerificationError::from(e)
        })?;

        // 6. Issuer and audience
        if claims.iss.as_deref() != Some(issuer) {
            tracing::debug!(target: "iap.auth.verifier", "Token issuer mismatch");
            return Err(VerificationError::IssuerMismatch);
        }

        let aud = match claims.aud {
            Some(aud) if aud.contains(audience) => aud,
            _ => {
                tracing::debug!(target: "iap.auth.verifier", "Token audience mismatch");
                return Err(VerificationError::AudienceMismatch);
            }
        };

        tracing::debug!(target: "iap.auth.verifier", kid = %kid, "Token verified successfully");

        Ok(VerifiedClaims {
            iss: issuer.to_string(),
            aud,
            exp,
            iat: claims.iat,
            nbf: claims.nbf,
            sub: claims.sub,
            email: claims.email,
            hd: claims.hd,
        })
    }
}

fn map_decode_error(kind: &ErrorKind) -> VerificationError {
    match kind {
        ErrorKind::InvalidSignature => VerificationError::BadSignature,
        ErrorKind::InvalidAlgorithm
        | ErrorKind::InvalidAlgorithmName
        | ErrorKind::InvalidKeyFormat => VerificationError::AlgorithmNotAllowed,
        ErrorKind::InvalidToken
        | ErrorKind::Base64(_)
        | ErrorKind::Json(_)
        | ErrorKind::Utf8(_) => VerificationError::MalformedToken,
        _ => VerificationError::BadSignature,
    }
}
