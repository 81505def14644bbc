//! IAP gateway configuration.
//!
//! Configuration is loaded from environment variables once at startup.
//! Malformed values stop startup with a `ConfigError`. Missing IAP project or
//! backend-service identifiers do NOT: the gateway starts, and every request
//! is rejected until they are supplied (fail closed).

use crate::auth::jwks::MAX_STALE;
use common::jwt::{DEFAULT_CLOCK_SKEW, MAX_CLOCK_SKEW};
use jsonwebtoken::Algorithm;
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Issuer of assertions minted by the identity-aware proxy.
pub const DEFAULT_IAP_ISSUER: &str = "https://cloud.google.com/iap";

/// Public JWK Set for IAP-signed assertions.
pub const DEFAULT_IAP_JWKS_URL: &str = "https://www.gstatic.com/iap/verify/public_key-jwk";

/// Default server bind address.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8080";

/// Default key set cache TTL when the key server sends no `max-age`.
pub const DEFAULT_JWKS_CACHE_TTL_SECONDS: u64 = 300;

/// Default bound on a single key set fetch.
pub const DEFAULT_JWKS_FETCH_TIMEOUT_SECONDS: u64 = 10;

/// Default minimum spacing between refreshes caused by unknown key IDs.
///
/// Zero: every unknown key ID triggers a (coalesced) fetch.
pub const DEFAULT_JWKS_MIN_REFRESH_INTERVAL_SECONDS: u64 = 0;

/// Default window for serving expired keys when the key server is down.
///
/// Zero: an expired key set is never trusted.
pub const DEFAULT_JWKS_MAX_STALE_SECONDS: u64 = 0;

/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT_SECONDS: u64 = 30;

/// Template for the audience of IAP assertions behind a backend service.
pub fn expected_audience(project_id: &str, backend_service_id: &str) -> String {
    format!("/projects/{project_id}/global/backendServices/{backend_service_id}")
}

/// Issuer and audience every assertion must match.
///
/// Built once at startup and never mutated. An incomplete config (empty
/// issuer, or no audience because an identifier is missing) makes every
/// authentication attempt fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationConfig {
    expected_issuer: String,
    expected_audience: Option<String>,
}

impl VerificationConfig {
    /// Build from an issuer and the project / backend-service identifiers.
    ///
    /// Blank identifiers are treated as absent.
    pub fn new(
        expected_issuer: impl Into<String>,
        project_id: Option<&str>,
        backend_service_id: Option<&str>,
    ) -> Self {
        let project_id = project_id.map(str::trim).filter(|s| !s.is_empty());
        let backend_service_id = backend_service_id.map(str::trim).filter(|s| !s.is_empty());

        let expected_audience = match (project_id, backend_service_id) {
            (Some(project), Some(backend)) => Some(expected_audience(project, backend)),
            _ => None,
        };

        Self {
            expected_issuer: expected_issuer.into().trim().to_string(),
            expected_audience,
        }
    }

    pub fn expected_issuer(&self) -> &str {
        &self.expected_issuer
    }

    /// `None` when the project or backend-service identifier is missing.
    pub fn expected_audience(&self) -> Option<&str> {
        self.expected_audience.as_deref()
    }

    /// Both issuer and audience are present and non-empty.
    pub fn is_complete(&self) -> bool {
        !self.expected_issuer.is_empty() && self.expected_audience.is_some()
    }
}

/// IAP gateway configuration.
#[derive(Clone)]
pub struct Config {
    /// Server bind address (default: "0.0.0.0:8080").
    pub bind_address: String,

    /// Trusted assertion issuer.
    pub iap_issuer: String,

    /// Cloud project number the backend service belongs to.
    pub iap_project_id: Option<String>,

    /// Backend service ID behind the proxy.
    pub iap_backend_service_id: Option<String>,

    /// JWK Set endpoint for the issuer's signing keys.
    pub jwks_url: String,

    /// Signing algorithms a token may declare.
    pub allowed_algorithms: Vec<Algorithm>,

    /// Clock skew tolerance in seconds for exp/iat/nbf validation.
    pub jwt_clock_skew_seconds: i64,

    /// Key set cache TTL used when the key server sends no `max-age`.
    pub jwks_cache_ttl_seconds: u64,

    /// Timeout for a single key set fetch.
    pub jwks_fetch_timeout_seconds: u64,

    /// Minimum spacing between refreshes caused by an unknown key ID.
    pub jwks_min_refresh_interval_seconds: u64,

    /// How long past expiry cached keys may be served while refreshes fail.
    pub jwks_max_stale_seconds: u64,

    /// Per-request timeout applied to all routes.
    pub request_timeout_seconds: u64,
}

/// Custom Debug implementation that keeps deployment identifiers out of logs.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("bind_address", &self.bind_address)
            .field("iap_issuer", &self.iap_issuer)
            .field(
                "iap_project_id",
                &self.iap_project_id.as_ref().map(|_| "[REDACTED]"),
            )
            .field(
                "iap_backend_service_id",
                &self.iap_backend_service_id.as_ref().map(|_| "[REDACTED]"),
            )
            .field("jwks_url", &self.jwks_url)
            .field("allowed_algorithms", &self.allowed_algorithms)
            .field("jwt_clock_skew_seconds", &self.jwt_clock_skew_seconds)
            .field("jwks_cache_ttl_seconds", &self.jwks_cache_ttl_seconds)
            .field("jwks_fetch_timeout_seconds", &self.jwks_fetch_timeout_seconds)
            .field(
                "jwks_min_refresh_interval_seconds",
                &self.jwks_min_refresh_interval_seconds,
            )
            .field("jwks_max_stale_seconds", &self.jwks_max_stale_seconds)
            .field("request_timeout_seconds", &self.request_timeout_seconds)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid issuer configuration: {0}")]
    InvalidIssuer(String),

    #[error("Invalid JWT clock skew configuration: {0}")]
    InvalidJwtClockSkew(String),

    #[error("Invalid allowed algorithms configuration: {0}")]
    InvalidAlgorithms(String),

    #[error("Invalid duration configuration: {0}")]
    InvalidDuration(String),
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a HashMap (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let bind_address = vars
            .get("BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        let iap_issuer = vars
            .get("IAP_ISSUER")
            .cloned()
            .unwrap_or_else(|| DEFAULT_IAP_ISSUER.to_string());
        if iap_issuer.trim().is_empty() {
            return Err(ConfigError::InvalidIssuer(
                "IAP_ISSUER must not be empty".to_string(),
            ));
        }

        let iap_project_id = non_blank(vars.get("IAP_PROJECT_ID"));
        let iap_backend_service_id = non_blank(vars.get("IAP_BACKEND_SERVICE_ID"));

        let jwks_url = vars
            .get("IAP_JWKS_URL")
            .cloned()
            .unwrap_or_else(|| DEFAULT_IAP_JWKS_URL.to_string());

        let allowed_algorithms = match vars.get("IAP_ALLOWED_ALGORITHMS") {
            Some(value) => parse_algorithms(value)?,
            None => vec![Algorithm::ES256],
        };

        // Parse JWT clock skew tolerance with validation
        let jwt_clock_skew_seconds = if let Some(value_str) = vars.get("JWT_CLOCK_SKEW_SECONDS") {
            let value: i64 = value_str.parse().map_err(|e| {
                ConfigError::InvalidJwtClockSkew(format!(
                    "JWT_CLOCK_SKEW_SECONDS must be a valid integer, got '{}': {}",
                    value_str, e
                ))
            })?;

            if value <= 0 {
                return Err(ConfigError::InvalidJwtClockSkew(format!(
                    "JWT_CLOCK_SKEW_SECONDS must be positive, got {}",
                    value
                )));
            }

            if value > MAX_CLOCK_SKEW.as_secs() as i64 {
                return Err(ConfigError::InvalidJwtClockSkew(format!(
                    "JWT_CLOCK_SKEW_SECONDS must not exceed {} seconds, got {}",
                    MAX_CLOCK_SKEW.as_secs(),
                    value
                )));
            }

            value
        } else {
            DEFAULT_CLOCK_SKEW.as_secs() as i64
        };

        let jwks_cache_ttl_seconds = parse_positive_seconds(
            vars,
            "JWKS_CACHE_TTL_SECONDS",
            DEFAULT_JWKS_CACHE_TTL_SECONDS,
        )?;
        let jwks_fetch_timeout_seconds = parse_positive_seconds(
            vars,
            "JWKS_FETCH_TIMEOUT_SECONDS",
            DEFAULT_JWKS_FETCH_TIMEOUT_SECONDS,
        )?;
        let request_timeout_seconds = parse_positive_seconds(
            vars,
            "REQUEST_TIMEOUT_SECONDS",
            DEFAULT_REQUEST_TIMEOUT_SECONDS,
        )?;

        // Zero is allowed here: it disables the unknown-kid rate limit
        let jwks_min_refresh_interval_seconds =
            match vars.get("JWKS_MIN_REFRESH_INTERVAL_SECONDS") {
                Some(value_str) => value_str.parse::<u64>().map_err(|e| {
                    ConfigError::InvalidDuration(format!(
                        "JWKS_MIN_REFRESH_INTERVAL_SECONDS must be a non-negative integer, got '{}': {}",
                        value_str, e
                    ))
                })?,
                None => DEFAULT_JWKS_MIN_REFRESH_INTERVAL_SECONDS,
            };

        let jwks_max_stale_seconds = match vars.get("JWKS_MAX_STALE_SECONDS") {
            Some(value_str) => {
                let value = value_str.parse::<u64>().map_err(|e| {
                    ConfigError::InvalidDuration(format!(
                        "JWKS_MAX_STALE_SECONDS must be a non-negative integer, got '{}': {}",
                        value_str, e
                    ))
                })?;
                if value > MAX_STALE.as_secs() {
                    return Err(ConfigError::InvalidDuration(format!(
                        "JWKS_MAX_STALE_SECONDS must not exceed {} seconds, got {}",
                        MAX_STALE.as_secs(),
                        value
                    )));
                }
                value
            }
            None => DEFAULT_JWKS_MAX_STALE_SECONDS,
        };

        Ok(Config {
            bind_address,
            iap_issuer,
            iap_project_id,
            iap_backend_service_id,
            jwks_url,
            allowed_algorithms,
            jwt_clock_skew_seconds,
            jwks_cache_ttl_seconds,
            jwks_fetch_timeout_seconds,
            jwks_min_refresh_interval_seconds,
            jwks_max_stale_seconds,
            request_timeout_seconds,
        })
    }

    /// Issuer/audience pair for the header authenticator.
    pub fn verification_config(&self) -> VerificationConfig {
        VerificationConfig::new(
            self.iap_issuer.clone(),
            self.iap_project_id.as_deref(),
            self.iap_backend_service_id.as_deref(),
        )
    }

    pub fn clock_skew(&self) -> Duration {
        Duration::from_secs(self.jwt_clock_skew_seconds.unsigned_abs())
    }
}

fn non_blank(value: Option<&String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Parse a comma-separated list of asymmetric JWS algorithms.
///
/// HMAC algorithms are refused: keys come from a public key set, so a
/// shared-secret algorithm can only be an algorithm-confusion attempt.
fn parse_algorithms(value: &str) -> Result<Vec<Algorithm>, ConfigError> {
    let mut algorithms = Vec::new();

    for name in value.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let algorithm: Algorithm = name.parse().map_err(|_| {
            ConfigError::InvalidAlgorithms(format!(
                "IAP_ALLOWED_ALGORITHMS contains unsupported algorithm '{}'",
                name
            ))
        })?;

        if matches!(algorithm, Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512) {
            return Err(ConfigError::InvalidAlgorithms(format!(
                "IAP_ALLOWED_ALGORITHMS must only list asymmetric algorithms, got '{}'",
                name
            )));
        }

        if !algorithms.contains(&algorithm) {
            algorithms.push(algorithm);
        }
    }

    if algorithms.is_empty() {
        return Err(ConfigError::InvalidAlgorithms(
            "IAP_ALLOWED_ALGORITHMS must list at least one algorithm".to_string(),
        ));
    }

    Ok(algorithms)
}

fn parse_positive_seconds(
    vars: &HashMap<String, String>,
    name: &str,
    default: u64,
) -> Result<u64, ConfigError> {
    let Some(value_str) = vars.get(name) else {
        return Ok(default);
    };

    let value: u64 = value_str.parse().map_err(|e| {
        ConfigError::InvalidDuration(format!(
            "{} must be a valid positive integer, got '{}': {}",
            name, value_str, e
        ))
    })?;

    if value == 0 {
        return Err(ConfigError::InvalidDuration(format!(
            "{} must be greater than 0",
            name
        )));
    }

    Ok(value)
}
