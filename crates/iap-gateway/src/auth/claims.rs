//! Claims carried by IAP assertions.
//!
//! `RawClaims` is what comes off the wire after signature verification; every
//! field is optional so that a missing claim surfaces as a specific
//! verification failure instead of a generic decode error. `VerifiedClaims`
//! is only built once issuer, audience and time checks have passed.
//!
//! The `email` and `sub` fields identify a person and are redacted in Debug
//! output.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The `aud` claim, which RFC 7519 allows as a string or an array.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Audience {
    Single(String),
    Multiple(Vec<String>),
}

impl Audience {
    /// Exact match for the string form, membership for the array form.
    pub fn contains(&self, audience: &str) -> bool {
        match self {
            Audience::Single(value) => value == audience,
            Audience::Multiple(values) => values.iter().any(|v| v == audience),
        }
    }
}

/// Claims as decoded from a token whose signature has been verified.
#[derive(Clone, Deserialize)]
pub(crate) struct RawClaims {
    #[serde(default)]
    pub iss: Option<String>,
    #[serde(default)]
    pub aud: Option<Audience>,
    #[serde(default)]
    pub exp: Option<i64>,
    #[serde(default)]
    pub iat: Option<i64>,
    #[serde(default)]
    pub nbf: Option<i64>,
    #[serde(default)]
    pub sub: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    /// Hosted domain of the user's account, when the proxy sets it.
    #[serde(default)]
    pub hd: Option<String>,
}

/// Claims of a fully verified assertion.
///
/// Passed by value to the caller and never mutated afterwards.
#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct VerifiedClaims {
    /// Issuer, equal to the expected issuer.
    pub iss: String,

    /// Audience, containing the expected audience.
    pub aud: Audience,

    /// Expiration timestamp (Unix epoch seconds).
    pub exp: i64,

    /// Issued-at timestamp (Unix epoch seconds).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,

    /// Not-before timestamp (Unix epoch seconds).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nbf: Option<i64>,

    /// Stable account identifier - redacted in Debug output.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,

    /// User identity - redacted in Debug output. May be absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    /// Hosted domain.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hd: Option<String>,
}

/// Custom Debug implementation that redacts `sub` and `email`.
impl fmt::Debug for VerifiedClaims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerifiedClaims")
            .field("iss", &self.iss)
            .field("aud", &self.aud)
            .field("exp", &self.exp)
            .field("iat", &self.iat)
            .field("nbf", &self.nbf)
            .field("sub", &self.sub.as_ref().map(|_| "[REDACTED]"))
            .field("email", &self.email.as_ref().map(|_| "[REDACTED]"))
            .field("hd", &self.hd)
            .finish()
    }
}

impl VerifiedClaims {
    /// The `email` claim, if present and non-blank.
    pub fn email(&self) -> Option<&str> {
        self.email
            .as_deref()
            .map(str::trim)
            .filter(|email| !email.is_empty())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn sample_claims() -> VerifiedClaims {
        VerifiedClaims {
            iss: "https://cloud.google.com/iap".to_string(),
            aud: Audience::Single("/projects/1/global/backendServices/2".to_string()),
            exp: 1234567890,
            iat: Some(1234567800),
            nbf: None,
            sub: Some("accounts.google.com:1234".to_string()),
            email: Some("alice@example.com".to_string()),
            hd: Some("example.com".to_string()),
        }
    }

    #[test]
    fn test_audience_deserializes_string_and_array() {
        let single: Audience = serde_json::from_str(r#""/projects/1/x""#).unwrap();
        let multiple: Audience = serde_json::from_str(r#"["a", "/projects/1/x"]"#).unwrap();

        assert_eq!(single, Audience::Single("/projects/1/x".to_string()));
        assert!(single.contains("/projects/1/x"));
        assert!(multiple.contains("/projects/1/x"));
        assert!(!multiple.contains("/projects/2/x"));
    }

    #[test]
    fn test_audience_requires_exact_match() {
        let audience = Audience::Single("/projects/1/global/backendServices/2".to_string());

        assert!(!audience.contains("/projects/1/global/backendServices/20"));
        assert!(!audience.contains("/projects/1/global/backendServices"));
        assert!(!audience.contains(""));
    }

    #[test]
    fn test_raw_claims_tolerate_missing_fields() {
        let raw: RawClaims = serde_json::from_str(r#"{"exp": 10}"#).unwrap();

        assert_eq!(raw.exp, Some(10));
        assert!(raw.iss.is_none());
        assert!(raw.aud.is_none());
        assert!(raw.email.is_none());
    }

    #[test]
    fn test_raw_claims_reject_non_numeric_exp() {
        let result: Result<RawClaims, _> = serde_json::from_str(r#"{"exp": "tomorrow"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_claims_debug_redacts_identity() {
        let debug_str = format!("{:?}", sample_claims());

        assert!(!debug_str.contains("alice@example.com"));
        assert!(!debug_str.contains("accounts.google.com:1234"));
        assert!(debug_str.contains("[REDACTED]"));
        assert!(debug_str.contains("https://cloud.google.com/iap"));
    }

    #[test]
    fn test_email_accessor_filters_blank() {
        let mut claims = sample_claims();
        assert_eq!(claims.email(), Some("alice@example.com"));

        claims.email = Some("   ".to_string());
        assert_eq!(claims.email(), None);

        claims.email = None;
        assert_eq!(claims.email(), None);
    }

    #[test]
    fn test_claims_serialization_omits_absent_fields() {
        let mut claims = sample_claims();
        claims.hd = None;
        claims.nbf = None;

        let json = serde_json::to_string(&claims).unwrap();

        assert!(json.contains("\"email\":\"alice@example.com\""));
        assert!(!json.contains("\"hd\""));
        assert!(!json.contains("\"nbf\""));
    }
}
