//! Builder patterns for IAP assertion claims
//!
//! Provides a fluent API for the claim sets an identity-aware proxy signs.

use chrono::{Duration, Utc};
use serde_json::{json, Map, Value};

/// Trusted issuer used by test configurations.
pub const TEST_ISSUER: &str = "https://cloud.google.com/iap";

/// Project number used by test configurations.
pub const TEST_PROJECT_ID: &str = "123456789012";

/// Backend service ID used by test configurations.
pub const TEST_BACKEND_SERVICE_ID: &str = "4242424242";

/// Audience matching `TEST_PROJECT_ID` and `TEST_BACKEND_SERVICE_ID`.
pub fn test_audience() -> String {
    iap_gateway::config::expected_audience(TEST_PROJECT_ID, TEST_BACKEND_SERVICE_ID)
}

/// Builder for IAP assertion claims
///
/// Defaults: issued now, expires in 10 minutes, fixed subject, no email.
///
/// # Example
/// ```rust,ignore
/// let claims = IapClaimsBuilder::for_test_backend()
///     .email("alice@example.com")
///     .expires_in(60)
///     .build();
/// ```
pub struct IapClaimsBuilder {
    iss: String,
    aud: Value,
    sub: String,
    email: Option<String>,
    hd: Option<String>,
    exp: Option<i64>,
    iat: Option<i64>,
    nbf: Option<i64>,
}

impl IapClaimsBuilder {
    /// Claims for an explicit issuer and audience.
    pub fn new(issuer: &str, audience: &str) -> Self {
        let now = Utc::now();
        Self {
            iss: issuer.to_string(),
            aud: Value::String(audience.to_string()),
            sub: "accounts.google.com:100000000000000000001".to_string(),
            email: None,
            hd: None,
            exp: Some((now + Duration::seconds(600)).timestamp()),
            iat: Some(now.timestamp()),
            nbf: None,
        }
    }

    /// Claims for `TEST_ISSUER` and `test_audience()`.
    pub fn for_test_backend() -> Self {
        Self::new(TEST_ISSUER, &test_audience())
    }

    /// Set the `email` claim.
    pub fn email(mut self, email: &str) -> Self {
        self.email = Some(email.to_string());
        self
    }

    /// Set the `sub` claim.
    pub fn subject(mut self, subject: &str) -> Self {
        self.sub = subject.to_string();
        self
    }

    /// Set the `hd` (hosted domain) claim.
    pub fn hosted_domain(mut self, domain: &str) -> Self {
        self.hd = Some(domain.to_string());
        self
    }

    /// Use the array form of `aud`.
    pub fn audiences(mut self, audiences: &[&str]) -> Self {
        self.aud = json!(audiences);
        self
    }

    /// Set expiration in seconds from now (negative for the past)
    pub fn expires_in(mut self, seconds: i64) -> Self {
        self.exp = Some((Utc::now() + Duration::seconds(seconds)).timestamp());
        self
    }

    /// Set the `exp` timestamp
    pub fn expires_at(mut self, timestamp: i64) -> Self {
        self.exp = Some(timestamp);
        self
    }

    /// Omit the `exp` claim
    pub fn without_expiry(mut self) -> Self {
        self.exp = None;
        self
    }

    /// Set the `iat` timestamp
    pub fn issued_at(mut self, timestamp: i64) -> Self {
        self.iat = Some(timestamp);
        self
    }

    /// Set the `nbf` timestamp
    pub fn not_before(mut self, timestamp: i64) -> Self {
        self.nbf = Some(timestamp);
        self
    }

    /// Build the claims as a JSON value
    pub fn build(self) -> Value {
        let mut claims = Map::new();
        claims.insert("iss".to_string(), Value::String(self.iss));
        claims.insert("aud".to_string(), self.aud);
        claims.insert("sub".to_string(), Value::String(self.sub));
        if let Some(email) = self.email {
            claims.insert("email".to_string(), Value::String(email));
        }
        if let Some(hd) = self.hd {
            claims.insert("hd".to_string(), Value::String(hd));
        }
        if let Some(exp) = self.exp {
            claims.insert("exp".to_string(), json!(exp));
        }
        if let Some(iat) = self.iat {
            claims.insert("iat".to_string(), json!(iat));
        }
        if let Some(nbf) = self.nbf {
            claims.insert("nbf".to_string(), json!(nbf));
        }
        Value::Object(claims)
    }
}
