//! Mocked key server for integration tests.
//!
//! Wraps a `wiremock::MockServer` that serves a JWK Set at `JWKS_PATH`.
//! Mounting with `expected_fetches` makes wiremock verify the fetch count
//! when the server is dropped.

use crate::crypto_fixtures::TestSigningKey;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Path the mock serves the key set on.
pub const JWKS_PATH: &str = "/iap/verify/public_key-jwk";

/// A running mock key server.
pub struct MockJwksServer {
    server: MockServer,
}

impl MockJwksServer {
    /// Start a mock key server on a random port.
    pub async fn start() -> Self {
        Self {
            server: MockServer::start().await,
        }
    }

    /// Full URL of the key set endpoint.
    pub fn url(&self) -> String {
        format!("{}{}", self.server.uri(), JWKS_PATH)
    }

    /// JWK Set body containing `keys`.
    pub fn jwks_body(keys: &[&TestSigningKey]) -> serde_json::Value {
        serde_json::json!({
            "keys": keys.iter().map(|k| k.jwk_json()).collect::<Vec<_>>()
        })
    }

    /// 200 response serving `keys`.
    pub fn keys_response(keys: &[&TestSigningKey]) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(Self::jwks_body(keys))
    }

    /// 200 response serving `keys` with `Cache-Control: max-age`.
    pub fn keys_response_with_max_age(keys: &[&TestSigningKey], max_age: u64) -> ResponseTemplate {
        Self::keys_response(keys)
            .insert_header("cache-control", format!("public, max-age={max_age}").as_str())
    }

    /// 200 response serving `keys` after `delay`.
    pub fn slow_keys_response(keys: &[&TestSigningKey], delay: Duration) -> ResponseTemplate {
        Self::keys_response(keys).set_delay(delay)
    }

    /// Error response with `status`.
    pub fn error_response(status: u16) -> ResponseTemplate {
        ResponseTemplate::new(status)
    }

    /// Serve `response` for GET `JWKS_PATH`.
    ///
    /// With `expected_fetches`, the mock panics on drop if it was not hit
    /// exactly that many times.
    pub async fn mount(&self, response: ResponseTemplate, expected_fetches: Option<u64>) {
        let mock = Mock::given(method("GET"))
            .and(path(JWKS_PATH))
            .respond_with(response);
        let mock = match expected_fetches {
            Some(n) => mock.expect(n),
            None => mock,
        };
        mock.mount(&self.server).await;
    }

    /// Remove all mounted responses.
    pub async fn reset(&self) {
        self.server.reset().await;
    }

    /// Number of key set requests received so far.
    pub async fn fetch_count(&self) -> usize {
        self.server
            .received_requests()
            .await
            .map_or(0, |requests| requests.len())
    }

    /// Check mounted expectations now instead of on drop.
    pub async fn verify(&self) {
        self.server.verify().await;
    }
}
