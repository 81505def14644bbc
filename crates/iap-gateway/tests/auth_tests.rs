//! Authentication integration tests.
//!
//! Drives the real router against a mocked key server.

// Test code is allowed to use expect/unwrap for assertions
#![allow(clippy::unwrap_used, clippy::expect_used)]

use anyhow::Result;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use iap_gateway::auth::IAP_JWT_HEADER;
use iap_test_utils::{
    build_test_app, test_vars, IapClaimsBuilder, MockJwksServer, TestIapServer, TestSigningKey,
};
use jsonwebtoken::{Algorithm, Header};
use reqwest::StatusCode;
use std::time::Duration;

const IDENTITY_PATH: &str = "/api/v1/identity";

/// Key server serving `key`, expecting `fetches` requests if given.
async fn jwks_serving(key: &TestSigningKey, fetches: Option<u64>) -> MockJwksServer {
    let jwks = MockJwksServer::start().await;
    jwks.mount(MockJwksServer::keys_response(&[key]), fetches)
        .await;
    jwks
}

async fn get_identity(server: &TestIapServer, token: Option<&str>) -> reqwest::Response {
    let mut request = reqwest::Client::new().get(format!("{}{}", server.url(), IDENTITY_PATH));
    if let Some(token) = token {
        request = request.header(IAP_JWT_HEADER, token);
    }
    request.send().await.expect("request should reach test server")
}

async fn assert_invalid_credentials(response: reqwest::Response) {
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        response
            .headers()
            .get("www-authenticate")
            .and_then(|v| v.to_str().ok()),
        Some("Bearer realm=\"iap-gateway\"")
    );
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(
        body,
        serde_json::json!({
            "error": {"code": "INVALID_CREDENTIALS", "message": "Invalid login."}
        })
    );
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test]
async fn test_missing_header_is_rejected() -> Result<()> {
    let key = TestSigningKey::generate("key-1");
    let jwks = jwks_serving(&key, Some(0)).await;
    let server = TestIapServer::spawn(&jwks.url()).await?;

    let response = get_identity(&server, None).await;

    assert_invalid_credentials(response).await;
    Ok(())
}

#[tokio::test]
async fn test_unknown_key_id_fetches_once_then_rejects() -> Result<()> {
    let trusted = TestSigningKey::generate("key-1");
    let rogue = TestSigningKey::generate("rogue-key");
    let jwks = jwks_serving(&trusted, Some(1)).await;
    let server = TestIapServer::spawn(&jwks.url()).await?;

    let token = rogue.sign(&IapClaimsBuilder::for_test_backend().email("alice@example.com").build());
    let response = get_identity(&server, Some(&token)).await;

    assert_invalid_credentials(response).await;
    jwks.verify().await;
    Ok(())
}

#[tokio::test]
async fn test_unknown_key_id_on_warm_cache_fetches_again() -> Result<()> {
    let trusted = TestSigningKey::generate("key-1");
    let rogue = TestSigningKey::generate("rogue-key");
    let jwks = jwks_serving(&trusted, Some(2)).await;
    let server = TestIapServer::spawn(&jwks.url()).await?;

    let warm = trusted.sign(&IapClaimsBuilder::for_test_backend().email("alice@example.com").build());
    assert_eq!(get_identity(&server, Some(&warm)).await.status(), StatusCode::OK);

    let token = rogue.sign(&IapClaimsBuilder::for_test_backend().email("alice@example.com").build());
    assert_invalid_credentials(get_identity(&server, Some(&token)).await).await;

    jwks.verify().await;
    Ok(())
}

#[tokio::test]
async fn test_rotated_key_is_accepted_immediately() -> Result<()> {
    let old_key = TestSigningKey::generate("key-1");
    let new_key = TestSigningKey::generate("key-2");
    let jwks = jwks_serving(&old_key, None).await;
    let server = TestIapServer::spawn(&jwks.url()).await?;

    let token = old_key.sign(&IapClaimsBuilder::for_test_backend().email("alice@example.com").build());
    assert_eq!(get_identity(&server, Some(&token)).await.status(), StatusCode::OK);

    jwks.reset().await;
    jwks.mount(MockJwksServer::keys_response(&[&new_key]), Some(1))
        .await;

    let token = new_key.sign(&IapClaimsBuilder::for_test_backend().email("bob@example.com").build());
    let response = get_identity(&server, Some(&token)).await;

    assert_eq!(response.status(), StatusCode::OK);
    jwks.verify().await;
    Ok(())
}

#[tokio::test]
async fn test_valid_assertion_returns_username() -> Result<()> {
    let key = TestSigningKey::generate("key-1");
    let jwks = jwks_serving(&key, Some(1)).await;
    let server = TestIapServer::spawn(&jwks.url()).await?;

    let token = key.sign(&IapClaimsBuilder::for_test_backend().email("alice@example.com").build());
    let response = get_identity(&server, Some(&token)).await;

    assert_eq!(response.status(), StatusCode::OK);
    let body: serde_json::Value = response.json().await?;
    assert_eq!(body, serde_json::json!({"username": "alice@example.com"}));
    Ok(())
}

#[tokio::test]
async fn test_alg_none_is_rejected_without_fetch() -> Result<()> {
    let key = TestSigningKey::generate("key-1");
    let jwks = jwks_serving(&key, Some(0)).await;
    let server = TestIapServer::spawn(&jwks.url()).await?;

    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT","kid":"key-1"}"#);
    let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(
        &IapClaimsBuilder::for_test_backend().email("alice@example.com").build(),
    )?);
    let token = format!("{header}.{payload}.");

    let response = get_identity(&server, Some(&token)).await;

    assert_invalid_credentials(response).await;
    Ok(())
}

#[tokio::test]
async fn test_declared_algorithm_outside_allow_list_is_rejected() -> Result<()> {
    let key = TestSigningKey::generate("key-1");
    let jwks = jwks_serving(&key, None).await;
    let server = TestIapServer::spawn(&jwks.url()).await?;

    let mut header = Header::new(Algorithm::RS256);
    header.kid = Some("key-1".to_string());
    let token = key.sign_with_header(
        &header,
        &IapClaimsBuilder::for_test_backend().email("alice@example.com").build(),
    );

    let response = get_identity(&server, Some(&token)).await;

    assert_invalid_credentials(response).await;
    Ok(())
}

// ============================================================================
// Claim checks
// ============================================================================

#[tokio::test]
async fn test_wrong_audience_is_rejected() -> Result<()> {
    let key = TestSigningKey::generate("key-1");
    let jwks = jwks_serving(&key, None).await;
    let server = TestIapServer::spawn(&jwks.url()).await?;

    let token = key.sign(
        &IapClaimsBuilder::new(
            iap_test_utils::TEST_ISSUER,
            "/projects/123456789012/global/backendServices/1",
        )
        .email("alice@example.com")
        .build(),
    );

    assert_invalid_credentials(get_identity(&server, Some(&token)).await).await;
    Ok(())
}

#[tokio::test]
async fn test_expired_assertion_is_rejected() -> Result<()> {
    let key = TestSigningKey::generate("key-1");
    let jwks = jwks_serving(&key, None).await;
    let server = TestIapServer::spawn(&jwks.url()).await?;

    let token = key.sign(
        &IapClaimsBuilder::for_test_backend()
            .email("alice@example.com")
            .expires_in(-3600)
            .build(),
    );

    assert_invalid_credentials(get_identity(&server, Some(&token)).await).await;
    Ok(())
}

#[tokio::test]
async fn test_missing_email_is_rejected() -> Result<()> {
    let key = TestSigningKey::generate("key-1");
    let jwks = jwks_serving(&key, None).await;
    let server = TestIapServer::spawn(&jwks.url()).await?;

    let token = key.sign(&IapClaimsBuilder::for_test_backend().build());

    assert_invalid_credentials(get_identity(&server, Some(&token)).await).await;
    Ok(())
}

#[tokio::test]
async fn test_malformed_assertions_are_rejected() -> Result<()> {
    let key = TestSigningKey::generate("key-1");
    let jwks = jwks_serving(&key, Some(0)).await;
    let server = TestIapServer::spawn(&jwks.url()).await?;

    for token in ["garbage", "a.b", "a.b.c.d", "!!!.???.***"] {
        assert_invalid_credentials(get_identity(&server, Some(token)).await).await;
    }
    Ok(())
}

// ============================================================================
// Configuration and key source failures
// ============================================================================

#[tokio::test]
async fn test_incomplete_configuration_rejects_everything() -> Result<()> {
    let key = TestSigningKey::generate("key-1");
    let jwks = jwks_serving(&key, Some(0)).await;
    let mut vars = test_vars(&jwks.url());
    vars.remove("IAP_BACKEND_SERVICE_ID");
    let server = TestIapServer::spawn_with_vars(&vars).await?;

    let token = key.sign(&IapClaimsBuilder::for_test_backend().email("alice@example.com").build());

    assert_invalid_credentials(get_identity(&server, Some(&token)).await).await;
    Ok(())
}

#[tokio::test]
async fn test_key_server_error_is_rejected() -> Result<()> {
    let key = TestSigningKey::generate("key-1");
    let jwks = MockJwksServer::start().await;
    jwks.mount(MockJwksServer::error_response(500), None).await;
    let server = TestIapServer::spawn(&jwks.url()).await?;

    let token = key.sign(&IapClaimsBuilder::for_test_backend().email("alice@example.com").build());

    assert_invalid_credentials(get_identity(&server, Some(&token)).await).await;
    Ok(())
}

#[tokio::test]
async fn test_key_server_recovers_after_outage() -> Result<()> {
    let key = TestSigningKey::generate("key-1");
    let jwks = MockJwksServer::start().await;
    jwks.mount(MockJwksServer::error_response(503), None).await;
    let server = TestIapServer::spawn(&jwks.url()).await?;
    let token = key.sign(&IapClaimsBuilder::for_test_backend().email("alice@example.com").build());

    assert_invalid_credentials(get_identity(&server, Some(&token)).await).await;

    jwks.reset().await;
    jwks.mount(MockJwksServer::keys_response(&[&key]), None).await;

    let response = get_identity(&server, Some(&token)).await;
    assert_eq!(response.status(), StatusCode::OK);
    Ok(())
}

// ============================================================================
// Router-level
// ============================================================================

#[tokio::test]
async fn test_identity_route_without_connect_info() -> Result<()> {
    use axum::body::Body;
    use tower::ServiceExt;

    let key = TestSigningKey::generate("key-1");
    let jwks = jwks_serving(&key, None).await;
    let (app, _state) = build_test_app(&test_vars(&jwks.url()))?;

    let token = key.sign(&IapClaimsBuilder::for_test_backend().email("bob@example.com").build());
    let response = app
        .oneshot(
            axum::http::Request::builder()
                .uri(IDENTITY_PATH)
                .header(IAP_JWT_HEADER, token)
                .body(Body::empty())?,
        )
        .await?;

    assert_eq!(response.status(), axum::http::StatusCode::OK);
    Ok(())
}

#[tokio::test]
async fn test_slow_key_server_times_out() -> Result<()> {
    let key = TestSigningKey::generate("key-1");
    let jwks = MockJwksServer::start().await;
    jwks.mount(
        MockJwksServer::slow_keys_response(&[&key], Duration::from_secs(5)),
        None,
    )
    .await;
    let mut vars = test_vars(&jwks.url());
    vars.insert("JWKS_FETCH_TIMEOUT_SECONDS".to_string(), "1".to_string());
    let server = TestIapServer::spawn_with_vars(&vars).await?;

    let token = key.sign(&IapClaimsBuilder::for_test_backend().email("alice@example.com").build());

    assert_invalid_credentials(get_identity(&server, Some(&token)).await).await;
    Ok(())
}
