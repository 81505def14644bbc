//! # IAP Test Utilities
//!
//! Shared test utilities for the IAP gateway.
//!
//! This crate provides:
//! - ES256 signing keys and their JWK form (`TestSigningKey`)
//! - An IAP claims builder (`IapClaimsBuilder`)
//! - A mocked key server (`MockJwksServer`)
//! - A server harness (`TestIapServer`) for HTTP-level tests
//!
//! ## Usage
//!
//! ```rust,ignore
//! use iap_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() -> anyhow::Result<()> {
//!     let key = TestSigningKey::generate("key-1");
//!     let jwks = MockJwksServer::start().await;
//!     jwks.mount(MockJwksServer::keys_response(&[&key]), None).await;
//!
//!     let server = TestIapServer::spawn(&jwks.url()).await?;
//!     let token = key.sign(&IapClaimsBuilder::for_test_backend().email("alice@example.com").build());
//!     // send token in x-goog-iap-jwt-assertion ...
//!     Ok(())
//! }
//! ```

pub mod crypto_fixtures;
pub mod jwks_mock;
pub mod server_harness;
pub mod token_builders;

// Re-export commonly used items
pub use crypto_fixtures::*;
pub use jwks_mock::*;
pub use server_harness::*;
pub use token_builders::*;
