//! IAP Gateway Library
//!
//! Authenticates HTTP requests arriving through an identity-aware proxy by
//! verifying the signed assertion the proxy attaches to each request.
//!
//! # Architecture
//!
//! ```text
//! request -> middleware/auth.rs -> auth::HeaderAuthenticator
//!                                   -> auth::TokenVerifier
//!                                   -> auth::KeySetCache -> key server
//! ```
//!
//! # Modules
//!
//! - `auth` - Key cache, token verification and request authentication
//! - `config` - Service configuration from environment
//! - `errors` - Error types with HTTP status code mapping
//! - `handlers` - HTTP request handlers
//! - `middleware` - Authentication and metrics middleware
//! - `models` - Response bodies
//! - `observability` - Metrics
//! - `routes` - Axum router setup

pub mod auth;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod observability;
pub mod routes;
