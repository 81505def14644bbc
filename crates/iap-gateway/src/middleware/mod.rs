//! Middleware for the IAP gateway.
//!
//! # Components
//!
//! - `auth` - IAP assertion authentication for protected routes
//! - `http_metrics` - HTTP request metrics middleware

pub mod auth;
pub mod http_metrics;

pub use auth::{require_iap_identity, AuthState};
pub use http_metrics::http_metrics_middleware;
