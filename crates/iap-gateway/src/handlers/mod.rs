//! HTTP request handlers for the IAP gateway.

pub mod health;
pub mod identity;
pub mod metrics;

pub use health::{health_check, readiness_check};
pub use identity::get_identity;
pub use metrics::metrics_handler;
