//! Observability module for the IAP gateway.
//!
//! Provides metrics definitions and instrumentation helpers.

pub mod metrics;
