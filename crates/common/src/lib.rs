//! Common utilities and types shared across IAP gateway components.

#![warn(clippy::pedantic)]

/// Module for JWT utilities (header parsing, time claims, key material)
pub mod jwt;
