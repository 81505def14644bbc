//! Authentication module for the IAP gateway.
//!
//! Verifies the signed assertion an identity-aware proxy attaches to every
//! request and turns it into an authenticated identity.
//!
//! # Components
//!
//! - `jwks` - Signing key set fetching and single-flight caching
//! - `verifier` - Signature, time, issuer and audience checks
//! - `claims` - Claims carried by verified assertions
//! - `authenticator` - Header extraction and identity construction

pub mod authenticator;
pub mod claims;
pub mod jwks;
pub mod verifier;

pub use authenticator::{
    AuthenticatedIdentity, DefaultIdentityFactory, HeaderAuthenticator, IdentityFactory,
    InvalidCredentials, RejectionReason, RequestContext, IAP_JWT_HEADER,
};
pub use claims::{Audience, VerifiedClaims};
pub use jwks::{HttpKeySource, KeySetCache, KeySource, KeySourceError};
pub use verifier::{TokenVerifier, VerificationError};
