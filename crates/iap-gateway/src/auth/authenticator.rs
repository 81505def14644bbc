//! Request authentication from the IAP assertion header.
//!
//! `HeaderAuthenticator` turns an HTTP request into an authenticated
//! identity, or a single opaque `InvalidCredentials` rejection:
//!
//! ```text
//! Start -> HeaderExtracted -> TokenVerified -> ClaimExtracted -> Authenticated
//!   \____________\_______________\________________\_________> Rejected
//! ```
//!
//! The rejection never says which stage failed. The stage is kept on the
//! error for logs and metrics only.

use crate::auth::verifier::{TokenVerifier, VerificationError};
use crate::config::VerificationConfig;
use crate::observability::metrics;
use axum::extract::ConnectInfo;
use axum::http::{Method, Request};
use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tracing::instrument;

/// Header the identity-aware proxy puts its signed assertion in.
pub const IAP_JWT_HEADER: &str = "x-goog-iap-jwt-assertion";

/// The request an identity was established for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    pub method: Method,
    pub path: String,
    /// Peer address, when the server was started with connect info.
    pub remote_addr: Option<SocketAddr>,
}

impl RequestContext {
    /// Capture the parts of `request` an identity stays bound to.
    pub fn from_request<B>(request: &Request<B>) -> Self {
        Self {
            method: request.method().clone(),
            path: request.uri().path().to_string(),
            remote_addr: request
                .extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| *addr),
        }
    }
}

/// A successfully authenticated user.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthenticatedIdentity {
    username: String,
    source: RequestContext,
}

impl AuthenticatedIdentity {
    pub(crate) fn new(username: String, source: RequestContext) -> Self {
        Self { username, source }
    }

    /// Verified, non-empty username (the assertion's `email` claim).
    pub fn username(&self) -> &str {
        &self.username
    }

    /// The request this identity was established for.
    pub fn source(&self) -> &RequestContext {
        &self.source
    }
}

/// Custom Debug implementation that redacts the username.
impl fmt::Debug for AuthenticatedIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthenticatedIdentity")
            .field("username", &"[REDACTED]")
            .field("source", &self.source)
            .finish()
    }
}

/// Builds the identity value handed to the session layer.
pub trait IdentityFactory: Send + Sync + 'static {
    type Identity: Clone + Send + Sync + 'static;

    /// `username` is always non-empty.
    fn create(&self, username: String, source: RequestContext) -> Self::Identity;
}

/// Produces `AuthenticatedIdentity`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultIdentityFactory;

impl IdentityFactory for DefaultIdentityFactory {
    type Identity = AuthenticatedIdentity;

    fn create(&self, username: String, source: RequestContext) -> AuthenticatedIdentity {
        AuthenticatedIdentity::new(username, source)
    }
}

/// Internal reason for a rejection. Never shown to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectionReason {
    /// No usable assertion header.
    MissingHeader,

    /// Issuer or audience not configured; nothing is verified.
    IncompleteConfiguration,

    /// The verifier rejected the token.
    Verification(VerificationError),

    /// Token verified but carries no usable `email` claim.
    MissingIdentityClaim,
}

impl RejectionReason {
    /// Bounded label for logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            RejectionReason::MissingHeader => "missing_header",
            RejectionReason::IncompleteConfiguration => "incomplete_configuration",
            RejectionReason::Verification(e) => e.label(),
            RejectionReason::MissingIdentityClaim => "missing_identity_claim",
        }
    }

    /// False when the gateway could not judge the credential at all.
    pub fn is_credential_failure(&self) -> bool {
        match self {
            RejectionReason::IncompleteConfiguration => false,
            RejectionReason::Verification(e) => e.is_credential_failure(),
            RejectionReason::MissingHeader | RejectionReason::MissingIdentityClaim => true,
        }
    }
}

/// The only failure callers see.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid login.")]
pub struct InvalidCredentials {
    reason: RejectionReason,
}

impl InvalidCredentials {
    pub(crate) fn new(reason: RejectionReason) -> Self {
        Self { reason }
    }

    /// Diagnostic detail for local logging.
    pub fn reason(&self) -> &RejectionReason {
        &self.reason
    }
}

/// Authenticates requests by their IAP assertion header.
pub struct HeaderAuthenticator<F = DefaultIdentityFactory> {
    config: VerificationConfig,
    verifier: Arc<TokenVerifier>,
    factory: F,
}

impl HeaderAuthenticator<DefaultIdentityFactory> {
    /// Create an authenticator producing `AuthenticatedIdentity`.
    pub fn new(config: VerificationConfig, verifier: Arc<TokenVerifier>) -> Self {
        Self::with_factory(config, verifier, DefaultIdentityFactory)
    }
}

impl<F: IdentityFactory> HeaderAuthenticator<F> {
    /// Create an authenticator with a custom identity factory.
    pub fn with_factory(config: VerificationConfig, verifier: Arc<TokenVerifier>, factory: F) -> Self {
        Self {
            config,
            verifier,
            factory,
        }
    }

    /// The verification settings in use.
    pub fn config(&self) -> &VerificationConfig {
        &self.config
    }

    /// The verifier in use.
    pub fn verifier(&self) -> &Arc<TokenVerifier> {
        &self.verifier
    }

    /// Authenticate `request`.
    ///
    /// The header and request context are copied out before any await, so
    /// the returned future does not borrow the request.
    ///
    /// # Errors
    ///
    /// `InvalidCredentials` on every failure path.
    pub fn authenticate<B>(
        &self,
        request: &Request<B>,
    ) -> impl Future<Output = Result<F::Identity, InvalidCredentials>> + Send + '_ {
        let assertion = assertion_header(request);
        let source = RequestContext::from_request(request);
        self.authenticate_assertion(assertion, source)
    }

    /// Authenticate an already extracted assertion.
    ///
    /// # Errors
    ///
    /// `InvalidCredentials` on every failure path.
    #[instrument(skip_all, fields(method = %source.method, path = %source.path))]
    pub async fn authenticate_assertion(
        &self,
        assertion: Option<String>,
        source: RequestContext,
    ) -> Result<F::Identity, InvalidCredentials> {
        let result = self.run(assertion, source).await;

        match &result {
            Ok(_) => {
                metrics::record_auth_attempt("success");
                tracing::debug!(target: "iap.auth.authenticator", "Request authenticated");
            }
            Err(e) => {
                let reason = e.reason();
                metrics::record_auth_attempt(reason.label());
                if reason.is_credential_failure() {
                    tracing::debug!(
                        target: "iap.auth.authenticator",
                        reason = reason.label(),
                        "Authentication rejected"
                    );
                } else {
                    tracing::warn!(
                        target: "iap.auth.authenticator",
                        reason = reason.label(),
                        "Authentication rejected"
                    );
                }
            }
        }

        result
    }

    async fn run(
        &self,
        assertion: Option<String>,
        source: RequestContext,
    ) -> Result<F::Identity, InvalidCredentials> {
        // Start -> HeaderExtracted
        let token = assertion.ok_or(InvalidCredentials::new(RejectionReason::MissingHeader))?;

        let Some(audience) = self.config.expected_audience() else {
            return Err(InvalidCredentials::new(
                RejectionReason::IncompleteConfiguration,
            ));
        };
        let issuer = self.config.expected_issuer();
        if issuer.is_empty() {
            return Err(InvalidCredentials::new(
                RejectionReason::IncompleteConfiguration,
            ));
        }

        // HeaderExtracted -> TokenVerified
        let claims = self
            .verifier
            .verify(&token, issuer, audience)
            .await
            .map_err(|e| InvalidCredentials::new(RejectionReason::Verification(e)))?;

        // TokenVerified -> ClaimExtracted
        let username = claims
            .email()
            .ok_or(InvalidCredentials::new(RejectionReason::MissingIdentityClaim))?
            .to_string();

        // ClaimExtracted -> Authenticated
        Ok(self.factory.create(username, source))
    }
}

/// Read the assertion header.
///
/// Exactly one value, visible ASCII, non-empty after trimming. Anything else
/// counts as no assertion.
fn assertion_header<B>(request: &Request<B>) -> Option<String> {
    let mut values = request.headers().get_all(IAP_JWT_HEADER).iter();
    let (Some(value), None) = (values.next(), values.next()) else {
        return None;
    };

    let value = value.to_str().ok()?.trim();
    if value.is_empty() {
        return None;
    }
    Some(value.to_string())
}
