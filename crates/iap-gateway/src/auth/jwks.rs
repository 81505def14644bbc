//! Signing key set fetching and caching.
//!
//! The issuer publishes its public keys as a JSON Web Key Set. `KeySetCache`
//! keeps the current set in memory and refreshes it when:
//! - the cache is empty,
//! - the cache TTL has elapsed (taken from the key server's
//!   `Cache-Control: max-age`, falling back to a configured default), or
//! - a token names a key ID the cache does not hold, at most once per
//!   minimum refresh interval.
//!
//! # Concurrency
//!
//! Readers share a `RwLock`. Refreshes are single-flight: the first caller
//! that needs one spawns the fetch on its own task and publishes a shared
//! future; every other caller awaits that same future. Cancelling a request
//! never cancels the fetch, and the cache is replaced in one write.

use crate::auth::verifier::VerificationError;
use crate::config::{DEFAULT_JWKS_CACHE_TTL_SECONDS, DEFAULT_JWKS_MIN_REFRESH_INTERVAL_SECONDS};
use crate::observability::metrics;
use async_trait::async_trait;
use common::jwt::decode_key_component;
use futures::future::{BoxFuture, FutureExt, Shared};
use jsonwebtoken::{Algorithm, DecodingKey};
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::instrument;

/// Bounds applied to the key server's `max-age`.
const MIN_CACHE_TTL: Duration = Duration::from_secs(5);
const MAX_CACHE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Upper bound on serving expired keys while the key server is down.
pub const MAX_STALE: Duration = Duration::from_secs(60 * 60);

/// JSON Web Key as published by the issuer.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Jwk {
    /// Key type: "EC", "RSA" or "OKP".
    pub kty: String,

    /// Key ID - used to select the correct key for verification.
    pub kid: String,

    /// Algorithm the key is meant for (e.g. "ES256").
    #[serde(default)]
    pub alg: Option<String>,

    /// Key use (should be "sig" for signing).
    #[serde(default, rename = "use")]
    pub key_use: Option<String>,

    /// Curve name for EC and OKP keys.
    #[serde(default)]
    pub crv: Option<String>,

    /// EC x coordinate or OKP public key (base64url).
    #[serde(default)]
    pub x: Option<String>,

    /// EC y coordinate (base64url).
    #[serde(default)]
    pub y: Option<String>,

    /// RSA modulus (base64url).
    #[serde(default)]
    pub n: Option<String>,

    /// RSA exponent (base64url).
    #[serde(default)]
    pub e: Option<String>,
}

/// JWK Set response body.
#[derive(Debug, Clone, Deserialize)]
pub struct JwkSet {
    pub keys: Vec<Jwk>,
}

/// A key set as returned by a `KeySource`.
#[derive(Debug, Clone)]
pub struct FetchedKeySet {
    pub keys: Vec<Jwk>,

    /// Freshness lifetime announced by the key server, if any.
    pub max_age: Option<Duration>,
}

/// Failure to obtain the key set. Distinct from every token failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeySourceError {
    #[error("key set request failed: {0}")]
    Transport(String),

    #[error("key set request timed out")]
    Timeout,

    #[error("key set endpoint returned status {0}")]
    Status(u16),

    #[error("key set response could not be parsed: {0}")]
    Parse(String),

    #[error("key set refresh task failed: {0}")]
    Task(String),
}

impl KeySourceError {
    /// Bounded label for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            KeySourceError::Transport(_) => "transport",
            KeySourceError::Timeout => "timeout",
            KeySourceError::Status(_) => "status",
            KeySourceError::Parse(_) => "parse",
            KeySourceError::Task(_) => "task",
        }
    }
}

/// Where signing keys come from.
#[async_trait]
pub trait KeySource: Send + Sync {
    async fn fetch(&self) -> Result<FetchedKeySet, KeySourceError>;
}

/// Fetches the JWK Set over HTTPS.
pub struct HttpKeySource {
    url: String,
    http_client: reqwest::Client,
    timeout: Duration,
}

impl HttpKeySource {
    /// Create a key source for `url` whose fetches never exceed `timeout`.
    pub fn new(url: String, timeout: Duration) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(target: "iap.auth.jwks", error = %e, "Failed to build HTTP client with custom config, using defaults");
                reqwest::Client::new()
            });

        Self {
            url,
            http_client,
            timeout,
        }
    }

    async fn fetch_inner(&self) -> Result<FetchedKeySet, KeySourceError> {
        let response = self.http_client.get(&self.url).send().await.map_err(|e| {
            if e.is_timeout() {
                KeySourceError::Timeout
            } else {
                KeySourceError::Transport(e.to_string())
            }
        })?;

        if !response.status().is_success() {
            return Err(KeySourceError::Status(response.status().as_u16()));
        }

        let max_age = parse_max_age(
            response
                .headers()
                .get(reqwest::header::CACHE_CONTROL)
                .and_then(|v| v.to_str().ok()),
        );

        let jwks: JwkSet = response
            .json()
            .await
            .map_err(|e| KeySourceError::Parse(e.to_string()))?;

        Ok(FetchedKeySet {
            keys: jwks.keys,
            max_age,
        })
    }
}

#[async_trait]
impl KeySource for HttpKeySource {
    #[instrument(skip_all, fields(url = %self.url))]
    async fn fetch(&self) -> Result<FetchedKeySet, KeySourceError> {
        tracing::debug!(target: "iap.auth.jwks", url = %self.url, "Fetching JWK Set");

        // The client timeout covers the request; this bounds body reads too.
        tokio::time::timeout(self.timeout, self.fetch_inner())
            .await
            .map_err(|_| KeySourceError::Timeout)?
    }
}

/// Extract `max-age` from a Cache-Control header value.
pub fn parse_max_age(cache_control: Option<&str>) -> Option<Duration> {
    cache_control?
        .split(',')
        .map(str::trim)
        .find_map(|directive| {
            let (name, value) = directive.split_once('=')?;
            if name.trim().eq_ignore_ascii_case("max-age") {
                value.trim().trim_matches('"').parse::<u64>().ok()
            } else {
                None
            }
        })
        .map(Duration::from_secs)
}

/// TTL to apply to a freshly fetched key set.
pub fn cache_ttl_for(max_age: Option<Duration>, default_ttl: Duration) -> Duration {
    match max_age {
        Some(max_age) => max_age.clamp(MIN_CACHE_TTL, MAX_CACHE_TTL),
        None => default_ttl,
    }
}

/// Shape of a usable verification key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyKind {
    EcP256,
    EcP384,
    Rsa,
    Ed25519,
}

/// A verification key resolved from a JWK.
#[derive(Clone)]
pub struct SigningKey {
    pub kid: String,
    pub kind: KeyKind,
    /// The `alg` the key server pinned this key to, if any.
    pub alg: Option<String>,
    pub decoding_key: DecodingKey,
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("kid", &self.kid)
            .field("kind", &self.kind)
            .field("alg", &self.alg)
            .finish_non_exhaustive()
    }
}

impl SigningKey {
    /// Build a verification key from a JWK.
    ///
    /// Returns a reason string for keys that cannot be used for signature
    /// verification; the cache skips those.
    pub fn from_jwk(jwk: &Jwk) -> Result<Self, String> {
        if let Some(key_use) = &jwk.key_use {
            if key_use != "sig" {
                return Err(format!("key use '{}' is not 'sig'", key_use));
            }
        }

        let (kind, decoding_key) = match jwk.kty.as_str() {
            "EC" => {
                let (kind, coordinate_len) = match jwk.crv.as_deref() {
                    Some("P-256") => (KeyKind::EcP256, 32),
                    Some("P-384") => (KeyKind::EcP384, 48),
                    other => return Err(format!("unsupported EC curve {:?}", other)),
                };
                let x = jwk.x.as_deref().ok_or("EC key missing x")?;
                let y = jwk.y.as_deref().ok_or("EC key missing y")?;
                check_component_len(x, coordinate_len)?;
                check_component_len(y, coordinate_len)?;
                let key = DecodingKey::from_ec_components(x, y).map_err(|e| e.to_string())?;
                (kind, key)
            }
            "RSA" => {
                let n = jwk.n.as_deref().ok_or("RSA key missing n")?;
                let e = jwk.e.as_deref().ok_or("RSA key missing e")?;
                let key = DecodingKey::from_rsa_components(n, e).map_err(|e| e.to_string())?;
                (KeyKind::Rsa, key)
            }
            "OKP" => {
                if jwk.crv.as_deref() != Some("Ed25519") {
                    return Err(format!("unsupported OKP curve {:?}", jwk.crv));
                }
                let x = jwk.x.as_deref().ok_or("OKP key missing x")?;
                check_component_len(x, 32)?;
                let key = DecodingKey::from_ed_components(x).map_err(|e| e.to_string())?;
                (KeyKind::Ed25519, key)
            }
            other => return Err(format!("unsupported key type '{}'", other)),
        };

        Ok(Self {
            kid: jwk.kid.clone(),
            kind,
            alg: jwk.alg.clone(),
            decoding_key,
        })
    }

    /// Whether a token declaring `algorithm` may be verified with this key.
    pub fn supports(&self, algorithm: Algorithm) -> bool {
        if let Some(pinned) = &self.alg {
            if pinned.parse::<Algorithm>().ok() != Some(algorithm) {
                return false;
            }
        }

        matches!(
            (algorithm, self.kind),
            (Algorithm::ES256, KeyKind::EcP256)
                | (Algorithm::ES384, KeyKind::EcP384)
                | (
                    Algorithm::RS256
                        | Algorithm::RS384
                        | Algorithm::RS512
                        | Algorithm::PS256
                        | Algorithm::PS384
                        | Algorithm::PS512,
                    KeyKind::Rsa
                )
                | (Algorithm::EdDSA, KeyKind::Ed25519)
        )
    }
}

fn check_component_len(value: &str, expected: usize) -> Result<(), String> {
    let bytes = decode_key_component(value).map_err(|e| format!("invalid base64url: {}", e))?;
    if bytes.len() != expected {
        return Err(format!(
            "key component is {} bytes, expected {}",
            bytes.len(),
            expected
        ));
    }
    Ok(())
}

/// Cached key set with expiry time.
struct CachedKeySet {
    /// Map of key ID to verification key.
    keys: HashMap<String, Arc<SigningKey>>,

    /// When this set was fetched.
    fetched_at: Instant,

    /// When this cache entry expires.
    expires_at: Instant,

    /// Incremented on every successful refresh.
    generation: u64,
}

type SharedRefresh = Shared<BoxFuture<'static, Result<u64, KeySourceError>>>;

struct CacheInner {
    source: Arc<dyn KeySource>,
    state: RwLock<Option<CachedKeySet>>,
    in_flight: Mutex<Option<SharedRefresh>>,
    default_ttl: Duration,
    min_refresh_interval: Duration,
}

/// Process-wide signing key cache with single-flight refresh.
pub struct KeySetCache {
    inner: Arc<CacheInner>,
    /// How long past expiry a cached key may still be served when the
    /// refresh fails. Zero disables the fallback.
    max_stale: Duration,
}

impl KeySetCache {
    /// Create a cache over `source` with default TTL and refresh interval.
    pub fn new(source: Arc<dyn KeySource>) -> Self {
        Self::with_settings(
            source,
            Duration::from_secs(DEFAULT_JWKS_CACHE_TTL_SECONDS),
            Duration::from_secs(DEFAULT_JWKS_MIN_REFRESH_INTERVAL_SECONDS),
        )
    }

    /// Create a cache with explicit settings.
    ///
    /// # Arguments
    ///
    /// * `default_ttl` - TTL when the key server announces no `max-age`
    /// * `min_refresh_interval` - Minimum age of a fresh key set before an
    ///   unknown key ID may trigger another fetch
    pub fn with_settings(
        source: Arc<dyn KeySource>,
        default_ttl: Duration,
        min_refresh_interval: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                source,
                state: RwLock::new(None),
                in_flight: Mutex::new(None),
                default_ttl,
                min_refresh_interval,
            }),
            max_stale: Duration::ZERO,
        }
    }

    /// Serve expired keys for up to `max_stale` while the key server is
    /// unreachable. Capped at `MAX_STALE`.
    #[must_use]
    pub fn with_max_stale(mut self, max_stale: Duration) -> Self {
        self.max_stale = max_stale.min(MAX_STALE);
        self
    }

    /// Get a verification key by key ID.
    ///
    /// Serves from cache when possible. Refreshes (single-flight) when the
    /// cache is empty or expired, or when `kid` is unknown and the cache is
    /// older than the minimum refresh interval. If a refresh fails, an
    /// expired key is only used within the `max_stale` window.
    ///
    /// # Errors
    ///
    /// - `VerificationError::UnknownSigningKey` if `kid` is not in the key set
    /// - `VerificationError::KeySourceUnavailable` if the set cannot be fetched
    #[instrument(skip(self), fields(kid = %kid))]
    pub async fn get_key(&self, kid: &str) -> Result<Arc<SigningKey>, VerificationError> {
        let now = Instant::now();

        // Check cache first
        let (observed_generation, stale_key) = {
            let state = self.inner.state.read().await;
            match state.as_ref() {
                Some(cached) if cached.expires_at > now => {
                    if let Some(key) = cached.keys.get(kid) {
                        tracing::debug!(target: "iap.auth.jwks", kid = %kid, "Key set cache hit");
                        return Ok(Arc::clone(key));
                    }
                    if now.duration_since(cached.fetched_at) < self.inner.min_refresh_interval {
                        tracing::debug!(
                            target: "iap.auth.jwks",
                            kid = %kid,
                            "Unknown key ID, key set refreshed too recently to refetch"
                        );
                        return Err(VerificationError::UnknownSigningKey);
                    }
                    (Some(cached.generation), None)
                }
                Some(cached) => {
                    let within_grace = now < cached.expires_at + self.max_stale;
                    let stale_key = if within_grace {
                        cached.keys.get(kid).cloned()
                    } else {
                        None
                    };
                    (Some(cached.generation), stale_key)
                }
                None => (None, None),
            }
        };

        // Cache miss, unknown kid, or expired - refresh once for everybody
        if let Err(e) = self.refresh_from(observed_generation).await {
            if let Some(key) = stale_key {
                tracing::warn!(
                    target: "iap.auth.jwks",
                    kid = %kid,
                    error = %e,
                    "Key set refresh failed, using expired cached key"
                );
                return Ok(key);
            }
            return Err(VerificationError::KeySourceUnavailable(e));
        }

        // Try to get key from refreshed cache
        let state = self.inner.state.read().await;
        if let Some(key) = state.as_ref().and_then(|cached| cached.keys.get(kid)) {
            return Ok(Arc::clone(key));
        }

        // Key not found even after refresh
        tracing::warn!(target: "iap.auth.jwks", kid = %kid, "Key not found in key set after refresh");
        Err(VerificationError::UnknownSigningKey)
    }

    /// Fetch the key set now, joining any refresh already in flight.
    ///
    /// # Errors
    ///
    /// Returns the key source error if the fetch fails.
    pub async fn force_refresh(&self) -> Result<(), KeySourceError> {
        let observed = self.generation().await;
        self.refresh_from(observed).await
    }

    /// Number of keys currently cached (expired or not).
    pub async fn key_count(&self) -> usize {
        self.inner
            .state
            .read()
            .await
            .as_ref()
            .map_or(0, |cached| cached.keys.len())
    }

    /// Time until the cached set expires; `None` if nothing is cached.
    pub async fn time_to_expiry(&self) -> Option<Duration> {
        self.inner
            .state
            .read()
            .await
            .as_ref()
            .map(|cached| cached.expires_at.saturating_duration_since(Instant::now()))
    }

    async fn generation(&self) -> Option<u64> {
        self.inner
            .state
            .read()
            .await
            .as_ref()
            .map(|cached| cached.generation)
    }

    /// Refresh unless someone already did since `observed` was read.
    async fn refresh_from(&self, observed: Option<u64>) -> Result<(), KeySourceError> {
        let refresh = {
            let mut in_flight = self.inner.in_flight.lock().await;

            if self.generation().await != observed {
                tracing::debug!(target: "iap.auth.jwks", "Key set already refreshed by another request");
                return Ok(());
            }

            match in_flight.as_ref() {
                Some(refresh) => {
                    tracing::debug!(target: "iap.auth.jwks", "Joining in-flight key set refresh");
                    refresh.clone()
                }
                None => {
                    let refresh = Self::spawn_refresh(Arc::clone(&self.inner));
                    *in_flight = Some(refresh.clone());
                    refresh
                }
            }
        };

        refresh.await.map(|_| ())
    }

    fn spawn_refresh(inner: Arc<CacheInner>) -> SharedRefresh {
        let handle = tokio::spawn(async move {
            let result = inner.fetch_and_store().await;
            // Runs after the spawner has published the future: it holds the
            // lock across spawn and publish.
            *inner.in_flight.lock().await = None;
            result
        });

        async move {
            handle
                .await
                .unwrap_or_else(|e| Err(KeySourceError::Task(e.to_string())))
        }
        .boxed()
        .shared()
    }
}

impl CacheInner {
    async fn fetch_and_store(&self) -> Result<u64, KeySourceError> {
        let start = Instant::now();
        let fetched = self.source.fetch().await;
        let duration = start.elapsed();

        let fetched = match fetched {
            Ok(fetched) => fetched,
            Err(e) => {
                metrics::record_jwks_fetch(e.label(), duration);
                tracing::error!(target: "iap.auth.jwks", error = %e, "Failed to fetch key set");
                return Err(e);
            }
        };

        // Build key map, skipping keys that cannot verify signatures
        let mut keys = HashMap::with_capacity(fetched.keys.len());
        for jwk in &fetched.keys {
            match SigningKey::from_jwk(jwk) {
                Ok(key) => {
                    keys.insert(key.kid.clone(), Arc::new(key));
                }
                Err(reason) => {
                    tracing::warn!(
                        target: "iap.auth.jwks",
                        kid = %jwk.kid,
                        reason = %reason,
                        "Skipping unusable key in key set"
                    );
                }
            }
        }

        let ttl = cache_ttl_for(fetched.max_age, self.default_ttl);
        let fetched_at = Instant::now();

        // Update cache
        let mut state = self.state.write().await;
        let generation = state.as_ref().map_or(1, |cached| cached.generation + 1);
        let key_count = keys.len();
        *state = Some(CachedKeySet {
            keys,
            fetched_at,
            expires_at: fetched_at + ttl,
            generation,
        });
        drop(state);

        metrics::record_jwks_fetch("success", duration);
        tracing::info!(
            target: "iap.auth.jwks",
            key_count = key_count,
            ttl_seconds = ttl.as_secs(),
            generation = generation,
            "Key set cache refreshed"
        );

        Ok(generation)
    }
}
