//! Signing key cache: JWKS fetching with TTL, single-flight refresh and
//! stale fallback.
//!
//! # Refresh policy
//!
//! 1. A snapshot younger than `ttl` is served without touching the network.
//! 2. Otherwise one caller takes the refresh lock and fetches; concurrent
//!    callers wait on the lock and then re-check, so simultaneous expiry
//!    produces one fetch.
//! 3. A successful fetch that yields at least one usable key replaces the
//!    snapshot. Anything else (network error, timeout, bad document, zero
//!    usable keys) is logged and the previous snapshot keeps being served.
//! 4. After a failure no fetch is attempted for `refresh_cooldown`, as long
//!    as stale keys are held. An empty cache retries on the next request.
//!
//! Once a fetch has succeeded the cache never goes back to empty.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use jsonwebtoken::{
    AlgorithmFamily, DecodingKey,
    jwk::{AlgorithmParameters, JwkSet, PublicKeyUse},
};
use parking_lot::RwLock;
use serde::Deserialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::{AuthConfig, KeySourceKind};
use crate::{Error, Result};

/// Why a key fetch failed. Never surfaced to callers of [`SigningKeyCache::get_keys`].
#[derive(Debug, thiserror::Error)]
pub enum KeyFetchError {
    /// Network or HTTP client error.
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The endpoint answered with a non-success status.
    #[error("{url} returned HTTP {status}")]
    Status {
        /// Requested URL.
        url: String,
        /// Response status code.
        status: u16,
    },

    /// The document could not be interpreted.
    #[error("invalid key document: {0}")]
    InvalidDocument(String),

    /// Discovery pointed at a non-HTTPS key endpoint while HTTPS is required.
    #[error("insecure key endpoint: {0}")]
    InsecureEndpoint(String),

    /// The fetch did not finish within the configured timeout.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// The document parsed but contained no usable verification key.
    #[error("key document contains no usable verification keys")]
    NoUsableKeys,
}

// ─────────────────────────────────────────────────────────────────────────────
// Key source seam
// ─────────────────────────────────────────────────────────────────────────────

/// Something that can produce the identity authority's current key document.
#[async_trait]
pub trait KeySource: Send + Sync {
    /// Fetch the key document.
    async fn fetch(&self) -> std::result::Result<JwkSet, KeyFetchError>;

    /// Human-readable origin for logs.
    fn describe(&self) -> String;
}

/// How [`HttpKeySource`] finds the key document.
#[derive(Debug, Clone)]
pub enum KeyEndpoint {
    /// Fetch the JWKS directly.
    Jwks(Url),
    /// Read `jwks_uri` from an `OpenID` provider configuration document first.
    Discovery(Url),
}

#[derive(Debug, Deserialize)]
struct ProviderMetadata {
    jwks_uri: String,
}

/// Key source backed by HTTP `GET`.
pub struct HttpKeySource {
    http: reqwest::Client,
    endpoint: KeyEndpoint,
    require_https: bool,
}

impl HttpKeySource {
    /// Create a source using `http` for requests.
    #[must_use]
    pub fn new(http: reqwest::Client, endpoint: KeyEndpoint, require_https: bool) -> Self {
        Self {
            http,
            endpoint,
            require_https,
        }
    }

    /// Build from the `auth` config section, with its own HTTP client.
    ///
    /// # Errors
    ///
    /// Returns an error if the key endpoint URL is invalid or the HTTP client
    /// cannot be built.
    pub fn from_config(config: &AuthConfig) -> Result<Self> {
        let endpoint = match config.key_source {
            KeySourceKind::Jwks => KeyEndpoint::Jwks(config.jwks_url()?),
            KeySourceKind::Discovery => KeyEndpoint::Discovery(config.discovery_url()?),
        };
        let http = reqwest::Client::builder()
            .https_only(config.require_https_metadata)
            .timeout(config.fetch_timeout)
            .build()
            .map_err(|e| Error::Config(format!("Failed to build key fetch client: {e}")))?;
        Ok(Self::new(http, endpoint, config.require_https_metadata))
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &Url,
    ) -> std::result::Result<T, KeyFetchError> {
        let response = self.http.get(url.clone()).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(KeyFetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        let body = response.bytes().await?;
        serde_json::from_slice(&body).map_err(|e| KeyFetchError::InvalidDocument(e.to_string()))
    }
}

#[async_trait]
impl KeySource for HttpKeySource {
    async fn fetch(&self) -> std::result::Result<JwkSet, KeyFetchError> {
        match &self.endpoint {
            KeyEndpoint::Jwks(url) => self.get_json(url).await,
            KeyEndpoint::Discovery(url) => {
                let metadata: ProviderMetadata = self.get_json(url).await?;
                let jwks_url = Url::parse(&metadata.jwks_uri).map_err(|e| {
                    KeyFetchError::InvalidDocument(format!("jwks_uri '{}': {e}", metadata.jwks_uri))
                })?;
                if self.require_https && jwks_url.scheme() != "https" {
                    return Err(KeyFetchError::InsecureEndpoint(jwks_url.to_string()));
                }
                debug!(jwks_uri = %jwks_url, "Resolved key endpoint via discovery");
                self.get_json(&jwks_url).await
            }
        }
    }

    fn describe(&self) -> String {
        match &self.endpoint {
            KeyEndpoint::Jwks(url) | KeyEndpoint::Discovery(url) => url.to_string(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Key set
// ─────────────────────────────────────────────────────────────────────────────

/// One public verification key.
#[derive(Clone)]
pub struct VerificationKey {
    /// The JWK `kid`, if published.
    pub kid: Option<String>,
    /// The decoded key.
    pub key: DecodingKey,
}

impl std::fmt::Debug for VerificationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VerificationKey")
            .field("kid", &self.kid)
            .field("family", &self.key.family())
            .finish()
    }
}

/// An immutable snapshot of the authority's verification keys.
#[derive(Debug, Clone, Default)]
pub struct SigningKeySet {
    keys: Vec<VerificationKey>,
}

impl SigningKeySet {
    /// Convert a JWKS into verification keys.
    ///
    /// Symmetric keys, encryption keys and keys that fail to decode are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`KeyFetchError::NoUsableKeys`] if nothing usable remains.
    pub fn from_jwks(jwks: &JwkSet) -> std::result::Result<Self, KeyFetchError> {
        let mut keys = Vec::with_capacity(jwks.keys.len());
        for jwk in &jwks.keys {
            let kid = jwk.common.key_id.clone();
            if matches!(jwk.common.public_key_use, Some(PublicKeyUse::Encryption)) {
                debug!(kid = ?kid, "Skipping encryption key");
                continue;
            }
            if matches!(jwk.algorithm, AlgorithmParameters::OctetKey(_)) {
                debug!(kid = ?kid, "Skipping symmetric key");
                continue;
            }
            match DecodingKey::from_jwk(jwk) {
                Ok(key) => keys.push(VerificationKey { kid, key }),
                Err(e) => debug!(kid = ?kid, error = %e, "Skipping undecodable key"),
            }
        }
        if keys.is_empty() {
            return Err(KeyFetchError::NoUsableKeys);
        }
        Ok(Self { keys })
    }

    /// Build directly from decoded keys.
    #[must_use]
    pub fn from_keys(keys: Vec<VerificationKey>) -> Self {
        Self { keys }
    }

    /// Number of keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether no key is available.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Keys to try for a token signed with an algorithm of `family`.
    ///
    /// Keys whose `kid` matches are preferred; when none matches (or the token
    /// has no `kid`) every key of the right family is a candidate.
    pub fn candidates(&self, kid: Option<&str>, family: AlgorithmFamily) -> Vec<&VerificationKey> {
        let of_family = || self.keys.iter().filter(move |k| k.key.family() == family);
        if let Some(kid) = kid {
            let matching: Vec<_> = of_family().filter(|k| k.kid.as_deref() == Some(kid)).collect();
            if !matching.is_empty() {
                return matching;
            }
        }
        of_family().collect()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Cache
// ─────────────────────────────────────────────────────────────────────────────

/// Timing knobs for [`SigningKeyCache`].
#[derive(Debug, Clone, Copy)]
pub struct KeyCachePolicy {
    /// Freshness window of a fetched set.
    pub ttl: Duration,
    /// Upper bound on one fetch.
    pub fetch_timeout: Duration,
    /// Quiet period after a failed fetch while stale keys are served.
    pub refresh_cooldown: Duration,
}

impl KeyCachePolicy {
    /// Take the timings from the `auth` config section.
    #[must_use]
    pub fn from_config(config: &AuthConfig) -> Self {
        Self {
            ttl: config.key_ttl,
            fetch_timeout: config.fetch_timeout,
            refresh_cooldown: config.refresh_cooldown,
        }
    }
}

impl Default for KeyCachePolicy {
    fn default() -> Self {
        Self::from_config(&AuthConfig::default())
    }
}

#[derive(Default)]
struct CacheState {
    keys: Arc<SigningKeySet>,
    fetched_at: Option<Instant>,
    last_failure: Option<Instant>,
}

/// Process-wide cache of the authority's signing keys.
pub struct SigningKeyCache {
    source: Arc<dyn KeySource>,
    policy: KeyCachePolicy,
    state: RwLock<CacheState>,
    refresh: tokio::sync::Mutex<()>,
}

impl SigningKeyCache {
    /// Create an empty cache over `source`.
    #[must_use]
    pub fn new(source: Arc<dyn KeySource>, policy: KeyCachePolicy) -> Self {
        Self {
            source,
            policy,
            state: RwLock::new(CacheState::default()),
            refresh: tokio::sync::Mutex::new(()),
        }
    }

    /// Keys valid now, refreshing first if the snapshot has expired.
    ///
    /// Never fails: on refresh failure the previous snapshot (possibly empty)
    /// is returned.
    pub async fn get_keys(&self) -> Arc<SigningKeySet> {
        if let Some(keys) = self.fresh_or_cooling() {
            return keys;
        }

        let _guard = self.refresh.lock().await;

        // Someone else may have refreshed (or failed) while we waited.
        if let Some(keys) = self.fresh_or_cooling() {
            return keys;
        }

        self.refresh_locked().await
    }

    /// The current snapshot, without refreshing.
    #[must_use]
    pub fn snapshot(&self) -> Arc<SigningKeySet> {
        Arc::clone(&self.state.read().keys)
    }

    /// Populate the cache ahead of the first request.
    ///
    /// Returns whether usable keys are available afterwards.
    pub async fn warm(&self) -> bool {
        let keys = self.get_keys().await;
        if keys.is_empty() {
            warn!(source = %self.source.describe(), "Signing keys unavailable at startup; bearer tokens will be rejected until a fetch succeeds");
            false
        } else {
            info!(source = %self.source.describe(), keys = keys.len(), "Signing keys loaded");
            true
        }
    }

    fn fresh_or_cooling(&self) -> Option<Arc<SigningKeySet>> {
        let state = self.state.read();
        let now = Instant::now();
        let fresh = state
            .fetched_at
            .is_some_and(|at| now.duration_since(at) < self.policy.ttl);
        let cooling = !state.keys.is_empty()
            && state
                .last_failure
                .is_some_and(|at| now.duration_since(at) < self.policy.refresh_cooldown);
        (fresh || cooling).then(|| Arc::clone(&state.keys))
    }

    async fn refresh_locked(&self) -> Arc<SigningKeySet> {
        let fetched = match tokio::time::timeout(self.policy.fetch_timeout, self.source.fetch()).await
        {
            Ok(result) => result,
            Err(_) => Err(KeyFetchError::Timeout(self.policy.fetch_timeout)),
        };

        match fetched.and_then(|jwks| SigningKeySet::from_jwks(&jwks)) {
            Ok(set) => {
                let set = Arc::new(set);
                let mut state = self.state.write();
                state.keys = Arc::clone(&set);
                state.fetched_at = Some(Instant::now());
                state.last_failure = None;
                debug!(source = %self.source.describe(), keys = set.len(), "Signing keys refreshed");
                set
            }
            Err(e) => {
                let mut state = self.state.write();
                state.last_failure = Some(Instant::now());
                warn!(
                    source = %self.source.describe(),
                    error = %e,
                    serving_stale = !state.keys.is_empty(),
                    "Signing key refresh failed"
                );
                Arc::clone(&state.keys)
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn ec_jwks(kid: &str) -> JwkSet {
        // P-256 public point (x, y) from RFC 7515 appendix A.3.
        serde_json::from_value(serde_json::json!({
            "keys": [{
                "kty": "EC",
                "crv": "P-256",
                "kid": kid,
                "use": "sig",
                "x": "f83OJ3D2xF1Bg8vub9tLe1gHMzV76e8Tus9uPHvRVEU",
                "y": "x_FEzRu9m36HLN_tue659LNpXW6pCyStikYjKIWI5a0"
            }]
        }))
        .unwrap()
    }

    #[test]
    fn from_jwks_skips_symmetric_and_encryption_keys() {
        // GIVEN: one HMAC key, one encryption key, one signing key
        let jwks: JwkSet = serde_json::from_value(serde_json::json!({
            "keys": [
                { "kty": "oct", "kid": "hmac", "k": "c2VjcmV0" },
                { "kty": "EC", "crv": "P-256", "kid": "enc", "use": "enc",
                  "x": "f83OJ3D2xF1Bg8vub9tLe1gHMzV76e8Tus9uPHvRVEU",
                  "y": "x_FEzRu9m36HLN_tue659LNpXW6pCyStikYjKIWI5a0" },
                { "kty": "EC", "crv": "P-256", "kid": "sig",
                  "x": "f83OJ3D2xF1Bg8vub9tLe1gHMzV76e8Tus9uPHvRVEU",
                  "y": "x_FEzRu9m36HLN_tue659LNpXW6pCyStikYjKIWI5a0" }
            ]
        }))
        .unwrap();

        // WHEN: converted
        let set = SigningKeySet::from_jwks(&jwks).unwrap();

        // THEN: only the signing key survives
        assert_eq!(set.len(), 1);
        assert_eq!(set.keys[0].kid.as_deref(), Some("sig"));
    }

    #[test]
    fn from_jwks_with_no_usable_keys_is_an_error() {
        let jwks: JwkSet = serde_json::from_value(serde_json::json!({ "keys": [] })).unwrap();
        assert!(matches!(
            SigningKeySet::from_jwks(&jwks),
            Err(KeyFetchError::NoUsableKeys)
        ));
    }

    #[test]
    fn candidates_prefer_matching_kid_then_fall_back_to_family() {
        let set = SigningKeySet::from_jwks(&ec_jwks("k1")).unwrap();

        assert_eq!(set.candidates(Some("k1"), AlgorithmFamily::Ec).len(), 1);
        // Unknown kid: every EC key is still tried
        assert_eq!(set.candidates(Some("rotated"), AlgorithmFamily::Ec).len(), 1);
        // Wrong family: nothing
        assert!(set.candidates(Some("k1"), AlgorithmFamily::Rsa).is_empty());
    }

    #[test]
    fn describe_reports_endpoint() {
        let source = HttpKeySource::new(
            reqwest::Client::new(),
            KeyEndpoint::Jwks(Url::parse("https://id.example.com/.well-known/jwks.json").unwrap()),
            true,
        );
        assert_eq!(source.describe(), "https://id.example.com/.well-known/jwks.json");
    }

    #[test]
    fn policy_defaults_follow_auth_defaults() {
        let policy = KeyCachePolicy::default();
        assert_eq!(policy.ttl, Duration::from_secs(3600));
        assert_eq!(policy.fetch_timeout, Duration::from_secs(10));
    }
}
