//! Bearer token verification.
//!
//! # Verification flow
//!
//! 1. Decode the JWT header (no verification) to read `alg` and `kid`.
//! 2. Refuse anything but asymmetric algorithms.
//! 3. Take the current key snapshot from the [`SigningKeyCache`]; empty means
//!    no token can be accepted.
//! 4. Try the candidate keys (matching `kid` first) until one verifies the
//!    signature, then check `iss`, `exp`, `nbf` and optionally `aud`.
//! 5. Collect role claims into a [`Principal`].

use std::collections::BTreeSet;
use std::sync::Arc;

use authz_core::Role;
use chrono::{DateTime, Utc};
use jsonwebtoken::{
    Algorithm, AlgorithmFamily, Validation,
    errors::{Error as JwtError, ErrorKind},
};
use serde_json::{Map, Value};
use tracing::debug;

use super::keys::SigningKeyCache;
use crate::config::AuthConfig;

/// Why a bearer token was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    /// No bearer token on the request.
    #[error("missing bearer token")]
    MissingToken,

    /// Not a structurally valid JWT.
    #[error("malformed token: {0}")]
    Malformed(String),

    /// Signed with an algorithm this gateway does not accept.
    #[error("unsupported signing algorithm {0:?}")]
    UnsupportedAlgorithm(Algorithm),

    /// No available key verifies the signature.
    #[error("signature does not match any signing key")]
    SignatureMismatch,

    /// `iss` is not the configured issuer.
    #[error("issuer mismatch")]
    IssuerMismatch,

    /// `aud` does not contain an accepted audience.
    #[error("audience mismatch")]
    AudienceMismatch,

    /// `exp` is in the past.
    #[error("token expired")]
    Expired,

    /// `nbf` is in the future.
    #[error("token not yet valid")]
    NotYetValid,

    /// The key cache has never obtained a key.
    #[error("no signing keys available")]
    NoSigningKeys,
}

impl AuthError {
    /// Whether the token failed only because it expired.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        matches!(self, Self::Expired)
    }
}

/// The authenticated caller of one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    /// `sub` claim.
    pub subject: Option<String>,
    /// Normalized role names.
    pub roles: BTreeSet<Role>,
    /// `iss` claim.
    pub issuer: String,
    /// `exp` claim.
    pub expires_at: Option<DateTime<Utc>>,
}

impl Principal {
    /// Whether the caller holds the `OWNER` role.
    #[must_use]
    pub fn is_owner(&self) -> bool {
        authz_core::contains_owner(&self.roles)
    }
}

/// Verifies bearer tokens against the cached signing keys.
pub struct TokenAuthenticator {
    keys: Arc<SigningKeyCache>,
    issuer: String,
    leeway_secs: u64,
    audiences: Vec<String>,
    role_claims: Vec<String>,
}

impl TokenAuthenticator {
    /// Create an authenticator over `keys` using the `auth` config section.
    #[must_use]
    pub fn new(keys: Arc<SigningKeyCache>, config: &AuthConfig) -> Self {
        Self {
            keys,
            issuer: config.issuer.clone(),
            leeway_secs: config.clock_skew.as_secs(),
            audiences: config.audiences.clone(),
            role_claims: config.role_claims.clone(),
        }
    }

    /// The key cache this authenticator reads.
    #[must_use]
    pub fn key_cache(&self) -> &Arc<SigningKeyCache> {
        &self.keys
    }

    /// Verify `raw` and build the caller's [`Principal`].
    pub async fn authenticate(&self, raw: &str) -> Result<Principal, AuthError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(AuthError::MissingToken);
        }

        let header =
            jsonwebtoken::decode_header(raw).map_err(|e| AuthError::Malformed(e.to_string()))?;
        let family =
            asymmetric_family(header.alg).ok_or(AuthError::UnsupportedAlgorithm(header.alg))?;

        let keys = self.keys.get_keys().await;
        if keys.is_empty() {
            return Err(AuthError::NoSigningKeys);
        }

        let validation = self.validation(header.alg);
        for candidate in keys.candidates(header.kid.as_deref(), family) {
            match jsonwebtoken::decode::<Map<String, Value>>(raw, &candidate.key, &validation) {
                Ok(data) => return Ok(self.principal(&data.claims)),
                Err(e) if is_key_mismatch(&e) => {
                    debug!(kid = ?candidate.kid, "Signature did not verify with candidate key");
                }
                Err(e) => return Err(map_jwt_error(&e)),
            }
        }
        Err(AuthError::SignatureMismatch)
    }

    fn validation(&self, alg: Algorithm) -> Validation {
        let mut v = Validation::new(alg);
        v.leeway = self.leeway_secs;
        v.validate_nbf = true;
        v.set_issuer(&[&self.issuer]);
        v.set_required_spec_claims(&["exp", "iss"]);
        if self.audiences.is_empty() {
            v.validate_aud = false;
        } else {
            v.set_audience(&self.audiences);
        }
        v
    }

    fn principal(&self, claims: &Map<String, Value>) -> Principal {
        let mut roles = BTreeSet::new();
        for claim in &self.role_claims {
            match claims.get(claim) {
                Some(Value::String(s)) => roles.extend(Role::new(s)),
                Some(Value::Array(values)) => {
                    roles.extend(values.iter().filter_map(Value::as_str).filter_map(Role::new));
                }
                _ => {}
            }
        }

        Principal {
            subject: claims.get("sub").and_then(Value::as_str).map(str::to_string),
            roles,
            issuer: claims
                .get("iss")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            expires_at: claims
                .get("exp")
                .and_then(Value::as_i64)
                .and_then(|exp| DateTime::from_timestamp(exp, 0)),
        }
    }
}

/// Key family for accepted algorithms; `None` for HMAC.
fn asymmetric_family(alg: Algorithm) -> Option<AlgorithmFamily> {
    match alg {
        Algorithm::RS256
        | Algorithm::RS384
        | Algorithm::RS512
        | Algorithm::PS256
        | Algorithm::PS384
        | Algorithm::PS512 => Some(AlgorithmFamily::Rsa),
        Algorithm::ES256 | Algorithm::ES384 => Some(AlgorithmFamily::Ec),
        Algorithm::EdDSA => Some(AlgorithmFamily::Ed),
        Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => None,
    }
}

/// Errors that mean "wrong key", so the next candidate is worth trying.
fn is_key_mismatch(e: &JwtError) -> bool {
    matches!(
        e.kind(),
        ErrorKind::InvalidSignature
            | ErrorKind::InvalidEcdsaKey
            | ErrorKind::InvalidEddsaKey
            | ErrorKind::InvalidRsaKey(_)
            | ErrorKind::InvalidKeyFormat
    )
}

fn map_jwt_error(e: &JwtError) -> AuthError {
    match e.kind() {
        ErrorKind::ExpiredSignature => AuthError::Expired,
        ErrorKind::ImmatureSignature => AuthError::NotYetValid,
        ErrorKind::InvalidIssuer => AuthError::IssuerMismatch,
        ErrorKind::InvalidAudience => AuthError::AudienceMismatch,
        ErrorKind::InvalidSignature => AuthError::SignatureMismatch,
        _ => AuthError::Malformed(e.to_string()),
    }
}
