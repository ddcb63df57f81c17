//! Configuration management

use std::{collections::HashSet, path::Path, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::mtls::MtlsConfig;
use crate::{Error, Result};

/// WS-Federation role claim URI emitted by several identity providers.
pub const WS_FEDERATION_ROLE_CLAIM: &str =
    "http://schemas.microsoft.com/ws/2008/06/identity/claims/role";

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Environment files to load before processing config.
    /// Paths support ~ expansion. Loaded in order, later files override earlier.
    #[serde(default)]
    pub env_files: Vec<String>,
    /// Server configuration
    pub server: ServerConfig,
    /// Bearer token authentication
    pub auth: AuthConfig,
    /// Role permission store
    pub permissions: PermissionsConfig,
    /// Outbound backend mTLS
    pub mtls: MtlsConfig,
    /// Routes exposed by the gateway
    pub routes: Vec<RouteConfig>,
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist, cannot be parsed,
    /// or fails validation.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        // AUTHZ_GATEWAY_AUTH__ISSUER → auth.issuer
        let env = || Env::prefixed("AUTHZ_GATEWAY_").split("__");

        // Env providers read the process environment when merged, so the
        // env files are loaded before the real merge.
        let env_files: Vec<String> = figment
            .clone()
            .merge(env())
            .extract_inner("env_files")
            .unwrap_or_default();
        load_env_files(&env_files);
        figment = figment.merge(env());

        let config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints that serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] describing the first violated constraint.
    pub fn validate(&self) -> Result<()> {
        self.auth.validate()?;
        self.mtls.validate()?;

        let mut ids = HashSet::new();
        for route in &self.routes {
            route.validate()?;
            if !ids.insert(route.id.as_str()) {
                return Err(Error::Config(format!("Duplicate route id '{}'", route.id)));
            }
        }
        Ok(())
    }
}

/// Load environment files into the process environment.
/// Supports ~ expansion. Files that don't exist are silently skipped.
fn load_env_files(paths: &[String]) {
    for path_str in paths {
        let expanded = if path_str.starts_with('~') {
            if let Some(home) = dirs::home_dir() {
                path_str.replacen('~', &home.display().to_string(), 1)
            } else {
                path_str.clone()
            }
        } else {
            path_str.clone()
        };

        let path = Path::new(&expanded);
        if path.exists() {
            match dotenvy::from_path(path) {
                Ok(()) => tracing::info!("Loaded env file: {expanded}"),
                Err(e) => tracing::warn!("Failed to load env file {expanded}: {e}"),
            }
        } else {
            tracing::debug!("Env file not found (skipped): {expanded}");
        }
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Graceful shutdown timeout
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
    /// Upper bound on one forwarded backend request
    #[serde(with = "humantime_serde")]
    pub upstream_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            shutdown_timeout: Duration::from_secs(30),
            upstream_timeout: Duration::from_secs(30),
        }
    }
}

/// Where signing keys are fetched from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum KeySourceKind {
    /// `GET <jwks_uri>` (default `<authority>/.well-known/jwks.json`)
    #[default]
    Jwks,
    /// Resolve `jwks_uri` from `<authority>/.well-known/openid-configuration`
    Discovery,
}

/// Bearer token authentication configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Identity authority base URL
    pub authority: String,
    /// Expected `iss` claim
    pub issuer: String,
    /// Key document strategy
    pub key_source: KeySourceKind,
    /// Explicit JWKS URL (overrides the authority-derived one)
    pub jwks_uri: Option<String>,
    /// How long a fetched key set is considered fresh
    #[serde(with = "humantime_serde")]
    pub key_ttl: Duration,
    /// Upper bound on a single key fetch
    #[serde(with = "humantime_serde")]
    pub fetch_timeout: Duration,
    /// Minimum gap between fetch attempts after a failure
    #[serde(with = "humantime_serde")]
    pub refresh_cooldown: Duration,
    /// Tolerance applied to `exp` and `nbf`
    #[serde(with = "humantime_serde")]
    pub clock_skew: Duration,
    /// Refuse non-HTTPS key endpoints
    pub require_https_metadata: bool,
    /// Claims read as role names (unioned)
    pub role_claims: Vec<String>,
    /// Accepted `aud` values (empty = audience not checked)
    pub audiences: Vec<String>,
}

fn default_role_claims() -> Vec<String> {
    vec![
        WS_FEDERATION_ROLE_CLAIM.to_string(),
        "role".to_string(),
        "roles".to_string(),
    ]
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            authority: "http://localhost:8100".to_string(),
            issuer: String::new(),
            key_source: KeySourceKind::default(),
            jwks_uri: None,
            key_ttl: Duration::from_secs(3600),
            fetch_timeout: Duration::from_secs(10),
            refresh_cooldown: Duration::from_secs(10),
            clock_skew: Duration::ZERO,
            require_https_metadata: false,
            role_claims: default_role_claims(),
            audiences: Vec::new(),
        }
    }
}

impl AuthConfig {
    /// URL of the JWKS document.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured URL or authority is not a valid URL.
    pub fn jwks_url(&self) -> Result<Url> {
        match &self.jwks_uri {
            Some(uri) => parse_url("auth.jwks_uri", uri),
            None => well_known(&self.authority, "jwks.json"),
        }
    }

    /// URL of the `OpenID` provider configuration document.
    ///
    /// # Errors
    ///
    /// Returns an error if the authority is not a valid URL.
    pub fn discovery_url(&self) -> Result<Url> {
        well_known(&self.authority, "openid-configuration")
    }

    fn validate(&self) -> Result<()> {
        if self.issuer.trim().is_empty() {
            return Err(Error::Config("auth.issuer must be set".to_string()));
        }
        if self.key_ttl.is_zero() {
            return Err(Error::Config("auth.key_ttl must be greater than zero".to_string()));
        }
        if self.role_claims.is_empty() {
            return Err(Error::Config("auth.role_claims must name at least one claim".to_string()));
        }
        let key_url = match self.key_source {
            KeySourceKind::Jwks => self.jwks_url()?,
            KeySourceKind::Discovery => self.discovery_url()?,
        };
        if self.require_https_metadata && key_url.scheme() != "https" {
            return Err(Error::Config(format!(
                "auth.require_https_metadata is set but key endpoint is {key_url}"
            )));
        }
        Ok(())
    }
}

fn well_known(authority: &str, document: &str) -> Result<Url> {
    let base = authority.trim_end_matches('/');
    parse_url("auth.authority", &format!("{base}/.well-known/{document}"))
}

fn parse_url(field: &str, raw: &str) -> Result<Url> {
    Url::parse(raw).map_err(|e| Error::Config(format!("{field}: invalid URL '{raw}': {e}")))
}

/// Role permission store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PermissionsConfig {
    /// Redis connection URL. Absent = no store; every non-owner role resolves empty.
    pub redis_url: Option<String>,
    /// Key prefix; the upper-cased role name is appended
    pub key_prefix: String,
    /// Upper bound on one resolution (all roles)
    #[serde(with = "humantime_serde")]
    pub lookup_timeout: Duration,
    /// Upper bound on establishing the Redis connection
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
}

impl Default for PermissionsConfig {
    fn default() -> Self {
        Self {
            redis_url: None,
            key_prefix: "permissions:".to_string(),
            lookup_timeout: Duration::from_secs(2),
            connect_timeout: Duration::from_secs(2),
        }
    }
}

/// One gateway route
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteConfig {
    /// Stable identifier, used as the permission registry key
    pub id: String,
    /// Path prefix matched against the request path
    pub path_prefix: String,
    /// Backend base URL requests are forwarded to
    pub upstream: String,
    /// Allow requests without a valid bearer token
    #[serde(default)]
    pub anonymous: bool,
    /// Required permission codes (any one suffices)
    #[serde(default)]
    pub permissions: Vec<String>,
}

impl RouteConfig {
    fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(Error::Config("route id must not be empty".to_string()));
        }
        if !self.path_prefix.starts_with('/') {
            return Err(Error::Config(format!(
                "route '{}': path_prefix must start with '/'",
                self.id
            )));
        }
        let upstream = parse_url(&format!("routes.{}.upstream", self.id), &self.upstream)?;
        if !matches!(upstream.scheme(), "http" | "https") {
            return Err(Error::Config(format!(
                "route '{}': upstream must be http or https",
                self.id
            )));
        }
        Ok(())
    }
}

/// Human-readable `Duration` (de)serialization: `250ms`, `30s`, `5m`, `1h`.
pub mod humantime_serde {
    use std::time::Duration;

    use serde::{self, Deserialize, Deserializer, Serializer};

    /// Serialize Duration to a human-readable string (e.g., "30s", "250ms")
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the serializer fails.
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_millis() == 0 {
            serializer.serialize_str(&format!("{}s", duration.as_secs()))
        } else {
            serializer.serialize_str(&format!("{}ms", duration.as_millis()))
        }
    }

    /// Deserialize a human-readable duration string. Bare numbers are seconds.
    ///
    /// # Errors
    ///
    /// Returns a deserialization error if the string cannot be parsed as a duration.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse(&s).map_err(serde::de::Error::custom)
    }

    fn parse(s: &str) -> Result<Duration, String> {
        let s = s.trim();
        let (digits, millis_per_unit) = if let Some(ms) = s.strip_suffix("ms") {
            (ms, 1)
        } else if let Some(secs) = s.strip_suffix('s') {
            (secs, 1_000)
        } else if let Some(mins) = s.strip_suffix('m') {
            (mins, 60_000)
        } else if let Some(hours) = s.strip_suffix('h') {
            (hours, 3_600_000)
        } else {
            (s, 1_000)
        };
        let n = digits
            .trim()
            .parse::<u64>()
            .map_err(|e| format!("invalid duration '{s}': {e}"))?;
        n.checked_mul(millis_per_unit)
            .map(Duration::from_millis)
            .ok_or_else(|| format!("duration '{s}' is out of range"))
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn parses_every_unit() {
            assert_eq!(parse("250ms").unwrap(), Duration::from_millis(250));
            assert_eq!(parse("30s").unwrap(), Duration::from_secs(30));
            assert_eq!(parse("5m").unwrap(), Duration::from_secs(300));
            assert_eq!(parse("1h").unwrap(), Duration::from_secs(3600));
            assert_eq!(parse("12").unwrap(), Duration::from_secs(12));
        }

        #[test]
        fn rejects_garbage() {
            assert!(parse("soon").is_err());
            assert!(parse("-1s").is_err());
        }
    }
}
