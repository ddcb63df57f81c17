//! Backend mTLS configuration.
//!
//! # Example YAML
//!
//! ```yaml
//! mtls:
//!   enabled: true
//!   client_cert: "/etc/gateway/tls/gateway-client.crt"
//!   client_key:  "/etc/gateway/tls/gateway-client.key"
//!   ca_cert:     "/etc/gateway/tls/backend-ca.crt"
//!   skip_server_cert_validation: false
//!   verify_server_name: true
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Outbound (gateway → backend) mutual TLS.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MtlsConfig {
    /// Enable mTLS towards backends.
    ///
    /// When `false` (default) the backend client uses the platform defaults
    /// and presents no client certificate.
    pub enabled: bool,

    /// PEM certificate chain the gateway presents to backends.
    pub client_cert: String,

    /// PEM private key matching `client_cert`.
    pub client_key: String,

    /// PEM certificate of the pinned CA backends must chain to.
    pub ca_cert: String,

    /// Accept any backend certificate. Non-production only; logged at `warn`
    /// on startup and on every handshake.
    pub skip_server_cert_validation: bool,

    /// Check the backend certificate's SAN against the upstream host.
    #[serde(default = "default_true")]
    pub verify_server_name: bool,
}

fn default_true() -> bool {
    true
}

impl Default for MtlsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            client_cert: String::new(),
            client_key: String::new(),
            ca_cert: String::new(),
            skip_server_cert_validation: false,
            verify_server_name: true,
        }
    }
}

impl MtlsConfig {
    /// Check required paths when mTLS is enabled.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] naming the missing or unreadable path.
    pub fn validate(&self) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        require_file("mtls.client_cert", &self.client_cert)?;
        require_file("mtls.client_key", &self.client_key)?;
        if !self.skip_server_cert_validation {
            require_file("mtls.ca_cert", &self.ca_cert)?;
        }
        Ok(())
    }
}

fn require_file(field: &str, path: &str) -> Result<()> {
    if path.trim().is_empty() {
        return Err(Error::Config(format!("{field} must be set when mtls is enabled")));
    }
    if !Path::new(path).is_file() {
        return Err(Error::Config(format!("{field}: file not found: {path}")));
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_mtls_config_is_disabled() {
        // GIVEN: default-constructed config
        let cfg = MtlsConfig::default();
        // THEN: mTLS is off and validation is a no-op
        assert!(!cfg.enabled);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn verify_server_name_defaults_to_true() {
        // GIVEN: config with enabled=true, no explicit verify_server_name
        let yaml = "enabled: true\nclient_cert: a\nclient_key: b\nca_cert: c";
        let cfg: MtlsConfig = serde_yaml::from_str(yaml).unwrap();
        // THEN: strict mode is the default
        assert!(cfg.verify_server_name);
        assert!(!cfg.skip_server_cert_validation);
    }

    #[test]
    fn enabled_without_paths_is_rejected() {
        let cfg = MtlsConfig {
            enabled: true,
            ..MtlsConfig::default()
        };
        let err = cfg.validate().unwrap_err().to_string();
        assert!(err.contains("mtls.client_cert"), "{err}");
    }

    #[test]
    fn enabled_with_missing_file_is_rejected() {
        let cfg = MtlsConfig {
            enabled: true,
            client_cert: "/nonexistent/client.crt".to_string(),
            client_key: "/nonexistent/client.key".to_string(),
            ca_cert: "/nonexistent/ca.crt".to_string(),
            ..MtlsConfig::default()
        };
        let err = cfg.validate().unwrap_err().to_string();
        assert!(err.contains("file not found"), "{err}");
    }

    #[test]
    fn skip_validation_does_not_require_ca() {
        // GIVEN: client identity files that exist, no CA, skip flag set
        let dir = tempfile::tempdir().unwrap();
        let cert = dir.path().join("c.crt");
        let key = dir.path().join("c.key");
        std::fs::write(&cert, "x").unwrap();
        std::fs::write(&key, "x").unwrap();
        let cfg = MtlsConfig {
            enabled: true,
            client_cert: cert.to_string_lossy().into_owned(),
            client_key: key.to_string_lossy().into_owned(),
            skip_server_cert_validation: true,
            ..MtlsConfig::default()
        };
        // THEN: accepted
        assert!(cfg.validate().is_ok());
    }
}
