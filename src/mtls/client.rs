//! Outbound HTTP client for backends.

use std::sync::Arc;
use std::time::Duration;

use rustls::ClientConfig;
use tracing::info;

use super::cert_manager::{load_certs, load_private_key};
use super::config::MtlsConfig;
use super::verifier::TrustAnchorValidator;
use crate::{Error, Result};

/// Build the client used to forward requests.
///
/// With mTLS disabled this is a plain client with the platform trust store.
/// With mTLS enabled the client speaks TLS 1.3 only, presents the configured
/// client certificate, and verifies backends with [`TrustAnchorValidator`].
///
/// # Errors
///
/// Returns [`Error::Tls`] if certificates or keys cannot be loaded or do not
/// match, and [`Error::Config`] if the client cannot be built.
pub fn backend_client(config: &MtlsConfig, timeout: Duration) -> Result<reqwest::Client> {
    let builder = reqwest::Client::builder()
        .timeout(timeout)
        .redirect(reqwest::redirect::Policy::none());

    let builder = if config.enabled {
        let tls = mtls_client_config(config)?;
        info!(client_cert = %config.client_cert, "Backend mTLS enabled");
        builder.tls_backend_preconfigured(tls)
    } else {
        builder
    };

    builder
        .build()
        .map_err(|e| Error::Config(format!("Failed to build backend client: {e}")))
}

/// TLS 1.3 client configuration with the gateway's identity and the pinned
/// backend CA.
///
/// # Errors
///
/// Returns [`Error::Tls`] on any certificate, key or verifier failure.
pub fn mtls_client_config(config: &MtlsConfig) -> Result<ClientConfig> {
    let validator = Arc::new(TrustAnchorValidator::from_config(config)?);
    let certs = load_certs(&config.client_cert)?;
    let key = load_private_key(&config.client_key)?;

    let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());
    let mut tls = ClientConfig::builder_with_provider(provider)
        .with_protocol_versions(&[&rustls::version::TLS13])?
        .dangerous()
        .with_custom_certificate_verifier(validator)
        .with_client_auth_cert(certs, key)?;
    tls.alpn_protocols = vec![b"http/1.1".to_vec()];
    Ok(tls)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mtls::cert_manager::{CaParams, CertGenerator, LeafParams};

    #[test]
    fn disabled_mtls_builds_plain_client() {
        assert!(backend_client(&MtlsConfig::default(), Duration::from_secs(5)).is_ok());
    }

    #[test]
    fn enabled_mtls_builds_pinned_client() {
        // GIVEN: a CA and a gateway client certificate on disk
        let dir = tempfile::tempdir().unwrap();
        let ca = CertGenerator::init_ca(&CaParams {
            common_name: "Backend CA".to_string(),
            validity_days: 1,
        })
        .unwrap();
        let client = CertGenerator::issue_leaf(
            &LeafParams {
                common_name: "gateway".to_string(),
                dns_names: vec!["gateway.internal".to_string()],
                validity_days: 1,
            },
            &ca.cert_pem,
            &ca.key_pem,
        )
        .unwrap();
        CertGenerator::write_to_dir(&ca, dir.path(), "ca").unwrap();
        CertGenerator::write_to_dir(&client, dir.path(), "gateway").unwrap();
        let path = |name: &str| dir.path().join(name).to_string_lossy().into_owned();

        let config = MtlsConfig {
            enabled: true,
            client_cert: path("gateway.crt"),
            client_key: path("gateway.key"),
            ca_cert: path("ca.crt"),
            ..MtlsConfig::default()
        };

        // WHEN: the TLS config is built
        let tls = mtls_client_config(&config).unwrap();

        // THEN: the client certificate is installed
        assert!(tls.client_auth_cert_resolver.has_certs());
        assert!(backend_client(&config, Duration::from_secs(5)).is_ok());
    }

    #[test]
    fn missing_client_key_fails() {
        let config = MtlsConfig {
            enabled: true,
            client_cert: "/nonexistent/gateway.crt".to_string(),
            client_key: "/nonexistent/gateway.key".to_string(),
            skip_server_cert_validation: true,
            ..MtlsConfig::default()
        };
        assert!(mtls_client_config(&config).is_err());
    }
}
