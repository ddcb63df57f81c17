//! The pinned backend CA.

use std::fmt;

use rustls::pki_types::CertificateDer;
use sha2::{Digest, Sha256};
use tracing::debug;
use x509_parser::certificate::X509Certificate;
use x509_parser::prelude::FromDer;

use super::cert_manager::load_certs;
use crate::{Error, Result};

/// SHA-256 of a DER certificate.
#[must_use]
pub fn fingerprint(der: &[u8]) -> [u8; 32] {
    Sha256::digest(der).into()
}

/// A CA certificate trusted for backend connections only. Read-only after
/// construction.
#[derive(Clone)]
pub struct TrustAnchor {
    der: CertificateDer<'static>,
    fingerprint: [u8; 32],
    subject: String,
}

impl TrustAnchor {
    /// Wrap a DER certificate.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Tls`] if the bytes are not an X.509 certificate or the
    /// certificate is not a CA.
    pub fn from_der(der: CertificateDer<'static>) -> Result<Self> {
        let (_, cert) = X509Certificate::from_der(der.as_ref())
            .map_err(|e| Error::Tls(format!("Pinned CA is not a valid certificate: {e}")))?;
        if !cert.is_ca() {
            return Err(Error::Tls(format!(
                "Pinned certificate '{}' is not a CA",
                cert.subject()
            )));
        }
        let subject = cert.subject().to_string();
        let fingerprint = fingerprint(der.as_ref());
        Ok(Self {
            der,
            fingerprint,
            subject,
        })
    }

    /// Load the first certificate of a PEM file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Tls`] if the file cannot be loaded or does not hold a
    /// CA certificate.
    pub fn from_pem_file(path: &str) -> Result<Self> {
        let mut certs = load_certs(path)?;
        if certs.len() > 1 {
            debug!(path, ignored = certs.len() - 1, "Only the first certificate is pinned");
        }
        let first = certs.swap_remove(0);
        Self::from_der(first)
    }

    /// DER bytes.
    #[must_use]
    pub fn der(&self) -> &CertificateDer<'static> {
        &self.der
    }

    /// SHA-256 fingerprint of the DER bytes.
    #[must_use]
    pub fn fingerprint(&self) -> &[u8; 32] {
        &self.fingerprint
    }

    /// Fingerprint as lowercase hex.
    #[must_use]
    pub fn fingerprint_hex(&self) -> String {
        hex::encode(self.fingerprint)
    }

    /// Subject distinguished name.
    #[must_use]
    pub fn subject(&self) -> &str {
        &self.subject
    }
}

impl fmt::Debug for TrustAnchor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrustAnchor")
            .field("subject", &self.subject)
            .field("sha256", &self.fingerprint_hex())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mtls::cert_manager::{CaParams, CertGenerator, LeafParams};

    fn write(dir: &std::path::Path, name: &str, pem: &str) -> String {
        let path = dir.join(name);
        std::fs::write(&path, pem).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[test]
    fn loads_ca_and_fingerprints_der() {
        // GIVEN: a generated CA on disk
        let dir = tempfile::tempdir().unwrap();
        let ca = CertGenerator::init_ca(&CaParams {
            common_name: "Pinned CA".to_string(),
            validity_days: 1,
        })
        .unwrap();
        let path = write(dir.path(), "ca.crt", &ca.cert_pem);

        // WHEN: loaded
        let anchor = TrustAnchor::from_pem_file(&path).unwrap();

        // THEN: the fingerprint is the SHA-256 of the DER
        assert_eq!(anchor.fingerprint(), &fingerprint(anchor.der().as_ref()));
        assert_eq!(anchor.fingerprint_hex().len(), 64);
        assert!(anchor.subject().contains("Pinned CA"));
    }

    #[test]
    fn leaf_certificate_cannot_be_pinned() {
        let dir = tempfile::tempdir().unwrap();
        let ca = CertGenerator::init_ca(&CaParams {
            common_name: "CA".to_string(),
            validity_days: 1,
        })
        .unwrap();
        let leaf = CertGenerator::issue_leaf(
            &LeafParams {
                common_name: "svc".to_string(),
                dns_names: vec!["svc.internal".to_string()],
                validity_days: 1,
            },
            &ca.cert_pem,
            &ca.key_pem,
        )
        .unwrap();
        let path = write(dir.path(), "leaf.crt", &leaf.cert_pem);

        let err = TrustAnchor::from_pem_file(&path).unwrap_err().to_string();
        assert!(err.contains("not a CA"), "{err}");
    }

    #[test]
    fn garbage_der_is_rejected() {
        assert!(TrustAnchor::from_der(CertificateDer::from(vec![1, 2, 3])).is_err());
    }
}
