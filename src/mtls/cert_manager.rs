//! PEM loading for the backend client identity, and a small development PKI.
//!
//! All files are PEM. [`CertGenerator`] backs the `gateway-authz tls`
//! subcommands: one CA, then leaf certificates for backends (server auth) and
//! for the gateway itself (client auth), all signed by that CA.

use std::fs;
use std::path::Path;

use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose, IsCa,
    Issuer, KeyPair, KeyUsagePurpose,
};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use time::OffsetDateTime;

use crate::{Error, Result};

// ─────────────────────────────────────────────────────────────────────────────
// PEM loading
// ─────────────────────────────────────────────────────────────────────────────

/// Load every certificate in a PEM file, in file order.
///
/// # Errors
///
/// Returns [`Error::Tls`] if the file cannot be read or holds no certificate.
pub fn load_certs(path: &str) -> Result<Vec<CertificateDer<'static>>> {
    let pem = read_file(path)?;
    let certs = rustls_pemfile::certs(&mut pem.as_slice())
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::Tls(format!("Failed to parse certificates in '{path}': {e}")))?;
    if certs.is_empty() {
        return Err(Error::Tls(format!("No certificates found in '{path}'")));
    }
    Ok(certs)
}

/// Load the first private key (PKCS#8, PKCS#1 or SEC1) in a PEM file.
///
/// # Errors
///
/// Returns [`Error::Tls`] if the file cannot be read or holds no key.
pub fn load_private_key(path: &str) -> Result<PrivateKeyDer<'static>> {
    let pem = read_file(path)?;
    rustls_pemfile::private_key(&mut pem.as_slice())
        .map_err(|e| Error::Tls(format!("Failed to parse private key in '{path}': {e}")))?
        .ok_or_else(|| Error::Tls(format!("No private key found in '{path}'")))
}

fn read_file(path: &str) -> Result<Vec<u8>> {
    fs::read(path).map_err(|e| Error::Tls(format!("Cannot read '{path}': {e}")))
}

// ─────────────────────────────────────────────────────────────────────────────
// Development PKI
// ─────────────────────────────────────────────────────────────────────────────

/// Parameters of a generated CA.
#[derive(Debug, Clone)]
pub struct CaParams {
    /// Subject common name.
    pub common_name: String,
    /// Validity in days from now.
    pub validity_days: u32,
}

/// Parameters of a generated leaf certificate.
#[derive(Debug, Clone)]
pub struct LeafParams {
    /// Subject common name.
    pub common_name: String,
    /// DNS names (or IP addresses) placed in the SAN extension.
    pub dns_names: Vec<String>,
    /// Validity in days from now.
    pub validity_days: u32,
}

/// A certificate and its private key, both PEM.
#[derive(Debug, Clone)]
pub struct GeneratedCert {
    /// PEM certificate.
    pub cert_pem: String,
    /// PEM private key.
    pub key_pem: String,
}

/// Generates CA and leaf certificates with `rcgen`.
pub struct CertGenerator;

impl CertGenerator {
    /// Create a self-signed CA.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Tls`] if key generation or signing fails.
    pub fn init_ca(params: &CaParams) -> Result<GeneratedCert> {
        let key = KeyPair::generate().map_err(|e| Error::Tls(format!("CA key generation: {e}")))?;

        let mut ca = CertificateParams::default();
        ca.distinguished_name = common_name(&params.common_name);
        ca.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        ca.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];
        ca.not_after = days_from_now(params.validity_days);

        let cert = ca
            .self_signed(&key)
            .map_err(|e| Error::Tls(format!("CA signing: {e}")))?;
        Ok(GeneratedCert {
            cert_pem: cert.pem(),
            key_pem: key.serialize_pem(),
        })
    }

    /// Issue a leaf certificate signed by the given CA.
    ///
    /// The leaf is valid for both server and client authentication.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Tls`] if the CA cannot be parsed, a SAN is invalid, or
    /// signing fails.
    pub fn issue_leaf(params: &LeafParams, ca_cert_pem: &str, ca_key_pem: &str) -> Result<GeneratedCert> {
        let ca_key =
            KeyPair::from_pem(ca_key_pem).map_err(|e| Error::Tls(format!("CA key: {e}")))?;
        let issuer = Issuer::from_ca_cert_pem(ca_cert_pem, ca_key)
            .map_err(|e| Error::Tls(format!("CA certificate: {e}")))?;

        let mut leaf = CertificateParams::new(params.dns_names.clone())
            .map_err(|e| Error::Tls(format!("Subject alternative names: {e}")))?;
        leaf.distinguished_name = common_name(&params.common_name);
        leaf.key_usages = vec![KeyUsagePurpose::DigitalSignature];
        leaf.extended_key_usages = vec![
            ExtendedKeyUsagePurpose::ServerAuth,
            ExtendedKeyUsagePurpose::ClientAuth,
        ];
        leaf.not_after = days_from_now(params.validity_days);

        let key =
            KeyPair::generate().map_err(|e| Error::Tls(format!("Leaf key generation: {e}")))?;
        let cert = leaf
            .signed_by(&key, &issuer)
            .map_err(|e| Error::Tls(format!("Leaf signing: {e}")))?;
        Ok(GeneratedCert {
            cert_pem: cert.pem(),
            key_pem: key.serialize_pem(),
        })
    }

    /// Write `<stem>.crt` and `<stem>.key` into `dir`, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] on filesystem failure.
    pub fn write_to_dir(cert: &GeneratedCert, dir: &Path, stem: &str) -> Result<()> {
        fs::create_dir_all(dir)?;
        fs::write(dir.join(format!("{stem}.crt")), &cert.cert_pem)?;
        fs::write(dir.join(format!("{stem}.key")), &cert.key_pem)?;
        Ok(())
    }
}

fn common_name(cn: &str) -> DistinguishedName {
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, cn);
    dn
}

fn days_from_now(days: u32) -> OffsetDateTime {
    OffsetDateTime::now_utc().saturating_add(time::Duration::days(i64::from(days)))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn ca() -> GeneratedCert {
        CertGenerator::init_ca(&CaParams {
            common_name: "Test Backend CA".to_string(),
            validity_days: 30,
        })
        .unwrap()
    }

    fn leaf_params() -> LeafParams {
        LeafParams {
            common_name: "orders.internal".to_string(),
            dns_names: vec!["orders.internal".to_string()],
            validity_days: 7,
        }
    }

    #[test]
    fn init_ca_produces_certificate_and_key() {
        let ca = ca();
        assert!(ca.cert_pem.contains("BEGIN CERTIFICATE"));
        assert!(ca.key_pem.contains("PRIVATE KEY"));
    }

    #[test]
    fn issued_leaf_names_the_ca_as_issuer() {
        // GIVEN: a CA
        let ca = ca();

        // WHEN: a leaf is issued
        let leaf = CertGenerator::issue_leaf(&leaf_params(), &ca.cert_pem, &ca.key_pem).unwrap();

        // THEN: its issuer is the CA subject
        let dir = tempfile::tempdir().unwrap();
        CertGenerator::write_to_dir(&leaf, dir.path(), "leaf").unwrap();
        let der = load_certs(dir.path().join("leaf.crt").to_str().unwrap()).unwrap();
        let (_, parsed) = x509_parser::parse_x509_certificate(der[0].as_ref()).unwrap();
        assert!(parsed.issuer().to_string().contains("Test Backend CA"));
    }

    #[test]
    fn issue_leaf_rejects_garbage_ca_key() {
        let ca = ca();
        assert!(CertGenerator::issue_leaf(&leaf_params(), &ca.cert_pem, "not a key").is_err());
    }

    #[test]
    fn load_private_key_round_trips_generated_key() {
        let dir = tempfile::tempdir().unwrap();
        CertGenerator::write_to_dir(&ca(), dir.path(), "ca").unwrap();
        let key = load_private_key(dir.path().join("ca.key").to_str().unwrap()).unwrap();
        assert!(!key.secret_der().is_empty());
    }

    #[test]
    fn missing_file_is_reported() {
        let err = load_certs("/nonexistent/ca.crt").unwrap_err().to_string();
        assert!(err.contains("Cannot read"), "{err}");
    }

    #[test]
    fn certificate_file_without_key_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("only.crt");
        fs::write(&path, ca().cert_pem).unwrap();
        assert!(load_private_key(path.to_str().unwrap()).is_err());
    }

    #[test]
    fn empty_pem_has_no_certificates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.crt");
        fs::write(&path, "").unwrap();
        assert!(load_certs(path.to_str().unwrap()).is_err());
    }
}
