//! Trust Anchor Validator: backend certificate verification against the
//! pinned CA.
//!
//! A backend certificate is accepted only if
//!
//! 1. webpki builds a path from it to the pinned CA (the only root, so the
//!    system trust store plays no part; no revocation checks),
//! 2. its SAN matches the upstream host, when `verify_server_name` is on, and
//! 3. the pinned CA's SHA-256 fingerprint appears among the elements of the
//!    path webpki verified. Presented certificates that are not on that path
//!    play no part, so a cross-signed copy of the pinned CA is harmless.
//!
//! In skip mode every certificate is accepted and every handshake logs a
//! warning.

use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{WebPkiSupportedAlgorithms, verify_tls12_signature, verify_tls13_signature};
use rustls::pki_types::{self, CertificateDer, ServerName, UnixTime};
use rustls::{CertificateError, DigitallySignedStruct, OtherError, SignatureScheme};
use tracing::{debug, info, warn};
use webpki::{EndEntityCert, KeyUsage, VerifiedPath};

use super::anchor::{TrustAnchor, fingerprint};
use super::config::MtlsConfig;
use crate::Result;

/// Why a backend certificate was refused.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TrustError {
    /// No valid path to the pinned CA.
    #[error("certificate chain rejected: {0}")]
    Chain(rustls::Error),

    /// The certificate does not cover the upstream host name.
    #[error("server name mismatch: {0}")]
    ServerName(rustls::Error),

    /// The chain does not contain the pinned CA.
    #[error("pinned CA {0} not present in certificate chain")]
    AnchorNotInChain(String),

    /// A presented certificate could not be parsed.
    #[error("unparsable certificate: {0}")]
    Parse(String),
}

impl From<TrustError> for rustls::Error {
    fn from(e: TrustError) -> Self {
        match e {
            TrustError::Chain(inner) | TrustError::ServerName(inner) => inner,
            TrustError::AnchorNotInChain(_) => {
                Self::InvalidCertificate(CertificateError::ApplicationVerificationFailure)
            }
            TrustError::Parse(_) => Self::InvalidCertificate(CertificateError::BadEncoding),
        }
    }
}

#[derive(Debug)]
enum Mode {
    Pinned {
        anchor: TrustAnchor,
        root: pki_types::TrustAnchor<'static>,
    },
    Skip,
}

/// Verifies backend certificates during the TLS handshake.
#[derive(Debug)]
pub struct TrustAnchorValidator {
    mode: Mode,
    verify_server_name: bool,
    algorithms: WebPkiSupportedAlgorithms,
}

impl TrustAnchorValidator {
    /// Validate against `anchor` only.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Tls`] if the anchor cannot be used as a root.
    pub fn pinned(anchor: TrustAnchor, verify_server_name: bool) -> Result<Self> {
        let root = webpki::anchor_from_trusted_cert(anchor.der())
            .map_err(|e| crate::Error::Tls(format!("pinned CA unusable as trust anchor: {e}")))?
            .to_owned();
        info!(
            ca = %anchor.subject(),
            sha256 = %anchor.fingerprint_hex(),
            verify_server_name,
            "Backend certificates pinned to CA"
        );
        Ok(Self {
            mode: Mode::Pinned { anchor, root },
            verify_server_name,
            algorithms: default_algorithms(),
        })
    }

    /// Accept every backend certificate. Not for production.
    #[must_use]
    pub fn skip_validation() -> Self {
        warn!("BACKEND CERTIFICATE VALIDATION IS DISABLED: any certificate presented by a backend will be accepted. Never use this in production.");
        Self {
            mode: Mode::Skip,
            verify_server_name: false,
            algorithms: default_algorithms(),
        }
    }

    /// Build from the `mtls` config section.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Tls`] if the pinned CA cannot be loaded.
    pub fn from_config(config: &MtlsConfig) -> Result<Self> {
        if config.skip_server_cert_validation {
            return Ok(Self::skip_validation());
        }
        let anchor = TrustAnchor::from_pem_file(&config.ca_cert)?;
        Self::pinned(anchor, config.verify_server_name)
    }

    /// Whether validation is disabled.
    #[must_use]
    pub fn is_skipping(&self) -> bool {
        matches!(self.mode, Mode::Skip)
    }

    /// Validate a presented chain.
    ///
    /// `intermediates` is in the order the server sent it. `server_name` is
    /// checked only when name verification is enabled and a name is given.
    ///
    /// # Errors
    ///
    /// Returns the [`TrustError`] describing the first failed check.
    pub fn validate(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: Option<&ServerName<'_>>,
        now: UnixTime,
    ) -> std::result::Result<(), TrustError> {
        let (anchor, root) = match &self.mode {
            Mode::Skip => {
                warn!(server = ?server_name, "Accepting backend certificate WITHOUT validation");
                return Ok(());
            }
            Mode::Pinned { anchor, root } => (anchor, root),
        };

        let cert =
            EndEntityCert::try_from(end_entity).map_err(|e| TrustError::Parse(e.to_string()))?;
        let roots = std::slice::from_ref(root);
        let path = cert
            .verify_for_usage(
                self.algorithms.all,
                roots,
                intermediates,
                now,
                KeyUsage::server_auth(),
                None,
                None,
            )
            .map_err(|e| TrustError::Chain(certificate_error(e)))?;

        if self.verify_server_name
            && let Some(name) = server_name
        {
            cert.verify_is_valid_for_subject_name(name)
                .map_err(|e| TrustError::ServerName(certificate_error(e)))?;
        }

        let chain = path_fingerprints(end_entity, &path, root, anchor);
        require_anchor(&chain, anchor)?;
        debug!(server = ?server_name, depth = chain.len(), "Backend certificate accepted");
        Ok(())
    }
}

impl ServerCertVerifier for TrustAnchorValidator {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        match self.validate(end_entity, intermediates, Some(server_name), now) {
            Ok(()) => Ok(ServerCertVerified::assertion()),
            Err(e) => {
                warn!(server = ?server_name, error = %e, "Backend certificate rejected");
                Err(e.into())
            }
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.algorithms.supported_schemes()
    }
}

fn default_algorithms() -> WebPkiSupportedAlgorithms {
    rustls::crypto::aws_lc_rs::default_provider().signature_verification_algorithms
}

/// Fingerprints of the verified path: end entity, intermediates in path
/// order, then the pinned CA when the path terminated at it.
fn path_fingerprints(
    end_entity: &CertificateDer<'_>,
    path: &VerifiedPath<'_>,
    root: &pki_types::TrustAnchor<'_>,
    anchor: &TrustAnchor,
) -> Vec<[u8; 32]> {
    let mut chain = vec![fingerprint(end_entity.as_ref())];
    chain.extend(
        path.intermediate_certificates()
            .map(|cert| fingerprint(cert.der().as_ref())),
    );
    if path.anchor() == root {
        chain.push(*anchor.fingerprint());
    }
    chain
}

fn require_anchor(
    chain: &[[u8; 32]],
    anchor: &TrustAnchor,
) -> std::result::Result<(), TrustError> {
    if chain.contains(anchor.fingerprint()) {
        Ok(())
    } else {
        Err(TrustError::AnchorNotInChain(anchor.fingerprint_hex()))
    }
}

/// The rustls error for a webpki rejection, as rustls' own verifier reports it.
fn certificate_error(e: webpki::Error) -> rustls::Error {
    use webpki::Error as E;
    let kind = match e {
        E::BadDer | E::BadDerTime | E::TrailingData(_) => CertificateError::BadEncoding,
        E::CertExpired { .. } => CertificateError::Expired,
        E::CertNotValidYet { .. } => CertificateError::NotValidYet,
        E::CertNotValidForName(_) => CertificateError::NotValidForName,
        E::UnknownIssuer => CertificateError::UnknownIssuer,
        E::InvalidSignatureForPublicKey => CertificateError::BadSignature,
        other => CertificateError::Other(OtherError(Arc::new(other))),
    };
    rustls::Error::InvalidCertificate(kind)
}
