//! Mutual TLS towards backends.
//!
//! ```text
//! gateway ──(client cert)──▶ backend
//!         ◀──(server chain)──
//!   TrustAnchorValidator: path to pinned CA + fingerprint in chain
//! ```
//!
//! - [`config`]: the `mtls` config section
//! - [`anchor`]: the pinned CA and its fingerprint
//! - [`verifier`]: chain validation, installed as a rustls `ServerCertVerifier`
//! - [`client`]: the outbound `reqwest` client
//! - [`cert_manager`]: PEM loading and the development PKI behind `tls` CLI commands

pub mod anchor;
pub mod cert_manager;
pub mod client;
pub mod config;
pub mod verifier;

pub use anchor::TrustAnchor;
pub use cert_manager::{CaParams, CertGenerator, GeneratedCert, LeafParams, load_certs, load_private_key};
pub use client::{backend_client, mtls_client_config};
pub use config::MtlsConfig;
pub use verifier::{TrustAnchorValidator, TrustError};
