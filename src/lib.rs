//! Gateway Authorization Core
//!
//! The request-time security layer of an API gateway.
//!
//! # Features
//!
//! - **Bearer authentication**: JWT verification against a cached JWKS with a
//!   TTL, single-flight refresh and stale-key fallback
//! - **Role permissions**: per-role `resource:action` grants read from Redis,
//!   with `resource:*` and `*` wildcards and an `OWNER` bypass
//! - **Authorization gate**: per-route required permissions, structured 403
//! - **Backend mTLS**: outbound client identity plus a pinned-CA validator that
//!   requires the anchor's fingerprint in the built chain
//!
//! # Request flow
//!
//! ```text
//! request → route match → authentication (401) → authorization gate (403) → proxy
//!                                                                   └─ pinned-CA TLS (502)
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod auth;
pub mod authz;
pub mod cli;
pub mod config;
pub mod error;
pub mod gateway;
pub mod mtls;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => subscriber
            .with(fmt::layer().json())
            .try_init()
            .map_err(|e| Error::Internal(format!("Failed to install subscriber: {e}")))?,
        _ => subscriber
            .with(fmt::layer())
            .try_init()
            .map_err(|e| Error::Internal(format!("Failed to install subscriber: {e}")))?,
    }

    Ok(())
}
