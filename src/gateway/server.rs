//! Gateway server

use std::net::SocketAddr;

use axum::Router;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::watch;
use tracing::{info, warn};

use super::router::{GatewayServices, create_router};
use crate::config::Config;
use crate::{Error, Result};

/// Authorization gateway server
pub struct Gateway {
    config: Config,
    services: GatewayServices,
}

impl Gateway {
    /// Create a new gateway
    ///
    /// # Errors
    ///
    /// Returns an error if the services described by `config` cannot be built.
    pub fn new(config: Config) -> Result<Self> {
        let services = GatewayServices::from_config(&config)?;
        Ok(Self { config, services })
    }

    /// The HTTP router, without binding a socket.
    #[must_use]
    pub fn router(&self) -> Router {
        create_router(&self.services)
    }

    /// Run the gateway until SIGINT/SIGTERM, then drain for at most
    /// `server.shutdown_timeout`.
    ///
    /// # Errors
    ///
    /// Returns an error if the address is invalid, the socket cannot be bound
    /// or the server fails.
    pub async fn run(self) -> Result<()> {
        let addr = SocketAddr::new(
            self.config
                .server
                .host
                .parse()
                .map_err(|e| Error::Config(format!("Invalid host: {e}")))?,
            self.config.server.port,
        );

        // Not fatal: requests get 401 until a fetch succeeds.
        self.services.authenticator.key_cache().warm().await;

        let listener = TcpListener::bind(addr).await?;

        info!("============================================================");
        info!("GATEWAY AUTHZ v{}", env!("CARGO_PKG_VERSION"));
        info!("============================================================");
        info!(host = %self.config.server.host, port = self.config.server.port, "Listening");
        info!(issuer = %self.config.auth.issuer, key_source = ?self.config.auth.key_source, "Bearer authentication");
        if self.config.mtls.enabled {
            info!(skip_validation = self.config.mtls.skip_server_cert_validation, "Backend mTLS enabled");
        } else {
            warn!("Backend mTLS disabled - upstream connections use the platform trust store");
        }

        let app = self.router();
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let mut server = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.changed().await;
                })
                .await
        });

        tokio::select! {
            joined = &mut server => return flatten(joined),
            () = shutdown_signal() => {}
        }

        let _ = shutdown_tx.send(true);
        match tokio::time::timeout(self.config.server.shutdown_timeout, &mut server).await {
            Ok(joined) => flatten(joined),
            Err(_) => {
                warn!(timeout = ?self.config.server.shutdown_timeout, "In-flight requests did not drain in time");
                server.abort();
                Ok(())
            }
        }
    }
}

fn flatten(
    joined: std::result::Result<std::io::Result<()>, tokio::task::JoinError>,
) -> Result<()> {
    match joined {
        Ok(Ok(())) => {
            info!("Server stopped");
            Ok(())
        }
        Ok(Err(e)) => Err(Error::Io(e)),
        Err(e) => Err(Error::Internal(format!("Server task failed: {e}"))),
    }
}

/// Shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
}
