//! Gateway Authorization Core
//!
//! Bearer authentication, role-based permissions and pinned-CA backend mTLS
//! in front of HTTP backends.

use std::fs;
use std::path::Path;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use gateway_authz::{
    cli::{Cli, Command, TlsCommand},
    config::Config,
    gateway::Gateway,
    mtls::{CaParams, CertGenerator, LeafParams},
    setup_tracing,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Setup tracing
    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    // Handle subcommands
    match cli.command {
        Some(Command::Tls(tls_cmd)) => run_tls_command(tls_cmd),
        Some(Command::Serve) | None => run_server(cli).await,
    }
}

/// Run a TLS subcommand
fn run_tls_command(cmd: TlsCommand) -> ExitCode {
    let result = match cmd {
        TlsCommand::InitCa { cn, days, out, name } => CertGenerator::init_ca(&CaParams {
            common_name: cn,
            validity_days: days,
        })
        .and_then(|ca| {
            CertGenerator::write_to_dir(&ca, &out, &name)?;
            Ok(out.join(format!("{name}.crt")))
        }),
        TlsCommand::Issue {
            cn,
            san,
            ca_cert,
            ca_key,
            days,
            out,
            name,
        } => issue(&cn, san, &ca_cert, &ca_key, days, &out, name.as_deref()),
    };

    match result {
        Ok(path) => {
            println!("Wrote {}", path.display());
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("TLS command failed: {e}");
            ExitCode::FAILURE
        }
    }
}

fn issue(
    cn: &str,
    mut san: Vec<String>,
    ca_cert: &Path,
    ca_key: &Path,
    days: u32,
    out: &Path,
    name: Option<&str>,
) -> gateway_authz::Result<std::path::PathBuf> {
    if san.is_empty() {
        san.push(cn.to_string());
    }
    let ca_cert_pem = fs::read_to_string(ca_cert)?;
    let ca_key_pem = fs::read_to_string(ca_key)?;
    let leaf = CertGenerator::issue_leaf(
        &LeafParams {
            common_name: cn.to_string(),
            dns_names: san,
            validity_days: days,
        },
        &ca_cert_pem,
        &ca_key_pem,
    )?;
    let stem = name.unwrap_or(cn);
    CertGenerator::write_to_dir(&leaf, out, stem)?;
    Ok(out.join(format!("{stem}.crt")))
}

/// Run the gateway server
async fn run_server(cli: Cli) -> ExitCode {
    // Load configuration
    let config = match Config::load(cli.config.as_deref()) {
        Ok(mut config) => {
            // Apply CLI overrides
            if let Some(port) = cli.port {
                config.server.port = port;
            }
            if let Some(ref host) = cli.host {
                config.server.host = host.clone();
            }
            config
        }
        Err(e) => {
            error!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = config.server.port,
        routes = config.routes.len(),
        "Starting gateway"
    );

    let gateway = match Gateway::new(config) {
        Ok(g) => g,
        Err(e) => {
            error!("Failed to create gateway: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = gateway.run().await {
        error!("Gateway error: {e}");
        return ExitCode::FAILURE;
    }

    info!("Gateway shutdown complete");
    ExitCode::SUCCESS
}
