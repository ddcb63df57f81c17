//! Command-line interface

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Gateway authorization core - bearer authentication, role permissions and
/// pinned-CA backend mTLS
#[derive(Parser, Debug)]
#[command(name = "gateway-authz")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "AUTHZ_GATEWAY_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long, env = "AUTHZ_GATEWAY_PORT")]
    pub port: Option<u16>,

    /// Host to bind to
    #[arg(long, env = "AUTHZ_GATEWAY_HOST")]
    pub host: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        long,
        default_value = "info",
        env = "AUTHZ_GATEWAY_LOG_LEVEL",
        global = true
    )]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "AUTHZ_GATEWAY_LOG_FORMAT", global = true)]
    pub log_format: Option<String>,

    /// Subcommand (optional - defaults to server mode)
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the gateway server (default)
    Serve,

    /// Development PKI for backend mTLS
    #[command(subcommand)]
    Tls(TlsCommand),
}

/// TLS subcommands
#[derive(Subcommand, Debug)]
pub enum TlsCommand {
    /// Create a CA to pin as `mtls.ca_cert`
    InitCa {
        /// Subject common name
        #[arg(long, default_value = "Gateway Backend CA")]
        cn: String,

        /// Validity in days
        #[arg(long, default_value_t = 365)]
        days: u32,

        /// Output directory (writes `<name>.crt` and `<name>.key`)
        #[arg(long, default_value = "tls")]
        out: PathBuf,

        /// File stem
        #[arg(long, default_value = "ca")]
        name: String,
    },

    /// Issue a backend server or gateway client certificate signed by the CA
    Issue {
        /// Subject common name
        #[arg(long, required = true)]
        cn: String,

        /// DNS names or IP addresses for the SAN extension (repeatable)
        #[arg(long = "san")]
        san: Vec<String>,

        /// CA certificate (PEM)
        #[arg(long, default_value = "tls/ca.crt")]
        ca_cert: PathBuf,

        /// CA private key (PEM)
        #[arg(long, default_value = "tls/ca.key")]
        ca_key: PathBuf,

        /// Validity in days
        #[arg(long, default_value_t = 90)]
        days: u32,

        /// Output directory
        #[arg(long, default_value = "tls")]
        out: PathBuf,

        /// File stem (defaults to the common name)
        #[arg(long)]
        name: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_subcommand_means_serve() {
        let cli = Cli::parse_from(["gateway-authz", "--port", "9000"]);
        assert!(cli.command.is_none());
        assert_eq!(cli.port, Some(9000));
        assert_eq!(cli.log_level, "info");
    }

    #[test]
    fn tls_issue_collects_repeated_sans() {
        let cli = Cli::parse_from([
            "gateway-authz",
            "tls",
            "issue",
            "--cn",
            "orders",
            "--san",
            "orders.internal",
            "--san",
            "10.0.0.7",
        ]);
        let Some(Command::Tls(TlsCommand::Issue { san, name, .. })) = cli.command else {
            panic!("expected tls issue");
        };
        assert_eq!(san, vec!["orders.internal", "10.0.0.7"]);
        assert!(name.is_none());
    }

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
