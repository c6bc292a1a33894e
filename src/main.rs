//! Mock server (v1)
//!
//! Serves HTTP/1.1, and HTTP/2 over TLS, answering every request through
//! the echo backend until `/__admin/stop` is requested.
//!
//! # Architecture Overview
//!
//! ```text
//!                       ┌─────────────────────────────────────────────┐
//!                       │                 MOCK SERVER                  │
//!     Client Request    │  ┌──────────┐   ┌──────────┐   ┌─────────┐  │
//!     ──────────────────┼─▶│ acceptor │──▶│  worker  │──▶│ backend │  │
//!                       │  │  thread  │   │   pool   │   │  (echo) │  │
//!                       │  └──────────┘   └────┬─────┘   └────┬────┘  │
//!     Client Response   │                      │              │       │
//!     ◀─────────────────┼──────────────────────┴──────────────┘       │
//!                       └─────────────────────────────────────────────┘
//! ```

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

use karate_mock_server::backend::{Backend, EchoBackend};
use karate_mock_server::config::{config_warnings, load_config, ServerConfig, TlsSettings};
use karate_mock_server::lifecycle::{start, StartOptions};
use karate_mock_server::observability::logging;

#[derive(Parser)]
#[command(name = "mock-server")]
#[command(about = "Embeddable HTTP/1.1 and HTTP/2 mock server", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on (overrides config); 0 picks a free port
    #[arg(short, long)]
    port: Option<u16>,

    /// Serve over TLS with a self-signed certificate unless --cert/--key are given
    #[arg(long)]
    ssl: bool,

    /// PEM certificate chain
    #[arg(long, requires = "key")]
    cert: Option<String>,

    /// PEM private key
    #[arg(long, requires = "cert")]
    key: Option<String>,

    /// Client certificate mode: none, optional or require
    #[arg(long)]
    client_auth: Option<String>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ServerConfig::default(),
    };
    apply_overrides(&mut config, &cli);

    logging::init(config.log_level());
    tracing::info!("mock-server v{} starting", env!("CARGO_PKG_VERSION"));
    for warning in config_warnings(&config) {
        tracing::warn!("{}", warning);
    }
    if let Some(feature) = &config.feature_path {
        tracing::info!(feature = %feature, "Backend source");
    }

    let server = start(StartOptions::from(&config), |context| {
        let backend: Arc<dyn Backend> = Arc::new(EchoBackend::from_context(context)?);
        Ok(backend)
    })?;

    tracing::info!(url = %server.url(), "Listening for connections");
    server.wait_until_closed();
    server.stop();
    Ok(())
}

fn apply_overrides(config: &mut ServerConfig, cli: &Cli) {
    if let Some(port) = cli.port {
        config.listener.port = port;
    }
    if cli.ssl || cli.cert.is_some() {
        let tls = config.tls.get_or_insert_with(TlsSettings::default);
        match (&cli.cert, &cli.key) {
            (Some(cert), Some(key)) => {
                tls.self_signed = false;
                tls.cert_path = Some(cert.clone());
                tls.key_path = Some(key.clone());
            }
            _ if tls.cert_path.is_none() => tls.self_signed = true,
            _ => {}
        }
    }
    if let (Some(mode), Some(tls)) = (&cli.client_auth, config.tls.as_mut()) {
        tls.client_auth = mode.clone();
    }
}
