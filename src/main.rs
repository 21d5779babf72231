//! Telemetry relay (v1)
//!
//! One binary, two modes.
//!
//! # Architecture Overview
//!
//! ```text
//!  server mode
//!  ───────────
//!   TLS clients ──▶ ┌──────────┐   ┌───────────────────┐   ┌────────────┐
//!   (many, any      │ acceptor │──▶│ connection queue  │──▶│ worker × N │──▶ line sink (log)
//!    number)        └──────────┘   │ (bounded, blocks) │   │  sessions  │
//!                                  └───────────────────┘   └────────────┘
//!
//!  client mode
//!  ───────────
//!   local feed ──▶ ┌───────────────┐   ┌──────────────┐   ┌─────────────────┐
//!   (ZeroMQ SUB)   │ feed listener │──▶│ relay buffer │──▶│ upstream bridge │──▶ TLS upstream
//!                  └───────────────┘   └──────────────┘   │ (reconnecting)  │
//!                                                          └─────────────────┘
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use telemetry_relay::config::{self, ConfigError, RelayConfig};
use telemetry_relay::lifecycle::{signals, Shutdown};
use telemetry_relay::net::tls::{CertificateProvider, PemFileProvider, SelfSignedProvider};
use telemetry_relay::net::Listener;
use telemetry_relay::observability::{logging, metrics};
use telemetry_relay::server::{Server, TracingSink};
use telemetry_relay::RelayClient;

#[derive(Parser)]
#[command(name = "telemetry-relay")]
#[command(about = "TLS line server and pub/sub-to-upstream telemetry relay", long_about = None)]
struct Cli {
    /// TOML configuration file. Defaults apply when omitted.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand)]
enum Mode {
    /// Accept TLS connections and log newline-delimited messages
    Server {
        /// Listen address, overrides server.bind_address
        #[arg(long)]
        bind: Option<String>,
        /// Worker count, overrides server.worker_pool_size
        #[arg(long)]
        workers: Option<usize>,
    },
    /// Relay feed messages to the TLS upstream
    Client {
        /// Upstream address, overrides client.upstream_address
        #[arg(long)]
        upstream: Option<String>,
        /// Feed endpoint, overrides client.subscribe_endpoint
        #[arg(long)]
        endpoint: Option<String>,
    },
}

impl Mode {
    fn apply(&self, config: &mut RelayConfig) {
        match self {
            Mode::Server { bind, workers } => {
                if let Some(bind) = bind {
                    config.server.bind_address = bind.clone();
                }
                if let Some(workers) = workers {
                    config.server.worker_pool_size = *workers;
                }
            }
            Mode::Client { upstream, endpoint } => {
                if let Some(upstream) = upstream {
                    config.client.upstream_address = upstream.clone();
                }
                if let Some(endpoint) = endpoint {
                    config.client.subscribe_endpoint = endpoint.clone();
                }
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Missing or unknown mode: clap prints usage and exits with status 2.
    let cli = Cli::parse();

    let mut config = config::load_or_default(cli.config.as_deref())?;
    cli.mode.apply(&mut config);
    config::validate_config(&config).map_err(ConfigError::Validation)?;

    logging::init(&config.observability);
    tracing::info!("telemetry-relay v{} starting", env!("CARGO_PKG_VERSION"));

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => {
                if let Err(e) = metrics::init_metrics(addr) {
                    tracing::error!(error = %e, "Failed to start metrics endpoint");
                }
            }
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    let shutdown = Shutdown::new();
    let result = match cli.mode {
        Mode::Server { .. } => run_server(config, &shutdown).await,
        Mode::Client { .. } => run_client(config, &shutdown).await,
    };

    if let Err(e) = &result {
        tracing::error!(error = %e, "Fatal error");
    }
    result?;
    tracing::info!("Shutdown complete");
    Ok(())
}

async fn run_server(
    config: RelayConfig,
    shutdown: &Shutdown,
) -> Result<(), Box<dyn std::error::Error>> {
    let identity = match &config.server.tls {
        Some(files) => PemFileProvider::new(&files.cert_path, &files.key_path).generate()?,
        None => SelfSignedProvider.generate()?,
    };

    let listener = Listener::bind(&config.server.bind_address).await?;
    let server = Server::new(config.server, identity, Arc::new(TracingSink))?;

    let server_task = tokio::spawn(server.run(listener, shutdown.subscribe()));
    signals::trigger_on_signal(shutdown).await;
    server_task.await?;
    Ok(())
}

async fn run_client(
    config: RelayConfig,
    shutdown: &Shutdown,
) -> Result<(), Box<dyn std::error::Error>> {
    let client = RelayClient::new(config.client)?;

    let mut client_task = tokio::spawn(client.run(shutdown.subscribe()));
    tokio::select! {
        finished = &mut client_task => {
            // Only returns early when the feed subscription could not be set up.
            finished??;
        }
        _ = signals::trigger_on_signal(shutdown) => {
            client_task.await??;
        }
    }
    Ok(())
}
