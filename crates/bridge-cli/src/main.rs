//! Bridge CLI - issue one call or health probe through a backend bridge.
//!
//! Useful for poking a running backend by hand with the same transport
//! selection, batching and failover the front-end uses.

use anyhow::{Context, Result};
use backend_bridge::{Bridge, BridgeConfig, ReconnectBackoff};
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::time::Duration;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "bridge")]
#[command(about = "Send requests to a backend through the request bridge")]
struct Args {
    /// Backend socket endpoint
    #[arg(long, default_value = "127.0.0.1:8765")]
    socket: SocketAddr,

    /// Base URL of the backend's HTTP endpoints
    #[arg(long, default_value = "http://127.0.0.1:8766")]
    http: String,

    /// Never use the socket transport
    #[arg(long)]
    no_socket: bool,

    /// Batch window in milliseconds
    #[arg(long, default_value = "10")]
    batch_window_ms: u64,

    /// Per-request timeout in seconds
    #[arg(long, default_value = "30")]
    timeout_secs: u64,

    /// Minimum reconnect backoff in milliseconds
    #[arg(long, default_value = "1000")]
    min_backoff_ms: u64,

    /// Maximum reconnect backoff in milliseconds
    #[arg(long, default_value = "30000")]
    max_backoff_ms: u64,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Call an endpoint and print the result
    Request {
        /// Logical endpoint name, e.g. `models/list`
        endpoint: String,

        /// JSON payload
        #[arg(default_value = "{}")]
        data: String,

        /// How long to wait for the socket before falling back (milliseconds)
        #[arg(long, default_value = "500")]
        connect_wait_ms: u64,
    },
    /// Probe backend health; exits non-zero when unhealthy
    Health,
}

impl Args {
    fn bridge_config(&self) -> BridgeConfig {
        BridgeConfig::new(self.socket, self.http.clone())
            .with_primary_enabled(!self.no_socket)
            .with_batch_window(Duration::from_millis(self.batch_window_ms))
            .with_request_timeout(Duration::from_secs(self.timeout_secs))
            .with_backoff(
                ReconnectBackoff::new()
                    .with_min(Duration::from_millis(self.min_backoff_ms))
                    .with_max(Duration::from_millis(self.max_backoff_ms)),
            )
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging
    let log_level = if args.debug { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    let config = args.bridge_config();
    let primary_enabled = config.primary_enabled;
    let bridge = Bridge::start(config).context("Failed to start bridge")?;

    let outcome = match &args.command {
        Command::Request {
            endpoint,
            data,
            connect_wait_ms,
        } => {
            let payload: serde_json::Value =
                serde_json::from_str(data).context("Payload is not valid JSON")?;

            if primary_enabled {
                wait_for_socket(&bridge, Duration::from_millis(*connect_wait_ms)).await;
            }

            match bridge.request(endpoint.as_str(), payload).await {
                Ok(value) => {
                    // Result goes to stdout so it can be piped
                    println!("{}", serde_json::to_string_pretty(&value)?);
                    Ok(())
                }
                Err(e) => Err(anyhow::Error::new(e).context(format!("Request to {} failed", endpoint))),
            }
        }
        Command::Health => {
            if bridge.check_health().await {
                println!("healthy");
                Ok(())
            } else {
                println!("unhealthy");
                Err(anyhow::anyhow!("Backend at {} is not healthy", args.http))
            }
        }
    };

    info!("{}", bridge.stats());
    bridge.shutdown().await;
    outcome
}

async fn wait_for_socket(bridge: &Bridge, wait: Duration) {
    let mut connection = bridge.watch_connection();
    let connected = tokio::time::timeout(wait, connection.wait_for(|s| s.is_connected())).await;
    if !matches!(connected, Ok(Ok(_))) {
        warn!("Socket not connected after {:?}, request will use HTTP fallback", wait);
    }
}
