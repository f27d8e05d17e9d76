//! WISP Relay Server
//!
//! Accepts WebSocket connections and multiplexes client-initiated TCP
//! and UDP streams through them, subject to the configured egress
//! policy.

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info};
use wisp_relay::carrier;
use wisp_relay::config::{Config, RelayConfig};
use wisp_relay::relay::Connection;

/// WISP Relay Server - multiplexed TCP/UDP proxying over WebSocket
#[derive(Parser, Debug)]
#[command(name = "wisp-server")]
#[command(about = "WISP relay server - multiplexed TCP/UDP proxying over WebSocket")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<String>,

    /// Listen address (overrides config)
    #[arg(short, long)]
    listen: Option<String>,

    /// Log filter (trace, debug, info, warn, error; overrides config)
    #[arg(short = 'v', long)]
    log_level: Option<String>,

    /// Print an example configuration and exit
    #[arg(long)]
    generate_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.generate_config {
        let example = toml::to_string_pretty(&Config::default())
            .context("Failed to serialize example config")?;
        print!("{}", example);
        return Ok(());
    }

    // Load configuration
    let config = match &args.config {
        Some(path) => Config::load(path).context("Failed to load configuration")?,
        None => Config::default(),
    };

    // Initialize logging
    let filter = args
        .log_level
        .clone()
        .unwrap_or_else(|| config.logging.level.clone());
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let listen = args.listen.unwrap_or_else(|| config.server.listen.clone());
    let relay_config = Arc::new(config.relay.clone());
    let carrier_no_delay = config.server.websocket_tcp_no_delay;

    info!("WISP Relay Server v{}", wisp_relay::VERSION);
    info!("Listening on {}", listen);
    if !relay_config.proxy.is_empty() {
        info!("TCP egress via SOCKS5 proxy {}", relay_config.proxy);
    }
    if !relay_config.dns_server.is_empty() {
        info!("DNS override via {}", relay_config.dns_server);
    }

    let listener = TcpListener::bind(&listen)
        .await
        .context("Failed to bind to address")?;

    // Accept connections
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer_addr)) => {
                        debug!(%peer_addr, "new carrier connection");

                        let relay_config = Arc::clone(&relay_config);
                        tokio::spawn(async move {
                            if let Err(e) =
                                handle_carrier(stream, relay_config, carrier_no_delay).await
                            {
                                debug!(%peer_addr, error = %e, "carrier ended with error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "accept failed");
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down...");
                break;
            }
        }
    }

    Ok(())
}

/// Upgrade one accepted socket to a WebSocket and run its connection to
/// completion.
async fn handle_carrier(
    stream: TcpStream,
    relay_config: Arc<RelayConfig>,
    carrier_no_delay: bool,
) -> Result<()> {
    stream.set_nodelay(carrier_no_delay)?;

    let (mut source, sink) = carrier::accept_websocket(stream)
        .await
        .context("WebSocket handshake failed")?;

    let connection = Connection::new(Box::new(sink), relay_config);
    connection.run(&mut source).await;

    Ok(())
}
