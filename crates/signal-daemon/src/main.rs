//! signal-daemon: LAN signaling relay.
//!
//! Groups WebSocket clients into rooms and forwards their messages to the
//! other members of the same room, so peers can find each other without
//! knowing each other's addresses.

use anyhow::Result;
use clap::Parser;
use std::net::IpAddr;
use tokio::net::UdpSocket;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use signal_daemon::RelayServer;

#[derive(Parser, Debug)]
#[command(name = "signal-daemon")]
#[command(about = "Room-scoped WebSocket signaling relay")]
struct Args {
    /// Address to listen on
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Port to listen on
    #[arg(short, long, env = "PORT", default_value_t = 4444)]
    port: u16,

    /// Enable verbose logging
    #[arg(long)]
    verbose: bool,
}

/// Address other machines on the LAN can reach us at.
///
/// Connecting a UDP socket sends nothing; it only makes the OS pick the
/// outbound interface.
async fn lan_address() -> Option<IpAddr> {
    let socket = UdpSocket::bind("0.0.0.0:0").await.ok()?;
    socket.connect("8.8.8.8:80").await.ok()?;
    let ip = socket.local_addr().ok()?.ip();
    (!ip.is_loopback() && !ip.is_unspecified()).then_some(ip)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging - respects RUST_LOG env var, defaults to info (or debug with --verbose)
    let default_filter = if args.verbose {
        "debug,signal_daemon=debug"
    } else {
        "info,signal_daemon=info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting signal-daemon");

    let listener = RelayServer::bind(&format!("{}:{}", args.host, args.port)).await?;
    match lan_address().await {
        Some(ip) => info!("Share with peers: ws://{}:{}", ip, args.port),
        None => debug!("No LAN address found; only local peers can connect"),
    }

    info!("Relay running. Press Ctrl+C to stop.");

    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    RelayServer::new().run(listener, shutdown).await?;

    info!("Shutting down");
    Ok(())
}
