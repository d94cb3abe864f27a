//! Rendezvous Relay Server
//!
//! WebSocket relay for room membership and handshake forwarding.
//!
//! # Usage
//!
//! ```bash
//! rendezvous-relay --port 8080
//!
//! # With a config file and a smaller room size
//! rendezvous-relay --config /etc/rendezvous/config.toml --max-members 4
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use rendezvous_core::Config;
use rendezvous_relay::RelayServer;

#[derive(Parser, Debug)]
#[command(name = "rendezvous-relay")]
#[command(about = "Rendezvous relay for browser peer-to-peer sessions")]
#[command(version)]
struct Args {
    /// Port to listen on
    #[arg(short, long, env = "PORT")]
    port: Option<u16>,

    /// Bind address
    #[arg(short, long)]
    bind: Option<String>,

    /// Configuration file (defaults to the platform config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Maximum members per room
    #[arg(long)]
    max_members: Option<usize>,

    /// Liveness probe interval in seconds
    #[arg(long)]
    heartbeat_secs: Option<u64>,

    /// Seconds an empty room is kept before it may be reaped
    #[arg(long)]
    retention_secs: Option<u64>,

    /// Print the default configuration as TOML and exit
    #[arg(long)]
    print_config: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(Level::INFO.into())
                .from_env_lossy(),
        )
        .init();

    let args = Args::parse();

    if args.print_config {
        print!("{}", Config::sample());
        return Ok(());
    }

    let mut config = match &args.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load(),
    }
    .relay;

    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(bind) = &args.bind {
        config.bind = bind.parse()?;
    }
    if let Some(max_members) = args.max_members {
        config.max_members_per_room = max_members;
    }
    if let Some(secs) = args.heartbeat_secs {
        config.heartbeat_interval_secs = secs;
    }
    if let Some(secs) = args.retention_secs {
        config.room_retention_secs = secs;
    }

    let addr = SocketAddr::new(config.bind, config.port);

    info!("Starting Rendezvous relay");
    info!("  WebSocket endpoint: ws://{}", addr);
    info!("  Health check: http://{}/health", addr);
    info!(
        "  Rooms: {} members max, empty rooms kept {}s",
        config.max_members_per_room, config.room_retention_secs
    );

    let listener = TcpListener::bind(addr).await?;
    let server = RelayServer::new(config);
    server.serve_with_shutdown(listener, shutdown_signal()).await?;

    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Ctrl+C received, shutting down..."),
        _ = terminate => info!("SIGTERM received, shutting down..."),
    }
}
