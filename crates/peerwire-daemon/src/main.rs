//! PeerWire Daemon
//!
//! Accepts client control channels and relays their topic traffic onto the
//! overlay mesh.

use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use peerwire_core::{MemoryMesh, PeerRegistry, PublicKey};
use peerwire_daemon::connection::ConnectionLimits;
use peerwire_daemon::relay::RelayManager;
use peerwire_daemon::server;

#[derive(Parser, Debug)]
#[command(name = "peerwire-daemon")]
#[command(version, about = "PeerWire daemon - topic relay for peer socket clients")]
struct Args {
    /// Address to listen on.
    #[arg(long, default_value = "127.0.0.1:7350")]
    addr: SocketAddr,

    /// Overlay identity as 64 hex characters. Random when omitted.
    #[arg(long, env = "PEERWIRE_KEY")]
    key: Option<String>,

    /// Outbound frame queue depth per connection.
    #[arg(long, default_value_t = 128)]
    send_queue: usize,

    /// Maximum wire frame size in bytes.
    #[arg(long, default_value_t = 1024 * 1024)]
    max_frame: usize,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let env_filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "peerwire=info".into()),
    );
    if args.log_json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    let key = match &args.key {
        Some(hex) => PublicKey::from_hex(hex)?,
        None => PublicKey::random(),
    };

    info!(
        version = env!("CARGO_PKG_VERSION"),
        addr = %args.addr,
        key = %key.fingerprint(),
        "Starting peerwire-daemon"
    );

    let mesh = MemoryMesh::new();
    let endpoint = mesh.endpoint(key);
    let peers = Arc::new(PeerRegistry::new());
    let manager = Arc::new(RelayManager::new(Arc::new(endpoint), peers));
    let limits = ConnectionLimits {
        max_frame: args.max_frame,
        send_queue: args.send_queue,
    };

    let listener = TcpListener::bind(args.addr).await?;

    tokio::select! {
        result = server::serve(listener, manager, limits) => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
    }

    info!("Daemon stopped");
    Ok(())
}
