//! TCP accept loop for client control channels.

use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;

use crate::connection::{Connection, ConnectionLimits};
use crate::relay::RelayManager;

/// Accept connections forever, handing each to the manager.
///
/// Returns only on listener failure; per-connection errors are handled by
/// the relay's own teardown path.
pub async fn serve(
    listener: TcpListener,
    manager: Arc<RelayManager>,
    limits: ConnectionLimits,
) -> std::io::Result<()> {
    loop {
        let (stream, peer_addr) = listener.accept().await?;
        // Control frames are small and latency-sensitive.
        let _ = stream.set_nodelay(true);
        info!(peer = %peer_addr, "client connected");
        manager.join(Connection::spawn(stream, peer_addr, limits));
    }
}
