//! Connection manager: binds accepted connections to relays.

use std::sync::Arc;

use futures::StreamExt;
use prost::Message as _;
use tracing::{debug, info, warn};

use peerwire_core::{Mesh, PeerRegistry};
use peerwire_proto::PeerMessage;

use crate::connection::Connection;
use crate::relay::TopicRelay;

/// Stateless factory: one [`TopicRelay`] per accepted connection, all
/// sharing the mesh endpoint and the alias registry.
pub struct RelayManager {
    mesh: Arc<dyn Mesh>,
    peers: Arc<PeerRegistry>,
}

impl RelayManager {
    pub fn new(mesh: Arc<dyn Mesh>, peers: Arc<PeerRegistry>) -> Self {
        Self { mesh, peers }
    }

    /// Bind `connection` to a fresh relay and start serving its frames.
    ///
    /// The spawned read task hands frames to the relay one at a time, in
    /// arrival order. Whatever ends the inbound stream — clean EOF or a
    /// transport error — the task's single exit path runs `close` exactly
    /// once.
    pub fn join(&self, connection: Connection) -> Arc<TopicRelay> {
        let relay = Arc::new(TopicRelay::new(
            Arc::clone(&self.mesh),
            Arc::clone(&self.peers),
            connection.writer(),
            connection.peer_addr,
        ));

        let serving = Arc::clone(&relay);
        let peer_addr = connection.peer_addr;
        let mut inbound = connection.inbound;
        tokio::spawn(async move {
            while let Some(next) = inbound.next().await {
                match next {
                    Ok(wire) => match PeerMessage::decode(wire.freeze()) {
                        Ok(frame) => serving.handle_frame(frame).await,
                        Err(e) => {
                            // Framing is intact, the frame body is not: a
                            // protocol violation, not a transport failure.
                            warn!(peer = %peer_addr, error = %e, "undecodable frame, dropping");
                        }
                    },
                    Err(e) => {
                        debug!(peer = %peer_addr, error = %e, "connection error");
                        break;
                    }
                }
            }
            serving.close().await;
            info!(peer = %peer_addr, "connection closed");
        });

        relay
    }
}
