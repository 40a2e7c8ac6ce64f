//! Per-connection topic relay state machine.
//!
//! Translates between control-channel frames and the topic mesh: OPEN joins
//! a topic, DATA frames are forwarded out to the peer behind the alias, and
//! mesh deliveries come back as DATA frames with the sender's alias.
//!
//! Inbound frames arrive strictly sequentially from the connection's read
//! task. Mesh deliveries and `close` run concurrently with that, so every
//! state transition and every outbound enqueue goes through `state`'s mutex:
//! once `close` has flipped the state to `Closed`, no delivery can reach the
//! wire, even one already in flight.

use std::mem;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info, warn};

use peerwire_core::{Mesh, MessageHandler, PeerRegistry, PublicKey, TopicSession};
use peerwire_proto::peer_message::Payload;
use peerwire_proto::{Data, Open, PeerMessage};

use crate::connection::FrameWriter;

/// Joined is reachable from Idle at most once; Closed is terminal and safe
/// to re-enter.
enum RelayState {
    Idle,
    Joined {
        topic: String,
        session: Arc<dyn TopicSession>,
    },
    Closed,
}

/// Relay for a single client connection.
pub struct TopicRelay {
    mesh: Arc<dyn Mesh>,
    peers: Arc<PeerRegistry>,
    writer: FrameWriter,
    peer_addr: SocketAddr,
    state: Arc<Mutex<RelayState>>,
}

impl TopicRelay {
    pub(crate) fn new(
        mesh: Arc<dyn Mesh>,
        peers: Arc<PeerRegistry>,
        writer: FrameWriter,
        peer_addr: SocketAddr,
    ) -> Self {
        Self {
            mesh,
            peers,
            writer,
            peer_addr,
            state: Arc::new(Mutex::new(RelayState::Idle)),
        }
    }

    /// Handle one inbound frame. Called sequentially per connection.
    pub async fn handle_frame(&self, frame: PeerMessage) {
        match frame.payload {
            Some(Payload::Open(open)) => self.handle_open(open).await,
            Some(Payload::Data(data)) => self.handle_data(data).await,
            None => {
                warn!(peer = %self.peer_addr, "frame with unknown kind, ignoring");
            }
        }
    }

    async fn handle_open(&self, open: Open) {
        {
            let state = lock(&self.state);
            match &*state {
                RelayState::Idle => {}
                RelayState::Joined { topic, .. } => {
                    warn!(
                        peer = %self.peer_addr,
                        joined = %topic,
                        requested = %open.topic,
                        "duplicate OPEN, keeping existing topic"
                    );
                    return;
                }
                RelayState::Closed => {
                    debug!(peer = %self.peer_addr, topic = %open.topic, "OPEN after close, dropping");
                    return;
                }
            }
        }

        let session = match self.mesh.join(&open.topic, self.delivery_handler()).await {
            Ok(session) => session,
            Err(e) => {
                // Stay Idle: later DATA frames are dropped, a later OPEN may
                // retry the join.
                warn!(peer = %self.peer_addr, topic = %open.topic, error = %e, "topic join failed");
                return;
            }
        };

        let unclaimed = {
            let mut state = lock(&self.state);
            if matches!(*state, RelayState::Idle) {
                info!(peer = %self.peer_addr, topic = %open.topic, "topic joined");
                *state = RelayState::Joined {
                    topic: open.topic,
                    session,
                };
                None
            } else {
                // Close won the race while the join was in flight; release
                // the fresh membership right away.
                Some(session)
            }
        };
        if let Some(session) = unclaimed {
            debug!(peer = %self.peer_addr, "closed during join, releasing fresh session");
            if let Err(e) = session.leave().await {
                warn!(peer = %self.peer_addr, error = %e, "failed to release unclaimed session");
            }
        }
    }

    async fn handle_data(&self, data: Data) {
        let session = {
            let state = lock(&self.state);
            match &*state {
                RelayState::Joined { session, .. } => Arc::clone(session),
                RelayState::Idle => {
                    debug!(peer = %self.peer_addr, alias = data.alias, "DATA before OPEN, dropping");
                    return;
                }
                RelayState::Closed => {
                    debug!(peer = %self.peer_addr, alias = data.alias, "DATA after close, dropping");
                    return;
                }
            }
        };

        let Some(key) = self.peers.key(data.alias) else {
            // Best effort: the protocol has no way to report an unknown
            // alias back to the sender.
            debug!(peer = %self.peer_addr, alias = data.alias, "unknown alias, dropping");
            return;
        };

        if let Err(e) = session.send(&key, data.payload).await {
            debug!(peer = %self.peer_addr, key = %key.fingerprint(), error = %e, "mesh send failed");
        }
    }

    /// Delivery callback handed to the mesh at join time.
    ///
    /// Captures the shared state handle rather than the relay itself, so the
    /// mesh holding the handler past `close` keeps nothing else alive.
    fn delivery_handler(&self) -> MessageHandler {
        let peers = Arc::clone(&self.peers);
        let writer = self.writer.clone();
        let state = Arc::clone(&self.state);
        let peer_addr = self.peer_addr;
        Arc::new(move |from: PublicKey, payload: Vec<u8>| {
            let alias = peers.alias(&from);
            let frame = PeerMessage::data(alias, payload);
            // Enqueue under the state lock: a delivery racing with close
            // either lands before the Closed flip or not at all.
            let guard = lock(&state);
            if matches!(*guard, RelayState::Closed) {
                debug!(peer = %peer_addr, alias, "delivery after close, dropping");
                return;
            }
            if let Err(e) = writer.write(frame) {
                debug!(peer = %peer_addr, alias, error = %e, "dropping delivery");
            }
        })
    }

    /// Tear the relay down. Idempotent; safe against concurrent frames and
    /// deliveries. The membership is released at most once.
    pub async fn close(&self) {
        let previous = {
            let mut state = lock(&self.state);
            mem::replace(&mut *state, RelayState::Closed)
        };
        match previous {
            RelayState::Closed | RelayState::Idle => {}
            RelayState::Joined { topic, session } => {
                info!(peer = %self.peer_addr, topic = %topic, "leaving topic");
                if let Err(e) = session.leave().await {
                    // Close always completes; a failed leave only loses the
                    // membership bookkeeping on the engine side.
                    warn!(peer = %self.peer_addr, topic = %topic, error = %e, "topic leave failed");
                }
            }
        }
    }
}

fn lock(state: &Mutex<RelayState>) -> MutexGuard<'_, RelayState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}
