//! Topic mesh seam.
//!
//! The relay drives the pub/sub engine exclusively through [`Mesh`] and
//! [`TopicSession`]; how messages actually travel between overlay nodes is
//! the engine's business. [`MemoryMesh`] is the in-process implementation
//! the daemon ships with; networked engines plug in behind the same traits.

mod memory;

pub use memory::{MemoryMesh, MeshEndpoint};

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::identity::PublicKey;

/// Delivery callback registered at join time. Invoked by the engine with the
/// sending peer's key and the raw payload, once per message delivered to
/// this membership. Must not block.
pub type MessageHandler = Arc<dyn Fn(PublicKey, Vec<u8>) + Send + Sync>;

#[derive(Debug, Error)]
pub enum MeshError {
    #[error("no member with key {0} on topic {1:?}")]
    NoRoute(PublicKey, String),

    #[error("membership already released")]
    SessionClosed,

    #[error("topic name must not be empty")]
    EmptyTopic,

    /// Engine-internal failure surfaced through the seam.
    #[error("engine failure: {0}")]
    Engine(String),
}

/// Entry point into the pub/sub engine, one value per overlay identity.
///
/// Safe to share across relays; `join` may be called concurrently.
#[async_trait]
pub trait Mesh: Send + Sync {
    /// Join `topic`, registering `on_message` for inbound deliveries.
    ///
    /// Every call creates one membership; the same identity may hold several
    /// concurrent memberships in the same topic (one per client connection).
    async fn join(
        &self,
        topic: &str,
        on_message: MessageHandler,
    ) -> Result<Arc<dyn TopicSession>, MeshError>;
}

/// One topic membership, engine-managed.
///
/// The engine may serve many sessions for the same topic; dropping or
/// leaving one releases only that membership.
#[async_trait]
pub trait TopicSession: Send + Sync + std::fmt::Debug {
    /// Send `payload` to the topic member(s) identified by `to`.
    async fn send(&self, to: &PublicKey, payload: Vec<u8>) -> Result<(), MeshError>;

    /// Release this membership. Idempotent; later `send`s fail.
    async fn leave(&self) -> Result<(), MeshError>;
}
