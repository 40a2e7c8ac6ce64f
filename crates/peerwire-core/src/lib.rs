//! PeerWire Core Library
//!
//! Shared building blocks for the PeerWire daemon:
//! - overlay peer identity ([`PublicKey`])
//! - the alias registry translating keys to connection-scope integers
//! - the topic mesh seam ([`Mesh`] / [`TopicSession`]) and the in-process
//!   [`MemoryMesh`] engine behind it

pub mod identity;
pub mod mesh;
pub mod peers;

pub use identity::{IdentityError, PublicKey};
pub use mesh::{MemoryMesh, Mesh, MeshEndpoint, MeshError, MessageHandler, TopicSession};
pub use peers::PeerRegistry;
