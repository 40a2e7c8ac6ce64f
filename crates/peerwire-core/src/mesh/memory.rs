//! In-process topic mesh.
//!
//! A single [`MemoryMesh`] hub holds every topic; [`MeshEndpoint`]s created
//! from it act as independent overlay identities sharing that hub. Delivery
//! is synchronous handler invocation, which keeps the engine deterministic
//! for tests and good enough for a single-node deployment.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use tracing::debug;

use crate::identity::PublicKey;
use crate::mesh::{Mesh, MeshError, MessageHandler, TopicSession};

/// Hub owning all topic state. Cheap to clone (shared `Arc`).
#[derive(Clone)]
pub struct MemoryMesh {
    hub: Arc<Hub>,
}

struct Hub {
    topics: RwLock<HashMap<String, Topic>>,
    next_member: AtomicU64,
}

#[derive(Default)]
struct Topic {
    members: HashMap<u64, Member>,
}

struct Member {
    key: PublicKey,
    handler: MessageHandler,
}

impl MemoryMesh {
    pub fn new() -> Self {
        Self {
            hub: Arc::new(Hub {
                topics: RwLock::new(HashMap::new()),
                next_member: AtomicU64::new(1),
            }),
        }
    }

    /// An engine handle acting as overlay identity `key` on this hub.
    pub fn endpoint(&self, key: PublicKey) -> MeshEndpoint {
        MeshEndpoint {
            hub: Arc::clone(&self.hub),
            key,
        }
    }

    /// Current membership count of `topic`. Zero once every session left.
    pub fn member_count(&self, topic: &str) -> usize {
        self.hub
            .read()
            .get(topic)
            .map_or(0, |t| t.members.len())
    }
}

impl Default for MemoryMesh {
    fn default() -> Self {
        Self::new()
    }
}

impl Hub {
    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Topic>> {
        self.topics.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Topic>> {
        self.topics.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Remove one membership; drops the topic when it was the last.
    fn remove_member(&self, topic: &str, member_id: u64) {
        let mut topics = self.write();
        if let Some(state) = topics.get_mut(topic) {
            state.members.remove(&member_id);
            if state.members.is_empty() {
                topics.remove(topic);
            }
        }
    }
}

/// One overlay identity's view of the hub.
#[derive(Clone)]
pub struct MeshEndpoint {
    hub: Arc<Hub>,
    key: PublicKey,
}

impl MeshEndpoint {
    pub const fn key(&self) -> &PublicKey {
        &self.key
    }
}

#[async_trait]
impl Mesh for MeshEndpoint {
    async fn join(
        &self,
        topic: &str,
        on_message: MessageHandler,
    ) -> Result<Arc<dyn TopicSession>, MeshError> {
        if topic.is_empty() {
            return Err(MeshError::EmptyTopic);
        }
        let member_id = self.hub.next_member.fetch_add(1, Ordering::Relaxed);
        self.hub
            .write()
            .entry(topic.to_string())
            .or_default()
            .members
            .insert(
                member_id,
                Member {
                    key: self.key,
                    handler: on_message,
                },
            );
        debug!(topic, member_id, key = %self.key.fingerprint(), "membership added");
        Ok(Arc::new(MemorySession {
            hub: Arc::clone(&self.hub),
            topic: topic.to_string(),
            member_id,
            key: self.key,
            left: AtomicBool::new(false),
        }))
    }
}

struct MemorySession {
    hub: Arc<Hub>,
    topic: String,
    member_id: u64,
    key: PublicKey,
    left: AtomicBool,
}

impl std::fmt::Debug for MemorySession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemorySession")
            .field("topic", &self.topic)
            .field("member_id", &self.member_id)
            .field("left", &self.left)
            .finish()
    }
}

#[async_trait]
impl TopicSession for MemorySession {
    async fn send(&self, to: &PublicKey, payload: Vec<u8>) -> Result<(), MeshError> {
        if self.left.load(Ordering::Acquire) {
            return Err(MeshError::SessionClosed);
        }
        // Snapshot matching handlers so none run under the topic lock.
        let handlers: Vec<MessageHandler> = {
            let topics = self.hub.read();
            let Some(state) = topics.get(&self.topic) else {
                return Err(MeshError::NoRoute(*to, self.topic.clone()));
            };
            state
                .members
                .iter()
                .filter(|(id, member)| **id != self.member_id && member.key == *to)
                .map(|(_, member)| Arc::clone(&member.handler))
                .collect()
        };
        if handlers.is_empty() {
            return Err(MeshError::NoRoute(*to, self.topic.clone()));
        }
        for handler in handlers {
            handler(self.key, payload.clone());
        }
        Ok(())
    }

    async fn leave(&self) -> Result<(), MeshError> {
        self.release();
        Ok(())
    }
}

impl MemorySession {
    fn release(&self) {
        if self.left.swap(true, Ordering::AcqRel) {
            return;
        }
        self.hub.remove_member(&self.topic, self.member_id);
        debug!(topic = %self.topic, member_id = self.member_id, "membership released");
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    fn collector() -> (MessageHandler, Arc<Mutex<Vec<(PublicKey, Vec<u8>)>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let handler: MessageHandler = Arc::new(move |from, payload| {
            sink.lock().unwrap().push((from, payload));
        });
        (handler, seen)
    }

    #[tokio::test]
    async fn send_routes_by_key() {
        let mesh = MemoryMesh::new();
        let (ka, kb) = (PublicKey::random(), PublicKey::random());
        let (handler_a, seen_a) = collector();
        let (handler_b, seen_b) = collector();

        let a = mesh.endpoint(ka).join("room", handler_a).await.unwrap();
        let _b = mesh.endpoint(kb).join("room", handler_b).await.unwrap();

        a.send(&kb, b"hello".to_vec()).await.unwrap();

        let seen = seen_b.lock().unwrap();
        assert_eq!(seen.as_slice(), &[(ka, b"hello".to_vec())]);
        assert!(seen_a.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn sender_membership_is_excluded() {
        // Two memberships under the same key: a message addressed to that
        // key reaches the other membership but never echoes to the sender.
        let mesh = MemoryMesh::new();
        let key = PublicKey::random();
        let endpoint = mesh.endpoint(key);
        let (handler_a, seen_a) = collector();
        let (handler_b, seen_b) = collector();

        let a = endpoint.join("room", handler_a).await.unwrap();
        let _b = endpoint.join("room", handler_b).await.unwrap();

        a.send(&key, b"x".to_vec()).await.unwrap();

        assert!(seen_a.lock().unwrap().is_empty());
        assert_eq!(seen_b.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn send_to_absent_key_is_no_route() {
        let mesh = MemoryMesh::new();
        let (handler, _) = collector();
        let session = mesh
            .endpoint(PublicKey::random())
            .join("room", handler)
            .await
            .unwrap();

        let err = session
            .send(&PublicKey::random(), b"x".to_vec())
            .await
            .unwrap_err();
        assert!(matches!(err, MeshError::NoRoute(_, _)));
    }

    #[tokio::test]
    async fn empty_topic_is_rejected() {
        let mesh = MemoryMesh::new();
        let (handler, _) = collector();
        let err = mesh
            .endpoint(PublicKey::random())
            .join("", handler)
            .await
            .unwrap_err();
        assert!(matches!(err, MeshError::EmptyTopic));
    }

    #[tokio::test]
    async fn leave_releases_only_this_membership() {
        let mesh = MemoryMesh::new();
        let (handler_a, _) = collector();
        let (handler_b, _) = collector();
        let a = mesh
            .endpoint(PublicKey::random())
            .join("room", handler_a)
            .await
            .unwrap();
        let _b = mesh
            .endpoint(PublicKey::random())
            .join("room", handler_b)
            .await
            .unwrap();
        assert_eq!(mesh.member_count("room"), 2);

        a.leave().await.unwrap();
        assert_eq!(mesh.member_count("room"), 1);

        // Idempotent.
        a.leave().await.unwrap();
        assert_eq!(mesh.member_count("room"), 1);
    }

    #[tokio::test]
    async fn no_delivery_after_leave() {
        let mesh = MemoryMesh::new();
        let (ka, kb) = (PublicKey::random(), PublicKey::random());
        let (handler_a, _) = collector();
        let (handler_b, seen_b) = collector();
        let a = mesh.endpoint(ka).join("room", handler_a).await.unwrap();
        let b = mesh.endpoint(kb).join("room", handler_b).await.unwrap();

        b.leave().await.unwrap();
        let err = a.send(&kb, b"late".to_vec()).await.unwrap_err();
        assert!(matches!(err, MeshError::NoRoute(_, _)));
        assert!(seen_b.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn send_after_own_leave_fails() {
        let mesh = MemoryMesh::new();
        let (handler, _) = collector();
        let session = mesh
            .endpoint(PublicKey::random())
            .join("room", handler)
            .await
            .unwrap();
        session.leave().await.unwrap();

        let err = session
            .send(&PublicKey::random(), b"x".to_vec())
            .await
            .unwrap_err();
        assert!(matches!(err, MeshError::SessionClosed));
    }

    #[tokio::test]
    async fn empty_topics_are_dropped_from_the_hub() {
        let mesh = MemoryMesh::new();
        let (handler, _) = collector();
        let session = mesh
            .endpoint(PublicKey::random())
            .join("room", handler)
            .await
            .unwrap();
        session.leave().await.unwrap();
        assert_eq!(mesh.member_count("room"), 0);
    }

    #[tokio::test]
    async fn dropping_the_session_releases_membership() {
        let mesh = MemoryMesh::new();
        let (handler, _) = collector();
        let session = mesh
            .endpoint(PublicKey::random())
            .join("room", handler)
            .await
            .unwrap();
        assert_eq!(mesh.member_count("room"), 1);
        drop(session);
        assert_eq!(mesh.member_count("room"), 0);
    }
}
