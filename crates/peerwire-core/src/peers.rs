//! Alias registry mapping overlay public keys to small wire integers.
//!
//! Clients never see full public keys on the control channel; they address
//! peers by the aliases this registry hands out. Assignment is lazy: the
//! first lookup of a key allocates the next free alias, later lookups return
//! the same value. One registry instance is shared by every relay in the
//! daemon, so all lookups go through a `RwLock`.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::identity::PublicKey;

/// Aliases start at 1; 0 is reserved as "never assigned" on the wire.
const FIRST_ALIAS: u32 = 1;

/// Thread-safe bidirectional alias table.
pub struct PeerRegistry {
    inner: RwLock<Table>,
}

struct Table {
    by_alias: HashMap<u32, PublicKey>,
    by_key: HashMap<PublicKey, u32>,
    next_alias: u32,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Table {
                by_alias: HashMap::new(),
                by_key: HashMap::new(),
                next_alias: FIRST_ALIAS,
            }),
        }
    }

    /// Alias for `key`, allocating one on first sight.
    pub fn alias(&self, key: &PublicKey) -> u32 {
        if let Some(alias) = self.read().by_key.get(key) {
            return *alias;
        }
        let mut table = self.write();
        // Another relay may have allocated between the two locks.
        if let Some(alias) = table.by_key.get(key) {
            return *alias;
        }
        let alias = table.next_alias;
        table.next_alias += 1;
        table.by_key.insert(*key, alias);
        table.by_alias.insert(alias, *key);
        alias
    }

    /// Reverse lookup. `None` when the alias was never assigned or the peer
    /// has been forgotten.
    pub fn key(&self, alias: u32) -> Option<PublicKey> {
        self.read().by_alias.get(&alias).copied()
    }

    /// Drop both directions of the mapping for a departed peer.
    ///
    /// The alias is retired, not recycled: a key seen again later gets a
    /// fresh alias, so stale wire references can never reach a new peer.
    pub fn forget(&self, key: &PublicKey) -> Option<u32> {
        let mut table = self.write();
        let alias = table.by_key.remove(key)?;
        table.by_alias.remove(&alias);
        Some(alias)
    }

    /// Number of known peers.
    pub fn len(&self) -> usize {
        self.read().by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> RwLockReadGuard<'_, Table> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Table> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for PeerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alias_is_lazy_and_stable() {
        let registry = PeerRegistry::new();
        let key = PublicKey::random();

        let alias = registry.alias(&key);
        assert_eq!(alias, 1);
        assert_eq!(registry.alias(&key), alias);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn distinct_keys_get_distinct_aliases() {
        let registry = PeerRegistry::new();
        let a = registry.alias(&PublicKey::random());
        let b = registry.alias(&PublicKey::random());
        assert_ne!(a, b);
    }

    #[test]
    fn reverse_lookup_round_trips() {
        let registry = PeerRegistry::new();
        let key = PublicKey::random();
        let alias = registry.alias(&key);

        assert_eq!(registry.key(alias), Some(key));
        assert_eq!(registry.key(alias + 1), None);
    }

    #[test]
    fn zero_is_never_assigned() {
        let registry = PeerRegistry::new();
        registry.alias(&PublicKey::random());
        assert_eq!(registry.key(0), None);
    }

    #[test]
    fn forget_retires_the_alias() {
        let registry = PeerRegistry::new();
        let key = PublicKey::random();
        let alias = registry.alias(&key);

        assert_eq!(registry.forget(&key), Some(alias));
        assert_eq!(registry.key(alias), None);
        assert!(registry.is_empty());
        // Re-registering allocates a fresh alias, never the retired one.
        assert_ne!(registry.alias(&key), alias);
    }

    #[test]
    fn forget_unknown_key_is_none() {
        let registry = PeerRegistry::new();
        assert_eq!(registry.forget(&PublicKey::random()), None);
    }
}
