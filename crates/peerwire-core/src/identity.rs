//! Overlay peer identity.
//!
//! A peer is identified by its 32-byte public key. PeerWire does not verify
//! signatures itself; the key is an opaque stable identifier handed to the
//! topic engine and the alias registry.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Length of an overlay public key in bytes.
pub const KEY_LEN: usize = 32;

/// Stable public identifier of a peer on the overlay.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PublicKey([u8; KEY_LEN]);

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("public key must be {KEY_LEN} bytes, got {0}")]
    BadLength(usize),

    #[error("invalid hex: {0}")]
    BadHex(#[from] hex::FromHexError),
}

impl PublicKey {
    pub const fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Fresh random key, for daemons started without a configured identity
    /// and for tests.
    pub fn random() -> Self {
        Self(rand::random())
    }

    pub const fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }

    /// Parse from 64 hex characters.
    pub fn from_hex(s: &str) -> Result<Self, IdentityError> {
        let raw = hex::decode(s)?;
        let bytes: [u8; KEY_LEN] = raw
            .try_into()
            .map_err(|raw: Vec<u8>| IdentityError::BadLength(raw.len()))?;
        Ok(Self(bytes))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Short prefix for log lines; never use for equality.
    pub fn fingerprint(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({}..)", self.fingerprint())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_round_trip() {
        let key = PublicKey::from_bytes([0xab; KEY_LEN]);
        let parsed = PublicKey::from_hex(&key.to_hex()).unwrap();
        assert_eq!(parsed, key);
    }

    #[test]
    fn rejects_wrong_length() {
        let err = PublicKey::from_hex("abcd").unwrap_err();
        assert!(matches!(err, IdentityError::BadLength(2)));
    }

    #[test]
    fn rejects_non_hex() {
        assert!(PublicKey::from_hex("zz").is_err());
    }

    #[test]
    fn fingerprint_is_key_prefix() {
        let key = PublicKey::from_bytes([0x12; KEY_LEN]);
        assert_eq!(key.fingerprint(), "12121212");
        assert!(key.to_hex().starts_with(&key.fingerprint()));
    }
}
