//! Persisted share state.
//!
//! The provider stores one blob under a fixed key: a map from share id
//! to the team payload (already encrypted by the crypto library) and the
//! team keyring sealed under the device key. Nothing in the blob is
//! readable without those keys.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use vouch_auth_types::ShareId;

/// Errors from encoding or decoding the persisted blob.
#[derive(Debug, Error)]
pub enum PersistError {
    /// MessagePack serialization failed.
    #[error("encoding persisted shares failed: {0}")]
    Encode(#[source] rmp_serde::encode::Error),

    /// MessagePack deserialization failed.
    #[error("decoding persisted shares failed: {0}")]
    Decode(#[source] rmp_serde::decode::Error),
}

/// One persisted share entry. Both fields are ciphertext.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedShare {
    /// The team payload as produced by the crypto library's save.
    pub encrypted_team: Vec<u8>,
    /// The team keyring, sealed under the device wrap key.
    pub encrypted_team_keys: Vec<u8>,
}

/// The complete persisted share map.
///
/// Encoded as a bare MessagePack map keyed by share id; a BTreeMap keeps
/// the encoding stable so the blob round-trips bit-identically.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PersistedShares {
    shares: BTreeMap<ShareId, PersistedShare>,
}

impl PersistedShares {
    /// Create an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a share entry.
    pub fn insert(&mut self, id: ShareId, share: PersistedShare) {
        self.shares.insert(id, share);
    }

    /// Iterate over the entries in share-id order.
    pub fn iter(&self) -> impl Iterator<Item = (&ShareId, &PersistedShare)> {
        self.shares.iter()
    }

    /// Number of persisted shares.
    pub fn len(&self) -> usize {
        self.shares.len()
    }

    /// Whether the map is empty.
    pub fn is_empty(&self) -> bool {
        self.shares.is_empty()
    }

    /// Encode to the stored MessagePack form.
    pub fn encode(&self) -> Result<Vec<u8>, PersistError> {
        rmp_serde::to_vec_named(self).map_err(PersistError::Encode)
    }

    /// Decode from the stored MessagePack form.
    pub fn decode(bytes: &[u8]) -> Result<Self, PersistError> {
        rmp_serde::from_slice(bytes).map_err(PersistError::Decode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(tag: u8) -> PersistedShare {
        PersistedShare {
            encrypted_team: vec![tag; 48],
            encrypted_team_keys: vec![tag ^ 0xFF; 72],
        }
    }

    #[test]
    fn empty_map_roundtrip() {
        let blob = PersistedShares::new();
        let bytes = blob.encode().unwrap();
        let restored = PersistedShares::decode(&bytes).unwrap();
        assert!(restored.is_empty());
    }

    #[test]
    fn roundtrip_preserves_entries() {
        let mut blob = PersistedShares::new();
        let a = ShareId::random();
        let b = ShareId::random();
        blob.insert(a, entry(1));
        blob.insert(b, entry(2));

        let bytes = blob.encode().unwrap();
        let restored = PersistedShares::decode(&bytes).unwrap();

        assert_eq!(restored, blob);
        assert_eq!(restored.len(), 2);
    }

    #[test]
    fn encode_decode_encode_is_bit_identical() {
        let mut blob = PersistedShares::new();
        for tag in 0u8..4 {
            blob.insert(ShareId::random(), entry(tag));
        }

        let bytes = blob.encode().unwrap();
        let reencoded = PersistedShares::decode(&bytes).unwrap().encode().unwrap();
        assert_eq!(bytes, reencoded);
    }

    #[test]
    fn insert_replaces_existing_entry() {
        let mut blob = PersistedShares::new();
        let id = ShareId::random();
        blob.insert(id, entry(1));
        blob.insert(id, entry(2));

        assert_eq!(blob.len(), 1);
        assert_eq!(blob.iter().next().unwrap().1, &entry(2));
    }

    #[test]
    fn decode_of_garbage_fails() {
        assert!(PersistedShares::decode(&[0xC1, 0x01, 0x02]).is_err());
    }
}
