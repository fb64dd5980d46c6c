//! The plaintext repository message.
//!
//! This is what the repository hands to an authenticated adapter for
//! sending and what it receives back after decryption. The whole encoded
//! message is sealed with the session key, so the wire never carries any
//! of these fields in the clear.

use serde::{Deserialize, Serialize};

use crate::{DocumentId, PeerId, WireError};

/// A repository message addressed to one peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepoMessage {
    /// The repository-level message type.
    #[serde(rename = "type")]
    pub kind: String,
    /// The sending peer.
    pub sender_id: PeerId,
    /// The receiving peer.
    pub target_id: PeerId,
    /// The document this message concerns, when it concerns one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_id: Option<DocumentId>,
    /// The opaque sync payload.
    pub data: Vec<u8>,
}

impl RepoMessage {
    /// Create a message with an empty document association.
    pub fn new(
        kind: impl Into<String>,
        sender_id: PeerId,
        target_id: PeerId,
        data: Vec<u8>,
    ) -> Self {
        Self {
            kind: kind.into(),
            sender_id,
            target_id,
            document_id: None,
            data,
        }
    }

    /// Associate the message with a document.
    pub fn with_document_id(mut self, document_id: DocumentId) -> Self {
        self.document_id = Some(document_id);
        self
    }

    /// Serialize to MessagePack bytes with named fields.
    pub fn to_bytes(&self) -> Result<Vec<u8>, WireError> {
        rmp_serde::to_vec_named(self).map_err(WireError::Serialization)
    }

    /// Deserialize from MessagePack bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WireError> {
        rmp_serde::from_slice(bytes).map_err(WireError::Deserialization)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_roundtrip() {
        let message = RepoMessage::new(
            "sync",
            PeerId::new("peer-a"),
            PeerId::new("peer-b"),
            vec![1, 2, 3, 4],
        )
        .with_document_id(DocumentId::new("doc-1"));

        let bytes = message.to_bytes().unwrap();
        let restored = RepoMessage::from_bytes(&bytes).unwrap();
        assert_eq!(message, restored);
    }

    #[test]
    fn document_id_is_optional() {
        let message = RepoMessage::new("sync", PeerId::new("a"), PeerId::new("b"), vec![]);
        let bytes = message.to_bytes().unwrap();
        let restored = RepoMessage::from_bytes(&bytes).unwrap();
        assert_eq!(restored.document_id, None);
    }

    #[test]
    fn encoding_is_bit_stable() {
        let message = RepoMessage::new("sync", PeerId::new("a"), PeerId::new("b"), vec![7; 32]);
        assert_eq!(message.to_bytes().unwrap(), message.to_bytes().unwrap());
    }
}
