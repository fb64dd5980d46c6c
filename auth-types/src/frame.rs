//! Wire frames and the inbound classifier.
//!
//! Every frame on the wrapped transport is a MessagePack map carrying a
//! string `type` discriminant and a string `senderId`. This layer
//! introduces two frame types of its own: `auth` (one handshake-engine
//! message for one share) and `encrypted` (a sealed repository message).
//! Every other `type` belongs to the repository or the base adapter and
//! passes through this layer untouched.

use serde::{Deserialize, Serialize};

use crate::{PeerId, ShareId, WireError};

/// The `type` value of an auth frame.
pub const FRAME_TYPE_AUTH: &str = "auth";

/// The `type` value of an encrypted frame.
pub const FRAME_TYPE_ENCRYPTED: &str = "encrypted";

/// The payload of an `auth` frame: one serialized handshake-engine
/// message, scoped to a share.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthPayload {
    /// The share whose handshake this message belongs to.
    pub share_id: ShareId,
    /// Opaque bytes produced by the handshake engine.
    pub serialized_connection_message: Vec<u8>,
}

/// A frame produced by this layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum WireFrame {
    /// Transports one handshake-engine message between peers for one share.
    Auth {
        /// The sending peer, in the namespace of the carrying adapter.
        sender_id: PeerId,
        /// The receiving peer.
        target_id: PeerId,
        /// The handshake payload.
        payload: AuthPayload,
    },
    /// A sealed repository message; decrypts to a full repository message.
    Encrypted {
        /// The sending peer.
        sender_id: PeerId,
        /// The receiving peer.
        target_id: PeerId,
        /// The share whose session key sealed the message.
        share_id: ShareId,
        /// The sealed bytes (nonce-prefixed ciphertext).
        encrypted_message: Vec<u8>,
    },
}

impl WireFrame {
    /// Serialize to MessagePack bytes with named fields, so the frame is
    /// a self-describing map that other layers can inspect by key.
    pub fn to_bytes(&self) -> Result<Vec<u8>, WireError> {
        rmp_serde::to_vec_named(self).map_err(WireError::Serialization)
    }

    /// Deserialize from MessagePack bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WireError> {
        rmp_serde::from_slice(bytes).map_err(WireError::Deserialization)
    }
}

/// The routing fields common to every valid frame.
///
/// A frame is valid iff it decodes to this header: a map with a string
/// `type` and a string `senderId`. `targetId` is absent on broadcast
/// frames some base adapters use.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FrameHeader {
    /// The frame's type discriminant.
    #[serde(rename = "type")]
    pub kind: String,
    /// The sending peer.
    #[serde(rename = "senderId")]
    pub sender_id: PeerId,
    /// The receiving peer, if addressed.
    #[serde(rename = "targetId", default)]
    pub target_id: Option<PeerId>,
}

impl FrameHeader {
    /// Decode just the routing header of a frame, ignoring all other
    /// fields.
    pub fn peek(bytes: &[u8]) -> Result<Self, WireError> {
        rmp_serde::from_slice(bytes).map_err(WireError::Deserialization)
    }
}

/// An inbound frame after classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    /// An `auth` frame, routed to the handshake machinery.
    Auth {
        /// The sending peer.
        sender_id: PeerId,
        /// The handshake payload.
        payload: AuthPayload,
    },
    /// An `encrypted` frame, to be opened with the session key.
    Encrypted {
        /// The sending peer.
        sender_id: PeerId,
        /// The share whose session key sealed the message.
        share_id: ShareId,
        /// The sealed bytes.
        encrypted_message: Vec<u8>,
    },
    /// Any other frame type; the original bytes are passed through
    /// untouched.
    PassThrough {
        /// The routing header of the frame.
        header: FrameHeader,
        /// The frame exactly as it arrived.
        bytes: Vec<u8>,
    },
}

/// Classify an inbound frame.
///
/// Frames that are not maps with a string `type` and `senderId` are an
/// error; callers drop them. Frames with an unrecognized `type` are
/// returned as [`InboundFrame::PassThrough`] with their bytes untouched.
pub fn classify(bytes: &[u8]) -> Result<InboundFrame, WireError> {
    let header = FrameHeader::peek(bytes)
        .map_err(|e| WireError::InvalidFrame(e.to_string()))?;
    match header.kind.as_str() {
        FRAME_TYPE_AUTH | FRAME_TYPE_ENCRYPTED => match WireFrame::from_bytes(bytes)? {
            WireFrame::Auth {
                sender_id, payload, ..
            } => Ok(InboundFrame::Auth { sender_id, payload }),
            WireFrame::Encrypted {
                sender_id,
                share_id,
                encrypted_message,
                ..
            } => Ok(InboundFrame::Encrypted {
                sender_id,
                share_id,
                encrypted_message,
            }),
        },
        _ => Ok(InboundFrame::PassThrough {
            header,
            bytes: bytes.to_vec(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn auth_frame() -> WireFrame {
        WireFrame::Auth {
            sender_id: PeerId::new("peer-a"),
            target_id: PeerId::new("peer-b"),
            payload: AuthPayload {
                share_id: ShareId::random(),
                serialized_connection_message: vec![1, 2, 3],
            },
        }
    }

    #[test]
    fn auth_frame_roundtrip() {
        let frame = auth_frame();
        let bytes = frame.to_bytes().unwrap();
        let restored = WireFrame::from_bytes(&bytes).unwrap();
        assert_eq!(frame, restored);
    }

    #[test]
    fn encrypted_frame_roundtrip() {
        let frame = WireFrame::Encrypted {
            sender_id: PeerId::new("peer-a"),
            target_id: PeerId::new("peer-b"),
            share_id: ShareId::random(),
            encrypted_message: vec![9; 64],
        };
        let bytes = frame.to_bytes().unwrap();
        let restored = WireFrame::from_bytes(&bytes).unwrap();
        assert_eq!(frame, restored);
    }

    #[test]
    fn classify_recognizes_auth() {
        let bytes = auth_frame().to_bytes().unwrap();
        match classify(&bytes).unwrap() {
            InboundFrame::Auth { sender_id, payload } => {
                assert_eq!(sender_id, PeerId::new("peer-a"));
                assert_eq!(payload.serialized_connection_message, vec![1, 2, 3]);
            }
            other => panic!("expected Auth, got {:?}", other),
        }
    }

    #[test]
    fn classify_recognizes_encrypted() {
        let share_id = ShareId::random();
        let frame = WireFrame::Encrypted {
            sender_id: PeerId::new("peer-a"),
            target_id: PeerId::new("peer-b"),
            share_id,
            encrypted_message: vec![0xFF; 8],
        };
        let bytes = frame.to_bytes().unwrap();
        match classify(&bytes).unwrap() {
            InboundFrame::Encrypted {
                share_id: got_share,
                ..
            } => assert_eq!(got_share, share_id),
            other => panic!("expected Encrypted, got {:?}", other),
        }
    }

    #[test]
    fn unknown_type_passes_through_untouched() {
        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct SyncFrame {
            #[serde(rename = "type")]
            kind: String,
            sender_id: String,
            target_id: String,
            data: Vec<u8>,
        }
        let bytes = rmp_serde::to_vec_named(&SyncFrame {
            kind: "sync".into(),
            sender_id: "peer-a".into(),
            target_id: "peer-b".into(),
            data: vec![4, 5, 6],
        })
        .unwrap();

        match classify(&bytes).unwrap() {
            InboundFrame::PassThrough {
                header,
                bytes: passed,
            } => {
                assert_eq!(header.kind, "sync");
                assert_eq!(header.sender_id, PeerId::new("peer-a"));
                assert_eq!(header.target_id, Some(PeerId::new("peer-b")));
                assert_eq!(passed, bytes);
            }
            other => panic!("expected PassThrough, got {:?}", other),
        }
    }

    #[test]
    fn frame_without_sender_is_invalid() {
        #[derive(Serialize)]
        struct NoSender {
            #[serde(rename = "type")]
            kind: String,
        }
        let bytes = rmp_serde::to_vec_named(&NoSender { kind: "sync".into() }).unwrap();
        assert!(matches!(
            classify(&bytes),
            Err(WireError::InvalidFrame(_))
        ));
    }

    #[test]
    fn garbage_bytes_are_invalid() {
        assert!(classify(&[0xC1, 0x00, 0xFF]).is_err());
    }

    #[test]
    fn header_peek_ignores_extra_fields() {
        let bytes = auth_frame().to_bytes().unwrap();
        let header = FrameHeader::peek(&bytes).unwrap();
        assert_eq!(header.kind, FRAME_TYPE_AUTH);
        assert_eq!(header.target_id, Some(PeerId::new("peer-b")));
    }

    #[test]
    fn broadcast_frame_has_no_target() {
        #[derive(Serialize)]
        struct Arrive {
            #[serde(rename = "type")]
            kind: String,
            #[serde(rename = "senderId")]
            sender_id: String,
        }
        let bytes = rmp_serde::to_vec_named(&Arrive {
            kind: "arrive".into(),
            sender_id: "peer-a".into(),
        })
        .unwrap();
        let header = FrameHeader::peek(&bytes).unwrap();
        assert_eq!(header.target_id, None);
    }
}
