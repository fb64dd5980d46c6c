//! Base network adapter abstraction.
//!
//! The provider wraps adapters it does not own. A base adapter delivers
//! frames reliably and in order between two peers and announces peer
//! lifecycle; everything else (handshaking, encryption, routing) is this
//! crate's job.

pub mod memory;

use async_trait::async_trait;
use thiserror::Error;
use vouch_auth_types::PeerId;

/// Adapter errors.
#[derive(Debug, Error)]
pub enum AdapterError {
    /// The target peer is not reachable on this adapter.
    #[error("peer unavailable: {0}")]
    PeerUnavailable(PeerId),

    /// The frame names no target peer.
    #[error("frame has no target id")]
    MissingTarget,

    /// The underlying transport refused the frame.
    #[error("send failed: {0}")]
    SendFailed(String),
}

/// An event emitted by a base adapter.
#[derive(Debug, Clone)]
pub enum BaseEvent {
    /// The adapter is ready to carry traffic.
    Ready,
    /// The adapter shut down; no further events will follow.
    Closed,
    /// A peer appeared on this adapter.
    PeerCandidate {
        /// The peer that appeared.
        peer_id: PeerId,
    },
    /// A peer left this adapter.
    PeerDisconnected {
        /// The peer that left.
        peer_id: PeerId,
    },
    /// A frame arrived.
    Message {
        /// The encoded frame.
        bytes: Vec<u8>,
    },
    /// A transport-level error. Does not tear down sessions.
    Error {
        /// The peer concerned, when the error is peer-scoped.
        peer_id: Option<PeerId>,
        /// What went wrong.
        reason: String,
    },
}

/// A base network adapter the provider can wrap.
///
/// Implementations must not call back into the provider from `send`;
/// frames are handed to the transport and delivered to the remote peer's
/// event stream asynchronously.
#[async_trait]
pub trait NetworkAdapter: Send + Sync {
    /// This endpoint's peer id within the adapter's namespace.
    fn peer_id(&self) -> PeerId;

    /// Transmit an encoded frame to the peer named by its `targetId`.
    async fn send(&self, frame: Vec<u8>) -> Result<(), AdapterError>;

    /// Wait for the next adapter event. Returns `None` once the adapter
    /// has shut down and its queue is drained.
    async fn next_event(&self) -> Option<BaseEvent>;
}
