//! In-process adapter pair for tests.
//!
//! A [`MemoryHub`] is a tiny broadcast domain: every attached endpoint
//! sees every other as a peer candidate, and frames are routed to the
//! endpoint named by their `targetId` header. The hub records every
//! routed frame so tests can inspect what actually crossed the wire.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use vouch_auth_types::{FrameHeader, PeerId};

use super::{AdapterError, BaseEvent, NetworkAdapter};

/// An in-process broadcast domain connecting [`MemoryAdapter`]s.
pub struct MemoryHub {
    peers: StdMutex<HashMap<PeerId, mpsc::UnboundedSender<BaseEvent>>>,
    frames: StdMutex<Vec<Vec<u8>>>,
}

impl MemoryHub {
    /// Create an empty hub.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            peers: StdMutex::new(HashMap::new()),
            frames: StdMutex::new(Vec::new()),
        })
    }

    /// Attach an endpoint under a peer id.
    ///
    /// The new endpoint receives `Ready` followed by a `PeerCandidate`
    /// for every endpoint already attached; existing endpoints receive a
    /// `PeerCandidate` for the new one.
    pub fn attach(self: &Arc<Self>, peer_id: PeerId) -> Arc<MemoryAdapter> {
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(BaseEvent::Ready);

        let mut peers = self.peers.lock().unwrap();
        for (other, sender) in peers.iter() {
            let _ = sender.send(BaseEvent::PeerCandidate {
                peer_id: peer_id.clone(),
            });
            let _ = tx.send(BaseEvent::PeerCandidate {
                peer_id: other.clone(),
            });
        }
        peers.insert(peer_id.clone(), tx);

        Arc::new(MemoryAdapter {
            peer_id,
            hub: Arc::clone(self),
            events: Mutex::new(rx),
        })
    }

    /// Detach an endpoint; every other endpoint sees a
    /// `PeerDisconnected` for it.
    pub fn detach(&self, peer_id: &PeerId) {
        let mut peers = self.peers.lock().unwrap();
        peers.remove(peer_id);
        for sender in peers.values() {
            let _ = sender.send(BaseEvent::PeerDisconnected {
                peer_id: peer_id.clone(),
            });
        }
    }

    /// Shut down an endpoint: it receives `Closed` and is detached.
    pub fn close(&self, peer_id: &PeerId) {
        let closed = {
            let peers = self.peers.lock().unwrap();
            peers.get(peer_id).cloned()
        };
        if let Some(sender) = closed {
            let _ = sender.send(BaseEvent::Closed);
        }
        self.detach(peer_id);
    }

    /// Every frame routed through the hub, in order.
    pub fn sent_frames(&self) -> Vec<Vec<u8>> {
        self.frames.lock().unwrap().clone()
    }

    fn route(&self, frame: Vec<u8>) -> Result<(), AdapterError> {
        let header = FrameHeader::peek(&frame)
            .map_err(|e| AdapterError::SendFailed(e.to_string()))?;
        let target = header.target_id.ok_or(AdapterError::MissingTarget)?;

        self.frames.lock().unwrap().push(frame.clone());

        let peers = self.peers.lock().unwrap();
        let sender = peers
            .get(&target)
            .ok_or_else(|| AdapterError::PeerUnavailable(target.clone()))?;
        sender
            .send(BaseEvent::Message { bytes: frame })
            .map_err(|_| AdapterError::PeerUnavailable(target))
    }
}

/// One endpoint of a [`MemoryHub`].
pub struct MemoryAdapter {
    peer_id: PeerId,
    hub: Arc<MemoryHub>,
    events: Mutex<mpsc::UnboundedReceiver<BaseEvent>>,
}

#[async_trait]
impl NetworkAdapter for MemoryAdapter {
    fn peer_id(&self) -> PeerId {
        self.peer_id.clone()
    }

    async fn send(&self, frame: Vec<u8>) -> Result<(), AdapterError> {
        self.hub.route(frame)
    }

    async fn next_event(&self) -> Option<BaseEvent> {
        self.events.lock().await.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vouch_auth_types::{AuthPayload, ShareId, WireFrame};

    fn frame(sender: &str, target: &str) -> Vec<u8> {
        WireFrame::Auth {
            sender_id: PeerId::new(sender),
            target_id: PeerId::new(target),
            payload: AuthPayload {
                share_id: ShareId::random(),
                serialized_connection_message: vec![1],
            },
        }
        .to_bytes()
        .unwrap()
    }

    #[tokio::test]
    async fn attach_announces_both_ways() {
        let hub = MemoryHub::new();
        let a = hub.attach(PeerId::new("a"));
        let b = hub.attach(PeerId::new("b"));

        assert!(matches!(a.next_event().await, Some(BaseEvent::Ready)));
        match a.next_event().await {
            Some(BaseEvent::PeerCandidate { peer_id }) => assert_eq!(peer_id, PeerId::new("b")),
            other => panic!("expected candidate, got {:?}", other),
        }

        assert!(matches!(b.next_event().await, Some(BaseEvent::Ready)));
        match b.next_event().await {
            Some(BaseEvent::PeerCandidate { peer_id }) => assert_eq!(peer_id, PeerId::new("a")),
            other => panic!("expected candidate, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn frames_route_by_target_id() {
        let hub = MemoryHub::new();
        let a = hub.attach(PeerId::new("a"));
        let b = hub.attach(PeerId::new("b"));

        let bytes = frame("a", "b");
        a.send(bytes.clone()).await.unwrap();

        // Skip Ready + candidate.
        let _ = b.next_event().await;
        let _ = b.next_event().await;
        match b.next_event().await {
            Some(BaseEvent::Message { bytes: got }) => assert_eq!(got, bytes),
            other => panic!("expected message, got {:?}", other),
        }

        assert_eq!(hub.sent_frames(), vec![bytes]);
    }

    #[tokio::test]
    async fn sending_to_unknown_peer_fails() {
        let hub = MemoryHub::new();
        let a = hub.attach(PeerId::new("a"));

        let result = a.send(frame("a", "nobody")).await;
        assert!(matches!(result, Err(AdapterError::PeerUnavailable(_))));
    }

    #[tokio::test]
    async fn detach_announces_disconnect() {
        let hub = MemoryHub::new();
        let a = hub.attach(PeerId::new("a"));
        let _b = hub.attach(PeerId::new("b"));

        hub.detach(&PeerId::new("b"));

        let _ = a.next_event().await; // Ready
        let _ = a.next_event().await; // candidate b
        match a.next_event().await {
            Some(BaseEvent::PeerDisconnected { peer_id }) => {
                assert_eq!(peer_id, PeerId::new("b"))
            }
            other => panic!("expected disconnect, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn close_delivers_closed() {
        let hub = MemoryHub::new();
        let a = hub.attach(PeerId::new("a"));

        hub.close(&PeerId::new("a"));

        let _ = a.next_event().await; // Ready
        assert!(matches!(a.next_event().await, Some(BaseEvent::Closed)));
    }
}
