//! Pending-message buffer for handshake payloads.
//!
//! Handshake bytes can arrive before the session that should consume
//! them exists: share admission and peer arrival are independently timed
//! events. This buffer holds such orphan payloads per (share, peer) pair
//! in arrival order until a session is created, then hands them over
//! exactly once.

use std::collections::{HashMap, VecDeque};

use vouch_auth_types::{PeerId, ShareId};

/// Default number of payloads retained per (share, peer) pair.
pub const DEFAULT_PENDING_CAPACITY: usize = 64;

/// Error type for buffer operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BufferError {
    /// The queue for this pair is at capacity; the payload was dropped.
    #[error("pending buffer full (capacity: {capacity})")]
    Full {
        /// The per-pair capacity.
        capacity: usize,
    },
}

/// FIFO queues of handshake payloads keyed by (share, peer).
///
/// An empty queue is equivalent to an absent one: draining removes the
/// key, and drained payloads are never re-delivered even if the session
/// they were handed to later fails.
#[derive(Debug)]
pub struct PendingBuffer {
    capacity: usize,
    queues: HashMap<(ShareId, PeerId), VecDeque<Vec<u8>>>,
}

impl PendingBuffer {
    /// Create a buffer with the given per-pair capacity.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            queues: HashMap::new(),
        }
    }

    /// Append a payload for a pair that has no session yet.
    pub fn push(
        &mut self,
        share_id: ShareId,
        peer_id: PeerId,
        payload: Vec<u8>,
    ) -> Result<(), BufferError> {
        let queue = self.queues.entry((share_id, peer_id)).or_default();
        if queue.len() >= self.capacity {
            return Err(BufferError::Full {
                capacity: self.capacity,
            });
        }
        queue.push_back(payload);
        Ok(())
    }

    /// Remove and return all payloads for a pair, in arrival order.
    pub fn drain(&mut self, share_id: &ShareId, peer_id: &PeerId) -> Vec<Vec<u8>> {
        self.queues
            .remove(&(*share_id, peer_id.clone()))
            .map(Vec::from)
            .unwrap_or_default()
    }

    /// Discard every queue belonging to a peer (it disconnected).
    pub fn discard_peer(&mut self, peer_id: &PeerId) {
        self.queues.retain(|(_, p), _| p != peer_id);
    }

    /// Number of payloads buffered for a pair.
    pub fn len(&self, share_id: &ShareId, peer_id: &PeerId) -> usize {
        self.queues
            .get(&(*share_id, peer_id.clone()))
            .map(VecDeque::len)
            .unwrap_or(0)
    }

    /// Whether the buffer holds no payloads at all.
    pub fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair() -> (ShareId, PeerId) {
        (ShareId::random(), PeerId::new("peer-1"))
    }

    #[test]
    fn drains_in_arrival_order() {
        let (share, peer) = pair();
        let mut buffer = PendingBuffer::new(DEFAULT_PENDING_CAPACITY);

        for i in 0u8..5 {
            buffer.push(share, peer.clone(), vec![i]).unwrap();
        }

        let drained = buffer.drain(&share, &peer);
        assert_eq!(drained, vec![vec![0], vec![1], vec![2], vec![3], vec![4]]);
    }

    #[test]
    fn drain_is_at_most_once() {
        let (share, peer) = pair();
        let mut buffer = PendingBuffer::new(DEFAULT_PENDING_CAPACITY);
        buffer.push(share, peer.clone(), vec![1]).unwrap();

        assert_eq!(buffer.drain(&share, &peer).len(), 1);
        assert!(buffer.drain(&share, &peer).is_empty());
        assert!(buffer.is_empty());
    }

    #[test]
    fn pairs_are_independent() {
        let share = ShareId::random();
        let peer_a = PeerId::new("a");
        let peer_b = PeerId::new("b");
        let mut buffer = PendingBuffer::new(DEFAULT_PENDING_CAPACITY);

        buffer.push(share, peer_a.clone(), vec![1]).unwrap();
        buffer.push(share, peer_b.clone(), vec![2]).unwrap();

        assert_eq!(buffer.drain(&share, &peer_a), vec![vec![1]]);
        assert_eq!(buffer.len(&share, &peer_b), 1);
    }

    #[test]
    fn capacity_is_enforced_per_pair() {
        let (share, peer) = pair();
        let mut buffer = PendingBuffer::new(2);

        buffer.push(share, peer.clone(), vec![1]).unwrap();
        buffer.push(share, peer.clone(), vec![2]).unwrap();
        let overflow = buffer.push(share, peer.clone(), vec![3]);

        assert_eq!(overflow, Err(BufferError::Full { capacity: 2 }));
        assert_eq!(buffer.drain(&share, &peer), vec![vec![1], vec![2]]);
    }

    #[test]
    fn discard_peer_drops_all_its_queues() {
        let peer = PeerId::new("gone");
        let mut buffer = PendingBuffer::new(DEFAULT_PENDING_CAPACITY);
        buffer.push(ShareId::random(), peer.clone(), vec![1]).unwrap();
        buffer.push(ShareId::random(), peer.clone(), vec![2]).unwrap();
        buffer
            .push(ShareId::random(), PeerId::new("stays"), vec![3])
            .unwrap();

        buffer.discard_peer(&peer);

        assert!(!buffer.is_empty());
        assert_eq!(buffer.queues.len(), 1);
    }

    #[test]
    fn drain_of_unknown_pair_is_empty() {
        let (share, peer) = pair();
        let mut buffer = PendingBuffer::new(DEFAULT_PENDING_CAPACITY);
        assert!(buffer.drain(&share, &peer).is_empty());
    }
}
