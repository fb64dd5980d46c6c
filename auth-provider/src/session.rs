//! Per-(share, peer) handshake sessions.
//!
//! A session wraps one crypto-library connection. Its key is held only
//! while the session is connected; removal of the session is the only
//! way back to a fresh handshake.

use vouch_auth_types::{PeerId, ShareId};

use crate::crypto::SealKey;
use crate::engine::{Connection, ConnectionEvent};

/// Session lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// The handshake is in flight.
    Handshaking,
    /// We were admitted via an invitation; waiting for the key.
    Member,
    /// Mutual authentication succeeded; the session key is available.
    Connected,
    /// Terminal. A new session must be constructed to reconnect.
    Closed,
}

/// One handshake session.
pub struct Session {
    share_id: ShareId,
    peer_id: PeerId,
    connection: Box<dyn Connection>,
    phase: SessionPhase,
    key: Option<SealKey>,
}

impl Session {
    /// Wrap a connection for a (share, peer) pair.
    pub fn new(share_id: ShareId, peer_id: PeerId, connection: Box<dyn Connection>) -> Self {
        Self {
            share_id,
            peer_id,
            connection,
            phase: SessionPhase::Handshaking,
            key: None,
        }
    }

    /// The share this session authenticates.
    pub fn share_id(&self) -> ShareId {
        self.share_id
    }

    /// The peer this session authenticates.
    pub fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    /// The current phase.
    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// Begin the handshake.
    pub fn start(&mut self) -> Vec<ConnectionEvent> {
        self.connection.start()
    }

    /// Deliver handshake bytes received from the peer. A closed session
    /// ignores delivery.
    pub fn deliver(&mut self, message: &[u8]) -> Vec<ConnectionEvent> {
        if self.phase == SessionPhase::Closed {
            return Vec::new();
        }
        self.connection.deliver(message)
    }

    /// Record that the engine admitted us into the team.
    pub fn set_member(&mut self) {
        if self.phase == SessionPhase::Handshaking {
            self.phase = SessionPhase::Member;
        }
    }

    /// Record that the handshake completed with a session key.
    pub fn set_connected(&mut self, key: SealKey) {
        self.phase = SessionPhase::Connected;
        self.key = Some(key);
    }

    /// Close the session; the key is dropped.
    pub fn close(&mut self) {
        self.phase = SessionPhase::Closed;
        self.key = None;
    }

    /// The session key, present exactly while connected.
    pub fn session_key(&self) -> Option<&SealKey> {
        match self.phase {
            SessionPhase::Connected => self.key.as_ref(),
            _ => None,
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("share_id", &self.share_id)
            .field("peer_id", &self.peer_id)
            .field("phase", &self.phase)
            .finish()
    }
}
