//! The consumed crypto-library interface.
//!
//! The team-graph handshake, team serialization, and membership rules
//! live in an external library; this module pins down the surface the
//! provider consumes. The library's callback-style connection is
//! modelled as a state machine the provider advances explicitly:
//! `start` and `deliver` return the events the call produced, and the
//! provider dispatches them.

pub mod mock;

use std::sync::Arc;

use thiserror::Error;
use vouch_auth_types::{DeviceIdentity, Invitation, PeerId, ShareId, UserIdentity};

use crate::crypto::SealKey;

/// Errors from the crypto library.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The persisted team payload could not be decoded.
    #[error("invalid team payload: {0}")]
    InvalidTeam(String),

    /// The supplied keyring does not open the team payload.
    #[error("invalid team keyring: {0}")]
    InvalidKeyring(String),
}

/// A handle to one team (the cryptographic group behind a share).
pub trait Team: Send + Sync {
    /// The team id; equal to the share id.
    fn id(&self) -> ShareId;

    /// Serialize the team. The library encrypts the payload; it is
    /// opaque without the keyring.
    fn save(&self) -> Vec<u8>;

    /// The team keyring needed to open a saved payload.
    fn keyring(&self) -> Vec<u8>;
}

/// The local context a handshake runs under, one variant per role.
#[derive(Clone)]
pub enum SessionContext {
    /// We are a member of the team already.
    Member {
        /// This device's identity.
        device: DeviceIdentity,
        /// The local user's identity.
        user: UserIdentity,
        /// The team handle.
        team: Arc<dyn Team>,
    },
    /// We are a new device of an existing user, joining by invitation;
    /// no user identity is available yet.
    InviteeDevice {
        /// This device's identity.
        device: DeviceIdentity,
        /// The pending invitation.
        invitation: Invitation,
    },
    /// We are a new user joining by invitation with our own identity.
    InviteeMember {
        /// This device's identity.
        device: DeviceIdentity,
        /// The joining user's identity.
        user: UserIdentity,
        /// The pending invitation.
        invitation: Invitation,
    },
}

impl SessionContext {
    /// The share this context handshakes for.
    pub fn share_id(&self) -> ShareId {
        match self {
            SessionContext::Member { team, .. } => team.id(),
            SessionContext::InviteeDevice { invitation, .. }
            | SessionContext::InviteeMember { invitation, .. } => invitation.share_id(),
        }
    }
}

/// One event produced by advancing a connection.
pub enum ConnectionEvent {
    /// A serialized connection message to transport to the remote peer
    /// inside an `auth` frame.
    Message(Vec<u8>),
    /// We were admitted into the team through our invitation.
    Joined {
        /// The team we joined.
        team: Arc<dyn Team>,
        /// Our user identity (assigned by the team for device joins).
        user: UserIdentity,
    },
    /// Mutual authentication succeeded; the session key is available.
    Connected {
        /// The symmetric key both peers now hold.
        session_key: SealKey,
    },
    /// The team graph changed (for example a member was admitted).
    Updated,
    /// This side of the handshake failed. Not fatal to other sessions.
    LocalError(String),
    /// The remote side reported a handshake failure.
    RemoteError(String),
    /// The connection ended; the session must be discarded.
    Disconnected {
        /// Why the connection ended.
        reason: String,
    },
}

impl std::fmt::Debug for ConnectionEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionEvent::Message(bytes) => write!(f, "Message({} bytes)", bytes.len()),
            ConnectionEvent::Joined { team, user } => f
                .debug_struct("Joined")
                .field("team", &team.id())
                .field("user", &user.user_id)
                .finish(),
            ConnectionEvent::Connected { .. } => write!(f, "Connected"),
            ConnectionEvent::Updated => write!(f, "Updated"),
            ConnectionEvent::LocalError(e) => write!(f, "LocalError({e})"),
            ConnectionEvent::RemoteError(e) => write!(f, "RemoteError({e})"),
            ConnectionEvent::Disconnected { reason } => write!(f, "Disconnected({reason})"),
        }
    }
}

/// One handshake connection per (share, peer) pair.
pub trait Connection: Send {
    /// Begin the handshake. Called exactly once, before any `deliver`.
    fn start(&mut self) -> Vec<ConnectionEvent>;

    /// Deliver one serialized connection message received from the
    /// remote peer.
    fn deliver(&mut self, message: &[u8]) -> Vec<ConnectionEvent>;
}

/// The crypto library itself.
pub trait AuthLibrary: Send + Sync {
    /// Open a connection toward a peer under the given context.
    fn connect(&self, context: SessionContext, peer_id: PeerId) -> Box<dyn Connection>;

    /// Rebuild a team from a saved payload and its keyring.
    fn load_team(
        &self,
        blob: &[u8],
        device: &DeviceIdentity,
        user: Option<&UserIdentity>,
        keyring: &[u8],
    ) -> Result<Arc<dyn Team>, EngineError>;
}
