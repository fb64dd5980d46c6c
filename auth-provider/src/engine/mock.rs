//! In-process crypto library for tests.
//!
//! Implements the [`AuthLibrary`](super::AuthLibrary) surface with a
//! deterministic scripted handshake: both sides exchange a `Hello`, a
//! member validates the peer (team membership or invitation proof) and
//! answers with a `Welcome` carrying team material for invitees, and the
//! session key is derived from the two exchanged nonces. Invalid proofs
//! are answered with a `Reject`.
//!
//! Team state is sealed under its own keyring key, so persisted team
//! payloads are genuinely opaque without the keyring.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use vouch_auth_types::{
    DeviceIdentity, InvitationSecret, PeerId, ShareId, UserId, UserIdentity,
};

use super::{AuthLibrary, Connection, ConnectionEvent, EngineError, SessionContext, Team};
use crate::crypto::{CryptoError, SealKey, KEY_SIZE};

/// A grant registered on a team for one invitation secret.
#[derive(Debug, Clone, Serialize, Deserialize)]
enum InviteGrant {
    /// Admits a new user; the joining side supplies its identity.
    Member,
    /// Admits a new device of an existing user; the team hands the user
    /// identity to the joining device.
    Device {
        /// The identity handed to the joining device.
        user: UserIdentity,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TeamWire {
    id: ShareId,
    members: BTreeSet<UserId>,
    invitations: BTreeMap<String, InviteGrant>,
}

/// A mutable in-process team.
pub struct MockTeam {
    id: ShareId,
    keyring: Vec<u8>,
    state: Mutex<TeamWire>,
}

impl MockTeam {
    fn from_wire(wire: TeamWire, keyring: Vec<u8>) -> Arc<Self> {
        Arc::new(Self {
            id: wire.id,
            keyring,
            state: Mutex::new(wire),
        })
    }

    fn new(id: ShareId, founder: &UserIdentity) -> Arc<Self> {
        let mut members = BTreeSet::new();
        members.insert(founder.user_id.clone());
        Self::from_wire(
            TeamWire {
                id,
                members,
                invitations: BTreeMap::new(),
            },
            SealKey::random().as_bytes().to_vec(),
        )
    }

    fn load(blob: &[u8], keyring: &[u8]) -> Result<Arc<Self>, EngineError> {
        let key = keyring_key(keyring)
            .ok_or_else(|| EngineError::InvalidKeyring("wrong keyring length".into()))?;
        let plain = key
            .open(blob)
            .map_err(|e: CryptoError| EngineError::InvalidKeyring(e.to_string()))?;
        let wire: TeamWire = rmp_serde::from_slice(&plain)
            .map_err(|e| EngineError::InvalidTeam(e.to_string()))?;
        Ok(Self::from_wire(wire, keyring.to_vec()))
    }

    /// Register a member invitation under a secret.
    pub fn invite_member(&self, secret: &InvitationSecret) {
        self.state
            .lock()
            .unwrap()
            .invitations
            .insert(secret.as_str().to_string(), InviteGrant::Member);
    }

    /// Register a device invitation under a secret, naming the user the
    /// joining device will belong to.
    pub fn invite_device(&self, secret: &InvitationSecret, user: &UserIdentity) {
        self.state.lock().unwrap().invitations.insert(
            secret.as_str().to_string(),
            InviteGrant::Device { user: user.clone() },
        );
    }

    /// Whether a user is a member of this team.
    pub fn is_member(&self, user_id: &UserId) -> bool {
        self.state.lock().unwrap().members.contains(user_id)
    }

    /// Directly add a member. Test setup for pre-provisioned teams that
    /// never went through an invitation.
    pub fn add_member(&self, user_id: &UserId) {
        self.state.lock().unwrap().members.insert(user_id.clone());
    }

    /// Validate an invitation proof and, on success, admit the joining
    /// party and consume the invitation.
    ///
    /// Returns `None` for an unknown proof. On success, returns the user
    /// identity the team assigns to the joining device (device grants
    /// only).
    fn admit(&self, proof: &str, joining_user: Option<&UserId>) -> Option<Option<UserIdentity>> {
        let mut state = self.state.lock().unwrap();
        let grant = state.invitations.get(proof)?.clone();
        match grant {
            InviteGrant::Member => {
                let user = joining_user?;
                state.members.insert(user.clone());
                state.invitations.remove(proof);
                Some(None)
            }
            InviteGrant::Device { user } => {
                state.members.insert(user.user_id.clone());
                state.invitations.remove(proof);
                Some(Some(user))
            }
        }
    }
}

impl Team for MockTeam {
    fn id(&self) -> ShareId {
        self.id
    }

    fn save(&self) -> Vec<u8> {
        let state = self.state.lock().unwrap();
        let plain = rmp_serde::to_vec_named(&*state).expect("team state encodes");
        keyring_key(&self.keyring)
            .expect("keyring is well-formed")
            .seal(&plain)
            .expect("team state seals")
    }

    fn keyring(&self) -> Vec<u8> {
        self.keyring.clone()
    }
}

impl std::fmt::Debug for MockTeam {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockTeam").field("id", &self.id).finish()
    }
}

fn keyring_key(keyring: &[u8]) -> Option<SealKey> {
    let bytes: [u8; KEY_SIZE] = keyring.try_into().ok()?;
    Some(SealKey::from_bytes(bytes))
}

/// One serialized connection message on the mock handshake wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
enum MockWire {
    Hello {
        share_id: ShareId,
        user_id: Option<UserId>,
        proof: Option<String>,
        nonce: [u8; 32],
    },
    Welcome {
        share_id: ShareId,
        nonce: [u8; 32],
        team: Option<Vec<u8>>,
        keyring: Option<Vec<u8>>,
        user: Option<UserIdentity>,
    },
    Reject {
        reason: String,
    },
}

impl MockWire {
    fn to_bytes(&self) -> Vec<u8> {
        rmp_serde::to_vec_named(self).expect("mock wire encodes")
    }
}

fn session_key(share_id: &ShareId, a: &[u8; 32], b: &[u8; 32]) -> SealKey {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    let mut ikm = Vec::with_capacity(96);
    ikm.extend_from_slice(share_id.as_bytes());
    ikm.extend_from_slice(lo);
    ikm.extend_from_slice(hi);
    SealKey::derive(&ikm, b"mock-session-key")
}

struct LibraryInner {
    teams: Mutex<HashMap<ShareId, Arc<MockTeam>>>,
    deliveries: Mutex<HashMap<(ShareId, PeerId), Vec<Vec<u8>>>>,
}

/// The in-process crypto library.
#[derive(Clone)]
pub struct MockAuthLibrary {
    inner: Arc<LibraryInner>,
}

impl MockAuthLibrary {
    /// Create a new library with no teams.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(LibraryInner {
                teams: Mutex::new(HashMap::new()),
                deliveries: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Create and register a team founded by the given user.
    pub fn create_team(&self, id: ShareId, founder: &UserIdentity) -> Arc<MockTeam> {
        let team = MockTeam::new(id, founder);
        self.inner.teams.lock().unwrap().insert(id, team.clone());
        team
    }

    /// Look up a registered team.
    pub fn team(&self, id: &ShareId) -> Option<Arc<MockTeam>> {
        self.inner.teams.lock().unwrap().get(id).cloned()
    }

    /// Every payload delivered to the connection for a pair, in
    /// delivery order. Lets tests assert buffered payloads arrived
    /// before live ones.
    pub fn delivered(&self, share_id: &ShareId, peer_id: &PeerId) -> Vec<Vec<u8>> {
        self.inner
            .deliveries
            .lock()
            .unwrap()
            .get(&(*share_id, peer_id.clone()))
            .cloned()
            .unwrap_or_default()
    }

    fn register(&self, team: Arc<MockTeam>) {
        self.inner
            .teams
            .lock()
            .unwrap()
            .insert(team.id(), team);
    }
}

impl Default for MockAuthLibrary {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthLibrary for MockAuthLibrary {
    fn connect(&self, context: SessionContext, peer_id: PeerId) -> Box<dyn Connection> {
        let mut nonce = [0u8; 32];
        getrandom::getrandom(&mut nonce).expect("getrandom failed");
        Box::new(MockConnection {
            library: self.clone(),
            share_id: context.share_id(),
            context,
            peer_id,
            nonce,
            connected: false,
        })
    }

    fn load_team(
        &self,
        blob: &[u8],
        _device: &DeviceIdentity,
        _user: Option<&UserIdentity>,
        keyring: &[u8],
    ) -> Result<Arc<dyn Team>, EngineError> {
        let team = MockTeam::load(blob, keyring)?;
        self.register(team.clone());
        Ok(team)
    }
}

struct MockConnection {
    library: MockAuthLibrary,
    share_id: ShareId,
    context: SessionContext,
    peer_id: PeerId,
    nonce: [u8; 32],
    connected: bool,
}

impl MockConnection {
    fn hello(&self) -> MockWire {
        match &self.context {
            SessionContext::Member { user, .. } => MockWire::Hello {
                share_id: self.share_id,
                user_id: Some(user.user_id.clone()),
                proof: None,
                nonce: self.nonce,
            },
            SessionContext::InviteeDevice { invitation, .. } => MockWire::Hello {
                share_id: self.share_id,
                user_id: None,
                proof: Some(invitation.secret().as_str().to_string()),
                nonce: self.nonce,
            },
            SessionContext::InviteeMember {
                user, invitation, ..
            } => MockWire::Hello {
                share_id: self.share_id,
                user_id: Some(user.user_id.clone()),
                proof: Some(invitation.secret().as_str().to_string()),
                nonce: self.nonce,
            },
        }
    }

    fn team(&self) -> Option<Arc<MockTeam>> {
        self.library.team(&self.share_id)
    }

    fn on_hello(
        &mut self,
        user_id: Option<UserId>,
        proof: Option<String>,
        peer_nonce: [u8; 32],
    ) -> Vec<ConnectionEvent> {
        let SessionContext::Member { .. } = &self.context else {
            // Invitees wait for the member's Welcome.
            return Vec::new();
        };
        let Some(team) = self.team() else {
            return vec![
                ConnectionEvent::LocalError("team handle missing".into()),
                ConnectionEvent::Disconnected {
                    reason: "handshake failed".into(),
                },
            ];
        };

        if let Some(proof) = proof {
            return match team.admit(&proof, user_id.as_ref()) {
                Some(assigned_user) => {
                    let welcome = MockWire::Welcome {
                        share_id: self.share_id,
                        nonce: self.nonce,
                        team: Some(team.save()),
                        keyring: Some(team.keyring()),
                        user: assigned_user,
                    };
                    self.connected = true;
                    vec![
                        ConnectionEvent::Message(welcome.to_bytes()),
                        ConnectionEvent::Updated,
                        ConnectionEvent::Connected {
                            session_key: session_key(&self.share_id, &self.nonce, &peer_nonce),
                        },
                    ]
                }
                None => vec![
                    ConnectionEvent::Message(
                        MockWire::Reject {
                            reason: "invitation proof rejected".into(),
                        }
                        .to_bytes(),
                    ),
                    ConnectionEvent::LocalError("invitation proof rejected".into()),
                    ConnectionEvent::Disconnected {
                        reason: "handshake failed".into(),
                    },
                ],
            };
        }

        match user_id {
            Some(ref user) if team.is_member(user) => {
                let welcome = MockWire::Welcome {
                    share_id: self.share_id,
                    nonce: self.nonce,
                    team: None,
                    keyring: None,
                    user: None,
                };
                self.connected = true;
                vec![
                    ConnectionEvent::Message(welcome.to_bytes()),
                    ConnectionEvent::Connected {
                        session_key: session_key(&self.share_id, &self.nonce, &peer_nonce),
                    },
                ]
            }
            _ => vec![
                ConnectionEvent::Message(
                    MockWire::Reject {
                        reason: "peer is not a team member".into(),
                    }
                    .to_bytes(),
                ),
                ConnectionEvent::LocalError("peer is not a team member".into()),
                ConnectionEvent::Disconnected {
                    reason: "handshake failed".into(),
                },
            ],
        }
    }

    fn on_welcome(
        &mut self,
        peer_nonce: [u8; 32],
        team_blob: Option<Vec<u8>>,
        keyring: Option<Vec<u8>>,
        assigned_user: Option<UserIdentity>,
    ) -> Vec<ConnectionEvent> {
        if self.connected {
            return Vec::new();
        }
        let key = session_key(&self.share_id, &self.nonce, &peer_nonce);

        match &self.context {
            SessionContext::Member { .. } => {
                self.connected = true;
                vec![ConnectionEvent::Connected { session_key: key }]
            }
            SessionContext::InviteeDevice { .. } | SessionContext::InviteeMember { .. } => {
                let (Some(blob), Some(keyring)) = (team_blob, keyring) else {
                    return vec![
                        ConnectionEvent::LocalError("welcome carried no team material".into()),
                        ConnectionEvent::Disconnected {
                            reason: "handshake failed".into(),
                        },
                    ];
                };
                let team = match MockTeam::load(&blob, &keyring) {
                    Ok(team) => team,
                    Err(e) => {
                        return vec![
                            ConnectionEvent::LocalError(e.to_string()),
                            ConnectionEvent::Disconnected {
                                reason: "handshake failed".into(),
                            },
                        ]
                    }
                };
                self.library.register(team.clone());

                let user = match (&self.context, assigned_user) {
                    (_, Some(user)) => user,
                    (SessionContext::InviteeMember { user, .. }, None) => user.clone(),
                    (_, None) => {
                        return vec![
                            ConnectionEvent::LocalError(
                                "welcome carried no user identity".into(),
                            ),
                            ConnectionEvent::Disconnected {
                                reason: "handshake failed".into(),
                            },
                        ]
                    }
                };

                self.connected = true;
                vec![
                    ConnectionEvent::Joined { team, user },
                    ConnectionEvent::Connected { session_key: key },
                ]
            }
        }
    }
}

impl Connection for MockConnection {
    fn start(&mut self) -> Vec<ConnectionEvent> {
        vec![ConnectionEvent::Message(self.hello().to_bytes())]
    }

    fn deliver(&mut self, message: &[u8]) -> Vec<ConnectionEvent> {
        self.library
            .inner
            .deliveries
            .lock()
            .unwrap()
            .entry((self.share_id, self.peer_id.clone()))
            .or_default()
            .push(message.to_vec());

        let wire: MockWire = match rmp_serde::from_slice(message) {
            Ok(wire) => wire,
            // Benign: an undecodable payload does not end the session.
            Err(_) => return vec![ConnectionEvent::LocalError("malformed connection message".into())],
        };

        match wire {
            MockWire::Hello {
                share_id,
                user_id,
                proof,
                nonce,
            } => {
                if share_id != self.share_id {
                    return vec![
                        ConnectionEvent::LocalError("share id mismatch".into()),
                        ConnectionEvent::Disconnected {
                            reason: "handshake failed".into(),
                        },
                    ];
                }
                self.on_hello(user_id, proof, nonce)
            }
            MockWire::Welcome {
                share_id,
                nonce,
                team,
                keyring,
                user,
            } => {
                if share_id != self.share_id {
                    return vec![
                        ConnectionEvent::LocalError("share id mismatch".into()),
                        ConnectionEvent::Disconnected {
                            reason: "handshake failed".into(),
                        },
                    ];
                }
                self.on_welcome(nonce, team, keyring, user)
            }
            MockWire::Reject { reason } => vec![
                ConnectionEvent::RemoteError(reason),
                ConnectionEvent::Disconnected {
                    reason: "rejected by peer".into(),
                },
            ],
        }
    }
}
