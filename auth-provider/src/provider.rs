//! The provider core.
//!
//! An [`AuthProvider`] wraps base network adapters into authenticated
//! ones. It multiplexes one handshake session per (share, peer) pair
//! over each wrapped adapter, buffers handshake payloads that arrive
//! before their session exists, routes inbound frames to the handshake
//! machinery or (after decryption) to the repository, seals outbound
//! repository messages under the selected session key, and persists
//! team state across restarts.
//!
//! All provider state lives behind one async mutex; every event handler
//! and public operation serializes on it, which gives the layer its
//! single-threaded cooperative semantics even on a multi-threaded
//! runtime. Engine events are processed through an explicit work queue
//! so that admission chains (a join admitting a team, which opens more
//! sessions) never recurse.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::{mpsc, watch, Mutex};

use vouch_auth_core::{
    select_share, Candidate, PendingBuffer, PersistError, PersistedShare, PersistedShares,
    ShareRegistry, DEFAULT_PENDING_CAPACITY,
};
use vouch_auth_types::{
    classify, AdapterId, AuthPayload, DeviceIdentity, DocumentId, InboundFrame, Invitation,
    PeerId, RepoMessage, ShareId, UserIdentity, WireError, WireFrame,
};

use crate::adapter::{BaseEvent, NetworkAdapter};
use crate::crypto::{CryptoError, SealKey};
use crate::engine::{AuthLibrary, ConnectionEvent, EngineError, SessionContext, Team};
use crate::session::Session;
use crate::store::{ShareStore, Store, StoreError};

/// Internal provider failures. These never cross the event surface as
/// panics; they are logged and, where a peer is involved, surfaced as
/// `error` events.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// The persistence backend failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// The persisted blob could not be encoded or decoded.
    #[error("persistence codec error: {0}")]
    Persist(#[from] PersistError),

    /// Sealing or opening a payload failed.
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// A frame or message could not be encoded or decoded.
    #[error("wire error: {0}")]
    Wire(#[from] WireError),

    /// The crypto library rejected its input.
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),
}

/// Configuration for an [`AuthProvider`].
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// This device's identity.
    pub device: DeviceIdentity,
    /// The local user identity, absent for a fresh device joining
    /// through a device invitation.
    pub user: Option<UserIdentity>,
}

impl ProviderConfig {
    /// Configuration for a device with no user identity yet.
    pub fn new(device: DeviceIdentity) -> Self {
        Self { device, user: None }
    }

    /// Attach the local user identity.
    pub fn with_user(mut self, user: UserIdentity) -> Self {
        self.user = Some(user);
        self
    }
}

/// An event on the provider's outward surface, tagged with the pair it
/// concerns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthEvent {
    /// We were admitted into a share through an invitation.
    Joined {
        /// The share joined.
        share_id: ShareId,
        /// The peer that admitted us.
        peer_id: PeerId,
    },
    /// A session completed mutual authentication.
    Connected {
        /// The share concerned.
        share_id: ShareId,
        /// The authenticated peer.
        peer_id: PeerId,
    },
    /// The team graph behind a share changed.
    Updated {
        /// The share concerned.
        share_id: ShareId,
        /// The peer whose session reported the change.
        peer_id: PeerId,
    },
    /// A session ended.
    Disconnected {
        /// The share concerned.
        share_id: ShareId,
        /// The peer concerned.
        peer_id: PeerId,
        /// Why the session ended.
        reason: String,
    },
    /// Our side of a handshake failed. Not fatal to other sessions.
    LocalError {
        /// The share concerned.
        share_id: ShareId,
        /// The peer concerned.
        peer_id: PeerId,
        /// What went wrong.
        reason: String,
    },
    /// The remote side of a handshake reported a failure.
    RemoteError {
        /// The share concerned.
        share_id: ShareId,
        /// The peer concerned.
        peer_id: PeerId,
        /// What the remote reported.
        reason: String,
    },
}

/// An event on an authenticated adapter, mirroring the base adapter's
/// surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdapterEvent {
    /// The underlying adapter is ready.
    Ready,
    /// The underlying adapter shut down.
    Closed,
    /// A peer completed authentication for at least one share and can
    /// now be synced with.
    PeerCandidate {
        /// The authenticated peer.
        peer_id: PeerId,
    },
    /// A peer left the underlying adapter.
    PeerDisconnected {
        /// The peer that left.
        peer_id: PeerId,
    },
    /// A repository message arrived: the decrypted inner bytes of an
    /// `encrypted` frame, or an unrecognized frame passed through
    /// untouched.
    Message {
        /// The sending peer.
        sender_id: PeerId,
        /// The message bytes.
        bytes: Vec<u8>,
    },
    /// Something went wrong handling traffic for this adapter.
    Error {
        /// The peer concerned, when known.
        peer_id: Option<PeerId>,
        /// What went wrong.
        reason: String,
    },
}

type SessionKeyMap = HashMap<(ShareId, PeerId), Session>;
type EngineQueue = VecDeque<(AdapterId, ShareId, PeerId, ConnectionEvent)>;

struct AdapterState {
    base: Arc<dyn NetworkAdapter>,
    outward: mpsc::UnboundedSender<AdapterEvent>,
    sessions: SessionKeyMap,
    pending: PendingBuffer,
    announced: BTreeSet<PeerId>,
}

struct ProviderState {
    device: DeviceIdentity,
    user: Option<UserIdentity>,
    library: Arc<dyn AuthLibrary>,
    share_store: ShareStore,
    registry: ShareRegistry<Arc<dyn Team>>,
    adapters: HashMap<AdapterId, AdapterState>,
    next_adapter: u64,
}

impl ProviderState {
    fn admit_team(&mut self, team: Arc<dyn Team>, queue: &mut EngineQueue) -> bool {
        let id = team.id();
        if !self.registry.admit_share(id, team) {
            tracing::debug!(share = %id, "share already admitted");
            return false;
        }
        tracing::info!(share = %id, "share admitted");
        let adapters: Vec<AdapterId> = self.adapters.keys().copied().collect();
        for adapter_id in adapters {
            self.open_missing_sessions(adapter_id, queue);
        }
        true
    }

    /// Create a session for every (known peer x known share) pair on
    /// one adapter that has none, draining buffered handshake payloads
    /// into each new session in arrival order.
    fn open_missing_sessions(&mut self, adapter_id: AdapterId, queue: &mut EngineQueue) {
        let peers = self.registry.peers_on(adapter_id);
        let share_ids = self.registry.all_share_ids();
        let Some(adapter) = self.adapters.get_mut(&adapter_id) else {
            return;
        };
        for peer_id in peers {
            for share_id in &share_ids {
                let key = (*share_id, peer_id.clone());
                if adapter.sessions.contains_key(&key) {
                    continue;
                }
                let Some(context) =
                    session_context(&self.registry, &self.device, self.user.as_ref(), share_id)
                else {
                    continue;
                };
                let connection = self.library.connect(context, peer_id.clone());
                let mut session = Session::new(*share_id, peer_id.clone(), connection);
                tracing::debug!(share = %share_id, peer = %peer_id, "opening session");

                let mut events = session.start();
                for payload in adapter.pending.drain(share_id, &peer_id) {
                    events.extend(session.deliver(&payload));
                }
                adapter.sessions.insert(key, session);
                for event in events {
                    queue.push_back((adapter_id, *share_id, peer_id.clone(), event));
                }
            }
        }
    }

    fn session_mut(
        &mut self,
        adapter_id: AdapterId,
        share_id: &ShareId,
        peer_id: &PeerId,
    ) -> Option<&mut Session> {
        self.adapters
            .get_mut(&adapter_id)?
            .sessions
            .get_mut(&(*share_id, peer_id.clone()))
    }
}

/// Build the handshake context for one share: member when the share is
/// admitted, invitee otherwise.
fn session_context(
    registry: &ShareRegistry<Arc<dyn Team>>,
    device: &DeviceIdentity,
    user: Option<&UserIdentity>,
    share_id: &ShareId,
) -> Option<SessionContext> {
    if let Some(share) = registry.share(share_id) {
        let Some(user) = user else {
            tracing::warn!(share = %share_id, "member share without a user identity; skipping session");
            return None;
        };
        return Some(SessionContext::Member {
            device: device.clone(),
            user: user.clone(),
            team: share.team.clone(),
        });
    }
    match registry.invitation(share_id)? {
        invitation @ Invitation::Device { .. } => Some(SessionContext::InviteeDevice {
            device: device.clone(),
            invitation: invitation.clone(),
        }),
        invitation @ Invitation::Member { .. } => match user {
            Some(user) => Some(SessionContext::InviteeMember {
                device: device.clone(),
                user: user.clone(),
                invitation: invitation.clone(),
            }),
            None => {
                tracing::warn!(share = %share_id, "member invitation requires a user identity; skipping session");
                None
            }
        },
    }
}

fn device_wrap_key(device: &DeviceIdentity) -> SealKey {
    SealKey::derive(device.keys.secret.as_bytes(), b"team-keyring-wrap")
}

struct Shared {
    state: Mutex<ProviderState>,
    outward: mpsc::UnboundedSender<AuthEvent>,
    outward_rx: StdMutex<Option<mpsc::UnboundedReceiver<AuthEvent>>>,
    loaded: watch::Sender<bool>,
}

impl Shared {
    fn emit(&self, event: AuthEvent) {
        let _ = self.outward.send(event);
    }

    async fn load_persisted(&self) {
        if let Err(e) = self.try_load().await {
            tracing::error!("loading persisted shares failed: {e}");
        }
        let _ = self.loaded.send(true);
    }

    async fn try_load(&self) -> Result<(), ProviderError> {
        let store = { self.state.lock().await.share_store.clone() };
        let Some(bytes) = store.load_shares().await? else {
            return Ok(());
        };
        let blob = PersistedShares::decode(&bytes)?;

        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        let wrap = device_wrap_key(&state.device);
        let mut queue = EngineQueue::new();
        for (share_id, entry) in blob.iter() {
            let keyring = match wrap.open(&entry.encrypted_team_keys) {
                Ok(keyring) => keyring,
                Err(e) => {
                    tracing::warn!(share = %share_id, "unsealing team keyring failed: {e}");
                    continue;
                }
            };
            let team = match state.library.load_team(
                &entry.encrypted_team,
                &state.device,
                state.user.as_ref(),
                &keyring,
            ) {
                Ok(team) => team,
                Err(e) => {
                    tracing::warn!(share = %share_id, "rebuilding team failed: {e}");
                    continue;
                }
            };
            state.admit_team(team, &mut queue);
        }
        if state.registry.share_count() > 0 {
            tracing::info!(shares = state.registry.share_count(), "restored persisted shares");
        }
        self.pump(state, queue, false).await;
        Ok(())
    }

    /// Drain the engine-event queue, then persist once if anything in
    /// the batch changed team state. Processing an event may enqueue
    /// more (a join admits a team, which opens sessions); the queue
    /// keeps that iterative.
    async fn pump(&self, state: &mut ProviderState, mut queue: EngineQueue, mut need_save: bool) {
        while let Some((adapter_id, share_id, peer_id, event)) = queue.pop_front() {
            match event {
                ConnectionEvent::Message(message) => {
                    let Some(base) = state.adapters.get(&adapter_id).map(|a| a.base.clone())
                    else {
                        continue;
                    };
                    let frame = WireFrame::Auth {
                        sender_id: base.peer_id(),
                        target_id: peer_id.clone(),
                        payload: AuthPayload {
                            share_id,
                            serialized_connection_message: message,
                        },
                    };
                    match frame.to_bytes() {
                        Ok(bytes) => {
                            if let Err(e) = base.send(bytes).await {
                                tracing::warn!(peer = %peer_id, "auth frame not delivered: {e}");
                            }
                        }
                        Err(e) => tracing::warn!("auth frame encoding failed: {e}"),
                    }
                }
                ConnectionEvent::Joined { team, user } => {
                    if state.user.is_none() {
                        tracing::info!(user = %user.user_id, "user identity established by join");
                        state.user = Some(user);
                    }
                    state.registry.remove_invitation(&share_id);
                    state.admit_team(team, &mut queue);
                    if let Some(session) = state.session_mut(adapter_id, &share_id, &peer_id) {
                        session.set_member();
                    }
                    need_save = true;
                    self.emit(AuthEvent::Joined { share_id, peer_id });
                }
                ConnectionEvent::Connected { session_key } => {
                    let Some(adapter) = state.adapters.get_mut(&adapter_id) else {
                        continue;
                    };
                    let Some(session) = adapter.sessions.get_mut(&(share_id, peer_id.clone()))
                    else {
                        tracing::debug!(share = %share_id, peer = %peer_id, "connected event for a removed session");
                        continue;
                    };
                    session.set_connected(session_key);
                    tracing::info!(share = %share_id, peer = %peer_id, "session connected");
                    if adapter.announced.insert(peer_id.clone()) {
                        let _ = adapter.outward.send(AdapterEvent::PeerCandidate {
                            peer_id: peer_id.clone(),
                        });
                    }
                    self.emit(AuthEvent::Connected { share_id, peer_id });
                }
                ConnectionEvent::Updated => {
                    need_save = true;
                    self.emit(AuthEvent::Updated { share_id, peer_id });
                }
                ConnectionEvent::LocalError(reason) => {
                    tracing::warn!(share = %share_id, peer = %peer_id, "handshake error: {reason}");
                    self.emit(AuthEvent::LocalError {
                        share_id,
                        peer_id,
                        reason,
                    });
                }
                ConnectionEvent::RemoteError(reason) => {
                    tracing::warn!(share = %share_id, peer = %peer_id, "remote handshake error: {reason}");
                    self.emit(AuthEvent::RemoteError {
                        share_id,
                        peer_id,
                        reason,
                    });
                }
                ConnectionEvent::Disconnected { reason } => {
                    if let Some(adapter) = state.adapters.get_mut(&adapter_id) {
                        if let Some(mut session) =
                            adapter.sessions.remove(&(share_id, peer_id.clone()))
                        {
                            session.close();
                            tracing::debug!(share = %share_id, peer = %peer_id, "session removed: {reason}");
                        }
                    }
                    self.emit(AuthEvent::Disconnected {
                        share_id,
                        peer_id,
                        reason,
                    });
                }
            }
        }
        if need_save {
            if let Err(e) = self.save_state(state).await {
                tracing::error!("persisting share state failed: {e}");
            }
        }
    }

    async fn save_state(&self, state: &mut ProviderState) -> Result<(), ProviderError> {
        let wrap = device_wrap_key(&state.device);
        let mut blob = PersistedShares::new();
        for share in state.registry.shares() {
            let sealed = wrap.seal(&share.team.keyring())?;
            blob.insert(
                share.id,
                PersistedShare {
                    encrypted_team: share.team.save(),
                    encrypted_team_keys: sealed,
                },
            );
        }
        let bytes = blob.encode()?;
        let count = blob.len();
        let store = state.share_store.clone();
        store.save_shares(bytes).await?;
        tracing::debug!(shares = count, "share state persisted");
        Ok(())
    }

    async fn handle_base_event(&self, adapter_id: AdapterId, event: BaseEvent) {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        match event {
            BaseEvent::Ready => {
                if let Some(adapter) = state.adapters.get(&adapter_id) {
                    let _ = adapter.outward.send(AdapterEvent::Ready);
                }
            }
            BaseEvent::Closed => {
                let Some(mut adapter) = state.adapters.remove(&adapter_id) else {
                    return;
                };
                state.registry.drop_adapter(adapter_id);
                tracing::info!(%adapter_id, "base adapter closed; dropping its sessions");
                for ((share_id, peer_id), mut session) in adapter.sessions.drain() {
                    session.close();
                    self.emit(AuthEvent::Disconnected {
                        share_id,
                        peer_id,
                        reason: "base adapter closed".into(),
                    });
                }
                let _ = adapter.outward.send(AdapterEvent::Closed);
            }
            BaseEvent::PeerCandidate { peer_id } => {
                if state.registry.add_peer(adapter_id, peer_id.clone()) {
                    tracing::debug!(peer = %peer_id, %adapter_id, "peer appeared");
                }
                let mut queue = EngineQueue::new();
                state.open_missing_sessions(adapter_id, &mut queue);
                self.pump(state, queue, false).await;
            }
            BaseEvent::PeerDisconnected { peer_id } => {
                state.registry.remove_peer(adapter_id, &peer_id);
                let mut ended: Vec<(ShareId, PeerId)> = Vec::new();
                if let Some(adapter) = state.adapters.get_mut(&adapter_id) {
                    adapter.announced.remove(&peer_id);
                    adapter.pending.discard_peer(&peer_id);
                    let keys: Vec<(ShareId, PeerId)> = adapter
                        .sessions
                        .keys()
                        .filter(|(_, p)| p == &peer_id)
                        .cloned()
                        .collect();
                    for key in keys {
                        if let Some(mut session) = adapter.sessions.remove(&key) {
                            session.close();
                            ended.push(key);
                        }
                    }
                    let _ = adapter.outward.send(AdapterEvent::PeerDisconnected {
                        peer_id: peer_id.clone(),
                    });
                }
                for (share_id, peer_id) in ended {
                    self.emit(AuthEvent::Disconnected {
                        share_id,
                        peer_id,
                        reason: "peer disconnected".into(),
                    });
                }
            }
            BaseEvent::Message { bytes } => self.handle_frame(state, adapter_id, bytes).await,
            BaseEvent::Error { peer_id, reason } => {
                if let Some(adapter) = state.adapters.get(&adapter_id) {
                    let _ = adapter.outward.send(AdapterEvent::Error { peer_id, reason });
                }
            }
        }
    }

    async fn handle_frame(&self, state: &mut ProviderState, adapter_id: AdapterId, bytes: Vec<u8>) {
        let frame = match classify(&bytes) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::debug!("dropping invalid frame: {e}");
                return;
            }
        };
        match frame {
            InboundFrame::Auth { sender_id, payload } => {
                let share_id = payload.share_id;
                let events = {
                    let Some(adapter) = state.adapters.get_mut(&adapter_id) else {
                        return;
                    };
                    match adapter.sessions.get_mut(&(share_id, sender_id.clone())) {
                        Some(session) => {
                            Some(session.deliver(&payload.serialized_connection_message))
                        }
                        None => {
                            match adapter.pending.push(
                                share_id,
                                sender_id.clone(),
                                payload.serialized_connection_message,
                            ) {
                                Ok(()) => {
                                    tracing::debug!(share = %share_id, peer = %sender_id, "buffered handshake payload for a future session")
                                }
                                Err(e) => {
                                    tracing::warn!(peer = %sender_id, "{e}; dropping handshake payload")
                                }
                            }
                            None
                        }
                    }
                };
                if let Some(events) = events {
                    let queue: EngineQueue = events
                        .into_iter()
                        .map(|event| (adapter_id, share_id, sender_id.clone(), event))
                        .collect();
                    self.pump(state, queue, false).await;
                }
            }
            InboundFrame::Encrypted {
                sender_id,
                share_id,
                encrypted_message,
            } => {
                let Some(adapter) = state.adapters.get(&adapter_id) else {
                    return;
                };
                let opened = adapter
                    .sessions
                    .get(&(share_id, sender_id.clone()))
                    .and_then(|session| session.session_key())
                    .map(|key| key.open(&encrypted_message));
                match opened {
                    None => {
                        tracing::warn!(share = %share_id, peer = %sender_id, "encrypted frame without a connected session");
                        let _ = adapter.outward.send(AdapterEvent::Error {
                            peer_id: Some(sender_id),
                            reason: "no authenticated session for share".into(),
                        });
                    }
                    Some(Err(e)) => {
                        tracing::warn!(share = %share_id, peer = %sender_id, "decryption failed: {e}");
                        let _ = adapter.outward.send(AdapterEvent::Error {
                            peer_id: Some(sender_id),
                            reason: format!("decryption failed: {e}"),
                        });
                    }
                    Some(Ok(plaintext)) => {
                        let _ = adapter.outward.send(AdapterEvent::Message {
                            sender_id,
                            bytes: plaintext,
                        });
                    }
                }
            }
            InboundFrame::PassThrough { header, bytes } => {
                if let Some(adapter) = state.adapters.get(&adapter_id) {
                    let _ = adapter.outward.send(AdapterEvent::Message {
                        sender_id: header.sender_id,
                        bytes,
                    });
                }
            }
        }
    }

    async fn send_repo_message(&self, adapter_id: AdapterId, message: RepoMessage) {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        let Some(adapter) = state.adapters.get(&adapter_id) else {
            tracing::warn!("send on a closed authenticated adapter");
            return;
        };
        let outward = adapter.outward.clone();
        let base = adapter.base.clone();
        let target = message.target_id.clone();

        let mut candidates = Vec::new();
        for ((share_id, peer_id), session) in &adapter.sessions {
            if peer_id == &target {
                if let Some(key) = session.session_key() {
                    candidates.push(Candidate {
                        share_id: *share_id,
                        key: key.as_bytes().to_vec(),
                    });
                }
            }
        }
        let document_shares = message
            .document_id
            .as_ref()
            .map(|doc| state.registry.shares_with_document(doc))
            .unwrap_or_default();

        let Some(share_id) = select_share(&candidates, &document_shares).map(|c| c.share_id)
        else {
            tracing::warn!(peer = %target, "no share for peer");
            let _ = outward.send(AdapterEvent::Error {
                peer_id: Some(target),
                reason: "no share for peer".into(),
            });
            return;
        };
        let Some(key) = adapter
            .sessions
            .get(&(share_id, target.clone()))
            .and_then(|session| session.session_key())
            .cloned()
        else {
            let _ = outward.send(AdapterEvent::Error {
                peer_id: Some(target),
                reason: "no share for peer".into(),
            });
            return;
        };

        let sealed = match message
            .to_bytes()
            .map_err(ProviderError::from)
            .and_then(|plain| key.seal(&plain).map_err(ProviderError::from))
        {
            Ok(sealed) => sealed,
            Err(e) => {
                tracing::warn!(peer = %target, "sealing outbound message failed: {e}");
                let _ = outward.send(AdapterEvent::Error {
                    peer_id: Some(target),
                    reason: format!("sealing outbound message failed: {e}"),
                });
                return;
            }
        };
        let frame = WireFrame::Encrypted {
            sender_id: base.peer_id(),
            target_id: target.clone(),
            share_id,
            encrypted_message: sealed,
        };
        let bytes = match frame.to_bytes() {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(peer = %target, "encrypted frame encoding failed: {e}");
                let _ = outward.send(AdapterEvent::Error {
                    peer_id: Some(target),
                    reason: format!("encrypted frame encoding failed: {e}"),
                });
                return;
            }
        };
        if let Err(e) = base.send(bytes).await {
            tracing::warn!(peer = %target, "encrypted frame not delivered: {e}");
            let _ = outward.send(AdapterEvent::Error {
                peer_id: Some(target),
                reason: format!("send failed: {e}"),
            });
        }
    }
}

/// The authenticated transport-wrapping provider.
pub struct AuthProvider {
    shared: Arc<Shared>,
}

impl AuthProvider {
    /// Create a provider and schedule an asynchronous load of persisted
    /// state. Returns immediately; no handshake is attempted until
    /// [`wrap`](AuthProvider::wrap) is called.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(
        config: ProviderConfig,
        library: Arc<dyn AuthLibrary>,
        store: Arc<dyn Store>,
    ) -> Self {
        let (outward_tx, outward_rx) = mpsc::unbounded_channel();
        let (loaded_tx, _) = watch::channel(false);
        let shared = Arc::new(Shared {
            state: Mutex::new(ProviderState {
                device: config.device,
                user: config.user,
                library,
                share_store: ShareStore::new(store),
                registry: ShareRegistry::new(),
                adapters: HashMap::new(),
                next_adapter: 0,
            }),
            outward: outward_tx,
            outward_rx: StdMutex::new(Some(outward_rx)),
            loaded: loaded_tx,
        });

        let weak = Arc::downgrade(&shared);
        tokio::spawn(async move {
            if let Some(shared) = weak.upgrade() {
                shared.load_persisted().await;
            }
        });

        Self { shared }
    }

    /// Wait until the persisted-state load scheduled at construction
    /// has finished (successfully or not).
    pub async fn loaded(&self) {
        let mut rx = self.shared.loaded.subscribe();
        let _ = rx.wait_for(|done| *done).await;
    }

    /// Take the provider's outward event stream. Yields `None` on a
    /// second call.
    pub fn events(&self) -> Option<mpsc::UnboundedReceiver<AuthEvent>> {
        self.shared.outward_rx.lock().unwrap().take()
    }

    /// Wrap a base adapter into an authenticated one.
    ///
    /// Each call produces a distinct wrapper with its own sessions and
    /// peer namespace. The wrapper's event pump holds only a weak
    /// reference to the provider, so dropping the provider stops it.
    pub async fn wrap(&self, base: Arc<dyn NetworkAdapter>) -> AuthenticatedAdapter {
        let (outward_tx, outward_rx) = mpsc::unbounded_channel();
        let adapter_id = {
            let mut state = self.shared.state.lock().await;
            let adapter_id = AdapterId::new(state.next_adapter);
            state.next_adapter += 1;
            state.adapters.insert(
                adapter_id,
                AdapterState {
                    base: base.clone(),
                    outward: outward_tx,
                    sessions: HashMap::new(),
                    pending: PendingBuffer::new(DEFAULT_PENDING_CAPACITY),
                    announced: BTreeSet::new(),
                },
            );
            adapter_id
        };
        tracing::info!(%adapter_id, "wrapped base adapter");

        let weak = Arc::downgrade(&self.shared);
        tokio::spawn(async move {
            while let Some(event) = base.next_event().await {
                let Some(shared) = weak.upgrade() else {
                    return;
                };
                let closed = matches!(event, BaseEvent::Closed);
                shared.handle_base_event(adapter_id, event).await;
                if closed {
                    return;
                }
            }
            // The event stream ended without an explicit close.
            if let Some(shared) = weak.upgrade() {
                shared.handle_base_event(adapter_id, BaseEvent::Closed).await;
            }
        });

        AuthenticatedAdapter {
            adapter_id,
            shared: Arc::clone(&self.shared),
            events: outward_rx,
        }
    }

    /// Admit a team as a share and open sessions toward every known
    /// peer on every wrapped adapter. Idempotent; a second admission of
    /// the same share changes nothing. Persists state when newly
    /// admitted.
    pub async fn add_team(&self, team: Arc<dyn Team>) {
        let mut guard = self.shared.state.lock().await;
        let state = &mut *guard;
        let mut queue = EngineQueue::new();
        let admitted = state.admit_team(team, &mut queue);
        self.shared.pump(state, queue, admitted).await;
    }

    /// Record a pending invitation and open joining sessions toward
    /// every known peer. Nothing is persisted until the join succeeds.
    pub async fn add_invitation(&self, invitation: Invitation) {
        let mut guard = self.shared.state.lock().await;
        let state = &mut *guard;
        let share_id = invitation.share_id();
        if !state.registry.add_invitation(invitation) {
            tracing::warn!(share = %share_id, "invitation ignored: share already admitted");
            return;
        }
        tracing::info!(share = %share_id, "invitation recorded");
        let mut queue = EngineQueue::new();
        let adapters: Vec<AdapterId> = state.adapters.keys().copied().collect();
        for adapter_id in adapters {
            state.open_missing_sessions(adapter_id, &mut queue);
        }
        self.shared.pump(state, queue, false).await;
    }

    /// Add document ids to a share. Pure mutation; emits no network
    /// traffic. Returns false if the share is unknown.
    pub async fn add_documents(&self, share_id: &ShareId, documents: Vec<DocumentId>) -> bool {
        self.shared
            .state
            .lock()
            .await
            .registry
            .add_documents(share_id, documents)
    }

    /// Remove document ids from a share. Pure mutation; emits no
    /// network traffic. Returns false if the share is unknown.
    pub async fn remove_documents(&self, share_id: &ShareId, documents: &[DocumentId]) -> bool {
        self.shared
            .state
            .lock()
            .await
            .registry
            .remove_documents(share_id, documents)
    }

    /// The local user identity, once known.
    pub async fn user(&self) -> Option<UserIdentity> {
        self.shared.state.lock().await.user.clone()
    }
}

/// The virtual adapter handed to the repository.
///
/// Presents the same surface as a base adapter: lifecycle events,
/// inbound messages, and a send operation. Peers only ever appear here
/// after authenticating for at least one share, and all repository
/// traffic is sealed on the wire.
pub struct AuthenticatedAdapter {
    adapter_id: AdapterId,
    shared: Arc<Shared>,
    events: mpsc::UnboundedReceiver<AdapterEvent>,
}

impl AuthenticatedAdapter {
    /// This wrapper's id within its provider.
    pub fn id(&self) -> AdapterId {
        self.adapter_id
    }

    /// Wait for the next adapter event. Returns `None` once the
    /// underlying adapter closed and the queue is drained.
    pub async fn next_event(&mut self) -> Option<AdapterEvent> {
        self.events.recv().await
    }

    /// Send a repository message to the peer named by its `targetId`.
    ///
    /// The message is sealed under the session key of the selected
    /// share. Failures (no authenticated share for the peer, transport
    /// refusal) surface as [`AdapterEvent::Error`] rather than errors
    /// on this call.
    pub async fn send(&self, message: RepoMessage) {
        self.shared.send_repo_message(self.adapter_id, message).await;
    }
}

impl std::fmt::Debug for AuthenticatedAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthenticatedAdapter")
            .field("adapter_id", &self.adapter_id)
            .finish()
    }
}
