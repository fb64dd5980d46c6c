//! # vouch-auth-provider
//!
//! Authenticated, encrypted transport wrapping for peer-to-peer document
//! sync. The provider sits between a sync repository and its network
//! adapters: it runs a mutual-authentication handshake per (share, peer)
//! pair, announces peers upward only after they authenticate, seals all
//! repository traffic under per-session keys, and persists team state
//! (encrypted at rest) across restarts.
//!
//! ```ignore
//! use vouch_auth_provider::{AuthProvider, MemoryStore, ProviderConfig};
//!
//! let provider = AuthProvider::new(config, library, store);
//! let mut adapter = provider.wrap(base_adapter).await;
//!
//! // The repository consumes `adapter` exactly like an unwrapped one:
//! while let Some(event) = adapter.next_event().await {
//!     // peer candidates appear only after authentication
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod adapter;
pub mod crypto;
pub mod engine;
pub mod provider;
pub mod session;
pub mod store;

pub use adapter::memory::{MemoryAdapter, MemoryHub};
pub use adapter::{AdapterError, BaseEvent, NetworkAdapter};
pub use crypto::{CryptoError, SealKey, KEY_SIZE, NONCE_SIZE};
pub use engine::mock::{MockAuthLibrary, MockTeam};
pub use engine::{
    AuthLibrary, Connection, ConnectionEvent, EngineError, SessionContext, Team,
};
pub use provider::{
    AdapterEvent, AuthEvent, AuthProvider, AuthenticatedAdapter, ProviderConfig, ProviderError,
};
pub use session::{Session, SessionPhase};
pub use store::{MemoryStore, ShareStore, Store, StoreError, SHARES_KEY};
