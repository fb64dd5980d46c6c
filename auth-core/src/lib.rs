//! # vouch-auth-core
//!
//! Pure, I/O-free logic for the Vouch authenticated sync layer:
//! - [`PendingBuffer`] - handshake payloads received before their
//!   session exists
//! - [`ShareRegistry`] - known shares, pending invitations, per-adapter
//!   peers
//! - [`select_share`] - deterministic outbound share selection
//! - [`PersistedShares`] - the encrypted at-rest share map
//!
//! Everything here is synchronous and side-effect free; the provider
//! crate drives it and performs the actual I/O.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod buffer;
mod persist;
mod registry;
mod select;

pub use buffer::{BufferError, PendingBuffer, DEFAULT_PENDING_CAPACITY};
pub use persist::{PersistError, PersistedShare, PersistedShares};
pub use registry::{Share, ShareRegistry};
pub use select::{select_share, Candidate};
