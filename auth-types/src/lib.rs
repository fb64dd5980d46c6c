//! # vouch-auth-types
//!
//! Shared types for the Vouch authenticated sync layer:
//! - [`ShareId`], [`PeerId`], [`DeviceId`], [`UserId`], [`DocumentId`],
//!   [`AdapterId`] - identifier newtypes
//! - [`DeviceIdentity`], [`UserIdentity`], [`Keypair`] - identities
//! - [`WireFrame`], [`InboundFrame`], [`classify`] - wire frames and the
//!   inbound classifier
//! - [`RepoMessage`] - the plaintext repository message
//! - [`Invitation`] - pending share invitations
//! - [`WireError`] - codec errors

#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
mod frame;
mod identity;
mod ids;
mod invitation;
mod message;

pub use error::WireError;
pub use frame::{
    classify, AuthPayload, FrameHeader, InboundFrame, WireFrame, FRAME_TYPE_AUTH,
    FRAME_TYPE_ENCRYPTED,
};
pub use identity::{DeviceIdentity, Keypair, PublicKey, SecretKey, UserIdentity};
pub use ids::{AdapterId, DeviceId, DocumentId, PeerId, ShareId, UserId};
pub use invitation::{Invitation, InvitationSecret};
pub use message::RepoMessage;
