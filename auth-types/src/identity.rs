//! Device and user identities.
//!
//! A device identity is supplied at provider construction and never
//! changes. A user identity may be absent initially (a new device joining
//! through an invitation) and is set when the handshake completes.

use ed25519_dalek::SigningKey;
use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::Zeroize;

use crate::{DeviceId, UserId};

/// An ed25519 secret key (32 bytes of seed material).
///
/// The secret is zeroized on drop and never appears in Debug output.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretKey([u8; 32]);

impl SecretKey {
    /// Create a SecretKey from raw bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes of this key.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretKey([REDACTED])")
    }
}

impl Drop for SecretKey {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

/// An ed25519 public key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PublicKey([u8; 32]);

impl PublicKey {
    /// Create a PublicKey from raw bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes of this key.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
        write!(f, "{}", URL_SAFE_NO_PAD.encode(self.0))
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", &self.to_string()[..8])
    }
}

/// An ed25519 keypair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Keypair {
    /// The public half.
    pub public: PublicKey,
    /// The secret half.
    pub secret: SecretKey,
}

impl Keypair {
    /// Generate a new random keypair.
    pub fn generate() -> Self {
        let mut seed = [0u8; 32];
        getrandom::getrandom(&mut seed).expect("getrandom failed");
        Self::from_secret_bytes(seed)
    }

    /// Rebuild a keypair from its secret seed.
    pub fn from_secret_bytes(seed: [u8; 32]) -> Self {
        let signing = SigningKey::from_bytes(&seed);
        Self {
            public: PublicKey(signing.verifying_key().to_bytes()),
            secret: SecretKey(seed),
        }
    }
}

/// The identity of this device: its id, keypair, and owning user id.
///
/// Supplied at provider construction; immutable afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    /// The device's own id.
    pub device_id: DeviceId,
    /// The id of the user this device belongs to.
    pub user_id: UserId,
    /// The device keypair.
    pub keys: Keypair,
}

impl DeviceIdentity {
    /// Create a device identity with a freshly generated keypair.
    pub fn new(device_id: DeviceId, user_id: UserId) -> Self {
        Self {
            device_id,
            user_id,
            keys: Keypair::generate(),
        }
    }
}

/// The identity of a user: their id and keypair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    /// The user's id.
    pub user_id: UserId,
    /// The user keypair.
    pub keys: Keypair,
}

impl UserIdentity {
    /// Create a user identity with a freshly generated keypair.
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            keys: Keypair::generate(),
        }
    }
}
