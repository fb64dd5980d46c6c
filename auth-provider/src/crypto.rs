//! Symmetric sealing for session traffic and the persisted keyring.
//!
//! XChaCha20-Poly1305 with 192-bit nonces; the random nonce is prepended
//! to the ciphertext so sealed payloads are self-describing. Keys are
//! derived with HKDF-SHA256 under a domain-separation salt.

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use hkdf::Hkdf;
use sha2::Sha256;
use thiserror::Error;
use zeroize::Zeroize;

/// Key size for XChaCha20-Poly1305 (256 bits = 32 bytes).
pub const KEY_SIZE: usize = 32;

/// Nonce size for XChaCha20-Poly1305 (192 bits = 24 bytes).
pub const NONCE_SIZE: usize = 24;

const HKDF_SALT: &[u8] = b"vouch-auth-seal-v1";

/// Crypto errors.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Encryption failed.
    #[error("encryption failed: {0}")]
    EncryptionFailed(String),

    /// Decryption failed (authentication error).
    #[error("decryption failed: authentication error")]
    DecryptionFailed,

    /// The sealed payload is too short to hold a nonce.
    #[error("sealed payload too short")]
    Malformed,
}

/// A 256-bit symmetric key that can seal and open byte payloads.
///
/// Used both for session traffic (the key a handshake produces) and for
/// wrapping the team keyring under the device secret.
#[derive(Clone, PartialEq, Eq)]
pub struct SealKey([u8; KEY_SIZE]);

impl SealKey {
    /// Create a key from raw bytes.
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Create a random key.
    pub fn random() -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        getrandom::getrandom(&mut bytes).expect("getrandom failed");
        Self(bytes)
    }

    /// Derive a key from input key material via HKDF-SHA256.
    pub fn derive(ikm: &[u8], info: &[u8]) -> Self {
        let hkdf = Hkdf::<Sha256>::new(Some(HKDF_SALT), ikm);
        let mut out = [0u8; KEY_SIZE];
        hkdf.expand(info, &mut out).expect("hkdf expand failed");
        Self(out)
    }

    /// Get the raw key bytes (used for deterministic share selection).
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }

    /// Seal a payload. Returns `nonce || ciphertext`.
    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        getrandom::getrandom(&mut nonce_bytes).expect("getrandom failed");
        let nonce = XNonce::from_slice(&nonce_bytes);

        let cipher = XChaCha20Poly1305::new_from_slice(&self.0)
            .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;
        let ciphertext = cipher
            .encrypt(nonce, plaintext)
            .map_err(|_| CryptoError::EncryptionFailed("aead encrypt failed".into()))?;

        let mut out = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Open a payload sealed by [`SealKey::seal`].
    pub fn open(&self, sealed: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if sealed.len() < NONCE_SIZE {
            return Err(CryptoError::Malformed);
        }
        let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_SIZE);
        let nonce = XNonce::from_slice(nonce_bytes);

        let cipher = XChaCha20Poly1305::new_from_slice(&self.0)
            .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;
        cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| CryptoError::DecryptionFailed)
    }
}

// Don't leak key material in debug output
impl std::fmt::Debug for SealKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SealKey([REDACTED])")
    }
}

impl Drop for SealKey {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_open_roundtrip() {
        let key = SealKey::random();
        let plaintext = b"hello, share";

        let sealed = key.seal(plaintext).unwrap();
        assert!(sealed.len() > NONCE_SIZE);

        let opened = key.open(&sealed).unwrap();
        assert_eq!(opened, plaintext);
    }

    #[test]
    fn sealing_twice_differs() {
        let key = SealKey::random();
        let a = key.seal(b"same").unwrap();
        let b = key.seal(b"same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn wrong_key_fails_to_open() {
        let sealed = SealKey::random().seal(b"secret").unwrap();
        let result = SealKey::random().open(&sealed);
        assert!(matches!(result, Err(CryptoError::DecryptionFailed)));
    }

    #[test]
    fn corrupted_payload_fails_to_open() {
        let key = SealKey::random();
        let mut sealed = key.seal(b"secret").unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0xFF;
        assert!(key.open(&sealed).is_err());
    }

    #[test]
    fn short_payload_is_malformed() {
        let key = SealKey::random();
        assert!(matches!(key.open(&[0u8; 5]), Err(CryptoError::Malformed)));
    }

    #[test]
    fn empty_plaintext_seals() {
        let key = SealKey::random();
        let sealed = key.seal(b"").unwrap();
        assert_eq!(key.open(&sealed).unwrap(), b"");
    }

    #[test]
    fn derivation_is_deterministic() {
        let a = SealKey::derive(b"ikm", b"info");
        let b = SealKey::derive(b"ikm", b"info");
        assert_eq!(a, b);
    }

    #[test]
    fn derivation_separates_by_info() {
        let a = SealKey::derive(b"ikm", b"one");
        let b = SealKey::derive(b"ikm", b"two");
        assert_ne!(a, b);
    }

    #[test]
    fn debug_is_redacted() {
        let key = SealKey::random();
        assert!(format!("{:?}", key).contains("REDACTED"));
    }
}
