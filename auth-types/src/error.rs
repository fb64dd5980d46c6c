//! Error types for wire encoding and classification.

use thiserror::Error;

/// Errors raised while encoding, decoding, or classifying wire data.
#[derive(Debug, Error)]
pub enum WireError {
    /// MessagePack serialization failed.
    #[error("serialization failed: {0}")]
    Serialization(#[source] rmp_serde::encode::Error),

    /// MessagePack deserialization failed.
    #[error("deserialization failed: {0}")]
    Deserialization(#[source] rmp_serde::decode::Error),

    /// The frame is not an object with a string `type` and `senderId`.
    #[error("invalid frame: {0}")]
    InvalidFrame(String),
}
