//! Shared error types used by both the codec and key-serialization layers.

use thiserror::Error;

/// Failure encoding or decoding a value or key through a [`crate::codec::ValueCodec`]
/// or [`crate::key::KeySerializer`].
#[derive(Debug, Error)]
pub enum CodecError {
    /// The value could not be serialized.
    #[error("encode failed: {0}")]
    Encode(String),
    /// The byte payload could not be deserialized into the target type.
    #[error("decode failed: {0}")]
    Decode(String),
}
