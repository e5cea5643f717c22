//! Pluggable value serialization.
//!
//! The engine is generic over a value type `V` and never assumes a specific
//! wire format; it only requires a [`ValueCodec<V>`]. Two concrete codecs are
//! provided: [`json_codec::JsonCodec`] (default, human-readable) and
//! [`bytes_codec::BytesCodec`] (length-prefixed binary, for types that ship a
//! compact wire format).

pub mod bytes_codec;
pub mod json_codec;

use crate::error::CodecError;

/// Encodes/decodes values of type `V` to and from bytes for storage in the
/// remote map, and renders a value to a human-readable string for display.
pub trait ValueCodec<V>: Send + Sync {
    /// Serializes a value to bytes for storage.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Encode`] if serialization fails. A codec error
    /// on `Set` means the set is considered not to have happened.
    fn encode(&self, value: &V) -> Result<Vec<u8>, CodecError>;

    /// Deserializes bytes read from storage back into a value.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Decode`] if the bytes cannot be parsed as `V`.
    /// Decode failures during enumeration/streaming/pagination are per-entry
    /// skips, never fatal.
    fn decode(&self, bytes: &[u8]) -> Result<V, CodecError>;

    /// Renders a value as a human-readable string, for diagnostics and the
    /// pagination "time ago"-style displays.
    fn display(&self, value: &V) -> String;
}
