//! Canonical key encoding.
//!
//! Keys are serialized to a stable byte sequence used as the field name in
//! every metadata hash and as the member in every sorted set. The encoding
//! must be deterministic and stable across processes so that metadata
//! written by one process is addressable by another.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::CodecError;

/// Canonical, cross-process-stable byte encoding of a key type `K`.
///
/// A fixed-option JSON encoding (no indentation, no field renaming) satisfies
/// this for the key types used in practice -- strings and integers -- since
/// `serde_json`'s output for those types is already canonical (a bare string
/// or a bare number, with no map-ordering ambiguity to worry about).
pub trait KeySerializer<K>: Send + Sync {
    /// Encodes a key to its canonical byte representation.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Encode`] if the key cannot be serialized.
    fn encode(&self, key: &K) -> Result<Vec<u8>, CodecError>;

    /// Decodes a key back from a field name or sorted-set member previously
    /// produced by `encode`. Needed wherever the engine enumerates a map and
    /// must hand typed keys back to the caller (listings, streaming, batch
    /// entries).
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Decode`] if the bytes cannot be parsed as `K`.
    fn decode(&self, bytes: &[u8]) -> Result<K, CodecError>;

    /// Renders a key as a display string, e.g. for pattern-matching in
    /// paginated search.
    fn display(&self, key: &K) -> String;
}

/// Default [`KeySerializer`] for any `K: Serialize`.
///
/// Uses `serde_json::to_vec`, which for strings and integers produces a
/// canonical byte sequence (e.g. `"abc"` or `42`) with no configuration
/// needed beyond the absence of pretty-printing.
pub struct JsonKeySerializer<K> {
    _marker: std::marker::PhantomData<fn() -> K>,
}

impl<K> JsonKeySerializer<K> {
    /// Creates a new canonical JSON key serializer.
    #[must_use]
    pub fn new() -> Self {
        Self {
            _marker: std::marker::PhantomData,
        }
    }
}

impl<K> Default for JsonKeySerializer<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K> KeySerializer<K> for JsonKeySerializer<K>
where
    K: Serialize + DeserializeOwned + Send + Sync,
{
    fn encode(&self, key: &K) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(key).map_err(|e| CodecError::Encode(e.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> Result<K, CodecError> {
        serde_json::from_slice(bytes).map_err(|e| CodecError::Decode(e.to_string()))
    }

    fn display(&self, key: &K) -> String {
        serde_json::to_string(key).unwrap_or_else(|_| "<unserializable key>".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_keys_are_stable_across_instances() {
        let a: JsonKeySerializer<String> = JsonKeySerializer::new();
        let b: JsonKeySerializer<String> = JsonKeySerializer::new();
        let key = "k1".to_string();
        assert_eq!(a.encode(&key).unwrap(), b.encode(&key).unwrap());
    }

    #[test]
    fn integer_keys_encode_as_bare_numbers() {
        let ser: JsonKeySerializer<u64> = JsonKeySerializer::new();
        assert_eq!(ser.encode(&42).unwrap(), b"42");
    }

    #[test]
    fn decode_reverses_encode() {
        let ser: JsonKeySerializer<String> = JsonKeySerializer::new();
        let key = "roundtrip-me".to_string();
        let bytes = ser.encode(&key).unwrap();
        assert_eq!(ser.decode(&bytes).unwrap(), key);
    }

    #[test]
    fn distinct_keys_encode_distinctly() {
        let ser: JsonKeySerializer<String> = JsonKeySerializer::new();
        assert_ne!(
            ser.encode(&"a".to_string()).unwrap(),
            ser.encode(&"b".to_string()).unwrap()
        );
    }
}
