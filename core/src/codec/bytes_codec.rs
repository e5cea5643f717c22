//! Length-prefixed binary codec, for value types that ship a compact wire
//! format instead of JSON.
//!
//! Layout: an 8-byte little-endian length prefix followed by the `bincode`
//! payload. The prefix is redundant with what `bincode` itself tracks
//! internally for most types, but keeping it explicit lets future framing
//! (e.g. concatenating multiple encoded values) reuse this codec unchanged.

use std::marker::PhantomData;

use bytes::{Buf, BufMut, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::codec::ValueCodec;
use crate::error::CodecError;

/// Length-prefixed binary codec for any `V: Serialize + DeserializeOwned`.
pub struct BytesCodec<V> {
    _marker: PhantomData<fn() -> V>,
}

impl<V> BytesCodec<V> {
    /// Creates a new binary codec.
    #[must_use]
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<V> Default for BytesCodec<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> ValueCodec<V> for BytesCodec<V>
where
    V: Serialize + DeserializeOwned + Send + Sync,
{
    fn encode(&self, value: &V) -> Result<Vec<u8>, CodecError> {
        let payload =
            bincode::serialize(value).map_err(|e| CodecError::Encode(e.to_string()))?;
        let mut buf = BytesMut::with_capacity(8 + payload.len());
        buf.put_u64_le(payload.len() as u64);
        buf.put_slice(&payload);
        Ok(buf.to_vec())
    }

    fn decode(&self, bytes: &[u8]) -> Result<V, CodecError> {
        if bytes.len() < 8 {
            return Err(CodecError::Decode("buffer shorter than length prefix".to_string()));
        }
        let mut cursor = bytes;
        let len = cursor.get_u64_le() as usize;
        if cursor.len() < len {
            return Err(CodecError::Decode(
                "buffer shorter than declared payload length".to_string(),
            ));
        }
        bincode::deserialize(&cursor[..len]).map_err(|e| CodecError::Decode(e.to_string()))
    }

    fn display(&self, value: &V) -> String {
        match self.encode(value) {
            Ok(bytes) => format!("<{} bytes>", bytes.len()),
            Err(_) => "<unencodable>".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Point {
        x: i32,
        y: i32,
    }

    #[test]
    fn roundtrips_struct() {
        let codec: BytesCodec<Point> = BytesCodec::new();
        let point = Point { x: -3, y: 42 };
        let bytes = codec.encode(&point).unwrap();
        assert_eq!(codec.decode(&bytes).unwrap(), point);
    }

    #[test]
    fn rejects_truncated_buffer() {
        let codec: BytesCodec<Point> = BytesCodec::new();
        assert!(codec.decode(&[0, 1, 2]).is_err());
    }

    #[test]
    fn rejects_short_payload() {
        let codec: BytesCodec<Point> = BytesCodec::new();
        let mut buf = BytesMut::new();
        buf.put_u64_le(100);
        buf.put_slice(&[1, 2, 3]);
        assert!(codec.decode(&buf).is_err());
    }
}
