//! Default value codec: JSON text, human-readable in the store.

use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::codec::ValueCodec;
use crate::error::CodecError;

/// JSON codec for any `V: Serialize + DeserializeOwned`.
///
/// This is the default codec: values are stored as UTF-8 JSON text, which
/// keeps the remote store's contents inspectable with any generic Redis
/// client or CLI.
pub struct JsonCodec<V> {
    _marker: PhantomData<fn() -> V>,
}

impl<V> JsonCodec<V> {
    /// Creates a new JSON codec.
    #[must_use]
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<V> Default for JsonCodec<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> ValueCodec<V> for JsonCodec<V>
where
    V: Serialize + DeserializeOwned + Send + Sync,
{
    fn encode(&self, value: &V) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(value).map_err(|e| CodecError::Encode(e.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> Result<V, CodecError> {
        serde_json::from_slice(bytes).map_err(|e| CodecError::Decode(e.to_string()))
    }

    fn display(&self, value: &V) -> String {
        serde_json::to_string(value).unwrap_or_else(|_| "<unserializable>".to_string())
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Widget {
        id: u32,
        name: String,
    }

    #[test]
    fn roundtrips_struct() {
        let codec: JsonCodec<Widget> = JsonCodec::new();
        let widget = Widget {
            id: 7,
            name: "gear".to_string(),
        };
        let bytes = codec.encode(&widget).unwrap();
        let decoded = codec.decode(&bytes).unwrap();
        assert_eq!(widget, decoded);
    }

    #[test]
    fn decode_error_on_garbage() {
        let codec: JsonCodec<Widget> = JsonCodec::new();
        assert!(codec.decode(b"not json").is_err());
    }

    #[test]
    fn display_renders_json_text() {
        let codec: JsonCodec<Widget> = JsonCodec::new();
        let widget = Widget {
            id: 1,
            name: "x".to_string(),
        };
        assert_eq!(codec.display(&widget), r#"{"id":1,"name":"x"}"#);
    }
}
