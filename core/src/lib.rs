//! `mapstore` core -- value codec, key serialization, and clock abstraction.
//!
//! This crate provides the leaf layer for the `mapstore` distributed map
//! engine:
//!
//! - **Codec** ([`codec`]): pluggable [`codec::ValueCodec`] with JSON and
//!   length-prefixed binary implementations.
//! - **Key** ([`key`]): canonical [`key::KeySerializer`] used as field
//!   identifiers and sorted-set members in the remote store.
//! - **Clock** ([`clock`]): [`clock::ClockSource`] abstraction so the engine's
//!   schedulers can be driven deterministically in tests.
//! - **Error** ([`error`]): shared [`error::CodecError`] type.

pub mod clock;
pub mod codec;
pub mod error;
pub mod key;

pub use clock::{ClockSource, SystemClock, VirtualClock, TICKS_PER_SECOND};
pub use codec::bytes_codec::BytesCodec;
pub use codec::json_codec::JsonCodec;
pub use codec::ValueCodec;
pub use error::CodecError;
pub use key::{JsonKeySerializer, KeySerializer};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crate_loads() {
        let _ = SystemClock;
        let _codec: JsonCodec<String> = JsonCodec::new();
        let _key: JsonKeySerializer<String> = JsonKeySerializer::new();
    }
}
