//! Error taxonomy for the Map Engine and Registry.

use thiserror::Error;

/// Errors surfaced by user-facing [`crate::map::MapEngine`] operations.
///
/// Transport errors surface here; "not found" on `Get` is represented as
/// `Ok(None)`, never as an error variant of this type.
#[derive(Debug, Error)]
pub enum MapError {
    /// The remote store could not be reached, timed out, or returned an
    /// unexpected response.
    #[error("store transport error: {0}")]
    Transport(#[from] anyhow::Error),

    /// A value failed to encode or decode. On `Set`, this means the set is
    /// considered not to have happened.
    #[error("codec error: {0}")]
    Codec(#[from] mapstore_core::CodecError),

    /// A registry lookup found an entry under a different `K`/`V` pair.
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),
}

/// Errors surfaced by the [`crate::registry::Registry`].
#[derive(Debug, Error)]
pub enum RegistryError {
    /// `Registry::get` was called for a name with no registered engine.
    #[error("map \"{name}\" is not registered")]
    NotRegistered {
        /// The requested map name.
        name: String,
    },

    /// An entry exists for `name` but was constructed with different `K`/`V`
    /// types than requested.
    #[error("map \"{name}\" is registered with different key/value types")]
    TypeMismatch {
        /// The requested map name.
        name: String,
    },
}
