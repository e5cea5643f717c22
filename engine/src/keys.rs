//! Backing key layout in the remote store.
//!
//! Exact, stable, and case-sensitive. Every name containing the metadata
//! separator `:__meta:` is internal and must never be surfaced by any
//! externally visible listing.

/// Substring marking a store key as engine-internal metadata.
pub const META_SEPARATOR: &str = ":__meta:";

/// `map:<N>` -- the authoritative data hash.
#[must_use]
pub fn data_key(map_name: &str) -> String {
    format!("map:{map_name}")
}

/// `map:<N>:__meta:versions` -- change-detection tokens, one per key.
#[must_use]
pub fn versions_key(map_name: &str) -> String {
    format!("map:{map_name}:__meta:versions")
}

/// `map:<N>:__meta:timestamps` -- legacy last-modified hash, dual-written.
#[must_use]
pub fn timestamps_key(map_name: &str) -> String {
    format!("map:{map_name}:__meta:timestamps")
}

/// `map:<N>:__meta:timestamps-sorted` -- primary time index for batching.
#[must_use]
pub fn timestamps_sorted_key(map_name: &str) -> String {
    format!("map:{map_name}:__meta:timestamps-sorted")
}

/// `map:<N>:__meta:timestamps:last-batch` -- cursor of the last fired batch.
#[must_use]
pub fn last_batch_key(map_name: &str) -> String {
    format!("map:{map_name}:__meta:timestamps:last-batch")
}

/// `map:<N>:__meta:ttl-config` -- persisted per-item inactivity timeout.
#[must_use]
pub fn ttl_config_key(map_name: &str) -> String {
    format!("map:{map_name}:__meta:ttl-config")
}

/// `map:<N>:access-time` -- last read-or-write instant, used by the
/// Expiration Sweeper. Deliberately NOT under `:__meta:`: it sits alongside
/// the data hash rather than being pure bookkeeping.
#[must_use]
pub fn access_time_key(map_name: &str) -> String {
    format!("map:{map_name}:access-time")
}

/// Returns `true` if `name` should be hidden from any externally visible
/// listing of map names.
#[must_use]
pub fn is_internal_name(name: &str) -> bool {
    name.contains(META_SEPARATOR)
}
