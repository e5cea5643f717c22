//! Store Client: a thin facade over the remote store's hash, sorted-set,
//! string, and scan operations.
//!
//! The facade has no knowledge of value semantics -- it only moves bytes.
//! Everything above this layer (codecs, key serialization, TTL, batching)
//! lives in [`crate::map`].

pub mod memory_client;
pub mod redis_client;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

pub use memory_client::MemoryStoreClient;
pub use redis_client::RedisStoreClient;

/// A field-value pair scanned out of a hash.
pub type HashEntry = (Vec<u8>, Vec<u8>);

/// A member-score pair scanned out of a sorted set.
pub type SortedSetEntry = (Vec<u8>, f64);

/// Tracks how many [`ValueLease`]s are currently outstanding during a bulk
/// scan. A growing count under sustained load means decoded
/// values are being held longer than one scan page, which is the signal this
/// exists to surface.
#[derive(Debug, Default)]
pub struct LeaseTracker {
    outstanding: AtomicU64,
}

impl LeaseTracker {
    /// Creates a tracker with no outstanding leases.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current count of un-dropped leases.
    #[must_use]
    pub fn outstanding(&self) -> u64 {
        self.outstanding.load(Ordering::Relaxed)
    }

    /// Wraps `bytes` read during a scan pass, counting it against this
    /// tracker until the returned [`ValueLease`] is dropped.
    #[must_use]
    pub fn lease(self: &Arc<Self>, bytes: Vec<u8>) -> ValueLease {
        self.outstanding.fetch_add(1, Ordering::Relaxed);
        ValueLease {
            bytes,
            tracker: Arc::clone(self),
        }
    }
}

/// RAII guard over one value read during a bulk scan -- a "value lease" on
/// the zero-copy read path. Releases -- decrements its
/// [`LeaseTracker`] -- on every exit path, including a decode failure,
/// because release happens in `Drop` rather than at the end of a success
/// path. Same increment-on-construct, decrement-on-drop shape as an
/// in-flight-request guard.
pub struct ValueLease {
    bytes: Vec<u8>,
    tracker: Arc<LeaseTracker>,
}

impl ValueLease {
    /// Borrows the leased bytes.
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl Drop for ValueLease {
    fn drop(&mut self) {
        self.tracker.outstanding.fetch_sub(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod lease_tests {
    use super::*;

    #[test]
    fn lease_releases_on_drop_even_after_a_decode_failure() {
        let tracker = Arc::new(LeaseTracker::new());
        {
            let lease = tracker.lease(b"not json".to_vec());
            let decoded: Result<String, _> = serde_json::from_slice(lease.bytes());
            assert!(decoded.is_err());
            assert_eq!(tracker.outstanding(), 1);
        }
        assert_eq!(tracker.outstanding(), 0);
    }
}

/// Cursor-based hash scan result: the next cursor (0 means the scan is
/// complete) and the batch of entries returned by this pass.
pub struct ScanPage<T> {
    /// Cursor to pass to the next call. `0` signals the scan is exhausted.
    pub next_cursor: u64,
    /// Entries returned in this page.
    pub items: Vec<T>,
}

/// Thin, typed facade over the remote store's operations.
///
/// All operations are asynchronous from the Map Engine's viewpoint and
/// surface transport failures as `anyhow::Error`: transport errors are
/// surfaced to callers of user-facing operations, swallowed inside
/// sweepers.
#[async_trait]
pub trait StoreClient: Send + Sync + 'static {
    // --- Hash operations ---

    /// `HGET key field`.
    async fn hash_get(&self, key: &str, field: &[u8]) -> anyhow::Result<Option<Vec<u8>>>;

    /// `HSET key field value`.
    async fn hash_set(&self, key: &str, field: &[u8], value: &[u8]) -> anyhow::Result<()>;

    /// `HEXISTS key field`.
    async fn hash_exists(&self, key: &str, field: &[u8]) -> anyhow::Result<bool>;

    /// `HDEL key field`. Returns `true` if the field existed.
    async fn hash_delete(&self, key: &str, field: &[u8]) -> anyhow::Result<bool>;

    /// `HGETALL key`. Materializes the whole hash; for small maps only.
    async fn hash_get_all(&self, key: &str) -> anyhow::Result<Vec<HashEntry>>;

    /// `HKEYS key`. Materializes all field names.
    async fn hash_keys(&self, key: &str) -> anyhow::Result<Vec<Vec<u8>>>;

    /// `HVALS key`. Materializes all values.
    async fn hash_values(&self, key: &str) -> anyhow::Result<Vec<Vec<u8>>>;

    /// `HLEN key`.
    async fn hash_len(&self, key: &str) -> anyhow::Result<u64>;

    /// `HSCAN key cursor COUNT count`. Cursor-based iteration, bounded memory
    /// per call regardless of hash size.
    async fn hash_scan(
        &self,
        key: &str,
        cursor: u64,
        count: usize,
    ) -> anyhow::Result<ScanPage<HashEntry>>;

    // --- Sorted-set operations ---

    /// `ZADD key score member`.
    async fn zadd(&self, key: &str, member: &[u8], score: f64) -> anyhow::Result<()>;

    /// `ZREM key member`. Returns `true` if the member existed.
    async fn zrem(&self, key: &str, member: &[u8]) -> anyhow::Result<bool>;

    /// `ZRANGEBYSCORE key min max`, with optional exclusivity on either bound
    /// and an optional result limit. Results are ordered ascending by score,
    /// matching the sorted set's natural ordering.
    async fn zrange_by_score(
        &self,
        key: &str,
        min: f64,
        min_exclusive: bool,
        max: f64,
        max_exclusive: bool,
        limit: Option<u64>,
    ) -> anyhow::Result<Vec<SortedSetEntry>>;

    /// `ZCARD key`.
    async fn zcard(&self, key: &str) -> anyhow::Result<u64>;

    /// `ZSCORE key member`.
    async fn zscore(&self, key: &str, member: &[u8]) -> anyhow::Result<Option<f64>>;

    // --- String operations ---

    /// `GET key`.
    async fn string_get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>>;

    /// `SET key value`.
    async fn string_set(&self, key: &str, value: &[u8]) -> anyhow::Result<()>;

    /// `DEL key` for a string key. Returns `true` if the key existed.
    async fn string_delete(&self, key: &str) -> anyhow::Result<bool>;

    // --- Whole-key operations ---

    /// `DEL key`, for any key type (hash, sorted set, or string). Returns
    /// `true` if the key existed.
    async fn delete_key(&self, key: &str) -> anyhow::Result<bool>;

    /// `EXISTS key`.
    async fn key_exists(&self, key: &str) -> anyhow::Result<bool>;
}
