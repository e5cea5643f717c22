//! In-process [`StoreClient`] implementation over `DashMap`, used by the
//! engine's own test suite (and available to embedders who want an
//! in-memory map with no external Redis dependency).
//!
//! `DashMap`-backed: lock-free reads, fine-grained write sharding, no
//! external locking required by callers.

use dashmap::DashMap;
use parking_lot::RwLock;

use super::{HashEntry, ScanPage, SortedSetEntry, StoreClient};

type Hash = DashMap<Vec<u8>, Vec<u8>>;
type SortedSet = RwLock<Vec<(Vec<u8>, f64)>>;

/// In-memory store client: hashes are `DashMap<field, value>`, sorted sets
/// are a `Vec<(member, score)>` behind a lock (adequate for test-scale data;
/// not intended for production-sized maps).
#[derive(Default)]
pub struct MemoryStoreClient {
    hashes: DashMap<String, Hash>,
    sorted_sets: DashMap<String, SortedSet>,
    strings: DashMap<String, Vec<u8>>,
}

impl MemoryStoreClient {
    /// Creates a new, empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl StoreClient for MemoryStoreClient {
    async fn hash_get(&self, key: &str, field: &[u8]) -> anyhow::Result<Option<Vec<u8>>> {
        Ok(self
            .hashes
            .get(key)
            .and_then(|h| h.get(field).map(|v| v.clone())))
    }

    async fn hash_set(&self, key: &str, field: &[u8], value: &[u8]) -> anyhow::Result<()> {
        self.hashes
            .entry(key.to_string())
            .or_default()
            .insert(field.to_vec(), value.to_vec());
        Ok(())
    }

    async fn hash_exists(&self, key: &str, field: &[u8]) -> anyhow::Result<bool> {
        Ok(self
            .hashes
            .get(key)
            .map(|h| h.contains_key(field))
            .unwrap_or(false))
    }

    async fn hash_delete(&self, key: &str, field: &[u8]) -> anyhow::Result<bool> {
        Ok(self
            .hashes
            .get(key)
            .map(|h| h.remove(field).is_some())
            .unwrap_or(false))
    }

    async fn hash_get_all(&self, key: &str) -> anyhow::Result<Vec<HashEntry>> {
        Ok(self
            .hashes
            .get(key)
            .map(|h| {
                h.iter()
                    .map(|e| (e.key().clone(), e.value().clone()))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn hash_keys(&self, key: &str) -> anyhow::Result<Vec<Vec<u8>>> {
        Ok(self
            .hashes
            .get(key)
            .map(|h| h.iter().map(|e| e.key().clone()).collect())
            .unwrap_or_default())
    }

    async fn hash_values(&self, key: &str) -> anyhow::Result<Vec<Vec<u8>>> {
        Ok(self
            .hashes
            .get(key)
            .map(|h| h.iter().map(|e| e.value().clone()).collect())
            .unwrap_or_default())
    }

    async fn hash_len(&self, key: &str) -> anyhow::Result<u64> {
        Ok(self.hashes.get(key).map(|h| h.len() as u64).unwrap_or(0))
    }

    async fn hash_scan(
        &self,
        key: &str,
        cursor: u64,
        count: usize,
    ) -> anyhow::Result<ScanPage<HashEntry>> {
        let Some(hash) = self.hashes.get(key) else {
            return Ok(ScanPage {
                next_cursor: 0,
                items: Vec::new(),
            });
        };
        let all: Vec<HashEntry> = hash
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        let start = cursor as usize;
        let end = (start + count).min(all.len());
        let items = if start < all.len() {
            all[start..end].to_vec()
        } else {
            Vec::new()
        };
        let next_cursor = if end >= all.len() { 0 } else { end as u64 };
        Ok(ScanPage { next_cursor, items })
    }

    async fn zadd(&self, key: &str, member: &[u8], score: f64) -> anyhow::Result<()> {
        let set = self.sorted_sets.entry(key.to_string()).or_default();
        let mut guard = set.write();
        if let Some(entry) = guard.iter_mut().find(|(m, _)| m == member) {
            entry.1 = score;
        } else {
            guard.push((member.to_vec(), score));
        }
        Ok(())
    }

    async fn zrem(&self, key: &str, member: &[u8]) -> anyhow::Result<bool> {
        let Some(set) = self.sorted_sets.get(key) else {
            return Ok(false);
        };
        let mut guard = set.write();
        let before = guard.len();
        guard.retain(|(m, _)| m != member);
        Ok(guard.len() != before)
    }

    async fn zrange_by_score(
        &self,
        key: &str,
        min: f64,
        min_exclusive: bool,
        max: f64,
        max_exclusive: bool,
        limit: Option<u64>,
    ) -> anyhow::Result<Vec<SortedSetEntry>> {
        let Some(set) = self.sorted_sets.get(key) else {
            return Ok(Vec::new());
        };
        let guard = set.read();
        let mut matched: Vec<SortedSetEntry> = guard
            .iter()
            .filter(|(_, score)| {
                let above_min = if min_exclusive { *score > min } else { *score >= min };
                let below_max = if max_exclusive { *score < max } else { *score <= max };
                above_min && below_max
            })
            .cloned()
            .collect();
        matched.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        if let Some(limit) = limit {
            matched.truncate(limit as usize);
        }
        Ok(matched)
    }

    async fn zcard(&self, key: &str) -> anyhow::Result<u64> {
        Ok(self
            .sorted_sets
            .get(key)
            .map(|s| s.read().len() as u64)
            .unwrap_or(0))
    }

    async fn zscore(&self, key: &str, member: &[u8]) -> anyhow::Result<Option<f64>> {
        Ok(self.sorted_sets.get(key).and_then(|s| {
            s.read()
                .iter()
                .find(|(m, _)| m == member)
                .map(|(_, score)| *score)
        }))
    }

    async fn string_get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        Ok(self.strings.get(key).map(|v| v.clone()))
    }

    async fn string_set(&self, key: &str, value: &[u8]) -> anyhow::Result<()> {
        self.strings.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    async fn string_delete(&self, key: &str) -> anyhow::Result<bool> {
        Ok(self.strings.remove(key).is_some())
    }

    async fn delete_key(&self, key: &str) -> anyhow::Result<bool> {
        let a = self.hashes.remove(key).is_some();
        let b = self.sorted_sets.remove(key).is_some();
        let c = self.strings.remove(key).is_some();
        Ok(a || b || c)
    }

    async fn key_exists(&self, key: &str) -> anyhow::Result<bool> {
        Ok(self.hashes.contains_key(key)
            || self.sorted_sets.contains_key(key)
            || self.strings.contains_key(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hash_roundtrip() {
        let store = MemoryStoreClient::new();
        store.hash_set("map:a", b"k1", b"v1").await.unwrap();
        assert_eq!(
            store.hash_get("map:a", b"k1").await.unwrap(),
            Some(b"v1".to_vec())
        );
        assert!(store.hash_exists("map:a", b"k1").await.unwrap());
        assert_eq!(store.hash_len("map:a").await.unwrap(), 1);
        assert!(store.hash_delete("map:a", b"k1").await.unwrap());
        assert!(!store.hash_exists("map:a", b"k1").await.unwrap());
    }

    #[tokio::test]
    async fn sorted_set_range_respects_exclusivity() {
        let store = MemoryStoreClient::new();
        store.zadd("z", b"a", 1.0).await.unwrap();
        store.zadd("z", b"b", 2.0).await.unwrap();
        store.zadd("z", b"c", 3.0).await.unwrap();

        let inclusive = store
            .zrange_by_score("z", 1.0, false, 2.0, false, None)
            .await
            .unwrap();
        assert_eq!(inclusive.len(), 2);

        let exclusive = store
            .zrange_by_score("z", 1.0, true, 3.0, true, None)
            .await
            .unwrap();
        assert_eq!(exclusive.len(), 1);
        assert_eq!(exclusive[0].0, b"b");
    }

    #[tokio::test]
    async fn hash_scan_paginates_without_losing_entries() {
        let store = MemoryStoreClient::new();
        for i in 0..25 {
            store
                .hash_set("map:big", format!("k{i}").as_bytes(), b"v")
                .await
                .unwrap();
        }
        let mut cursor = 0;
        let mut seen = std::collections::HashSet::new();
        loop {
            let page = store.hash_scan("map:big", cursor, 7).await.unwrap();
            for (field, _) in page.items {
                seen.insert(field);
            }
            cursor = page.next_cursor;
            if cursor == 0 {
                break;
            }
        }
        assert_eq!(seen.len(), 25);
    }

    #[tokio::test]
    async fn delete_key_removes_every_shape() {
        let store = MemoryStoreClient::new();
        store.hash_set("x", b"f", b"v").await.unwrap();
        store.zadd("x", b"m", 1.0).await.unwrap();
        store.string_set("x", b"s").await.unwrap();
        assert!(store.delete_key("x").await.unwrap());
        assert!(!store.key_exists("x").await.unwrap());
    }
}
