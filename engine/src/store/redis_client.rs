//! [`StoreClient`] implementation backed by a real Redis-compatible server.
//!
//! Grounded on the pack's Redis task-store backend (`redis::AsyncCommands`
//! over an async connection). Uses [`redis::aio::ConnectionManager`] rather
//! than a single multiplexed connection so the client transparently
//! reconnects after a dropped connection -- appropriate for a long-lived,
//! shared handle that many `MapEngine` instances hold concurrently
//! the remote store connection is shared across every map that uses it.

use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use super::{HashEntry, ScanPage, SortedSetEntry, StoreClient};

/// Store client backed by a live connection to a Redis-compatible server.
#[derive(Clone)]
pub struct RedisStoreClient {
    conn: ConnectionManager,
}

impl RedisStoreClient {
    /// Connects to the given Redis URL (e.g. `redis://127.0.0.1:6379/0`).
    ///
    /// # Errors
    ///
    /// Returns an error if the client cannot be constructed or the initial
    /// connection fails.
    pub async fn connect(redis_url: &str) -> anyhow::Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { conn })
    }

    /// Wraps an already-established connection manager.
    #[must_use]
    pub fn from_connection_manager(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait::async_trait]
impl StoreClient for RedisStoreClient {
    async fn hash_get(&self, key: &str, field: &[u8]) -> anyhow::Result<Option<Vec<u8>>> {
        let mut conn = self.conn.clone();
        Ok(conn.hget(key, field).await?)
    }

    async fn hash_set(&self, key: &str, field: &[u8], value: &[u8]) -> anyhow::Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.hset(key, field, value).await?;
        Ok(())
    }

    async fn hash_exists(&self, key: &str, field: &[u8]) -> anyhow::Result<bool> {
        let mut conn = self.conn.clone();
        Ok(conn.hexists(key, field).await?)
    }

    async fn hash_delete(&self, key: &str, field: &[u8]) -> anyhow::Result<bool> {
        let mut conn = self.conn.clone();
        let removed: u64 = conn.hdel(key, field).await?;
        Ok(removed > 0)
    }

    async fn hash_get_all(&self, key: &str) -> anyhow::Result<Vec<HashEntry>> {
        let mut conn = self.conn.clone();
        let entries: Vec<(Vec<u8>, Vec<u8>)> = conn.hgetall(key).await?;
        Ok(entries)
    }

    async fn hash_keys(&self, key: &str) -> anyhow::Result<Vec<Vec<u8>>> {
        let mut conn = self.conn.clone();
        Ok(conn.hkeys(key).await?)
    }

    async fn hash_values(&self, key: &str) -> anyhow::Result<Vec<Vec<u8>>> {
        let mut conn = self.conn.clone();
        Ok(conn.hvals(key).await?)
    }

    async fn hash_len(&self, key: &str) -> anyhow::Result<u64> {
        let mut conn = self.conn.clone();
        Ok(conn.hlen(key).await?)
    }

    async fn hash_scan(
        &self,
        key: &str,
        cursor: u64,
        count: usize,
    ) -> anyhow::Result<ScanPage<HashEntry>> {
        let mut conn = self.conn.clone();
        let (next_cursor, items): (u64, Vec<(Vec<u8>, Vec<u8>)>) = redis::cmd("HSCAN")
            .arg(key)
            .arg(cursor)
            .arg("COUNT")
            .arg(count)
            .query_async(&mut conn)
            .await?;
        Ok(ScanPage { next_cursor, items })
    }

    async fn zadd(&self, key: &str, member: &[u8], score: f64) -> anyhow::Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.zadd(key, member, score).await?;
        Ok(())
    }

    async fn zrem(&self, key: &str, member: &[u8]) -> anyhow::Result<bool> {
        let mut conn = self.conn.clone();
        let removed: u64 = conn.zrem(key, member).await?;
        Ok(removed > 0)
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
        let mut conn = self.conn.clone();
        let min_arg = format_bound(min, min_exclusive);
        let max_arg = format_bound(max, max_exclusive);
        let mut cmd = redis::cmd("ZRANGEBYSCORE");
        cmd.arg(key).arg(min_arg).arg(max_arg).arg("WITHSCORES");
        if let Some(limit) = limit {
            cmd.arg("LIMIT").arg(0).arg(limit);
        }
        let flat: Vec<(Vec<u8>, f64)> = cmd.query_async(&mut conn).await?;
        Ok(flat)
    }

    async fn zcard(&self, key: &str) -> anyhow::Result<u64> {
        let mut conn = self.conn.clone();
        Ok(conn.zcard(key).await?)
    }

    async fn zscore(&self, key: &str, member: &[u8]) -> anyhow::Result<Option<f64>> {
        let mut conn = self.conn.clone();
        Ok(conn.zscore(key, member).await?)
    }

    async fn string_get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        let mut conn = self.conn.clone();
        Ok(conn.get(key).await?)
    }

    async fn string_set(&self, key: &str, value: &[u8]) -> anyhow::Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.set(key, value).await?;
        Ok(())
    }

    async fn string_delete(&self, key: &str) -> anyhow::Result<bool> {
        self.delete_key(key).await
    }

    async fn delete_key(&self, key: &str) -> anyhow::Result<bool> {
        let mut conn = self.conn.clone();
        let removed: u64 = conn.del(key).await?;
        Ok(removed > 0)
    }

    async fn key_exists(&self, key: &str) -> anyhow::Result<bool> {
        let mut conn = self.conn.clone();
        Ok(conn.exists(key).await?)
    }
}

/// Formats a `ZRANGEBYSCORE` bound, prefixing with `(` for exclusivity per
/// the Redis score-range syntax.
fn format_bound(value: f64, exclusive: bool) -> String {
    if exclusive {
        format!("({value}")
    } else {
        format!("{value}")
    }
}
