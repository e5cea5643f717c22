//! The Map Engine: a typed, named handle over one map's backing keys.

use std::sync::Arc;
use std::time::Duration;

use mapstore_core::{ClockSource, KeySerializer, ValueCodec, TICKS_PER_SECOND};
use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::dispatch::{BatchEntry, NotificationDispatcher};
use crate::error::MapError;
use crate::keys;
use crate::store::{LeaseTracker, StoreClient};

use super::config::MapConfig;
use super::pagination::{format_time_ago, total_pages, PagedEntry, PagedResult};

/// Cardinalities of the two timestamp structures, for inspecting migration
/// progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MigrationStatus {
    /// Entry count of the legacy `timestamps` hash.
    pub hash_count: u64,
    /// Entry count of `timestamps-sorted`.
    pub sorted_set_count: u64,
}

struct Sweepers {
    shutdown_tx: watch::Sender<bool>,
    expiration: Option<JoinHandle<()>>,
    batch: Option<JoinHandle<()>>,
}

struct Inner<K, V> {
    name: String,
    store: Arc<dyn StoreClient>,
    key_serializer: Arc<dyn KeySerializer<K>>,
    codec: Arc<dyn ValueCodec<V>>,
    clock: Arc<dyn ClockSource>,
    config: MapConfig,
    dispatcher: NotificationDispatcher<K, V>,
    ttl_seconds: RwLock<Option<f64>>,
    sweepers: Mutex<Sweepers>,
    lease_tracker: Arc<LeaseTracker>,
}

/// A typed, named handle over one map's data, versions, timestamps, and
/// access-time structures in the remote store.
///
/// Cheap to clone: internally an `Arc`. Each clone shares the same handler
/// lists and sweeper tasks -- cloning does not create an independent engine.
pub struct MapEngine<K, V> {
    inner: Arc<Inner<K, V>>,
}

impl<K, V> Clone for MapEngine<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, V> MapEngine<K, V>
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    /// Constructs a new engine for `name`, re-hydrating its TTL policy from
    /// the store and starting the Expiration Sweeper if one is already
    /// persisted. The Batch Sweeper always starts;
    /// it no-ops on passes where no `OnBatchUpdate` handlers are registered.
    ///
    /// # Errors
    ///
    /// Returns an error if the initial TTL-policy read fails.
    #[tracing::instrument(skip(store, key_serializer, codec, clock), fields(map = %name.as_ref()))]
    pub async fn new(
        name: impl AsRef<str>,
        store: Arc<dyn StoreClient>,
        key_serializer: Arc<dyn KeySerializer<K>>,
        codec: Arc<dyn ValueCodec<V>>,
        clock: Arc<dyn ClockSource>,
        config: MapConfig,
    ) -> anyhow::Result<Self> {
        let name = name.as_ref().to_string();
        let ttl_seconds = read_ttl_seconds(&store, &name).await?;

        let (shutdown_tx, _shutdown_rx) = watch::channel(false);
        let inner = Arc::new(Inner {
            name,
            store,
            key_serializer,
            codec,
            clock,
            config,
            dispatcher: NotificationDispatcher::new(),
            ttl_seconds: RwLock::new(ttl_seconds),
            sweepers: Mutex::new(Sweepers {
                shutdown_tx,
                expiration: None,
                batch: None,
            }),
            lease_tracker: Arc::new(LeaseTracker::new()),
        });

        let engine = Self { inner };
        engine.start_batch_sweeper();
        if ttl_seconds.is_some() {
            engine.start_expiration_sweeper();
        }
        tracing::info!(map = %engine.inner.name, ttl = ?ttl_seconds, "map engine constructed");
        Ok(engine)
    }

    /// The map's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Renders a key via the engine's configured key serializer, for
    /// collaborators that only have a type-erased handle.
    #[must_use]
    pub fn display_key(&self, key: &K) -> String {
        self.inner.key_serializer.display(key)
    }

    /// Renders a value via the engine's configured codec, for collaborators
    /// that only have a type-erased handle.
    #[must_use]
    pub fn display_value(&self, value: &V) -> String {
        self.inner.codec.display(value)
    }

    /// Count of value leases currently outstanding from an in-progress bulk
    /// scan. Diagnostic only; always `0` between calls.
    #[must_use]
    pub fn outstanding_value_leases(&self) -> u64 {
        self.inner.lease_tracker.outstanding()
    }

    // --- Core CRUD ---

    /// Reads `key`. Absence is represented as `Ok(None)`, never an error.
    /// If a TTL policy is active, best-effort bumps `key`'s access-time.
    ///
    /// # Errors
    ///
    /// Returns [`MapError::Transport`] on store failure, [`MapError::Codec`]
    /// if the stored bytes cannot be decoded as `V`.
    #[tracing::instrument(skip(self, key), fields(map = %self.inner.name))]
    pub async fn get(&self, key: &K) -> Result<Option<V>, MapError> {
        let field = self.inner.key_serializer.encode(key)?;
        let data_key = keys::data_key(&self.inner.name);
        let Some(bytes) = self.inner.store.hash_get(&data_key, &field).await? else {
            return Ok(None);
        };
        let value = self.inner.codec.decode(&bytes)?;

        if self.inner.ttl_seconds.read().is_some() {
            let access_key = keys::access_time_key(&self.inner.name);
            let now_secs = self.inner.clock.seconds_now() as f64;
            if let Err(err) = self.inner.store.zadd(&access_key, &field, now_secs).await {
                tracing::warn!(map = %self.inner.name, error = %err, "access-time bump failed");
            }
        }
        Ok(Some(value))
    }

    /// Writes `key` -> `value`, regenerating the version and last-modified
    /// timestamp, then dispatches "add" or "update" depending on whether the
    /// key already existed (best-effort, non-atomic pre-existence check --
    /// either dispatch is acceptable on a concurrent race).
    ///
    /// # Errors
    ///
    /// Returns [`MapError::Codec`] if `value` cannot be encoded (the set is
    /// considered not to have happened), or [`MapError::Transport`] on store
    /// failure.
    #[tracing::instrument(skip(self, key, value), fields(map = %self.inner.name))]
    pub async fn set(&self, key: &K, value: &V) -> Result<(), MapError> {
        let field = self.inner.key_serializer.encode(key)?;
        let bytes = self.inner.codec.encode(value)?;

        let data_key = keys::data_key(&self.inner.name);
        let existed = self.inner.store.hash_exists(&data_key, &field).await?;

        let version = random_version_token();
        let now_ticks = self.inner.clock.ticks_now();

        self.inner.store.hash_set(&data_key, &field, &bytes).await?;
        self.inner
            .store
            .hash_set(&keys::versions_key(&self.inner.name), &field, version.as_bytes())
            .await?;
        self.inner
            .store
            .hash_set(
                &keys::timestamps_key(&self.inner.name),
                &field,
                now_ticks.to_string().as_bytes(),
            )
            .await?;
        self.inner
            .store
            .zadd(
                &keys::timestamps_sorted_key(&self.inner.name),
                &field,
                now_ticks as f64,
            )
            .await?;

        if self.inner.ttl_seconds.read().is_some() {
            let now_secs = self.inner.clock.seconds_now() as f64;
            self.inner
                .store
                .zadd(&keys::access_time_key(&self.inner.name), &field, now_secs)
                .await?;
        }

        if existed {
            self.inner.dispatcher.dispatch_update(key, value);
        } else {
            self.inner.dispatcher.dispatch_add(key, value);
        }
        Ok(())
    }

    /// Removes `key`, returning `true` only if the data hash actually
    /// contained the field. Dispatches "remove" with the prior value when
    /// removal actually occurred.
    ///
    /// # Errors
    ///
    /// Returns [`MapError::Transport`] on store failure.
    #[tracing::instrument(skip(self, key), fields(map = %self.inner.name))]
    pub async fn remove(&self, key: &K) -> Result<bool, MapError> {
        let field = self.inner.key_serializer.encode(key)?;
        let data_key = keys::data_key(&self.inner.name);

        let Some(prior_bytes) = self.inner.store.hash_get(&data_key, &field).await? else {
            return Ok(false);
        };
        let removed = self.inner.store.hash_delete(&data_key, &field).await?;
        if !removed {
            return Ok(false);
        }

        self.delete_metadata_for_field(&field).await?;

        match self.inner.codec.decode(&prior_bytes) {
            Ok(prior_value) => self.inner.dispatcher.dispatch_remove(key, &prior_value),
            Err(err) => {
                tracing::warn!(map = %self.inner.name, error = %err, "remove: prior value failed to decode, skipping handler dispatch");
            }
        }
        Ok(true)
    }

    /// `HEXISTS` on the data hash.
    ///
    /// # Errors
    ///
    /// Returns [`MapError::Transport`] on store failure.
    pub async fn contains_key(&self, key: &K) -> Result<bool, MapError> {
        let field = self.inner.key_serializer.encode(key)?;
        Ok(self
            .inner
            .store
            .hash_exists(&keys::data_key(&self.inner.name), &field)
            .await?)
    }

    /// Cardinality of the data hash.
    ///
    /// # Errors
    ///
    /// Returns [`MapError::Transport`] on store failure.
    pub async fn count(&self) -> Result<u64, MapError> {
        Ok(self
            .inner
            .store
            .hash_len(&keys::data_key(&self.inner.name))
            .await?)
    }

    /// Deletes the data hash, both timestamp structures, the versions hash,
    /// the TTL-config key, and the access-time sorted set. Dispatches
    /// "clear" exactly once. `last-batch` is left untouched (it is a
    /// monotone cursor, not map data).
    ///
    /// # Errors
    ///
    /// Returns [`MapError::Transport`] on store failure.
    #[tracing::instrument(skip(self), fields(map = %self.inner.name))]
    pub async fn clear(&self) -> Result<(), MapError> {
        let name = &self.inner.name;
        self.inner.store.delete_key(&keys::data_key(name)).await?;
        self.inner
            .store
            .delete_key(&keys::versions_key(name))
            .await?;
        self.inner
            .store
            .delete_key(&keys::timestamps_key(name))
            .await?;
        self.inner
            .store
            .delete_key(&keys::timestamps_sorted_key(name))
            .await?;
        self.inner
            .store
            .delete_key(&keys::ttl_config_key(name))
            .await?;
        self.inner
            .store
            .delete_key(&keys::access_time_key(name))
            .await?;
        self.inner.dispatcher.dispatch_clear();
        Ok(())
    }

    /// Sets or clears the per-item inactivity timeout, persisting the
    /// decision and starting/stopping the Expiration Sweeper accordingly.
    ///
    /// # Errors
    ///
    /// Returns [`MapError::Transport`] on store failure.
    #[tracing::instrument(skip(self), fields(map = %self.inner.name))]
    pub async fn set_item_expiration(&self, ttl: Option<Duration>) -> Result<(), MapError> {
        let key = keys::ttl_config_key(&self.inner.name);
        match ttl {
            Some(ttl) => {
                let secs = ttl.as_secs_f64();
                self.inner
                    .store
                    .string_set(&key, secs.to_string().as_bytes())
                    .await?;
                let was_active = self.inner.ttl_seconds.read().is_some();
                *self.inner.ttl_seconds.write() = Some(secs);
                if !was_active {
                    self.start_expiration_sweeper();
                }
            }
            None => {
                self.inner.store.string_delete(&key).await?;
                *self.inner.ttl_seconds.write() = None;
                self.stop_expiration_sweeper();
            }
        }
        Ok(())
    }

    // --- Handler registration ---

    /// Registers a handler invoked when a key transitions absent -> present.
    pub fn on_add(&self, handler: impl Fn(&K, &V) + Send + Sync + 'static) {
        self.inner.dispatcher.on_add(handler);
    }

    /// Registers a handler invoked when a present key is overwritten.
    pub fn on_update(&self, handler: impl Fn(&K, &V) + Send + Sync + 'static) {
        self.inner.dispatcher.on_update(handler);
    }

    /// Registers a handler invoked with the prior value on removal.
    pub fn on_remove(&self, handler: impl Fn(&K, &V) + Send + Sync + 'static) {
        self.inner.dispatcher.on_remove(handler);
    }

    /// Registers a handler invoked once per `clear()` call.
    pub fn on_clear(&self, handler: impl Fn() + Send + Sync + 'static) {
        self.inner.dispatcher.on_clear(handler);
    }

    /// Registers a handler invoked once per coalesced batch.
    pub fn on_batch_update(&self, handler: impl Fn(&[BatchEntry<K, V>]) + Send + Sync + 'static) {
        self.inner.dispatcher.on_batch_update(handler);
    }

    /// Registers a handler invoked just before the paired "remove" dispatch
    /// when the Expiration Sweeper evicts a key.
    pub fn on_expired(&self, handler: impl Fn(&K, &V) + Send + Sync + 'static) {
        self.inner.dispatcher.on_expired(handler);
    }

    // --- Materializing enumeration (small maps) ---

    /// Returns every key currently in the map as a snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`MapError::Transport`] on store failure.
    pub async fn get_all_keys(&self) -> Result<Vec<K>, MapError> {
        let mut out = Vec::new();
        self.scan_raw(self.inner.config.scan_chunk_full, |field, _value| {
            match self.inner.key_serializer.decode(&field) {
                Ok(key) => out.push(key),
                Err(err) => tracing::debug!(map = %self.inner.name, error = %err, "skipping key with undecodable field"),
            }
        })
        .await?;
        Ok(out)
    }

    /// Returns every value currently in the map as a snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`MapError::Transport`] on store failure.
    pub async fn get_all_values(&self) -> Result<Vec<V>, MapError> {
        let mut out = Vec::new();
        self.scan_raw(self.inner.config.scan_chunk_full, |_field, value| {
            match self.inner.codec.decode(&value) {
                Ok(v) => out.push(v),
                Err(err) => tracing::debug!(map = %self.inner.name, error = %err, "skipping undecodable value"),
            }
        })
        .await?;
        Ok(out)
    }

    /// Returns every key/value pair currently in the map as a snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`MapError::Transport`] on store failure.
    pub async fn get_all_entries(&self) -> Result<Vec<(K, V)>, MapError> {
        let mut out = Vec::new();
        self.scan_raw(self.inner.config.scan_chunk_full, |field, value| {
            match (
                self.inner.key_serializer.decode(&field),
                self.inner.codec.decode(&value),
            ) {
                (Ok(key), Ok(value)) => out.push((key, value)),
                _ => tracing::debug!(map = %self.inner.name, "skipping undecodable entry"),
            }
        })
        .await?;
        Ok(out)
    }

    // --- Streaming enumeration ---

    /// Streams every key to `consumer`, memory bounded by the scan chunk
    /// size rather than map size.
    ///
    /// # Errors
    ///
    /// Returns [`MapError::Transport`] on store failure.
    pub async fn stream_keys(&self, mut consumer: impl FnMut(K)) -> Result<(), MapError> {
        self.scan_raw(self.inner.config.scan_chunk_full, |field, _value| {
            if let Ok(key) = self.inner.key_serializer.decode(&field) {
                consumer(key);
            }
        })
        .await
    }

    /// Streams every value to `consumer`.
    ///
    /// # Errors
    ///
    /// Returns [`MapError::Transport`] on store failure.
    pub async fn stream_values(&self, mut consumer: impl FnMut(V)) -> Result<(), MapError> {
        self.scan_raw(self.inner.config.scan_chunk_full, |_field, value| {
            if let Ok(value) = self.inner.codec.decode(&value) {
                consumer(value);
            }
        })
        .await
    }

    /// Streams every key/value pair to `consumer`.
    ///
    /// # Errors
    ///
    /// Returns [`MapError::Transport`] on store failure.
    pub async fn stream_entries(&self, mut consumer: impl FnMut(K, V)) -> Result<(), MapError> {
        self.scan_raw(self.inner.config.scan_chunk_full, |field, value| {
            if let (Ok(key), Ok(value)) = (
                self.inner.key_serializer.decode(&field),
                self.inner.codec.decode(&value),
            ) {
                consumer(key, value);
            }
        })
        .await
    }

    // --- Pagination ---

    /// Server-aware pagination. Without `search`, total count comes from the
    /// data-hash cardinality and the cursor scan stops as soon as the target
    /// page is filled. With `search`, the whole data hash is scanned with a
    /// larger chunk size, filtered by a case-insensitive substring match on
    /// the displayed key, and the filtered result is paginated in memory.
    ///
    /// # Errors
    ///
    /// Returns [`MapError::Transport`] on store failure.
    #[tracing::instrument(skip(self, search), fields(map = %self.inner.name))]
    pub async fn get_entries_paged(
        &self,
        page: u64,
        page_size: u64,
        search: Option<&str>,
    ) -> Result<PagedResult<K, V>, MapError> {
        let (raw_entries, total_count) = match search {
            None => (self.paginate_unfiltered(page, page_size).await?, self.count().await?),
            Some(pattern) => {
                let filtered = self.paginate_filtered(pattern).await?;
                let total = filtered.len() as u64;
                (page_slice(filtered, page, page_size), total)
            }
        };

        let now_ticks = self.inner.clock.ticks_now();
        let mut entries = Vec::with_capacity(raw_entries.len());
        for (field, key, value) in raw_entries {
            let version_bytes = self
                .inner
                .store
                .hash_get(&keys::versions_key(&self.inner.name), &field)
                .await?;
            let version = version_bytes
                .map(|b| String::from_utf8_lossy(&b).into_owned())
                .unwrap_or_default();
            let ts_bytes = self
                .inner
                .store
                .hash_get(&keys::timestamps_key(&self.inner.name), &field)
                .await?;
            let last_modified_ticks = ts_bytes
                .and_then(|b| String::from_utf8_lossy(&b).parse::<i64>().ok())
                .unwrap_or(now_ticks);
            entries.push(PagedEntry {
                key,
                value,
                version,
                last_modified_ticks,
                last_modified_human: format_time_ago(now_ticks, last_modified_ticks),
            });
        }

        let total_pages_count = total_pages(total_count, page_size);
        Ok(PagedResult {
            entries,
            current_page: page,
            page_size,
            total_count,
            total_pages: total_pages_count,
            has_next: page < total_pages_count,
            has_prev: page > 1,
        })
    }

    // --- Migration ---

    /// One-shot, idempotent migration of every entry in the legacy
    /// `timestamps` hash into `timestamps-sorted`.
    ///
    /// # Errors
    ///
    /// Returns [`MapError::Transport`] on store failure.
    #[tracing::instrument(skip(self), fields(map = %self.inner.name))]
    pub async fn migrate_timestamps_to_sorted_set(&self) -> Result<(), MapError> {
        let entries = self
            .inner
            .store
            .hash_get_all(&keys::timestamps_key(&self.inner.name))
            .await?;
        let sorted_key = keys::timestamps_sorted_key(&self.inner.name);
        for (field, value) in entries {
            let Ok(score) = String::from_utf8_lossy(&value).parse::<i64>() else {
                continue;
            };
            self.inner.store.zadd(&sorted_key, &field, score as f64).await?;
        }
        Ok(())
    }

    /// Reports the cardinalities of both timestamp structures.
    ///
    /// # Errors
    ///
    /// Returns [`MapError::Transport`] on store failure.
    pub async fn get_migration_status(&self) -> Result<MigrationStatus, MapError> {
        let hash_count = self
            .inner
            .store
            .hash_len(&keys::timestamps_key(&self.inner.name))
            .await?;
        let sorted_set_count = self
            .inner
            .store
            .zcard(&keys::timestamps_sorted_key(&self.inner.name))
            .await?;
        Ok(MigrationStatus {
            hash_count,
            sorted_set_count,
        })
    }

    // --- Lifecycle ---

    /// Signals both sweeper tasks to exit at their next natural boundary and
    /// awaits them.
    pub async fn shutdown(&self) {
        let (expiration, batch) = {
            let mut sweepers = self.inner.sweepers.lock();
            let _ = sweepers.shutdown_tx.send(true);
            (sweepers.expiration.take(), sweepers.batch.take())
        };
        if let Some(handle) = expiration {
            let _ = handle.await;
        }
        if let Some(handle) = batch {
            let _ = handle.await;
        }
    }

    // --- Internal helpers ---

    async fn delete_metadata_for_field(&self, field: &[u8]) -> Result<(), MapError> {
        let name = &self.inner.name;
        self.inner
            .store
            .hash_delete(&keys::versions_key(name), field)
            .await?;
        self.inner
            .store
            .hash_delete(&keys::timestamps_key(name), field)
            .await?;
        self.inner
            .store
            .zrem(&keys::timestamps_sorted_key(name), field)
            .await?;
        self.inner
            .store
            .zrem(&keys::access_time_key(name), field)
            .await?;
        Ok(())
    }

    /// Cursor-scans the data hash with the given chunk size, invoking
    /// `on_item` once per raw `(field, value)` pair. Shared by every
    /// enumeration and streaming operation.
    ///
    /// Each value is held behind a [`crate::store::ValueLease`] for the
    /// duration of `on_item`, released on every exit from the closure --
    /// including a decode failure inside it -- via `Drop`.
    async fn scan_raw(
        &self,
        chunk_size: usize,
        mut on_item: impl FnMut(Vec<u8>, Vec<u8>),
    ) -> Result<(), MapError> {
        let data_key = keys::data_key(&self.inner.name);
        let mut cursor = 0u64;
        loop {
            let page = self
                .inner
                .store
                .hash_scan(&data_key, cursor, chunk_size)
                .await?;
            for (field, value) in page.items {
                let lease = self.inner.lease_tracker.lease(value);
                on_item(field, lease.bytes().to_vec());
            }
            cursor = page.next_cursor;
            if cursor == 0 {
                return Ok(());
            }
        }
    }

    async fn paginate_unfiltered(
        &self,
        page: u64,
        page_size: u64,
    ) -> Result<Vec<(Vec<u8>, K, V)>, MapError> {
        let to_skip = (page.saturating_sub(1)).saturating_mul(page_size);
        let mut seen = 0u64;
        let mut collected = Vec::new();
        let data_key = keys::data_key(&self.inner.name);
        let mut cursor = 0u64;
        loop {
            let scanned = self
                .inner
                .store
                .hash_scan(&data_key, cursor, self.inner.config.scan_chunk_pagination)
                .await?;
            for (field, value) in scanned.items {
                if seen < to_skip {
                    seen += 1;
                    continue;
                }
                if (collected.len() as u64) >= page_size {
                    break;
                }
                if let (Ok(key), Ok(value)) = (
                    self.inner.key_serializer.decode(&field),
                    self.inner.codec.decode(&value),
                ) {
                    collected.push((field, key, value));
                }
                seen += 1;
            }
            cursor = scanned.next_cursor;
            if cursor == 0 || (collected.len() as u64) >= page_size {
                return Ok(collected);
            }
        }
    }

    async fn paginate_filtered(&self, pattern: &str) -> Result<Vec<(Vec<u8>, K, V)>, MapError> {
        let pattern = pattern.to_lowercase();
        let mut matches = Vec::new();
        let data_key = keys::data_key(&self.inner.name);
        let mut cursor = 0u64;
        loop {
            let scanned = self
                .inner
                .store
                .hash_scan(&data_key, cursor, self.inner.config.scan_chunk_full)
                .await?;
            for (field, value) in scanned.items {
                let Ok(key) = self.inner.key_serializer.decode(&field) else {
                    continue;
                };
                if !self
                    .inner
                    .key_serializer
                    .display(&key)
                    .to_lowercase()
                    .contains(&pattern)
                {
                    continue;
                }
                let Ok(value) = self.inner.codec.decode(&value) else {
                    continue;
                };
                matches.push((field, key, value));
            }
            cursor = scanned.next_cursor;
            if cursor == 0 {
                return Ok(matches);
            }
        }
    }

    fn start_expiration_sweeper(&self) {
        let mut sweepers = self.inner.sweepers.lock();
        if sweepers.expiration.is_some() {
            return;
        }
        let inner = Arc::clone(&self.inner);
        let mut shutdown_rx = sweepers.shutdown_tx.subscribe();
        let period = inner.config.sweep_period;
        sweepers.expiration = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        run_expiration_pass(&inner).await;
                    }
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            return;
                        }
                    }
                }
            }
        }));
    }

    fn stop_expiration_sweeper(&self) {
        let mut sweepers = self.inner.sweepers.lock();
        if let Some(handle) = sweepers.expiration.take() {
            handle.abort();
        }
    }

    fn start_batch_sweeper(&self) {
        let mut sweepers = self.inner.sweepers.lock();
        let inner = Arc::clone(&self.inner);
        let mut shutdown_rx = sweepers.shutdown_tx.subscribe();
        let period = inner.config.sweep_period;
        sweepers.batch = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        run_batch_pass(&inner).await;
                    }
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            return;
                        }
                    }
                }
            }
        }));
    }
}

/// Splits `items` to the slice belonging to `page` at `page_size`, used for
/// the in-memory pagination of a search-filtered result set.
fn page_slice<T>(items: Vec<T>, page: u64, page_size: u64) -> Vec<T> {
    let start = ((page.saturating_sub(1)).saturating_mul(page_size)) as usize;
    if start >= items.len() {
        return Vec::new();
    }
    let end = (start as u64 + page_size).min(items.len() as u64) as usize;
    items.into_iter().skip(start).take(end - start).collect()
}

async fn read_ttl_seconds(
    store: &Arc<dyn StoreClient>,
    map_name: &str,
) -> anyhow::Result<Option<f64>> {
    let bytes = store.string_get(&keys::ttl_config_key(map_name)).await?;
    Ok(bytes.and_then(|b| String::from_utf8_lossy(&b).parse::<f64>().ok()))
}

fn random_version_token() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

async fn run_expiration_pass<K, V>(inner: &Arc<Inner<K, V>>)
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    let name = inner.name.clone();
    let result: anyhow::Result<()> = async {
        let Some(bytes) = inner.store.string_get(&keys::ttl_config_key(&name)).await? else {
            return Ok(());
        };
        let Some(ttl_secs) = String::from_utf8_lossy(&bytes).parse::<f64>().ok() else {
            return Ok(());
        };
        let cutoff = inner.clock.seconds_now() as f64 - ttl_secs;
        let access_key = keys::access_time_key(&name);
        let expired = inner
            .store
            .zrange_by_score(&access_key, f64::NEG_INFINITY, false, cutoff, false, None)
            .await?;

        let data_key = keys::data_key(&name);
        for (member, _score) in expired {
            let Some(value_bytes) = inner.store.hash_get(&data_key, &member).await? else {
                // Orphan: present in access-time but absent in data.
                inner.store.zrem(&access_key, &member).await?;
                continue;
            };
            inner.store.hash_delete(&data_key, &member).await?;
            inner.store.zrem(&access_key, &member).await?;
            inner
                .store
                .hash_delete(&keys::versions_key(&name), &member)
                .await?;
            inner
                .store
                .hash_delete(&keys::timestamps_key(&name), &member)
                .await?;
            inner
                .store
                .zrem(&keys::timestamps_sorted_key(&name), &member)
                .await?;

            match (
                inner.key_serializer.decode(&member),
                inner.codec.decode(&value_bytes),
            ) {
                (Ok(key), Ok(value)) => {
                    inner.dispatcher.dispatch_expired(&key, &value);
                    inner.dispatcher.dispatch_remove(&key, &value);
                }
                _ => tracing::warn!(map = %name, "expired entry could not be decoded; removed without dispatch"),
            }
        }
        Ok(())
    }
    .await;

    if let Err(err) = result {
        tracing::warn!(map = %name, error = %err, "expiration sweep failed; will retry next tick");
    }
}

async fn run_batch_pass<K, V>(inner: &Arc<Inner<K, V>>)
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    if !inner.dispatcher.has_batch_update_handlers() {
        return;
    }
    let name = inner.name.clone();
    let result: anyhow::Result<()> = async {
        let sorted_key = keys::timestamps_sorted_key(&name);
        let last_batch_key = keys::last_batch_key(&name);

        let last_batch = inner
            .store
            .string_get(&last_batch_key)
            .await?
            .and_then(|b| String::from_utf8_lossy(&b).parse::<i64>().ok())
            .unwrap_or(i64::MIN);

        let now = inner.clock.ticks_now();
        let batch_wait_ticks = (inner.config.batch_wait.as_secs_f64() * TICKS_PER_SECOND as f64) as i64;
        let cutoff = now - batch_wait_ticks;
        if cutoff < last_batch {
            return Ok(());
        }

        let sorted_exists = inner.store.zcard(&sorted_key).await? > 0;
        let mut candidates: Vec<(Vec<u8>, i64)> = if sorted_exists {
            inner
                .store
                .zrange_by_score(&sorted_key, last_batch as f64, true, cutoff as f64, false, None)
                .await?
                .into_iter()
                .map(|(member, score)| (member, score as i64))
                .collect()
        } else {
            inner
                .store
                .hash_get_all(&keys::timestamps_key(&name))
                .await?
                .into_iter()
                .filter_map(|(field, value)| {
                    let score = String::from_utf8_lossy(&value).parse::<i64>().ok()?;
                    (score > last_batch && score <= cutoff).then_some((field, score))
                })
                .collect()
        };
        candidates.sort_by_key(|(_, score)| *score);

        let data_key = keys::data_key(&name);
        let mut entries = Vec::new();
        for (member, score) in candidates {
            let Some(value_bytes) = inner.store.hash_get(&data_key, &member).await? else {
                continue;
            };
            let (Ok(key), Ok(value)) = (
                inner.key_serializer.decode(&member),
                inner.codec.decode(&value_bytes),
            ) else {
                continue;
            };
            entries.push(BatchEntry {
                key,
                value,
                last_modified_ticks: score,
            });
        }

        if !entries.is_empty() {
            inner
                .store
                .string_set(&last_batch_key, now.to_string().as_bytes())
                .await?;
            inner.dispatcher.dispatch_batch_update(&entries);
        }
        Ok(())
    }
    .await;

    if let Err(err) = result {
        tracing::warn!(map = %name, error = %err, "batch sweep failed; will retry next tick");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use mapstore_core::{JsonCodec, JsonKeySerializer, VirtualClock};

    use crate::store::MemoryStoreClient;

    use super::*;

    fn fast_config() -> MapConfig {
        MapConfig {
            batch_wait: Duration::from_millis(100),
            sweep_period: Duration::from_millis(20),
            ..MapConfig::default()
        }
    }

    async fn make_engine(
        name: &str,
        clock: Arc<VirtualClock>,
    ) -> MapEngine<String, String> {
        MapEngine::new(
            name,
            Arc::new(MemoryStoreClient::new()),
            Arc::new(JsonKeySerializer::<String>::new()),
            Arc::new(JsonCodec::<String>::new()),
            clock,
            fast_config(),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn set_then_get_roundtrips() {
        let clock = Arc::new(VirtualClock::default());
        let engine = make_engine("m1", clock).await;
        engine.set(&"k1".to_string(), &"v1".to_string()).await.unwrap();
        assert_eq!(engine.get(&"k1".to_string()).await.unwrap(), Some("v1".to_string()));
        assert_eq!(engine.count().await.unwrap(), 1);
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn set_dispatches_add_then_update() {
        let clock = Arc::new(VirtualClock::default());
        let engine = make_engine("m2", clock).await;
        let adds = Arc::new(AtomicUsize::new(0));
        let updates = Arc::new(AtomicUsize::new(0));
        let adds_clone = adds.clone();
        engine.on_add(move |_, _| {
            adds_clone.fetch_add(1, Ordering::SeqCst);
        });
        let updates_clone = updates.clone();
        engine.on_update(move |_, _| {
            updates_clone.fetch_add(1, Ordering::SeqCst);
        });

        engine.set(&"k1".to_string(), &"v1".to_string()).await.unwrap();
        engine.set(&"k1".to_string(), &"v2".to_string()).await.unwrap();

        assert_eq!(adds.load(Ordering::SeqCst), 1);
        assert_eq!(updates.load(Ordering::SeqCst), 1);
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn remove_returns_false_for_absent_key() {
        let clock = Arc::new(VirtualClock::default());
        let engine = make_engine("m3", clock).await;
        assert!(!engine.remove(&"missing".to_string()).await.unwrap());
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn remove_dispatches_prior_value() {
        let clock = Arc::new(VirtualClock::default());
        let engine = make_engine("m4", clock).await;
        engine.set(&"k1".to_string(), &"v1".to_string()).await.unwrap();
        let removed = Arc::new(std::sync::Mutex::new(None));
        let removed_clone = removed.clone();
        engine.on_remove(move |_, value| {
            *removed_clone.lock().unwrap() = Some(value.clone());
        });
        assert!(engine.remove(&"k1".to_string()).await.unwrap());
        assert_eq!(*removed.lock().unwrap(), Some("v1".to_string()));
        assert_eq!(engine.get(&"k1".to_string()).await.unwrap(), None);
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn clear_removes_everything_and_dispatches_once() {
        let clock = Arc::new(VirtualClock::default());
        let engine = make_engine("m5", clock).await;
        for i in 0..5 {
            engine
                .set(&format!("k{i}"), &format!("v{i}"))
                .await
                .unwrap();
        }
        let clears = Arc::new(AtomicUsize::new(0));
        let clears_clone = clears.clone();
        engine.on_clear(move || {
            clears_clone.fetch_add(1, Ordering::SeqCst);
        });
        engine.clear().await.unwrap();
        assert_eq!(engine.count().await.unwrap(), 0);
        assert_eq!(clears.load(Ordering::SeqCst), 1);
        engine.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn expiration_sweeper_evicts_inactive_keys_and_dispatches() {
        let clock = Arc::new(VirtualClock::default());
        let engine = make_engine("m6", clock.clone()).await;
        engine
            .set_item_expiration(Some(Duration::from_secs(10)))
            .await
            .unwrap();
        engine
            .set(&"k1".to_string(), &"v1".to_string())
            .await
            .unwrap();

        let expired = Arc::new(AtomicUsize::new(0));
        let expired_clone = expired.clone();
        engine.on_expired(move |_, _| {
            expired_clone.fetch_add(1, Ordering::SeqCst);
        });

        clock.advance_secs(20);
        tokio::time::advance(Duration::from_millis(50)).await;

        assert_eq!(engine.get(&"k1".to_string()).await.unwrap(), None);
        assert_eq!(expired.load(Ordering::SeqCst), 1);
        engine.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn active_keys_survive_the_expiration_sweeper() {
        let clock = Arc::new(VirtualClock::default());
        let engine = make_engine("m7", clock.clone()).await;
        engine
            .set_item_expiration(Some(Duration::from_secs(10)))
            .await
            .unwrap();
        engine
            .set(&"k1".to_string(), &"v1".to_string())
            .await
            .unwrap();

        clock.advance_secs(5);
        tokio::time::advance(Duration::from_millis(50)).await;

        assert_eq!(engine.get(&"k1".to_string()).await.unwrap(), Some("v1".to_string()));
        engine.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn batch_sweeper_coalesces_writes_within_the_wait_window() {
        let clock = Arc::new(VirtualClock::default());
        let engine = make_engine("m8", clock.clone()).await;

        let batches: Arc<std::sync::Mutex<Vec<usize>>> = Arc::new(std::sync::Mutex::new(Vec::new()));
        let batches_clone = batches.clone();
        engine.on_batch_update(move |entries| {
            batches_clone.lock().unwrap().push(entries.len());
        });

        engine.set(&"k1".to_string(), &"v1".to_string()).await.unwrap();
        engine.set(&"k2".to_string(), &"v2".to_string()).await.unwrap();

        // Still within the quiescence window: no batch yet.
        tokio::time::advance(Duration::from_millis(50)).await;
        assert!(batches.lock().unwrap().is_empty());

        // Past batch_wait (100ms): both writes coalesce into one batch.
        clock.advance_millis(150);
        tokio::time::advance(Duration::from_millis(50)).await;

        let seen = batches.lock().unwrap().clone();
        assert_eq!(seen, vec![2]);
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn batch_sweeper_skips_passes_with_no_handlers_registered() {
        let clock = Arc::new(VirtualClock::default());
        let engine = make_engine("m9", clock).await;
        // No OnBatchUpdate handler registered; run_batch_pass should no-op.
        run_batch_pass(&engine.inner).await;
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn pagination_returns_stable_total_and_pages() {
        let clock = Arc::new(VirtualClock::default());
        let engine = make_engine("m10", clock).await;
        for i in 0..25 {
            engine
                .set(&format!("k{i:02}"), &format!("v{i}"))
                .await
                .unwrap();
        }

        let page1 = engine.get_entries_paged(1, 10, None).await.unwrap();
        assert_eq!(page1.entries.len(), 10);
        assert_eq!(page1.total_count, 25);
        assert_eq!(page1.total_pages, 3);
        assert!(page1.has_next);
        assert!(!page1.has_prev);

        let page3 = engine.get_entries_paged(3, 10, None).await.unwrap();
        assert_eq!(page3.entries.len(), 5);
        assert!(!page3.has_next);
        assert!(page3.has_prev);
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn pagination_with_search_filters_by_display_substring() {
        let clock = Arc::new(VirtualClock::default());
        let engine = make_engine("m11", clock).await;
        engine.set(&"alpha".to_string(), &"1".to_string()).await.unwrap();
        engine.set(&"beta".to_string(), &"2".to_string()).await.unwrap();
        engine.set(&"gamma".to_string(), &"3".to_string()).await.unwrap();

        let result = engine.get_entries_paged(1, 10, Some("ph")).await.unwrap();
        assert_eq!(result.total_count, 1);
        assert_eq!(result.entries[0].key, "alpha");
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn stream_keys_visits_every_key_once() {
        let clock = Arc::new(VirtualClock::default());
        let engine = make_engine("m12", clock).await;
        for i in 0..30 {
            engine.set(&format!("k{i}"), &i.to_string()).await.unwrap();
        }
        let mut seen = std::collections::HashSet::new();
        engine
            .stream_keys(|k| {
                seen.insert(k);
            })
            .await
            .unwrap();
        assert_eq!(seen.len(), 30);
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn migrate_timestamps_populates_sorted_set_idempotently() {
        let clock = Arc::new(VirtualClock::default());
        let engine = make_engine("m13", clock).await;
        engine.set(&"k1".to_string(), &"v1".to_string()).await.unwrap();

        // The sorted set is already dual-written by `set`; migration should
        // still be a safe no-op-equivalent re-add, not a duplicate entry.
        engine.migrate_timestamps_to_sorted_set().await.unwrap();
        let status = engine.get_migration_status().await.unwrap();
        assert_eq!(status.hash_count, 1);
        assert_eq!(status.sorted_set_count, 1);
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn orphaned_access_time_entry_is_dropped_without_dispatch() {
        let clock = Arc::new(VirtualClock::default());
        let engine = make_engine("m14", clock.clone()).await;
        engine
            .set_item_expiration(Some(Duration::from_secs(5)))
            .await
            .unwrap();

        // Simulate an orphan: access-time entry with no matching data entry.
        let access_key = keys::access_time_key("m14");
        engine
            .inner
            .store
            .zadd(&access_key, b"\"ghost\"", 0.0)
            .await
            .unwrap();

        let removed_count = Arc::new(AtomicUsize::new(0));
        let removed_clone = removed_count.clone();
        engine.on_remove(move |_, _| {
            removed_clone.fetch_add(1, Ordering::SeqCst);
        });

        clock.advance_secs(20);
        run_expiration_pass(&engine.inner).await;

        assert_eq!(engine.inner.store.zcard(&access_key).await.unwrap(), 0);
        assert_eq!(removed_count.load(Ordering::SeqCst), 0);
        engine.shutdown().await;
    }

    #[test]
    fn display_key_and_value_use_the_configured_serializer_and_codec() {
        let clock: Arc<dyn ClockSource> = Arc::new(VirtualClock::default());
        let engine_fut = MapEngine::<String, String>::new(
            "m15",
            Arc::new(MemoryStoreClient::new()),
            Arc::new(JsonKeySerializer::<String>::new()),
            Arc::new(JsonCodec::<String>::new()),
            clock,
            fast_config(),
        );
        let rt = tokio::runtime::Runtime::new().unwrap();
        let engine = rt.block_on(engine_fut).unwrap();
        assert_eq!(engine.display_key(&"k1".to_string()), "\"k1\"");
        assert_eq!(engine.display_value(&"v1".to_string()), "\"v1\"");
    }

    #[test]
    fn outstanding_value_leases_is_zero_between_scans() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let clock: Arc<dyn ClockSource> = Arc::new(VirtualClock::default());
        let engine = rt.block_on(MapEngine::<String, String>::new(
            "m16",
            Arc::new(MemoryStoreClient::new()),
            Arc::new(JsonKeySerializer::<String>::new()),
            Arc::new(JsonCodec::<String>::new()),
            clock,
            fast_config(),
        ))
        .unwrap();
        assert_eq!(engine.outstanding_value_leases(), 0);
    }
}
