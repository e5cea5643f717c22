//! Process-wide collection of named, type-parameterized maps.
//!
//! Uses a `by_name`/`by_typed` `DashMap` pair: one map keyed by name for
//! type-erased lookup, one keyed by `(name, TypeId, TypeId)` for typed
//! lookup with zero-cost dispatch once resolved.

use std::any::{Any, TypeId};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;

use mapstore_core::{ClockSource, JsonCodec, JsonKeySerializer};

use crate::error::{MapError, RegistryError};
use crate::keys::{is_internal_name, ttl_config_key};
use crate::map::{MapConfig, MapEngine, MigrationStatus, PagedResult};
use crate::store::StoreClient;

/// One rendered entry in a type-erased paginated listing.
#[derive(Debug, Clone)]
pub struct DisplayEntry {
    /// The key, rendered via the owning engine's key serializer.
    pub key: String,
    /// The value, rendered via the owning engine's codec.
    pub value: String,
    /// The entry's opaque version token.
    pub version: String,
    /// Raw last-modified instant, in ticks since the fixed epoch.
    pub last_modified_ticks: i64,
    /// Human-readable "time ago" rendering of `last_modified_ticks`.
    pub last_modified_human: String,
}

/// Type-erased counterpart of [`PagedResult`], with keys and values already
/// rendered to display strings.
#[derive(Debug, Clone)]
pub struct DisplayPagedResult {
    /// The entries on this page.
    pub entries: Vec<DisplayEntry>,
    /// The requested page number (1-based).
    pub current_page: u64,
    /// The requested page size.
    pub page_size: u64,
    /// Total entry count (map cardinality, or filtered count under search).
    pub total_count: u64,
    /// `ceil(total_count / page_size)`.
    pub total_pages: u64,
    /// Whether a page after `current_page` exists.
    pub has_next: bool,
    /// Whether a page before `current_page` exists.
    pub has_prev: bool,
}

/// Type-erased view over a [`MapEngine`], for collaborators that do not
/// know `K`/`V` statically -- e.g. an enumeration endpoint iterating every
/// registered map.
///
/// Names the minimal operations a type-unaware collaborator actually needs
/// -- list, page, stream, migrate, migration-status -- explicitly, instead
/// of discovering them at runtime via type reflection.
#[async_trait]
pub trait AnyMapEngine: Send + Sync {
    /// The map's name.
    fn name(&self) -> &str;

    /// Cardinality of the map's data hash.
    async fn count(&self) -> Result<u64, MapError>;

    /// Clears the map.
    async fn clear(&self) -> Result<(), MapError>;

    /// Server-aware pagination with display-rendered keys and values.
    async fn list_entries_page(
        &self,
        page: u64,
        page_size: u64,
        search: Option<&str>,
    ) -> Result<DisplayPagedResult, MapError>;

    /// Streams every key, rendered to its display string, to `consumer`.
    async fn stream_keys_display(
        &self,
        consumer: &mut (dyn FnMut(String) + Send),
    ) -> Result<(), MapError>;

    /// One-shot, idempotent migration from `timestamps` into
    /// `timestamps-sorted`.
    async fn migrate_timestamps_to_sorted_set(&self) -> Result<(), MapError>;

    /// Cardinalities of both timestamp structures.
    async fn get_migration_status(&self) -> Result<MigrationStatus, MapError>;
}

#[async_trait]
impl<K, V> AnyMapEngine for MapEngine<K, V>
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    fn name(&self) -> &str {
        MapEngine::name(self)
    }

    async fn count(&self) -> Result<u64, MapError> {
        MapEngine::count(self).await
    }

    async fn clear(&self) -> Result<(), MapError> {
        MapEngine::clear(self).await
    }

    async fn list_entries_page(
        &self,
        page: u64,
        page_size: u64,
        search: Option<&str>,
    ) -> Result<DisplayPagedResult, MapError> {
        let typed: PagedResult<K, V> = self.get_entries_paged(page, page_size, search).await?;
        let entries = typed
            .entries
            .into_iter()
            .map(|e| DisplayEntry {
                key: self.display_key(&e.key),
                value: self.display_value(&e.value),
                version: e.version,
                last_modified_ticks: e.last_modified_ticks,
                last_modified_human: e.last_modified_human,
            })
            .collect();
        Ok(DisplayPagedResult {
            entries,
            current_page: typed.current_page,
            page_size: typed.page_size,
            total_count: typed.total_count,
            total_pages: typed.total_pages,
            has_next: typed.has_next,
            has_prev: typed.has_prev,
        })
    }

    async fn stream_keys_display(
        &self,
        consumer: &mut (dyn FnMut(String) + Send),
    ) -> Result<(), MapError> {
        self.stream_keys(|key| consumer(self.display_key(&key)))
            .await
    }

    async fn migrate_timestamps_to_sorted_set(&self) -> Result<(), MapError> {
        MapEngine::migrate_timestamps_to_sorted_set(self).await
    }

    async fn get_migration_status(&self) -> Result<MigrationStatus, MapError> {
        MapEngine::get_migration_status(self).await
    }
}

type TypedKey = (String, TypeId, TypeId);

/// Process-wide collection keyed by map name.
///
/// Does not discover names already present in the backing store; it lists
/// only names explicitly constructed in this process via
/// [`Registry::get_or_create`]. Discovery of the underlying keyspace is a
/// collaborator's responsibility.
pub struct Registry {
    store: Arc<dyn StoreClient>,
    clock: Arc<dyn ClockSource>,
    config: MapConfig,
    by_name: DashMap<String, Arc<dyn AnyMapEngine>>,
    by_typed: DashMap<TypedKey, Arc<dyn Any + Send + Sync>>,
}

impl Registry {
    /// Creates an empty registry sharing one store connection and clock
    /// across every map it constructs.
    #[must_use]
    pub fn new(store: Arc<dyn StoreClient>, clock: Arc<dyn ClockSource>, config: MapConfig) -> Self {
        Self {
            store,
            clock,
            config,
            by_name: DashMap::new(),
            by_typed: DashMap::new(),
        }
    }

    /// Returns the existing engine for `name` if one of the same `K`/`V`
    /// was already constructed; otherwise constructs one, applying `ttl` if
    /// given and no TTL policy is already persisted for this map.
    ///
    /// # Errors
    ///
    /// Returns [`MapError::Transport`] if construction or the TTL write
    /// fails. Returns [`MapError::Registry`] if `name` was already
    /// registered under a different `K`/`V` pair.
    pub async fn get_or_create<K, V>(
        &self,
        name: impl Into<String>,
        ttl: Option<Duration>,
    ) -> Result<Arc<MapEngine<K, V>>, MapError>
    where
        K: Serialize + DeserializeOwned + Send + Sync + 'static,
        V: Serialize + DeserializeOwned + Send + Sync + 'static,
    {
        let name = name.into();
        let type_key: TypedKey = (name.clone(), TypeId::of::<K>(), TypeId::of::<V>());
        if let Some(existing) = self.by_typed.get(&type_key) {
            let engine = downcast_engine::<K, V>(existing.value())
                .ok_or_else(|| RegistryError::TypeMismatch { name: name.clone() })?;
            return Ok(engine);
        }

        let engine = Arc::new(
            MapEngine::<K, V>::new(
                &name,
                Arc::clone(&self.store),
                Arc::new(JsonKeySerializer::<K>::new()),
                Arc::new(JsonCodec::<V>::new()),
                Arc::clone(&self.clock),
                self.config.clone(),
            )
            .await?,
        );

        if let Some(ttl) = ttl {
            let already_persisted = self.store.key_exists(&ttl_config_key(&name)).await?;
            if !already_persisted {
                engine.set_item_expiration(Some(ttl)).await?;
            }
        }

        self.by_typed
            .insert(type_key, engine.clone() as Arc<dyn Any + Send + Sync>);
        self.by_name
            .insert(name, engine.clone() as Arc<dyn AnyMapEngine>);
        Ok(engine)
    }

    /// Returns the existing engine for `name`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotRegistered`] if no engine of this `K`/`V`
    /// has been constructed for `name`.
    pub fn get<K, V>(&self, name: &str) -> Result<Arc<MapEngine<K, V>>, RegistryError>
    where
        K: Send + Sync + 'static,
        V: Send + Sync + 'static,
    {
        let type_key: TypedKey = (name.to_string(), TypeId::of::<K>(), TypeId::of::<V>());
        let entry = self
            .by_typed
            .get(&type_key)
            .ok_or_else(|| RegistryError::NotRegistered {
                name: name.to_string(),
            })?;
        downcast_engine::<K, V>(entry.value()).ok_or_else(|| RegistryError::TypeMismatch {
            name: name.to_string(),
        })
    }

    /// Returns a type-erased handle for `name`, for collaborators that do
    /// not know `K`/`V` statically.
    #[must_use]
    pub fn get_raw(&self, name: &str) -> Option<Arc<dyn AnyMapEngine>> {
        self.by_name.get(name).map(|entry| entry.value().clone())
    }

    /// Enumerates registered map names, hiding internal metadata-style names.
    #[must_use]
    pub fn list_map_names(&self) -> Vec<String> {
        self.by_name
            .iter()
            .map(|entry| entry.key().clone())
            .filter(|name| !is_internal_name(name))
            .collect()
    }
}

fn downcast_engine<K, V>(entry: &Arc<dyn Any + Send + Sync>) -> Option<Arc<MapEngine<K, V>>>
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    entry.clone().downcast::<MapEngine<K, V>>().ok()
}
