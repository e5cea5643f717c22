//! `mapstore` engine -- a typed, named, in-process handle over a remote
//! Redis-compatible key-value store, with TTL expiration, coalesced batch
//! notifications, and server-side paginated scans.
//!
//! - **Store** ([`store`]): thin [`store::StoreClient`] facade over hash,
//!   sorted-set, string, and scan operations, with a real Redis
//!   implementation and an in-memory one for tests.
//! - **Map** ([`map`]): [`map::MapEngine`], the typed handle over one named
//!   map -- gets, sets, removals, change notifications, the Expiration
//!   Sweeper and Batch Sweeper, and paginated listing.
//! - **Registry** ([`registry`]): [`registry::Registry`], the process-wide
//!   collection of named typed maps.
//! - **Dispatch** ([`dispatch`]): handler registration and notification
//!   fan-out.
//! - **Keys** ([`keys`]): the backing key layout in the remote store.
//! - **Error** ([`error`]): [`error::MapError`] and [`error::RegistryError`].

pub mod dispatch;
pub mod error;
pub mod keys;
pub mod map;
pub mod registry;
pub mod store;

pub use dispatch::{BatchEntry, NotificationDispatcher};
pub use error::{MapError, RegistryError};
pub use map::{MapConfig, MapEngine, MigrationStatus, PagedEntry, PagedResult};
pub use registry::{AnyMapEngine, DisplayEntry, DisplayPagedResult, Registry};
pub use store::{LeaseTracker, MemoryStoreClient, RedisStoreClient, StoreClient, ValueLease};
