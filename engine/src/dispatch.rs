//! Notification Dispatcher.
//!
//! Per-engine, holds six independent handler lists. Dispatch is synchronous
//! within the triggering operation. Registration is protected by a lock;
//! dispatch takes a snapshot (cheap `Arc` clones) and releases the lock
//! before invoking any handler, so a handler that registers another handler
//! on the same dispatcher cannot deadlock. Panics from handlers are caught
//! and discarded so one bad handler cannot block another.
//!
//! Handler shape: all six families are plain synchronous closures (see
//! `DESIGN.md` for why this was chosen over a mixed sync/async shape).

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::RwLock;

/// One entry in a coalesced batch-update notification.
#[derive(Debug, Clone)]
pub struct BatchEntry<K, V> {
    /// The key that was written.
    pub key: K,
    /// The key's current value at the time the batch was assembled.
    pub value: V,
    /// The key's last-modified instant, in ticks.
    pub last_modified_ticks: i64,
}

type AddHandler<K, V> = Arc<dyn Fn(&K, &V) + Send + Sync>;
type UpdateHandler<K, V> = Arc<dyn Fn(&K, &V) + Send + Sync>;
type RemoveHandler<K, V> = Arc<dyn Fn(&K, &V) + Send + Sync>;
type ClearHandler = Arc<dyn Fn() + Send + Sync>;
type BatchUpdateHandler<K, V> = Arc<dyn Fn(&[BatchEntry<K, V>]) + Send + Sync>;
type ExpiredHandler<K, V> = Arc<dyn Fn(&K, &V) + Send + Sync>;

/// Holds the six handler lists for one [`crate::map::MapEngine`] instance.
///
/// Handlers are local to the engine instance that registered them: a
/// process holding two independent engines for the same map name has
/// independent dispatch: handlers are local to the engine instance that
/// registered them.
pub struct NotificationDispatcher<K, V> {
    add: RwLock<Vec<AddHandler<K, V>>>,
    update: RwLock<Vec<UpdateHandler<K, V>>>,
    remove: RwLock<Vec<RemoveHandler<K, V>>>,
    clear: RwLock<Vec<ClearHandler>>,
    batch_update: RwLock<Vec<BatchUpdateHandler<K, V>>>,
    expired: RwLock<Vec<ExpiredHandler<K, V>>>,
}

impl<K, V> Default for NotificationDispatcher<K, V> {
    fn default() -> Self {
        Self {
            add: RwLock::new(Vec::new()),
            update: RwLock::new(Vec::new()),
            remove: RwLock::new(Vec::new()),
            clear: RwLock::new(Vec::new()),
            batch_update: RwLock::new(Vec::new()),
            expired: RwLock::new(Vec::new()),
        }
    }
}

impl<K, V> NotificationDispatcher<K, V> {
    /// Creates a dispatcher with no registered handlers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an "add" handler, invoked when a key transitions Absent -> Present.
    pub fn on_add(&self, handler: impl Fn(&K, &V) + Send + Sync + 'static) {
        self.add.write().push(Arc::new(handler));
    }

    /// Registers an "update" handler, invoked when a Present key is overwritten.
    pub fn on_update(&self, handler: impl Fn(&K, &V) + Send + Sync + 'static) {
        self.update.write().push(Arc::new(handler));
    }

    /// Registers a "remove" handler, invoked with the prior value on removal.
    pub fn on_remove(&self, handler: impl Fn(&K, &V) + Send + Sync + 'static) {
        self.remove.write().push(Arc::new(handler));
    }

    /// Registers a "clear" handler, invoked once per `Clear()` call.
    pub fn on_clear(&self, handler: impl Fn() + Send + Sync + 'static) {
        self.clear.write().push(Arc::new(handler));
    }

    /// Registers a "batch update" handler, invoked once per coalesced batch.
    pub fn on_batch_update(&self, handler: impl Fn(&[BatchEntry<K, V>]) + Send + Sync + 'static) {
        self.batch_update.write().push(Arc::new(handler));
    }

    /// Registers an "expired" handler, invoked before the paired "remove"
    /// dispatch when a key is swept out by the Expiration Sweeper.
    pub fn on_expired(&self, handler: impl Fn(&K, &V) + Send + Sync + 'static) {
        self.expired.write().push(Arc::new(handler));
    }

    /// Whether any `OnBatchUpdate` handler is currently registered. The
    /// Batch Sweeper uses this to skip a pass entirely.
    #[must_use]
    pub fn has_batch_update_handlers(&self) -> bool {
        !self.batch_update.read().is_empty()
    }

    pub(crate) fn dispatch_add(&self, key: &K, value: &V) {
        for handler in snapshot(&self.add) {
            invoke_swallowing_panics(|| handler(key, value));
        }
    }

    pub(crate) fn dispatch_update(&self, key: &K, value: &V) {
        for handler in snapshot(&self.update) {
            invoke_swallowing_panics(|| handler(key, value));
        }
    }

    pub(crate) fn dispatch_remove(&self, key: &K, prior_value: &V) {
        for handler in snapshot(&self.remove) {
            invoke_swallowing_panics(|| handler(key, prior_value));
        }
    }

    pub(crate) fn dispatch_clear(&self) {
        for handler in snapshot(&self.clear) {
            invoke_swallowing_panics(|| handler());
        }
    }

    pub(crate) fn dispatch_batch_update(&self, entries: &[BatchEntry<K, V>]) {
        for handler in snapshot(&self.batch_update) {
            invoke_swallowing_panics(|| handler(entries));
        }
    }

    pub(crate) fn dispatch_expired(&self, key: &K, value: &V) {
        for handler in snapshot(&self.expired) {
            invoke_swallowing_panics(|| handler(key, value));
        }
    }
}

fn snapshot<T: Clone>(list: &RwLock<Vec<T>>) -> Vec<T> {
    list.read().clone()
}

fn invoke_swallowing_panics(f: impl FnOnce()) {
    if catch_unwind(AssertUnwindSafe(f)).is_err() {
        tracing::warn!("notification handler panicked; discarding and continuing");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    #[test]
    fn add_and_update_handlers_fire_independently() {
        let dispatcher: NotificationDispatcher<String, i32> = NotificationDispatcher::new();
        let adds = Arc::new(AtomicUsize::new(0));
        let updates = Arc::new(AtomicUsize::new(0));

        let adds_clone = adds.clone();
        dispatcher.on_add(move |_, _| {
            adds_clone.fetch_add(1, Ordering::SeqCst);
        });
        let updates_clone = updates.clone();
        dispatcher.on_update(move |_, _| {
            updates_clone.fetch_add(1, Ordering::SeqCst);
        });

        dispatcher.dispatch_add(&"k1".to_string(), &1);
        dispatcher.dispatch_update(&"k1".to_string(), &2);

        assert_eq!(adds.load(Ordering::SeqCst), 1);
        assert_eq!(updates.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn panicking_handler_does_not_block_others() {
        let dispatcher: NotificationDispatcher<String, i32> = NotificationDispatcher::new();
        let ran = Arc::new(AtomicUsize::new(0));

        dispatcher.on_add(|_, _| panic!("boom"));
        let ran_clone = ran.clone();
        dispatcher.on_add(move |_, _| {
            ran_clone.fetch_add(1, Ordering::SeqCst);
        });

        dispatcher.dispatch_add(&"k".to_string(), &1);
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn handler_can_register_another_handler_without_deadlock() {
        let dispatcher: Arc<NotificationDispatcher<String, i32>> =
            Arc::new(NotificationDispatcher::new());
        let inner = dispatcher.clone();
        let ran = Arc::new(AtomicUsize::new(0));
        let ran_clone = ran.clone();
        dispatcher.on_add(move |_, _| {
            inner.on_update(|_, _| {});
            ran_clone.fetch_add(1, Ordering::SeqCst);
        });

        dispatcher.dispatch_add(&"k".to_string(), &1);
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn has_batch_update_handlers_reflects_registration() {
        let dispatcher: NotificationDispatcher<String, i32> = NotificationDispatcher::new();
        assert!(!dispatcher.has_batch_update_handlers());
        dispatcher.on_batch_update(|_| {});
        assert!(dispatcher.has_batch_update_handlers());
    }

    #[test]
    fn clear_handler_fires_once() {
        let dispatcher: NotificationDispatcher<String, i32> = NotificationDispatcher::new();
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();
        dispatcher.on_clear(move || {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });
        dispatcher.dispatch_clear();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
