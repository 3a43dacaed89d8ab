//! TTL Cache Module
//!
//! Wraps a bounded [`Store`] with item-derived expiry, single-flight storage of
//! pending values and change notifications on an [`EventBus`].
//!
//! Every mutation that changes state is announced twice: on the action channel
//! (`cache:set` / `cache:delete`) with the caller's raw key, and on the key's
//! item channel (`item:<cache key>`) with the action. Size-bound evictions and
//! purged expired entries are announced as deletes.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tracing::{debug, warn};

use crate::cache::{
    item_event, CacheAction, CacheEvent, CacheStats, CacheValue, LruStore, PendingValue, Settled,
    Store, SUBSCRIPTION_OFF_EVENT, SUBSCRIPTION_ON_EVENT,
};
use crate::config::CacheOptions;
use crate::error::{CacheError, KeyError, LoadError, Result};
use crate::events::{EventBus, Listener};

/// What the store holds for a cache key: the raw key it was stored under and
/// the value.
#[derive(Debug, Clone)]
pub struct CacheSlot<K, V> {
    pub key: K,
    pub value: CacheValue<V>,
}

type SlotStore<K, V> = Box<dyn Store<String, CacheSlot<K, V>>>;

/// Per-call overrides for [`TtlCache::set_with`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SetOptions {
    /// Explicit TTL, taking precedence over the item-derived one
    pub ttl: Option<Duration>,
}

struct Inner<K, V> {
    store: Mutex<SlotStore<K, V>>,
    bus: EventBus<CacheEvent<K, V>>,
    options: CacheOptions<K, V>,
}

// == TTL Cache ==
/// Cache whose entry TTLs are derived from the values they hold.
///
/// Cloning is cheap; clones share the same store and bus.
pub struct TtlCache<K, V> {
    inner: Arc<Inner<K, V>>,
}

impl<K, V> Clone for TtlCache<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, V> fmt::Debug for TtlCache<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TtlCache")
            .field("len", &self.inner.store.lock().len())
            .field("options", &self.inner.options)
            .finish()
    }
}

impl<K, V> TtlCache<K, V>
where
    K: Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    // == Constructor ==
    /// Creates a cache backed by an [`LruStore`] sized from `options`.
    pub fn new(options: CacheOptions<K, V>) -> Self {
        let store = LruStore::new(options.max, options.ttl);
        Self::with_store(options, store)
    }

    /// Creates a cache over a custom store. `options.max` and `options.ttl`
    /// are the store's business in that case.
    pub fn with_store<S>(options: CacheOptions<K, V>, store: S) -> Self
    where
        S: Store<String, CacheSlot<K, V>> + 'static,
    {
        Self {
            inner: Arc::new(Inner {
                store: Mutex::new(Box::new(store)),
                bus: EventBus::new(),
                options,
            }),
        }
    }

    pub fn options(&self) -> &CacheOptions<K, V> {
        &self.inner.options
    }

    /// The bus carrying this cache's notifications.
    pub fn events(&self) -> &EventBus<CacheEvent<K, V>> {
        &self.inner.bus
    }

    /// Normalized key used for storage and the item channel.
    pub fn cache_key(&self, key: &K) -> std::result::Result<String, KeyError> {
        (self.inner.options.key_fn)(key)
    }

    // == Get / Has ==
    /// A key rejected by the key function never has an entry.
    pub fn get(&self, key: &K) -> Option<CacheValue<V>> {
        let cache_key = self.cache_key(key).ok()?;
        self.inner.store.lock().get(&cache_key).map(|slot| slot.value)
    }

    pub fn has(&self, key: &K) -> bool {
        match self.cache_key(key) {
            Ok(cache_key) => self.inner.store.lock().has(&cache_key),
            Err(_) => false,
        }
    }

    // == Set ==
    /// Stores `value` under `key`.
    ///
    /// Settled values are stored with their item-derived TTL and announced
    /// right away. Pending values are stored as-is so concurrent readers share
    /// them, then replaced and announced once they settle.
    pub fn set(&self, key: K, value: CacheValue<V>) -> Result<()> {
        self.set_with(key, value, SetOptions::default())
    }

    pub fn set_with(&self, key: K, value: CacheValue<V>, options: SetOptions) -> Result<()> {
        match value {
            CacheValue::Pending(pending) => self.set_pending(key, pending, options),
            CacheValue::Ready(value) => self.set_settled(key, Ok(value), options),
            CacheValue::Failed(err) => self.set_settled(key, Err(err), options),
        }
    }

    fn set_settled(&self, key: K, settled: Settled<V>, options: SetOptions) -> Result<()> {
        let cache_key = self.cache_key(&key)?;
        let ttl = options.ttl.or_else(|| self.ttl_from_item(&settled, &key));
        let value = CacheValue::from(settled);

        let slot = CacheSlot {
            key: key.clone(),
            value: value.clone(),
        };
        let evicted = self.inner.store.lock().set(cache_key.clone(), slot, ttl);
        debug!(
            cache_key = %cache_key,
            ttl_ms = ?ttl.map(|ttl| ttl.as_millis()),
            failed = value.error().is_some(),
            "stored settled value"
        );

        self.notify_removed(evicted, "evicted")?;
        self.notify(CacheAction::Set, key, &cache_key, value)
    }

    fn set_pending(&self, key: K, pending: PendingValue<V>, options: SetOptions) -> Result<()> {
        let runtime = Handle::try_current().map_err(|_| CacheError::NoRuntime)?;
        let cache_key = self.cache_key(&key)?;

        let slot = CacheSlot {
            key: key.clone(),
            value: CacheValue::Pending(pending.clone()),
        };
        let evicted = self.inner.store.lock().set(cache_key.clone(), slot, options.ttl);
        debug!(cache_key = %cache_key, "stored pending value");

        self.settle_later(&runtime, key, cache_key, pending, options);
        self.notify_removed(evicted, "evicted")
    }

    // Re-stores the value once it settles, which announces the set.
    fn settle_later(
        &self,
        runtime: &Handle,
        key: K,
        cache_key: String,
        pending: PendingValue<V>,
        options: SetOptions,
    ) {
        let cache = self.clone();
        runtime.spawn(async move {
            let settled = pending.await;
            if let Err(err) = cache.set_settled(key, settled, options) {
                warn!(
                    cache_key = %cache_key,
                    error = %err,
                    "set notification failed after settlement"
                );
            }
        });
    }

    // == Get Or Load ==
    /// Returns the entry for `key`, or stores the pending value `load` starts
    /// when there is none.
    ///
    /// The lookup and the insert happen under one store lock, so concurrent
    /// callers for the same cache key start a single load. Listener failures
    /// while announcing evictions are logged, not returned.
    pub fn get_or_load<F>(&self, key: K, load: F) -> std::result::Result<CacheValue<V>, LoadError>
    where
        F: FnOnce(K) -> BoxFuture<'static, Settled<V>>,
    {
        let cache_key = self.cache_key(&key)?;
        let (runtime, pending, evicted) = {
            let mut store = self.inner.store.lock();
            if let Some(slot) = store.get(&cache_key) {
                return Ok(slot.value);
            }

            let runtime = Handle::try_current().map_err(|_| LoadError::NoRuntime)?;
            let pending = load(key.clone()).shared();
            let slot = CacheSlot {
                key: key.clone(),
                value: CacheValue::Pending(pending.clone()),
            };
            let evicted = store.set(cache_key.clone(), slot, None);
            (runtime, pending, evicted)
        };
        debug!(cache_key = %cache_key, "stored pending load");

        let options = SetOptions::default();
        self.settle_later(&runtime, key, cache_key, pending.clone(), options);
        if let Err(err) = self.notify_removed(evicted, "evicted") {
            warn!(error = %err, "eviction notification failed while loading");
        }
        Ok(CacheValue::Pending(pending))
    }

    fn ttl_from_item(&self, settled: &Settled<V>, key: &K) -> Option<Duration> {
        let ttl_from_item = self.inner.options.ttl_from_item.as_ref()?;
        ttl_from_item(settled, key).filter(|ttl| !ttl.is_zero())
    }

    // == Delete ==
    /// Removes `key`. Returns whether it was present; only then is the removal
    /// announced, with the removed value.
    pub fn delete(&self, key: &K) -> Result<bool> {
        let cache_key = self.cache_key(key)?;
        let removed = {
            let mut store = self.inner.store.lock();
            let existed = store.has(&cache_key);
            let removed = store.delete(&cache_key);
            removed.filter(|_| existed)
        };

        match removed {
            Some(slot) => {
                debug!(cache_key = %cache_key, "deleted entry");
                self.notify(CacheAction::Delete, key.clone(), &cache_key, slot.value)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Removes every entry, announcing each removal. Returns how many were removed.
    pub fn clear(&self) -> Result<usize> {
        let cleared = self.inner.store.lock().clear();
        let count = cleared.len();
        self.notify_removed(cleared, "cleared")?;
        Ok(count)
    }

    /// Removes expired entries, announcing each removal. Returns how many were removed.
    pub fn purge_stale(&self) -> Result<usize> {
        let purged = self.inner.store.lock().purge_stale();
        let count = purged.len();
        self.notify_removed(purged, "purged")?;
        Ok(count)
    }

    pub fn len(&self) -> usize {
        self.inner.store.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.store.lock().stats()
    }

    /// Time left before the entry for `key` expires, None if it never does.
    pub fn ttl_remaining(&self, key: &K) -> Option<Duration> {
        let cache_key = self.cache_key(key).ok()?;
        self.inner.store.lock().ttl_remaining(&cache_key)
    }

    // == Subscriptions ==
    /// Registers `listener` on the item channel of `key`.
    ///
    /// The first subscriber of a cache key triggers `subscription:on`; if
    /// that announcement fails the listener is deregistered again. The
    /// returned handle deregisters the listener.
    pub fn subscribe(
        &self,
        key: &K,
        listener: Listener<CacheEvent<K, V>>,
    ) -> Result<Subscription<K, V>> {
        let cache_key = self.cache_key(key)?;
        let event = item_event(&cache_key);
        let bus = &self.inner.bus;

        if bus.on_counted(&event, listener.clone()) == 0 {
            debug!(cache_key = %cache_key, "first subscriber");
            let announced = bus.emit(
                SUBSCRIPTION_ON_EVENT,
                &CacheEvent::Subscription { key: key.clone() },
            );
            if let Err(err) = announced {
                bus.off(&event, &listener);
                return Err(err.into());
            }
        }

        Ok(Subscription {
            cache: self.clone(),
            key: key.clone(),
            event,
            listener,
            canceled: AtomicBool::new(false),
        })
    }

    /// Number of listeners on the item channel of `key`.
    pub fn subscribers(&self, key: &K) -> usize {
        match self.cache_key(key) {
            Ok(cache_key) => self.inner.bus.listener_count(&item_event(&cache_key)),
            Err(_) => 0,
        }
    }

    // == Notifications ==
    fn notify(
        &self,
        action: CacheAction,
        key: K,
        cache_key: &str,
        value: CacheValue<V>,
    ) -> Result<()> {
        let bus = &self.inner.bus;
        bus.emit(
            action.event_name(),
            &CacheEvent::Action {
                key,
                value: value.clone(),
            },
        )?;
        bus.emit(&item_event(cache_key), &CacheEvent::Item { action, value })?;
        Ok(())
    }

    fn notify_removed(&self, removed: Vec<(String, CacheSlot<K, V>)>, reason: &str) -> Result<()> {
        for (cache_key, slot) in removed {
            debug!(cache_key = %cache_key, reason, "removed entry");
            self.notify(CacheAction::Delete, slot.key, &cache_key, slot.value)?;
        }
        Ok(())
    }
}

// == Subscription ==
/// Handle to a listener registered with [`TtlCache::subscribe`].
///
/// Dropping the handle leaves the listener registered.
pub struct Subscription<K, V> {
    cache: TtlCache<K, V>,
    key: K,
    event: String,
    listener: Listener<CacheEvent<K, V>>,
    canceled: AtomicBool,
}

impl<K, V> Subscription<K, V>
where
    K: Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Deregisters the listener. Only the first call has any effect.
    ///
    /// Emits `subscription:off` when this removes the key's last subscriber.
    pub fn cancel(&self) -> Result<()> {
        if self.canceled.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let bus = self.cache.events();
        if bus.off_counted(&self.event, &self.listener) == Some(0) {
            debug!(event = %self.event, "last subscriber left");
            bus.emit(
                SUBSCRIPTION_OFF_EVENT,
                &CacheEvent::Subscription {
                    key: self.key.clone(),
                },
            )?;
        }
        Ok(())
    }

    pub fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::SeqCst)
    }

    pub fn key(&self) -> &K {
        &self.key
    }
}

impl<K: fmt::Debug, V> fmt::Debug for Subscription<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("key", &self.key)
            .field("event", &self.event)
            .field("canceled", &self.canceled.load(Ordering::SeqCst))
            .finish()
    }
}
