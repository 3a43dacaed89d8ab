//! Batching Loader
//!
//! Request coalescing in front of a [`BatchFn`]: loads made in the same
//! scheduling window are answered by one batch call, and every answer
//! (including failures) is kept in a [`TtlCache`] so later loads replay it.

use std::fmt;
use std::sync::Arc;

use futures::future;
use tracing::trace;

use crate::cache::{CacheEvent, CacheValue, Settled, Subscription, TtlCache};
use crate::config::LoaderOptions;
use crate::error::{KeyError, Result};
use crate::events::Listener;
use crate::loader::{BatchExecute, BatchFn, Batcher};

// == Batching Loader ==
/// Loads values by key through a batch executor and a shared TTL cache.
///
/// The cache and the deduplication both key on `cache_key_fn`, so raw keys
/// that normalize to the same cache key are one request. Clones share the
/// executor and the cache.
pub struct BatchingLoader<K, V> {
    executor: Arc<dyn BatchExecute<K, V>>,
    cache: TtlCache<K, V>,
    caching: bool,
    name: Option<String>,
}

impl<K, V> Clone for BatchingLoader<K, V> {
    fn clone(&self) -> Self {
        Self {
            executor: Arc::clone(&self.executor),
            cache: self.cache.clone(),
            caching: self.caching,
            name: self.name.clone(),
        }
    }
}

impl<K, V> BatchingLoader<K, V>
where
    K: Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    // == Constructors ==
    /// Creates a loader over `batch_fn` with a fresh cache built from `options`.
    pub fn new<F>(batch_fn: F, options: LoaderOptions<K, V>) -> Self
    where
        F: BatchFn<K, V> + 'static,
    {
        let cache = TtlCache::new(options.cache_options());
        let executor = Batcher::new(batch_fn, options.batch_options());
        Self::with_parts(executor, cache, &options)
    }

    /// Creates a loader from an existing executor and cache.
    ///
    /// The cache's key function is used for deduplication; only `cache` and
    /// `name` are read from `options`.
    pub fn with_parts<E>(
        executor: E,
        cache: TtlCache<K, V>,
        options: &LoaderOptions<K, V>,
    ) -> Self
    where
        E: BatchExecute<K, V> + 'static,
    {
        Self {
            executor: Arc::new(executor),
            cache,
            caching: options.cache,
            name: options.name.clone(),
        }
    }

    // == Load ==
    /// Loads the value for `key`.
    ///
    /// A cached or in-flight entry for the same cache key is reused. A failure
    /// is returned as `Err` on this call and on every later call that hits the
    /// cached entry. A key the key function rejects fails with
    /// [`LoadError::Key`](crate::error::LoadError::Key) and is never loaded.
    pub async fn load(&self, key: K) -> Settled<V> {
        if !self.caching {
            return self.executor.enqueue(key).await;
        }

        let executor = &self.executor;
        let value = self.cache.get_or_load(key, |key| executor.enqueue(key))?;
        trace!(loader = self.name(), pending = value.is_pending(), "cache lookup");
        value.resolve().await
    }

    /// Loads every key, answering in the same order. Keys not yet cached are
    /// dispatched together.
    pub async fn load_many(&self, keys: Vec<K>) -> Vec<Settled<V>> {
        future::join_all(keys.into_iter().map(|key| self.load(key))).await
    }

    /// Stores `value` for `key` unless an entry already exists. Returns whether
    /// it was stored.
    pub fn prime(&self, key: K, value: V) -> Result<bool> {
        if self.cache.has(&key) {
            return Ok(false);
        }
        self.cache.set(key, CacheValue::Ready(value))?;
        Ok(true)
    }

    /// Forgets the cached entry for `key` so the next load reaches the batch function.
    pub fn clear(&self, key: &K) -> Result<bool> {
        self.cache.delete(key)
    }

    pub fn clear_all(&self) -> Result<usize> {
        self.cache.clear()
    }

    // == Subscriptions ==
    /// Subscribes to changes of the cache entry for `key`.
    pub fn subscribe(
        &self,
        key: &K,
        listener: Listener<CacheEvent<K, V>>,
    ) -> Result<Subscription<K, V>> {
        self.cache.subscribe(key, listener)
    }

    pub fn subscribers(&self, key: &K) -> usize {
        self.cache.subscribers(key)
    }

    pub fn cache_key(&self, key: &K) -> std::result::Result<String, KeyError> {
        self.cache.cache_key(key)
    }

    pub fn cache(&self) -> &TtlCache<K, V> {
        &self.cache
    }

    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or("loader")
    }
}

impl<K, V> fmt::Debug for BatchingLoader<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchingLoader")
            .field("name", &self.name)
            .field("caching", &self.caching)
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}
