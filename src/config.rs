//! Configuration Module
//!
//! Options for the cache and the loader, plus environment-driven defaults for
//! the demo binary.

use std::env;
use std::fmt::{self, Display};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use serde::Serialize;

use crate::cache::Settled;
use crate::error::KeyError;

/// Normalizes a raw key into the cache key used for storage and deduplication.
///
/// A key the function rejects is never stored under any cache key.
pub type KeyFn<K> = Arc<dyn Fn(&K) -> Result<String, KeyError> + Send + Sync>;

/// Derives an entry's TTL from its settled value. `None` or zero keeps the default.
pub type TtlFromItem<K, V> = Arc<dyn Fn(&Settled<V>, &K) -> Option<Duration> + Send + Sync>;

/// Produces the future a batch waits on before dispatching.
pub type ScheduleFn = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Default maximum number of cache entries.
pub const DEFAULT_MAX_ENTRIES: usize = 1000;

/// Key function using the key's `Display` form.
pub fn display_key_fn<K: Display + 'static>() -> KeyFn<K> {
    infallible(|key: &K| key.to_string())
}

/// Key function using the key's JSON serialization, for structured keys.
///
/// Keys JSON cannot represent, such as maps with non-string keys, are
/// rejected with a [`KeyError`].
pub fn json_key_fn<K: Serialize + 'static>() -> KeyFn<K> {
    Arc::new(|key: &K| serde_json::to_string(key).map_err(KeyError::from))
}

// wraps an infallible normalization
fn infallible<K: 'static, F>(key_fn: F) -> KeyFn<K>
where
    F: Fn(&K) -> String + Send + Sync + 'static,
{
    Arc::new(move |key: &K| -> Result<String, KeyError> { Ok(key_fn(key)) })
}

// == Cache Options ==
/// Options for [`TtlCache`](crate::cache::TtlCache).
pub struct CacheOptions<K, V> {
    /// Maximum number of entries held by the store
    pub max: usize,
    /// Expiry for entries without an item-derived TTL, None = never
    pub ttl: Option<Duration>,
    /// Per-item expiry override
    pub ttl_from_item: Option<TtlFromItem<K, V>>,
    /// Raw key to cache key normalization
    pub key_fn: KeyFn<K>,
}

impl<K, V> CacheOptions<K, V> {
    /// Creates options with a custom key function and default limits.
    pub fn new(key_fn: KeyFn<K>) -> Self {
        Self {
            max: DEFAULT_MAX_ENTRIES,
            ttl: None,
            ttl_from_item: None,
            key_fn,
        }
    }

    pub fn max(mut self, max: usize) -> Self {
        self.max = max;
        self
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn ttl_from_item<F>(mut self, ttl_from_item: F) -> Self
    where
        F: Fn(&Settled<V>, &K) -> Option<Duration> + Send + Sync + 'static,
    {
        self.ttl_from_item = Some(Arc::new(ttl_from_item));
        self
    }

    pub fn key_fn<F>(mut self, key_fn: F) -> Self
    where
        K: 'static,
        F: Fn(&K) -> String + Send + Sync + 'static,
    {
        self.key_fn = infallible(key_fn);
        self
    }
}

impl<K: Display + 'static, V> Default for CacheOptions<K, V> {
    fn default() -> Self {
        Self::new(display_key_fn())
    }
}

impl<K, V> Clone for CacheOptions<K, V> {
    fn clone(&self) -> Self {
        Self {
            max: self.max,
            ttl: self.ttl,
            ttl_from_item: self.ttl_from_item.clone(),
            key_fn: Arc::clone(&self.key_fn),
        }
    }
}

impl<K, V> fmt::Debug for CacheOptions<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheOptions")
            .field("max", &self.max)
            .field("ttl", &self.ttl)
            .field("ttl_from_item", &self.ttl_from_item.is_some())
            .finish_non_exhaustive()
    }
}

// == Batch Options ==
/// Options for the default batch executor.
#[derive(Clone, Default)]
pub struct BatchOptions {
    /// Collect keys into batches; when false every key is dispatched alone
    pub batch: bool,
    /// Upper bound on keys per batch function call, None = unbounded
    pub max_batch_size: Option<usize>,
    /// Custom wait before a batch is dispatched
    pub schedule_fn: Option<ScheduleFn>,
    /// Diagnostic name used in logs
    pub name: Option<String>,
}

impl fmt::Debug for BatchOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchOptions")
            .field("batch", &self.batch)
            .field("max_batch_size", &self.max_batch_size)
            .field("schedule_fn", &self.schedule_fn.is_some())
            .field("name", &self.name)
            .finish()
    }
}

// == Loader Options ==
/// Options for [`BatchingLoader`](crate::loader::BatchingLoader).
///
/// `cache_key_fn` is shared by the cache and request deduplication, so two
/// raw keys with the same cache key are the same request.
pub struct LoaderOptions<K, V> {
    pub cache_key_fn: KeyFn<K>,
    pub lru_cache_max: Option<usize>,
    pub lru_cache_ttl: Option<Duration>,
    pub lru_cache_ttl_from_item: Option<TtlFromItem<K, V>>,
    pub batch: bool,
    pub max_batch_size: Option<usize>,
    pub batch_schedule_fn: Option<ScheduleFn>,
    /// Cache and deduplicate loads; when false every load reaches the batch function
    pub cache: bool,
    pub name: Option<String>,
}

impl<K, V> LoaderOptions<K, V> {
    pub fn new(cache_key_fn: KeyFn<K>) -> Self {
        Self {
            cache_key_fn,
            lru_cache_max: None,
            lru_cache_ttl: None,
            lru_cache_ttl_from_item: None,
            batch: true,
            max_batch_size: None,
            batch_schedule_fn: None,
            cache: true,
            name: None,
        }
    }

    pub fn cache_key_fn<F>(mut self, cache_key_fn: F) -> Self
    where
        K: 'static,
        F: Fn(&K) -> String + Send + Sync + 'static,
    {
        self.cache_key_fn = infallible(cache_key_fn);
        self
    }

    pub fn lru_cache_max(mut self, max: usize) -> Self {
        self.lru_cache_max = Some(max);
        self
    }

    pub fn lru_cache_ttl(mut self, ttl: Duration) -> Self {
        self.lru_cache_ttl = Some(ttl);
        self
    }

    pub fn lru_cache_ttl_from_item<F>(mut self, ttl_from_item: F) -> Self
    where
        F: Fn(&Settled<V>, &K) -> Option<Duration> + Send + Sync + 'static,
    {
        self.lru_cache_ttl_from_item = Some(Arc::new(ttl_from_item));
        self
    }

    pub fn batch(mut self, batch: bool) -> Self {
        self.batch = batch;
        self
    }

    pub fn max_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = Some(size);
        self
    }

    pub fn batch_schedule_fn<F>(mut self, schedule: F) -> Self
    where
        F: Fn() -> BoxFuture<'static, ()> + Send + Sync + 'static,
    {
        self.batch_schedule_fn = Some(Arc::new(schedule));
        self
    }

    pub fn cache(mut self, cache: bool) -> Self {
        self.cache = cache;
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Options for the loader's internal cache.
    pub fn cache_options(&self) -> CacheOptions<K, V> {
        CacheOptions {
            max: self.lru_cache_max.unwrap_or(DEFAULT_MAX_ENTRIES),
            ttl: self.lru_cache_ttl,
            ttl_from_item: self.lru_cache_ttl_from_item.clone(),
            key_fn: Arc::clone(&self.cache_key_fn),
        }
    }

    /// Options for the loader's batch executor.
    pub fn batch_options(&self) -> BatchOptions {
        BatchOptions {
            batch: self.batch,
            max_batch_size: self.max_batch_size,
            schedule_fn: self.batch_schedule_fn.clone(),
            name: self.name.clone(),
        }
    }
}

impl<K: Display + 'static, V> Default for LoaderOptions<K, V> {
    fn default() -> Self {
        Self::new(display_key_fn())
    }
}

impl<K, V> fmt::Debug for LoaderOptions<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoaderOptions")
            .field("lru_cache_max", &self.lru_cache_max)
            .field("lru_cache_ttl", &self.lru_cache_ttl)
            .field("batch", &self.batch)
            .field("max_batch_size", &self.max_batch_size)
            .field("cache", &self.cache)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

// == Environment Config ==
/// Runtime configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// Maximum number of entries the cache can hold
    pub max_entries: usize,
    /// Default TTL in milliseconds, 0 = entries never expire by default
    pub default_ttl_ms: u64,
    /// Maximum keys per batch, 0 = unbounded
    pub max_batch_size: usize,
    /// Background purge interval in seconds
    pub purge_interval: u64,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `CACHE_MAX_ENTRIES` - Maximum cache entries (default: 1000)
    /// - `CACHE_DEFAULT_TTL_MS` - Default TTL in milliseconds (default: 300000)
    /// - `LOADER_MAX_BATCH_SIZE` - Maximum keys per batch (default: 100)
    /// - `PURGE_INTERVAL_SECS` - Purge frequency in seconds (default: 1)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_entries: env_or("CACHE_MAX_ENTRIES", defaults.max_entries),
            default_ttl_ms: env_or("CACHE_DEFAULT_TTL_MS", defaults.default_ttl_ms),
            max_batch_size: env_or("LOADER_MAX_BATCH_SIZE", defaults.max_batch_size),
            purge_interval: env_or("PURGE_INTERVAL_SECS", defaults.purge_interval),
        }
    }

    pub fn default_ttl(&self) -> Option<Duration> {
        (self.default_ttl_ms > 0).then(|| Duration::from_millis(self.default_ttl_ms))
    }

    pub fn purge_interval(&self) -> Duration {
        Duration::from_secs(self.purge_interval.max(1))
    }

    /// Loader options seeded from this configuration.
    pub fn loader_options<K: Display + 'static, V>(&self) -> LoaderOptions<K, V> {
        let mut options = LoaderOptions::default().lru_cache_max(self.max_entries);
        options.lru_cache_ttl = self.default_ttl();
        if self.max_batch_size > 0 {
            options = options.max_batch_size(self.max_batch_size);
        }
        options
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_entries: DEFAULT_MAX_ENTRIES,
            default_ttl_ms: 300_000,
            max_batch_size: 100,
            purge_interval: 1,
        }
    }
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
