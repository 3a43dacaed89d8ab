//! Store Module
//!
//! The bounded key-value capability underneath [`TtlCache`](super::TtlCache)
//! and its default implementation, an [`lru::LruCache`] whose entries carry
//! their own expiry.

use std::hash::Hash;
use std::num::NonZeroUsize;
use std::time::Duration;

use lru::LruCache;

use crate::cache::{CacheEntry, CacheStats, Removal};

// == Store Capability ==
/// Bounded key-value store the cache delegates storage to.
///
/// Methods that drop entries hand them back so the caller can report them.
pub trait Store<K, V>: Send {
    /// Returns the live value for `key`, refreshing its recency.
    fn get(&mut self, key: &K) -> Option<V>;

    /// Stores `value`, expiring after `ttl` or the store default when `None`.
    ///
    /// Returns the entries evicted to make room.
    fn set(&mut self, key: K, value: V, ttl: Option<Duration>) -> Vec<(K, V)>;

    /// Whether a live value exists for `key`. Does not refresh recency.
    fn has(&mut self, key: &K) -> bool;

    fn delete(&mut self, key: &K) -> Option<V>;

    /// Removes every entry.
    fn clear(&mut self) -> Vec<(K, V)>;

    /// Removes every expired entry.
    fn purge_stale(&mut self) -> Vec<(K, V)>;

    fn len(&self) -> usize;

    /// Time left before the live entry for `key` expires, if it expires at all.
    fn ttl_remaining(&self, _key: &K) -> Option<Duration> {
        None
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn stats(&self) -> CacheStats {
        CacheStats::default()
    }
}

// == LRU Store ==
/// Default store: recency and the size bound come from [`LruCache`], expiry
/// from each [`CacheEntry`].
pub struct LruStore<K, V> {
    entries: LruCache<K, CacheEntry<V>>,
    stats: CacheStats,
    /// Expiry for entries stored without an explicit TTL
    default_ttl: Option<Duration>,
}

impl<K, V> LruStore<K, V>
where
    K: Eq + Hash + Clone,
{
    // == Constructor ==
    /// Creates a store holding at most `max_entries` (at least one).
    ///
    /// # Arguments
    /// * `max_entries` - Maximum number of entries the store can hold
    /// * `default_ttl` - Expiry for entries stored without explicit TTL
    pub fn new(max_entries: usize, default_ttl: Option<Duration>) -> Self {
        let capacity = NonZeroUsize::new(max_entries).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: LruCache::new(capacity),
            stats: CacheStats::with_capacity(capacity.get()),
            default_ttl,
        }
    }

    pub fn max_entries(&self) -> usize {
        self.entries.cap().get()
    }

    /// Remaining TTL of a live entry in milliseconds.
    pub fn ttl_remaining_ms(&self, key: &K) -> Option<u64> {
        self.entries
            .peek(key)
            .filter(|entry| !entry.is_expired())
            .and_then(CacheEntry::ttl_remaining_ms)
    }

    // Drops `key` if its TTL elapsed. Returns whether a live entry remains.
    fn expire_if_stale(&mut self, key: &K) -> bool {
        match self.entries.peek(key).map(CacheEntry::is_expired) {
            Some(true) => {
                self.entries.pop(key);
                self.stats.record_removal(Removal::Expired);
                false
            }
            Some(false) => true,
            None => false,
        }
    }
}

impl<K, V> Store<K, V> for LruStore<K, V>
where
    K: Eq + Hash + Clone + Send,
    V: Clone + Send,
{
    // == Get ==
    fn get(&mut self, key: &K) -> Option<V> {
        let live = self.expire_if_stale(key);
        self.stats.record_read(live);
        if !live {
            return None;
        }

        self.entries.get(key).map(|entry| entry.value.clone())
    }

    // == Set ==
    /// Overwriting a key resets its TTL. Inserting a new key into a full store
    /// evicts the least recently used entry first.
    fn set(&mut self, key: K, value: V, ttl: Option<Duration>) -> Vec<(K, V)> {
        let entry = CacheEntry::new(value, ttl.or(self.default_ttl));
        if self.entries.contains(&key) {
            self.entries.put(key, entry);
            return Vec::new();
        }

        match self.entries.push(key, entry) {
            Some((oldest, entry)) => {
                self.stats.record_removal(Removal::Evicted);
                vec![(oldest, entry.value)]
            }
            None => Vec::new(),
        }
    }

    fn has(&mut self, key: &K) -> bool {
        self.expire_if_stale(key)
    }

    // == Delete ==
    fn delete(&mut self, key: &K) -> Option<V> {
        self.entries.pop(key).map(|entry| entry.value)
    }

    fn clear(&mut self) -> Vec<(K, V)> {
        std::iter::from_fn(|| self.entries.pop_lru())
            .map(|(key, entry)| (key, entry.value))
            .collect()
    }

    // == Purge Stale ==
    fn purge_stale(&mut self) -> Vec<(K, V)> {
        let expired_keys: Vec<K> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired())
            .map(|(key, _)| key.clone())
            .collect();

        let mut purged = Vec::with_capacity(expired_keys.len());
        for key in expired_keys {
            if let Some(entry) = self.entries.pop(&key) {
                self.stats.record_removal(Removal::Expired);
                purged.push((key, entry.value));
            }
        }

        purged
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn ttl_remaining(&self, key: &K) -> Option<Duration> {
        self.ttl_remaining_ms(key).map(Duration::from_millis)
    }

    fn stats(&self) -> CacheStats {
        CacheStats {
            total_entries: self.entries.len(),
            ..self.stats.clone()
        }
    }
}
