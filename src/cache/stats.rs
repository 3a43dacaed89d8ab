//! Store Statistics
//!
//! Counters kept by [`LruStore`](super::LruStore) and reported through
//! [`TtlCache::stats`](super::TtlCache::stats).

use serde::Serialize;

/// Why an entry left the store without an explicit delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Removal {
    /// Dropped to make room under the size bound
    Evicted,
    /// Its TTL elapsed
    Expired,
}

// == Cache Stats ==
/// Read and removal counters for one store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    /// Reads that found nothing or only an expired entry
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
    /// Entries held when the snapshot was taken
    pub total_entries: usize,
    /// Size bound of the store, 0 when unknown
    pub max_entries: usize,
}

impl CacheStats {
    pub fn with_capacity(max_entries: usize) -> Self {
        Self {
            max_entries,
            ..Self::default()
        }
    }

    pub fn record_read(&mut self, hit: bool) {
        if hit {
            self.hits += 1;
        } else {
            self.misses += 1;
        }
    }

    pub fn record_removal(&mut self, removal: Removal) {
        match removal {
            Removal::Evicted => self.evictions += 1,
            Removal::Expired => self.expirations += 1,
        }
    }

    pub fn reads(&self) -> u64 {
        self.hits + self.misses
    }

    /// Share of reads that were hits, 0.0 before the first read.
    pub fn hit_rate(&self) -> f64 {
        match self.reads() {
            0 => 0.0,
            reads => self.hits as f64 / reads as f64,
        }
    }

    /// Share of the size bound in use, 0.0 when the bound is unknown.
    pub fn fill_ratio(&self) -> f64 {
        match self.max_entries {
            0 => 0.0,
            max => self.total_entries as f64 / max as f64,
        }
    }
}
