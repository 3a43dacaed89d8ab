//! Cache Module
//!
//! Provides the TTL-aware cache with change notifications, and the bounded
//! LRU store it delegates storage to.

mod entry;
mod stats;
mod store;
mod ttl_cache;
mod value;

#[cfg(test)]
mod property_tests;

// Re-export public types
pub use entry::CacheEntry;
pub use stats::{CacheStats, Removal};
pub use store::{LruStore, Store};
pub use ttl_cache::{CacheSlot, SetOptions, Subscription, TtlCache};
pub use value::{
    item_event, CacheAction, CacheEvent, CacheValue, PendingValue, Settled, DELETE_EVENT,
    SET_EVENT, SUBSCRIPTION_OFF_EVENT, SUBSCRIPTION_ON_EVENT,
};
