//! TTL Item Cache - An item-aware TTL cache with change notifications
//!
//! Provides a bounded LRU cache whose entry lifetimes are derived from the
//! values they hold, a small event bus for its notifications, and a batching
//! loader that coalesces concurrent loads into batch calls.

pub mod cache;
pub mod config;
pub mod error;
pub mod events;
pub mod loader;
pub mod tasks;

pub use cache::{CacheEvent, CacheValue, Subscription, TtlCache};
pub use config::{CacheOptions, Config, LoaderOptions};
pub use error::{CacheError, KeyError, ListenerError, LoadError};
pub use events::{EventBus, Listener, WildcardListener};
pub use loader::{batch_fn, BatchFn, BatchingLoader};
pub use tasks::spawn_purge_task;
