//! Stale Entry Purge Task
//!
//! Background task that periodically removes expired cache entries so their
//! removal is announced instead of discovered lazily.

use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::TtlCache;

/// Spawns a background task that purges expired entries every `interval`.
///
/// Each purged entry is announced as a delete, like an explicit
/// [`TtlCache::delete`]. A listener failure is logged and the task keeps
/// running.
///
/// # Returns
/// A JoinHandle for the spawned task, which can be used to abort the task
/// during shutdown.
///
/// # Example
/// ```ignore
/// let purge_handle = spawn_purge_task(cache.clone(), Duration::from_secs(1));
/// // Later, during shutdown:
/// purge_handle.abort();
/// ```
pub fn spawn_purge_task<K, V>(cache: TtlCache<K, V>, interval: Duration) -> JoinHandle<()>
where
    K: Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    tokio::spawn(async move {
        info!(interval_ms = interval.as_millis() as u64, "Starting purge task");

        loop {
            tokio::time::sleep(interval).await;

            match cache.purge_stale() {
                Ok(0) => debug!("Purge: no expired entries found"),
                Ok(removed) => info!(removed, "Purge: removed expired entries"),
                Err(err) => warn!(error = %err, "Purge: removal notification failed"),
            }
        }
    })
}
