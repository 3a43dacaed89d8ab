//! TTL Item Cache demo
//!
//! Loads a few users through a batching loader, watching one of them, and
//! prints the cache statistics at the end.

use std::time::Duration;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ttl_item_cache::cache::{CacheEvent, Settled};
use ttl_item_cache::{batch_fn, spawn_purge_task, BatchingLoader, Config, Listener, LoadError};

/// Pretend backend: user ids are their name lengths, names starting with `x`
/// do not exist.
fn lookup_users(names: &[String]) -> Vec<Settled<u64>> {
    names
        .iter()
        .map(|name| {
            if name.starts_with('x') {
                Err(LoadError::msg(format!("user {name} not found")))
            } else {
                Ok(name.len() as u64)
            }
        })
        .collect()
}

/// Main entry point for the demo.
///
/// # Sequence
/// 1. Initialize tracing subscriber for logging
/// 2. Load configuration from environment variables
/// 3. Build the loader and start the purge task
/// 4. Subscribe to one key and run a few loads
/// 5. Print statistics and stop the purge task
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Defaults to "info" level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ttl_item_cache=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    info!(
        max_entries = config.max_entries,
        default_ttl_ms = config.default_ttl_ms,
        max_batch_size = config.max_batch_size,
        purge_interval_secs = config.purge_interval,
        "Configuration loaded"
    );

    let options = config
        .loader_options::<String, u64>()
        .lru_cache_ttl_from_item(|settled: &Settled<u64>, _: &String| {
            // misses are retried sooner than hits
            settled.is_err().then(|| Duration::from_secs(5))
        })
        .name("users");
    let loader = BatchingLoader::new(
        batch_fn(|names: Vec<String>| async move {
            info!(batch = ?names, "Backend lookup");
            Ok(lookup_users(&names))
        }),
        options,
    );
    let purge_handle = spawn_purge_task(loader.cache().clone(), config.purge_interval());

    let subscription = loader
        .subscribe(
            &"alice".to_string(),
            Listener::new(|event: &CacheEvent<String, u64>| {
                if let CacheEvent::Item { action, value } = event {
                    info!(%action, value = ?value, "alice changed");
                }
                Ok(())
            }),
        )
        .context("subscribing to alice")?;

    let names = ["alice", "bob", "xavier", "alice"].map(String::from).to_vec();
    for (name, result) in names.iter().zip(loader.load_many(names.clone()).await) {
        match result {
            Ok(id) => info!(%name, id, "Loaded"),
            Err(err) => warn!(%name, error = %err, "Load failed"),
        }
    }

    // served from the cache, failure included
    if let Err(err) = loader.load("xavier".to_string()).await {
        warn!(error = %err, "Cached failure replayed");
    }

    loader.clear(&"alice".to_string()).context("clearing alice")?;
    subscription.cancel().context("unsubscribing from alice")?;

    let stats = loader.cache().stats();
    println!("{}", serde_json::to_string_pretty(&stats)?);

    purge_handle.abort();
    info!("Demo complete");
    Ok(())
}
