//! The user-supplied function that resolves a batch of keys.

use std::future::Future;

use async_trait::async_trait;

use crate::cache::Settled;
use crate::error::LoadError;

/// Resolves many keys in one call.
///
/// The returned list answers `keys` position by position. A per-key `Err`
/// fails only that key; an `Err` for the whole call fails every key in the
/// batch.
#[async_trait]
pub trait BatchFn<K, V>: Send + Sync {
    async fn load(&self, keys: Vec<K>) -> Result<Vec<Settled<V>>, LoadError>;
}

/// [`BatchFn`] backed by an async closure. Built with [`batch_fn`].
pub struct FnBatch<F> {
    f: F,
}

/// Wraps an async closure as a [`BatchFn`].
pub fn batch_fn<K, V, F, Fut>(f: F) -> FnBatch<F>
where
    F: Fn(Vec<K>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Vec<Settled<V>>, LoadError>> + Send,
{
    FnBatch { f }
}

#[async_trait]
impl<K, V, F, Fut> BatchFn<K, V> for FnBatch<F>
where
    K: Send + 'static,
    V: Send + 'static,
    F: Fn(Vec<K>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Vec<Settled<V>>, LoadError>> + Send,
{
    async fn load(&self, keys: Vec<K>) -> Result<Vec<Settled<V>>, LoadError> {
        (self.f)(keys).await
    }
}
