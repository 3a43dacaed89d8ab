//! Batch Executor
//!
//! Collects the keys requested during one scheduling window and resolves them
//! with as few [`BatchFn`] calls as the batch size allows.

use std::fmt;
use std::sync::Arc;

use futures::future::{self, BoxFuture};
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing::{debug, trace, warn};

use crate::cache::Settled;
use crate::config::BatchOptions;
use crate::error::LoadError;
use crate::loader::BatchFn;

/// Capability to resolve one key as part of some batch.
pub trait BatchExecute<K, V>: Send + Sync {
    /// Queues `key` for the next batch. The future resolves once that batch
    /// has been answered.
    fn enqueue(&self, key: K) -> BoxFuture<'static, Settled<V>>;
}

type Waiter<K, V> = (K, oneshot::Sender<Settled<V>>);

struct Inner<K, V> {
    batch_fn: Box<dyn BatchFn<K, V>>,
    options: BatchOptions,
    queue: Mutex<Vec<Waiter<K, V>>>,
}

// == Batcher ==
/// Default [`BatchExecute`] implementation.
///
/// The first key queued in a window spawns a dispatch task. The task waits on
/// the schedule function (or a single yield to the runtime), then drains the
/// queue in chunks of at most `max_batch_size` keys.
pub struct Batcher<K, V> {
    inner: Arc<Inner<K, V>>,
}

impl<K, V> Batcher<K, V>
where
    K: Send + 'static,
    V: Send + 'static,
{
    pub fn new<F>(batch_fn: F, options: BatchOptions) -> Self
    where
        F: BatchFn<K, V> + 'static,
    {
        Self {
            inner: Arc::new(Inner {
                batch_fn: Box::new(batch_fn),
                options,
                queue: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Keys waiting for the next dispatch.
    pub fn queued(&self) -> usize {
        self.inner.queue.lock().len()
    }
}

impl<K, V> BatchExecute<K, V> for Batcher<K, V>
where
    K: Send + 'static,
    V: Send + 'static,
{
    fn enqueue(&self, key: K) -> BoxFuture<'static, Settled<V>> {
        let Ok(runtime) = Handle::try_current() else {
            return future::ready(Err(LoadError::NoRuntime)).boxed();
        };

        let (tx, rx) = oneshot::channel();
        let opens_window = {
            let mut queue = self.inner.queue.lock();
            queue.push((key, tx));
            queue.len() == 1
        };
        if opens_window {
            runtime.spawn(Arc::clone(&self.inner).dispatch());
        }

        async move {
            match rx.await {
                Ok(settled) => settled,
                Err(_) => Err(LoadError::Dropped),
            }
        }
        .boxed()
    }
}

impl<K, V> Inner<K, V>
where
    K: Send + 'static,
    V: Send + 'static,
{
    fn name(&self) -> &str {
        self.options.name.as_deref().unwrap_or("loader")
    }

    fn chunk_size(&self) -> usize {
        if !self.options.batch {
            return 1;
        }
        self.options.max_batch_size.unwrap_or(usize::MAX).max(1)
    }

    async fn dispatch(self: Arc<Self>) {
        match &self.options.schedule_fn {
            Some(schedule) => schedule().await,
            None => tokio::task::yield_now().await,
        }

        let mut waiting = std::mem::take(&mut *self.queue.lock());
        let chunk_size = self.chunk_size();
        let mut batches = Vec::new();
        while !waiting.is_empty() {
            let rest = waiting.split_off(waiting.len().min(chunk_size));
            batches.push(std::mem::replace(&mut waiting, rest));
        }

        debug!(loader = self.name(), batches = batches.len(), "dispatching");
        future::join_all(batches.into_iter().map(|batch| self.run(batch))).await;
    }

    async fn run(&self, batch: Vec<Waiter<K, V>>) {
        let (keys, waiters): (Vec<K>, Vec<_>) = batch.into_iter().unzip();
        let expected = keys.len();
        trace!(loader = self.name(), keys = expected, "calling batch function");

        let results = match self.batch_fn.load(keys).await {
            Ok(values) if values.len() == expected => values,
            Ok(values) => {
                let err = LoadError::LengthMismatch {
                    expected,
                    got: values.len(),
                };
                warn!(loader = self.name(), error = %err, "batch rejected");
                fail_all(err, expected)
            }
            Err(err) => {
                warn!(loader = self.name(), error = %err, "batch function failed");
                fail_all(err, expected)
            }
        };

        for (waiter, settled) in waiters.into_iter().zip(results) {
            // the caller may have stopped waiting
            let _ = waiter.send(settled);
        }
    }
}

fn fail_all<V>(err: LoadError, count: usize) -> Vec<Settled<V>> {
    (0..count).map(|_| Err(err.clone())).collect()
}

impl<K, V> fmt::Debug for Batcher<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Batcher")
            .field("options", &self.inner.options)
            .field("queued", &self.inner.queue.lock().len())
            .finish()
    }
}
