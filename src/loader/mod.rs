//! Loader Module
//!
//! Batched, cached loading of values by key.

mod batch_fn;
mod batcher;
mod batching_loader;

pub use batch_fn::{batch_fn, BatchFn, FnBatch};
pub use batcher::{BatchExecute, Batcher};
pub use batching_loader::BatchingLoader;
