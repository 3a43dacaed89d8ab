//! Error types for the cache and loader
//!
//! Provides unified error handling using thiserror. Errors that end up stored
//! in cache entries or handed to several listeners are cheaply cloneable.

use std::sync::Arc;

use thiserror::Error;

// == Listener Error ==
/// Failure returned by an event listener.
///
/// Returning `Err` from a listener is how a callback "throws": the bus either
/// reroutes it to the `"error"` channel or hands it back to the emitter.
#[derive(Error, Debug, Clone)]
#[error("{0}")]
pub struct ListenerError(Arc<anyhow::Error>);

impl ListenerError {
    /// Creates a listener error from a plain message.
    pub fn msg(message: impl std::fmt::Display + std::fmt::Debug + Send + Sync + 'static) -> Self {
        Self(Arc::new(anyhow::Error::msg(message)))
    }

    /// Returns true if both values originate from the same failure.
    pub fn same_as(&self, other: &ListenerError) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl From<anyhow::Error> for ListenerError {
    fn from(err: anyhow::Error) -> Self {
        Self(Arc::new(err))
    }
}

// == Key Error ==
/// A raw key that could not be turned into a cache key.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Cache key could not be derived: {0}")]
pub struct KeyError(String);

impl KeyError {
    pub fn msg(message: impl std::fmt::Display) -> Self {
        Self(message.to_string())
    }
}

impl From<serde_json::Error> for KeyError {
    fn from(err: serde_json::Error) -> Self {
        Self::msg(err)
    }
}

// == Load Error ==
/// Failure to produce a value for a key.
///
/// Stored in cache entries as-is, so every later read of the entry sees the
/// same error.
#[derive(Error, Debug, Clone)]
pub enum LoadError {
    /// Error reported by the batch function for a key
    #[error("{0}")]
    Source(Arc<anyhow::Error>),

    /// Batch function answered with the wrong number of results
    #[error("batch function returned {got} results for {expected} keys")]
    LengthMismatch { expected: usize, got: usize },

    /// Batch dispatch went away before resolving the key
    #[error("batch dispatch dropped before the key was resolved")]
    Dropped,

    /// Batches are dispatched on the Tokio runtime
    #[error("Load requested outside of a Tokio runtime")]
    NoRuntime,

    /// The key has no cache key, so it can be neither cached nor deduplicated
    #[error(transparent)]
    Key(#[from] KeyError),
}

impl LoadError {
    /// Creates a source error from a plain message.
    pub fn msg(message: impl std::fmt::Display + std::fmt::Debug + Send + Sync + 'static) -> Self {
        Self::Source(Arc::new(anyhow::Error::msg(message)))
    }
}

impl From<anyhow::Error> for LoadError {
    fn from(err: anyhow::Error) -> Self {
        Self::Source(Arc::new(err))
    }
}

// == Cache Error Enum ==
/// Unified error type for cache mutations.
#[derive(Error, Debug, Clone)]
pub enum CacheError {
    /// A listener failed and no `"error"` listener was registered
    #[error("Listener failed: {0}")]
    Listener(#[from] ListenerError),

    /// Pending values are settled on the Tokio runtime
    #[error("Pending value set outside of a Tokio runtime")]
    NoRuntime,

    #[error(transparent)]
    Key(#[from] KeyError),
}

// == Result Type Alias ==
/// Convenience Result type for cache operations.
pub type Result<T> = std::result::Result<T, CacheError>;
