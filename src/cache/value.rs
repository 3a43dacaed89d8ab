//! Cached values and the notifications emitted about them.

use std::fmt;
use std::future::Future;

use futures::future::{BoxFuture, Shared};
use futures::FutureExt;

use crate::error::{ListenerError, LoadError};

/// Outcome of producing a value: the value itself or the error that replaced it.
pub type Settled<V> = std::result::Result<V, LoadError>;

/// In-flight value shared by every reader until it settles.
pub type PendingValue<V> = Shared<BoxFuture<'static, Settled<V>>>;

/// Action channel event for stores.
pub const SET_EVENT: &str = "cache:set";
/// Action channel event for removals.
pub const DELETE_EVENT: &str = "cache:delete";
/// Emitted when a key gains its first subscriber.
pub const SUBSCRIPTION_ON_EVENT: &str = "subscription:on";
/// Emitted when a key loses its last subscriber.
pub const SUBSCRIPTION_OFF_EVENT: &str = "subscription:off";

/// Name of the per-key item channel for a normalized cache key.
pub fn item_event(cache_key: &str) -> String {
    format!("item:{cache_key}")
}

// == Cache Value ==
/// A value as held by the cache: settled, failed, or still in flight.
#[derive(Clone)]
pub enum CacheValue<V> {
    Ready(V),
    Failed(LoadError),
    Pending(PendingValue<V>),
}

impl<V> CacheValue<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Wraps a future so that every reader shares its single outcome.
    pub fn pending<F>(future: F) -> Self
    where
        F: Future<Output = Settled<V>> + Send + 'static,
    {
        Self::Pending(future.boxed().shared())
    }

    /// Waits for the value, turning a stored failure into `Err`.
    pub async fn resolve(self) -> Settled<V> {
        match self {
            Self::Ready(value) => Ok(value),
            Self::Failed(err) => Err(err),
            Self::Pending(pending) => pending.await,
        }
    }
}

impl<V> CacheValue<V> {
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending(_))
    }

    pub fn ready(&self) -> Option<&V> {
        match self {
            Self::Ready(value) => Some(value),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&LoadError> {
        match self {
            Self::Failed(err) => Some(err),
            _ => None,
        }
    }
}

impl<V> From<Settled<V>> for CacheValue<V> {
    fn from(settled: Settled<V>) -> Self {
        match settled {
            Ok(value) => Self::Ready(value),
            Err(err) => Self::Failed(err),
        }
    }
}

impl<V: fmt::Debug> fmt::Debug for CacheValue<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ready(value) => f.debug_tuple("Ready").field(value).finish(),
            Self::Failed(err) => f.debug_tuple("Failed").field(err).finish(),
            Self::Pending(_) => f.write_str("Pending"),
        }
    }
}

// == Cache Action ==
/// Mutation reported on a key's item channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheAction {
    Set,
    Delete,
}

impl CacheAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Set => "set",
            Self::Delete => "delete",
        }
    }

    /// The action channel this mutation is announced on.
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Set => SET_EVENT,
            Self::Delete => DELETE_EVENT,
        }
    }
}

impl fmt::Display for CacheAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// == Cache Event ==
/// Payload of every event the cache emits.
#[derive(Debug, Clone)]
pub enum CacheEvent<K, V> {
    /// `cache:set` / `cache:delete`: the caller's raw key and the value involved
    Action { key: K, value: CacheValue<V> },
    /// `item:<cache key>`: what happened to the key and the value involved
    Item { action: CacheAction, value: CacheValue<V> },
    /// `subscription:on` / `subscription:off`
    Subscription { key: K },
    /// `error`: a listener failure rerouted by the bus
    Error(ListenerError),
}

impl<K, V> From<ListenerError> for CacheEvent<K, V> {
    fn from(err: ListenerError) -> Self {
        Self::Error(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_item_event_name() {
        assert_eq!(item_event("user:1"), "item:user:1");
    }

    #[test]
    fn test_action_names() {
        assert_eq!(CacheAction::Set.event_name(), "cache:set");
        assert_eq!(CacheAction::Delete.event_name(), "cache:delete");
        assert_eq!(CacheAction::Delete.to_string(), "delete");
    }

    #[test]
    fn test_from_settled() {
        let ok: CacheValue<u32> = Ok(3).into();
        assert_eq!(ok.ready(), Some(&3));

        let failed: CacheValue<u32> = Err(LoadError::msg("nope")).into();
        assert!(failed.ready().is_none());
        assert_eq!(failed.error().unwrap().to_string(), "nope");
    }

    #[tokio::test]
    async fn test_resolve_surfaces_failure() {
        let failed: CacheValue<u32> = CacheValue::Failed(LoadError::msg("nope"));
        assert!(failed.clone().resolve().await.is_err());
        assert!(failed.resolve().await.is_err());
    }

    #[tokio::test]
    async fn test_pending_is_shared() {
        let pending = CacheValue::pending(async { Ok::<_, LoadError>(7u32) });
        assert!(pending.is_pending());
        assert_eq!(format!("{pending:?}"), "Pending");

        let other = pending.clone();
        assert_eq!(pending.resolve().await.unwrap(), 7);
        assert_eq!(other.resolve().await.unwrap(), 7);
    }
}
