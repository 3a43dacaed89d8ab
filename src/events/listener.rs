//! Listener Handles
//!
//! Callbacks registered on the [`EventBus`](super::EventBus). A handle is
//! identified by the allocation it wraps, so clones of one handle are the same
//! listener and two handles built from identical closures are not.

use std::fmt;
use std::sync::Arc;

use crate::error::ListenerError;

/// Outcome of a single listener invocation.
pub type ListenerResult = std::result::Result<(), ListenerError>;

type NamedFn<P> = dyn Fn(&P) -> ListenerResult + Send + Sync;
type WildcardFn<P> = dyn Fn(&str, &P) -> ListenerResult + Send + Sync;

// == Named Listener ==
/// Callback for one named event, receiving the event payload.
pub struct Listener<P> {
    callback: Arc<NamedFn<P>>,
}

impl<P> Listener<P> {
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(&P) -> ListenerResult + Send + Sync + 'static,
    {
        Self {
            callback: Arc::new(callback),
        }
    }

    pub(crate) fn call(&self, payload: &P) -> ListenerResult {
        (self.callback)(payload)
    }
}

impl<P> Clone for Listener<P> {
    fn clone(&self) -> Self {
        Self {
            callback: Arc::clone(&self.callback),
        }
    }
}

impl<P> PartialEq for Listener<P> {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.callback, &other.callback)
    }
}

impl<P> Eq for Listener<P> {}

impl<P> fmt::Debug for Listener<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Listener")
            .field(&Arc::as_ptr(&self.callback).cast::<()>())
            .finish()
    }
}

// == Wildcard Listener ==
/// Callback invoked for every emitted event, receiving the event name first.
pub struct WildcardListener<P> {
    callback: Arc<WildcardFn<P>>,
}

impl<P> WildcardListener<P> {
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(&str, &P) -> ListenerResult + Send + Sync + 'static,
    {
        Self {
            callback: Arc::new(callback),
        }
    }

    pub(crate) fn call(&self, event: &str, payload: &P) -> ListenerResult {
        (self.callback)(event, payload)
    }
}

impl<P> Clone for WildcardListener<P> {
    fn clone(&self) -> Self {
        Self {
            callback: Arc::clone(&self.callback),
        }
    }
}

impl<P> PartialEq for WildcardListener<P> {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.callback, &other.callback)
    }
}

impl<P> Eq for WildcardListener<P> {}

impl<P> fmt::Debug for WildcardListener<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("WildcardListener")
            .field(&Arc::as_ptr(&self.callback).cast::<()>())
            .finish()
    }
}
