//! Event Bus
//!
//! Named-event dispatcher with wildcard listeners, once-semantics and a
//! reserved `"error"` channel for listener failures.
//!
//! Dispatch never holds the registry lock while a listener runs, so listeners
//! may register, deregister or emit from inside a callback.

use std::collections::HashMap;
use std::fmt;

use parking_lot::Mutex;
use tracing::trace;

use crate::error::ListenerError;
use crate::events::{Listener, ListenerResult, WildcardListener};

/// Reserved event receiving listener failures.
pub const ERROR_EVENT: &str = "error";

#[derive(Debug)]
struct Registration<L> {
    listener: L,
    once: bool,
}

struct Registry<P> {
    wildcard: Vec<Registration<WildcardListener<P>>>,
    named: HashMap<String, Vec<Registration<Listener<P>>>>,
}

impl<P> Default for Registry<P> {
    fn default() -> Self {
        Self {
            wildcard: Vec::new(),
            named: HashMap::new(),
        }
    }
}

// regular registrations plus once registrations
fn count<L>(listeners: &[Registration<L>]) -> usize {
    listeners.len() + listeners.iter().filter(|r| r.once).count()
}

// == Event Bus ==
/// Synchronous publish/subscribe dispatcher.
///
/// Listeners are called in registration order. Wildcard listeners run first
/// and receive the event name along with the payload.
pub struct EventBus<P> {
    registry: Mutex<Registry<P>>,
}

impl<P> Default for EventBus<P> {
    fn default() -> Self {
        Self {
            registry: Mutex::new(Registry::default()),
        }
    }
}

impl<P> fmt::Debug for EventBus<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let registry = self.registry.lock();
        f.debug_struct("EventBus")
            .field("wildcard", &registry.wildcard.len())
            .field("events", &registry.named.len())
            .finish()
    }
}

impl<P> EventBus<P> {
    pub fn new() -> Self {
        Self::default()
    }

    // == On ==
    /// Registers `listener` for `event`.
    ///
    /// A listener already registered for the event is removed first, so it
    /// moves to the end of the dispatch order and never fires twice.
    pub fn on(&self, event: &str, listener: Listener<P>) {
        self.register(event, listener, false);
    }

    // == Once ==
    /// Registers `listener` for `event`, removing it after its first
    /// successful invocation. A failing call leaves it registered.
    pub fn once(&self, event: &str, listener: Listener<P>) {
        self.register(event, listener, true);
    }

    // == Off ==
    /// Removes `listener` from `event`. Returns whether it was registered.
    ///
    /// The event entry is pruned once its last listener is gone.
    pub fn off(&self, event: &str, listener: &Listener<P>) -> bool {
        self.off_counted(event, listener).is_some()
    }

    /// Registers `listener` like [`on`](Self::on) and returns the listener
    /// count of `event` as it was right before, read under the same lock.
    pub(crate) fn on_counted(&self, event: &str, listener: Listener<P>) -> usize {
        let mut registry = self.registry.lock();
        let listeners = registry.named.entry(event.to_string()).or_default();
        let before = count(listeners);
        listeners.retain(|r| r.listener != listener);
        listeners.push(Registration {
            listener,
            once: false,
        });
        before
    }

    /// Removes `listener` like [`off`](Self::off). Returns the count left for
    /// `event` when the listener was registered, `None` otherwise.
    pub(crate) fn off_counted(&self, event: &str, listener: &Listener<P>) -> Option<usize> {
        let mut registry = self.registry.lock();
        let listeners = registry.named.get_mut(event)?;

        let before = listeners.len();
        listeners.retain(|r| r.listener != *listener);
        let removed = listeners.len() != before;
        let remaining = count(listeners);

        if listeners.is_empty() {
            registry.named.remove(event);
        }
        removed.then_some(remaining)
    }

    // == Wildcard Registration ==
    /// Registers a listener called for every emitted event.
    pub fn all_on(&self, listener: WildcardListener<P>) {
        self.register_wildcard(listener, false);
    }

    /// Registers a wildcard listener removed after its first invocation.
    pub fn all_once(&self, listener: WildcardListener<P>) {
        self.register_wildcard(listener, true);
    }

    /// Removes a wildcard listener. Returns whether it was registered.
    pub fn all_off(&self, listener: &WildcardListener<P>) -> bool {
        let mut registry = self.registry.lock();
        let before = registry.wildcard.len();
        registry.wildcard.retain(|r| r.listener != *listener);
        registry.wildcard.len() != before
    }

    // == Listener Count ==
    /// Regular registrations of `event` plus its once registrations.
    ///
    /// A once listener sits in both groups, so it counts twice. Wildcard
    /// listeners are not counted.
    pub fn listener_count(&self, event: &str) -> usize {
        self.registry
            .lock()
            .named
            .get(event)
            .map_or(0, |listeners| count(listeners))
    }

    fn register(&self, event: &str, listener: Listener<P>, once: bool) {
        let mut registry = self.registry.lock();
        let listeners = registry.named.entry(event.to_string()).or_default();
        listeners.retain(|r| r.listener != listener);
        listeners.push(Registration { listener, once });
    }

    fn register_wildcard(&self, listener: WildcardListener<P>, once: bool) {
        let mut registry = self.registry.lock();
        registry.wildcard.retain(|r| r.listener != listener);
        registry.wildcard.push(Registration { listener, once });
    }

    fn has_listeners(&self, event: &str) -> bool {
        self.registry.lock().named.contains_key(event)
    }

    fn is_registered(&self, event: &str, listener: &Listener<P>) -> bool {
        self.registry
            .lock()
            .named
            .get(event)
            .is_some_and(|listeners| listeners.iter().any(|r| r.listener == *listener))
    }

    fn is_registered_wildcard(&self, listener: &WildcardListener<P>) -> bool {
        self.registry
            .lock()
            .wildcard
            .iter()
            .any(|r| r.listener == *listener)
    }

    fn remove_if_once(&self, event: &str, listener: &Listener<P>) {
        let mut registry = self.registry.lock();
        let Some(listeners) = registry.named.get_mut(event) else {
            return;
        };

        if let Some(pos) = listeners
            .iter()
            .position(|r| r.listener == *listener && r.once)
        {
            listeners.remove(pos);
        }
        if listeners.is_empty() {
            registry.named.remove(event);
        }
    }

    fn remove_wildcard_if_once(&self, listener: &WildcardListener<P>) {
        let mut registry = self.registry.lock();
        if let Some(pos) = registry
            .wildcard
            .iter()
            .position(|r| r.listener == *listener && r.once)
        {
            registry.wildcard.remove(pos);
        }
    }
}

impl<P> EventBus<P>
where
    P: From<ListenerError>,
{
    // == Emit ==
    /// Dispatches `payload` to the wildcard listeners, then to the listeners
    /// of `event`.
    ///
    /// A failing listener is rerouted to [`ERROR_EVENT`] when that event has
    /// listeners and dispatch carries on. Otherwise the failure is returned
    /// immediately and the remaining listeners of this dispatch are skipped.
    /// Failures raised while dispatching [`ERROR_EVENT`] itself are returned.
    pub fn emit(&self, event: &str, payload: &P) -> ListenerResult {
        trace!(event, "dispatching event");

        let wildcard: Vec<WildcardListener<P>> = self
            .registry
            .lock()
            .wildcard
            .iter()
            .map(|r| r.listener.clone())
            .collect();

        for listener in wildcard {
            // removed by an earlier listener of this dispatch
            if !self.is_registered_wildcard(&listener) {
                continue;
            }
            let outcome = listener.call(event, payload);
            if outcome.is_ok() {
                self.remove_wildcard_if_once(&listener);
            }
            self.recover(event, outcome)?;
        }

        let named: Vec<Listener<P>> = match self.registry.lock().named.get(event) {
            Some(listeners) => listeners.iter().map(|r| r.listener.clone()).collect(),
            None => return Ok(()),
        };

        for listener in named {
            if !self.is_registered(event, &listener) {
                continue;
            }
            let outcome = listener.call(payload);
            if outcome.is_ok() {
                self.remove_if_once(event, &listener);
            }
            self.recover(event, outcome)?;
        }

        Ok(())
    }

    fn recover(&self, event: &str, outcome: ListenerResult) -> ListenerResult {
        match outcome {
            Ok(()) => Ok(()),
            Err(err) if event != ERROR_EVENT && self.has_listeners(ERROR_EVENT) => {
                trace!(event, error = %err, "rerouting listener failure");
                self.emit(ERROR_EVENT, &P::from(err))
            }
            Err(err) => Err(err),
        }
    }
}
