//! Events Module
//!
//! Minimal named-event dispatch used by the cache for its notifications.

mod bus;
mod listener;

pub use bus::{EventBus, ERROR_EVENT};
pub use listener::{Listener, ListenerResult, WildcardListener};
