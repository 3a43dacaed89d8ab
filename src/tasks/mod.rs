//! Background Tasks Module
//!
//! Contains background tasks that run periodically alongside a cache.
//!
//! # Tasks
//! - Purge: Removes expired cache entries at configured intervals

mod purge;

pub use purge::spawn_purge_task;
