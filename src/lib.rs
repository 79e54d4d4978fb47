//! Synchronization and caching engine for competitive-programming progress data.
//!
//! Mirrors a rate-limited, read-only judge API into a local durable store and
//! serves reads from a TTL cache. The [`Engine`] facade is what route handlers
//! and pages talk to; everything else is wired up behind it.

pub mod api;
pub mod cache;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod health;
pub mod logging;
pub mod persist;
pub mod sync;

pub use engine::{Engine, EngineBuilder};
pub use error::SyncError;
