//! TTL caching for judge data.
//!
//! This module provides a payload-agnostic caching mechanism that:
//! - Stores opaque values with a per-entry expiry
//! - Fails open when the backend is unreachable
//! - Invalidates whole key families by glob pattern
//! - Wraps compute functions in a cache-aside helper

pub mod keys;
mod layer;
mod storage;
mod store;
mod traits;

pub use layer::{BatchQuery, BatchResults, CacheLayer, QueryOptions};
pub use storage::{MemoryStorage, NoopStorage, SqliteStorage};
pub use store::{CacheStats, TtlCache};
pub use traits::{CacheBackend, CacheEntry, CacheResult, CacheSource, Cacheable};
