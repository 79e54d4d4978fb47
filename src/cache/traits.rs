//! Core traits and types for the caching system.

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};

use crate::error::Result;

/// Trait for judge entities that are mirrored into the durable store.
///
/// Implementors provide a stable key that is unique within their entity type.
pub trait Cacheable: Clone + Send + Sync + Serialize + DeserializeOwned {
  /// Unique identifier for this entity (e.g., handle, contest id)
  fn cache_key(&self) -> String;

  /// Entity type name for storage organization (e.g., "user", "contest")
  fn entity_type() -> &'static str;
}

/// A stored value with its absolute expiry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
  pub key: String,
  /// Opaque serialized value
  pub value: Vec<u8>,
  pub expires_at: DateTime<Utc>,
}

impl CacheEntry {
  /// An entry is dead from `expires_at` onwards, whether or not the backend
  /// has physically evicted it yet.
  pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
    now >= self.expires_at
  }
}

/// Trait for cache storage backends.
///
/// Backends report unavailability as errors; the [`TtlCache`](super::TtlCache)
/// in front of them is what turns those into misses and no-ops.
pub trait CacheBackend: Send + Sync {
  /// Fetch the raw entry, expired or not.
  fn get(&self, key: &str) -> Result<Option<CacheEntry>>;

  /// Insert or replace an entry.
  fn set(&self, entry: CacheEntry) -> Result<()>;

  fn delete(&self, key: &str) -> Result<()>;

  /// Remove every entry whose key matches a glob pattern. Returns the count removed.
  fn delete_matching(&self, pattern: &str) -> Result<u64>;

  /// Physically drop entries that expired before `now`.
  fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64>;
}

/// Result from a cache-aside lookup, including where the data came from.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: CacheSource,
}

impl<T> CacheResult<T> {
  pub fn from_cache(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Cache,
    }
  }

  pub fn computed(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Computed,
    }
  }

  pub fn uncached(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Uncached,
    }
  }
}

/// Indicates where cache-aside data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Served from the TTL store without computing
  Cache,
  /// Cache miss; computed and stored
  Computed,
  /// No cache key configured; computed and not stored
  Uncached,
}
