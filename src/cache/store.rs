//! Fail-open TTL cache in front of a storage backend.

use chrono::Duration as ChronoDuration;
use serde::{de::DeserializeOwned, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::traits::{CacheBackend, CacheEntry};
use crate::clock::{Clock, SystemClock};
use crate::error::{Result, SyncError};

/// Key written by the health round-trip check.
pub const SENTINEL_KEY: &str = "__health__:sentinel";

/// Counters describing cache usage since startup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
  pub hits: u64,
  pub misses: u64,
  /// Backend failures swallowed by the fail-open policy
  pub errors: u64,
}

impl CacheStats {
  /// Calculates the hit rate as a percentage
  pub fn hit_rate(&self) -> f64 {
    let total = self.hits + self.misses;
    if total == 0 {
      0.0
    } else {
      (self.hits as f64 / total as f64) * 100.0
    }
  }
}

#[derive(Default)]
struct Counters {
  hits: AtomicU64,
  misses: AtomicU64,
  errors: AtomicU64,
}

/// Key/value store with per-entry expiry.
///
/// Reads past `expires_at` are misses. Backend failures never reach callers:
/// reads degrade to misses and writes to no-ops.
#[derive(Clone)]
pub struct TtlCache {
  backend: Arc<dyn CacheBackend>,
  clock: Arc<dyn Clock>,
  counters: Arc<Counters>,
}

impl TtlCache {
  pub fn new(backend: Arc<dyn CacheBackend>) -> Self {
    Self::with_clock(backend, Arc::new(SystemClock))
  }

  pub fn with_clock(backend: Arc<dyn CacheBackend>, clock: Arc<dyn Clock>) -> Self {
    Self {
      backend,
      clock,
      counters: Arc::new(Counters::default()),
    }
  }

  /// Raw bytes for `key`, if present and unexpired.
  pub fn get_raw(&self, key: &str) -> Option<Vec<u8>> {
    match self.backend.get(key) {
      Ok(Some(entry)) if !entry.is_expired(self.clock.now()) => {
        self.counters.hits.fetch_add(1, Ordering::Relaxed);
        Some(entry.value)
      }
      Ok(_) => {
        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        None
      }
      Err(e) => {
        self.record_error("get", key, &e);
        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        None
      }
    }
  }

  /// Typed read. A value that no longer deserializes is treated as a miss.
  pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
    let raw = self.get_raw(key)?;
    match serde_json::from_slice(&raw) {
      Ok(value) => Some(value),
      Err(e) => {
        debug!(key, error = %e, "Discarding undecodable cache entry");
        self.delete(key);
        None
      }
    }
  }

  pub fn set_raw(&self, key: &str, value: Vec<u8>, ttl: Duration) {
    let ttl = ChronoDuration::from_std(ttl).unwrap_or_else(|_| ChronoDuration::days(36_500));
    let expires_at = self
      .clock
      .now()
      .checked_add_signed(ttl)
      .unwrap_or(chrono::DateTime::<chrono::Utc>::MAX_UTC);

    let entry = CacheEntry {
      key: key.to_string(),
      value,
      expires_at,
    };
    if let Err(e) = self.backend.set(entry) {
      self.record_error("set", key, &e);
    }
  }

  /// Typed write with `expires_at = now + ttl`.
  pub fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl: Duration) {
    match serde_json::to_vec(value) {
      Ok(raw) => self.set_raw(key, raw, ttl),
      Err(e) => warn!(key, error = %e, "Failed to serialize cache value"),
    }
  }

  pub fn delete(&self, key: &str) {
    if let Err(e) = self.backend.delete(key) {
      self.record_error("delete", key, &e);
    }
  }

  /// Remove every entry matching a glob pattern such as `leaderboard:*`.
  pub fn invalidate_pattern(&self, pattern: &str) -> u64 {
    match self.backend.delete_matching(pattern) {
      Ok(removed) => {
        debug!(pattern, removed, "Invalidated cache entries");
        removed
      }
      Err(e) => {
        self.record_error("invalidate", pattern, &e);
        0
      }
    }
  }

  /// Physically drop expired entries.
  pub fn purge_expired(&self) -> u64 {
    match self.backend.purge_expired(self.clock.now()) {
      Ok(removed) => removed,
      Err(e) => {
        self.record_error("purge", "*", &e);
        0
      }
    }
  }

  /// Write then read back a sentinel, straight against the backend.
  ///
  /// Unlike the read/write paths this reports failures, for the health monitor.
  pub fn round_trip(&self) -> Result<()> {
    let token = uuid::Uuid::new_v4().to_string().into_bytes();
    let entry = CacheEntry {
      key: SENTINEL_KEY.to_string(),
      value: token.clone(),
      expires_at: self.clock.now() + ChronoDuration::seconds(60),
    };
    self.backend.set(entry)?;

    match self.backend.get(SENTINEL_KEY)? {
      Some(entry) if entry.value == token => Ok(()),
      _ => Err(SyncError::Cache("sentinel did not read back".to_string())),
    }
  }

  pub fn stats(&self) -> CacheStats {
    CacheStats {
      hits: self.counters.hits.load(Ordering::Relaxed),
      misses: self.counters.misses.load(Ordering::Relaxed),
      errors: self.counters.errors.load(Ordering::Relaxed),
    }
  }

  fn record_error(&self, op: &str, key: &str, err: &SyncError) {
    self.counters.errors.fetch_add(1, Ordering::Relaxed);
    warn!(op, key, error = %err, "Cache backend unavailable");
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::storage::{MemoryStorage, NoopStorage};
  use crate::clock::ManualClock;
  use chrono::{DateTime, Utc};

  /// Backend that is never reachable.
  struct DownStorage;

  impl CacheBackend for DownStorage {
    fn get(&self, _key: &str) -> Result<Option<CacheEntry>> {
      Err(SyncError::Cache("connection refused".into()))
    }
    fn set(&self, _entry: CacheEntry) -> Result<()> {
      Err(SyncError::Cache("connection refused".into()))
    }
    fn delete(&self, _key: &str) -> Result<()> {
      Err(SyncError::Cache("connection refused".into()))
    }
    fn delete_matching(&self, _pattern: &str) -> Result<u64> {
      Err(SyncError::Cache("connection refused".into()))
    }
    fn purge_expired(&self, _now: DateTime<Utc>) -> Result<u64> {
      Err(SyncError::Cache("connection refused".into()))
    }
  }

  fn cache_with_clock() -> (TtlCache, ManualClock) {
    let clock = ManualClock::starting_now();
    let cache = TtlCache::with_clock(Arc::new(MemoryStorage::new()), Arc::new(clock.clone()));
    (cache, clock)
  }

  #[test]
  fn test_value_expires_after_ttl() {
    let (cache, clock) = cache_with_clock();

    cache.set("k", &"v", Duration::from_secs(1));
    assert_eq!(cache.get::<String>("k"), Some("v".to_string()));

    clock.advance(ChronoDuration::milliseconds(999));
    assert_eq!(cache.get::<String>("k"), Some("v".to_string()));

    clock.advance(ChronoDuration::milliseconds(2));
    assert_eq!(cache.get::<String>("k"), None);
  }

  #[test]
  fn test_read_at_exact_expiry_is_a_miss() {
    let (cache, clock) = cache_with_clock();
    cache.set("k", &1u32, Duration::from_secs(1));
    clock.advance(ChronoDuration::seconds(1));
    assert_eq!(cache.get::<u32>("k"), None);
  }

  #[test]
  fn test_unavailable_backend_fails_open() {
    let cache = TtlCache::new(Arc::new(DownStorage));

    cache.set("k", &"v", Duration::from_secs(60));
    assert_eq!(cache.get::<String>("k"), None);
    cache.delete("k");
    assert_eq!(cache.invalidate_pattern("user:*"), 0);

    let stats = cache.stats();
    assert_eq!(stats.errors, 4);
    assert_eq!(stats.misses, 1);
    assert!(cache.round_trip().is_err());
  }

  #[test]
  fn test_invalidate_pattern() {
    let (cache, _clock) = cache_with_clock();
    cache.set("leaderboard:iit:page1", &1, Duration::from_secs(60));
    cache.set("leaderboard:iit:page2", &2, Duration::from_secs(60));
    cache.set("user:alice:info", &3, Duration::from_secs(60));

    assert_eq!(cache.invalidate_pattern("leaderboard:iit:*"), 2);
    assert_eq!(cache.get::<i32>("leaderboard:iit:page1"), None);
    assert_eq!(cache.get::<i32>("user:alice:info"), Some(3));
  }

  #[test]
  fn test_undecodable_value_is_a_miss() {
    let (cache, _clock) = cache_with_clock();
    cache.set_raw("k", b"not json".to_vec(), Duration::from_secs(60));
    assert_eq!(cache.get::<u32>("k"), None);
    assert_eq!(cache.get_raw("k"), None);
  }

  #[test]
  fn test_hit_rate() {
    let (cache, _clock) = cache_with_clock();
    cache.set("k", &1, Duration::from_secs(60));
    cache.get::<i32>("k");
    cache.get::<i32>("missing");
    let stats = cache.stats();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);
    assert!((stats.hit_rate() - 50.0).abs() < f64::EPSILON);
  }

  #[test]
  fn test_round_trip() {
    let (cache, _clock) = cache_with_clock();
    assert!(cache.round_trip().is_ok());
    assert!(TtlCache::new(Arc::new(NoopStorage)).round_trip().is_err());
  }
}
