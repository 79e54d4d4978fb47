//! Cache storage backends: in-memory, SQLite and a no-op.

use chrono::{DateTime, TimeZone, Utc};
use color_eyre::eyre::eyre;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use super::traits::{CacheBackend, CacheEntry};
use crate::error::{Result, SyncError};

fn unavailable(e: impl std::fmt::Display) -> SyncError {
  SyncError::Cache(e.to_string())
}

/// Storage implementation that doesn't cache anything.
/// Used when caching is disabled - all operations are no-ops.
pub struct NoopStorage;

impl CacheBackend for NoopStorage {
  fn get(&self, _key: &str) -> Result<Option<CacheEntry>> {
    Ok(None) // Always miss
  }

  fn set(&self, _entry: CacheEntry) -> Result<()> {
    Ok(()) // Discard
  }

  fn delete(&self, _key: &str) -> Result<()> {
    Ok(())
  }

  fn delete_matching(&self, _pattern: &str) -> Result<u64> {
    Ok(0)
  }

  fn purge_expired(&self, _now: DateTime<Utc>) -> Result<u64> {
    Ok(0)
  }
}

/// Process-local cache storage.
#[derive(Default)]
pub struct MemoryStorage {
  entries: Mutex<HashMap<String, CacheEntry>>,
}

impl MemoryStorage {
  pub fn new() -> Self {
    Self::default()
  }

  fn entries(&self) -> Result<MutexGuard<'_, HashMap<String, CacheEntry>>> {
    self
      .entries
      .lock()
      .map_err(|e| unavailable(format!("Lock poisoned: {}", e)))
  }
}

impl CacheBackend for MemoryStorage {
  fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
    Ok(self.entries()?.get(key).cloned())
  }

  fn set(&self, entry: CacheEntry) -> Result<()> {
    self.entries()?.insert(entry.key.clone(), entry);
    Ok(())
  }

  fn delete(&self, key: &str) -> Result<()> {
    self.entries()?.remove(key);
    Ok(())
  }

  fn delete_matching(&self, pattern: &str) -> Result<u64> {
    let pattern = glob::Pattern::new(pattern).map_err(unavailable)?;
    let mut entries = self.entries()?;
    let before = entries.len();
    entries.retain(|key, _| !pattern.matches(key));
    Ok((before - entries.len()) as u64)
  }

  fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64> {
    let mut entries = self.entries()?;
    let before = entries.len();
    entries.retain(|_, entry| !entry.is_expired(now));
    Ok((before - entries.len()) as u64)
  }
}

/// SQLite-based cache storage implementation.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS cache_entries (
    key TEXT PRIMARY KEY,
    value BLOB NOT NULL,
    expires_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_cache_entries_expiry ON cache_entries(expires_at);
"#;

impl SqliteStorage {
  /// Open (or create) the cache database at `path`.
  pub fn open(path: &Path) -> color_eyre::Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::with_connection(conn)
  }

  pub fn open_in_memory() -> color_eyre::Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory cache database: {}", e))?;
    Self::with_connection(conn)
  }

  /// Get the default database path.
  pub fn default_path() -> color_eyre::Result<PathBuf> {
    Ok(crate::config::Config::data_dir()?.join("cache.db"))
  }

  fn with_connection(conn: Connection) -> color_eyre::Result<Self> {
    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|e| unavailable(format!("Lock poisoned: {}", e)))
  }
}

impl CacheBackend for SqliteStorage {
  fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
    let conn = self.conn()?;

    let row: Option<(Vec<u8>, i64)> = conn
      .query_row(
        "SELECT value, expires_at FROM cache_entries WHERE key = ?",
        params![key],
        |row| Ok((row.get(0)?, row.get(1)?)),
      )
      .optional()
      .map_err(unavailable)?;

    Ok(row.map(|(value, expires_at)| CacheEntry {
      key: key.to_string(),
      value,
      expires_at: from_millis(expires_at),
    }))
  }

  fn set(&self, entry: CacheEntry) -> Result<()> {
    let conn = self.conn()?;

    conn
      .execute(
        "INSERT OR REPLACE INTO cache_entries (key, value, expires_at) VALUES (?, ?, ?)",
        params![entry.key, entry.value, entry.expires_at.timestamp_millis()],
      )
      .map_err(unavailable)?;

    Ok(())
  }

  fn delete(&self, key: &str) -> Result<()> {
    let conn = self.conn()?;
    conn
      .execute("DELETE FROM cache_entries WHERE key = ?", params![key])
      .map_err(unavailable)?;
    Ok(())
  }

  fn delete_matching(&self, pattern: &str) -> Result<u64> {
    let conn = self.conn()?;
    // SQLite's GLOB has the same wildcard syntax as the in-memory matcher
    let removed = conn
      .execute(
        "DELETE FROM cache_entries WHERE key GLOB ?",
        params![pattern],
      )
      .map_err(unavailable)?;
    Ok(removed as u64)
  }

  fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64> {
    let conn = self.conn()?;
    let removed = conn
      .execute(
        "DELETE FROM cache_entries WHERE expires_at <= ?",
        params![now.timestamp_millis()],
      )
      .map_err(unavailable)?;
    Ok(removed as u64)
  }
}

fn from_millis(ms: i64) -> DateTime<Utc> {
  Utc
    .timestamp_millis_opt(ms)
    .single()
    .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::Duration;

  fn entry(key: &str, expires_at: DateTime<Utc>) -> CacheEntry {
    CacheEntry {
      key: key.to_string(),
      value: key.as_bytes().to_vec(),
      expires_at,
    }
  }

  fn exercise_backend(backend: &dyn CacheBackend) {
    let now = Utc::now();
    let later = now + Duration::minutes(5);

    backend.set(entry("leaderboard:iit:1", later)).unwrap();
    backend.set(entry("leaderboard:iit:2", later)).unwrap();
    backend.set(entry("leaderboard:nit:1", later)).unwrap();
    backend.set(entry("user:alice:info", later)).unwrap();

    let fetched = backend.get("user:alice:info").unwrap().unwrap();
    assert_eq!(fetched.value, b"user:alice:info");

    assert_eq!(backend.delete_matching("leaderboard:iit:*").unwrap(), 2);
    assert!(backend.get("leaderboard:iit:1").unwrap().is_none());
    assert!(backend.get("leaderboard:nit:1").unwrap().is_some());

    backend.delete("user:alice:info").unwrap();
    assert!(backend.get("user:alice:info").unwrap().is_none());

    backend.set(entry("stale", now - Duration::seconds(1))).unwrap();
    assert_eq!(backend.purge_expired(now).unwrap(), 1);
    assert!(backend.get("stale").unwrap().is_none());
  }

  #[test]
  fn test_memory_storage() {
    exercise_backend(&MemoryStorage::new());
  }

  #[test]
  fn test_sqlite_storage() {
    exercise_backend(&SqliteStorage::open_in_memory().unwrap());
  }

  #[test]
  fn test_sqlite_storage_persists_to_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("cache.db");
    let expires_at = Utc::now() + Duration::minutes(1);

    {
      let storage = SqliteStorage::open(&path).unwrap();
      storage.set(entry("contests:official", expires_at)).unwrap();
    }

    let storage = SqliteStorage::open(&path).unwrap();
    let fetched = storage.get("contests:official").unwrap().unwrap();
    assert_eq!(
      fetched.expires_at.timestamp_millis(),
      expires_at.timestamp_millis()
    );
  }

  #[test]
  fn test_invalid_pattern_reports_error() {
    let storage = MemoryStorage::new();
    assert!(storage.delete_matching("[unclosed").is_err());
  }

  #[test]
  fn test_noop_storage_always_misses() {
    let storage = NoopStorage;
    storage.set(entry("k", Utc::now() + Duration::minutes(1))).unwrap();
    assert!(storage.get("k").unwrap().is_none());
  }
}
