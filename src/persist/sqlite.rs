use async_trait::async_trait;
use chrono::{DateTime, Utc};
use color_eyre::eyre::eyre;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};

use super::{PersistenceAdapter, Record, QUEUE_SLOT};
use crate::error::{Result, SyncError};
use crate::sync::SyncJob;

/// Schema for the durable store.
const STORE_SCHEMA: &str = r#"
-- Fetched entities, one row per (kind, key)
CREATE TABLE IF NOT EXISTS records (
    kind TEXT NOT NULL,
    key TEXT NOT NULL,
    data TEXT NOT NULL,
    fetched_at TEXT NOT NULL,
    PRIMARY KEY (kind, key)
);

-- Named blobs such as the queue snapshot
CREATE TABLE IF NOT EXISTS slots (
    name TEXT PRIMARY KEY,
    data TEXT NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

/// SQLite-backed durable store.
///
/// rusqlite is blocking, so every statement runs on the blocking pool.
pub struct SqlitePersistence {
  conn: Arc<Mutex<Connection>>,
}

impl SqlitePersistence {
  pub fn open(path: &Path) -> color_eyre::Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create database directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open database at {}: {}", path.display(), e))?;
    Self::with_connection(conn)
  }

  pub fn open_in_memory() -> color_eyre::Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory database: {}", e))?;
    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> color_eyre::Result<Self> {
    conn
      .execute_batch(STORE_SCHEMA)
      .map_err(|e| eyre!("Failed to run migrations: {}", e))?;
    Ok(Self {
      conn: Arc::new(Mutex::new(conn)),
    })
  }

  async fn with_conn<T, F>(&self, f: F) -> Result<T>
  where
    T: Send + 'static,
    F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
  {
    let conn = Arc::clone(&self.conn);
    let task = tokio::task::spawn_blocking(move || {
      let mut conn = conn
        .lock()
        .map_err(|e| SyncError::Store(format!("Lock poisoned: {}", e)))?;
      f(&mut conn)
    });
    match task.await {
      Ok(outcome) => outcome,
      Err(e) => Err(SyncError::Store(format!("store task aborted: {}", e))),
    }
  }
}

#[async_trait]
impl PersistenceAdapter for SqlitePersistence {
  async fn apply(&self, records: &[Record]) -> Result<()> {
    let records = records.to_vec();
    self
      .with_conn(move |conn| {
        let tx = conn.transaction()?;
        {
          let mut stmt = tx.prepare(
            "INSERT OR REPLACE INTO records (kind, key, data, fetched_at) VALUES (?, ?, ?, ?)",
          )?;
          for record in &records {
            stmt.execute(params![
              record.kind,
              record.key,
              serde_json::to_string(&record.data)?,
              record.fetched_at.to_rfc3339(),
            ])?;
          }
        }
        tx.commit()?;
        Ok(())
      })
      .await
  }

  async fn get(&self, kind: &str, key: &str) -> Result<Option<Record>> {
    let (kind, key) = (kind.to_string(), key.to_string());
    self
      .with_conn(move |conn| {
        let row: Option<(String, String)> = conn
          .query_row(
            "SELECT data, fetched_at FROM records WHERE kind = ? AND key = ?",
            params![kind, key],
            |row| Ok((row.get(0)?, row.get(1)?)),
          )
          .optional()?;

        match row {
          Some((data, fetched_at)) => {
            let fetched_at = DateTime::parse_from_rfc3339(&fetched_at)
              .map_err(|e| SyncError::Decode(format!("bad fetched_at '{}': {}", fetched_at, e)))?
              .with_timezone(&Utc);
            Ok(Some(Record {
              kind,
              key,
              data: serde_json::from_str(&data)?,
              fetched_at,
            }))
          }
          None => Ok(None),
        }
      })
      .await
  }

  async fn load_queue(&self) -> Result<Vec<SyncJob>> {
    self
      .with_conn(|conn| {
        let raw: Option<String> = conn
          .query_row(
            "SELECT data FROM slots WHERE name = ?",
            params![QUEUE_SLOT],
            |row| row.get(0),
          )
          .optional()?;

        match raw {
          Some(raw) => Ok(serde_json::from_str(&raw)?),
          None => Ok(Vec::new()),
        }
      })
      .await
  }

  async fn save_queue(&self, jobs: &[SyncJob]) -> Result<()> {
    let raw = serde_json::to_string(jobs)?;
    self
      .with_conn(move |conn| {
        conn.execute(
          "INSERT OR REPLACE INTO slots (name, data, updated_at) VALUES (?, ?, datetime('now'))",
          params![QUEUE_SLOT, raw],
        )?;
        Ok(())
      })
      .await
  }

  async fn ping(&self) -> Result<()> {
    self
      .with_conn(|conn| {
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
        Ok(())
      })
      .await
  }
}
