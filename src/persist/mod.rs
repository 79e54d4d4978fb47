//! Durable side of the engine: fetched records and the queue snapshot.
//!
//! One [`PersistenceAdapter`] trait, several backends. The scheduling and retry
//! logic never knows which one it is talking to.

mod file;
mod memory;
mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::cache::Cacheable;
use crate::config::{Config, PersistenceBackendKind, PersistenceConfig};
use crate::error::Result;
use crate::sync::SyncJob;

pub use file::FilePersistence;
pub use memory::MemoryPersistence;
pub use sqlite::SqlitePersistence;

/// Fixed name of the slot holding the serialized queue.
pub const QUEUE_SLOT: &str = "sync-queue";

/// One fetched entity, ready to upsert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
  pub kind: String,
  pub key: String,
  pub data: serde_json::Value,
  pub fetched_at: DateTime<Utc>,
}

impl Record {
  pub fn from_entity<T: Cacheable>(entity: &T, fetched_at: DateTime<Utc>) -> Result<Self> {
    Ok(Self {
      kind: T::entity_type().to_string(),
      key: entity.cache_key(),
      data: serde_json::to_value(entity)?,
      fetched_at,
    })
  }

  pub fn decode<T: Cacheable>(&self) -> Result<T> {
    Ok(serde_json::from_value(self.data.clone())?)
  }
}

/// Backend for durable writes and the queue snapshot.
///
/// Writes are upserts keyed by `(kind, key)` so re-applying the same batch
/// after a retry is harmless.
#[async_trait]
pub trait PersistenceAdapter: Send + Sync {
  /// Upsert a batch of records.
  async fn apply(&self, records: &[Record]) -> Result<()>;

  async fn get(&self, kind: &str, key: &str) -> Result<Option<Record>>;

  /// Read the queue snapshot written by [`save_queue`](Self::save_queue).
  async fn load_queue(&self) -> Result<Vec<SyncJob>>;

  /// Overwrite the queue snapshot.
  async fn save_queue(&self, jobs: &[SyncJob]) -> Result<()>;

  /// Trivial read used by the health monitor.
  async fn ping(&self) -> Result<()>;
}

/// Open the backend named in the configuration.
pub fn open(config: &PersistenceConfig) -> color_eyre::Result<Arc<dyn PersistenceAdapter>> {
  let adapter: Arc<dyn PersistenceAdapter> = match config.backend {
    PersistenceBackendKind::Memory => Arc::new(MemoryPersistence::new()),
    PersistenceBackendKind::File => {
      let dir = match &config.path {
        Some(path) => path.clone(),
        None => Config::data_dir()?.join("store"),
      };
      Arc::new(FilePersistence::open(&dir)?)
    }
    PersistenceBackendKind::Sqlite => {
      let path = match &config.path {
        Some(path) => path.clone(),
        None => Config::data_dir()?.join("store.db"),
      };
      Arc::new(SqlitePersistence::open(&path)?)
    }
  };
  Ok(adapter)
}

#[cfg(test)]
pub(crate) mod testing {
  //! Shared checks every backend must pass.

  use super::*;
  use crate::sync::{JobKind, Priority};

  pub fn record(kind: &str, key: &str, rating: i64) -> Record {
    Record {
      kind: kind.to_string(),
      key: key.to_string(),
      data: serde_json::json!({ "handle": key, "rating": rating }),
      fetched_at: Utc::now(),
    }
  }

  pub async fn exercise_adapter(adapter: &dyn PersistenceAdapter) {
    adapter.ping().await.unwrap();

    assert!(adapter.load_queue().await.unwrap().is_empty());
    assert!(adapter.get("user", "alice").await.unwrap().is_none());

    adapter
      .apply(&[record("user", "alice", 1500), record("user", "bob", 1200)])
      .await
      .unwrap();
    // Re-applying is an upsert
    adapter.apply(&[record("user", "alice", 1600)]).await.unwrap();

    let alice = adapter.get("user", "alice").await.unwrap().unwrap();
    assert_eq!(alice.data["rating"], 1600);
    assert!(adapter.get("contest", "alice").await.unwrap().is_none());

    let now = Utc::now();
    let jobs = vec![
      SyncJob::new(JobKind::user("alice"), Priority::High, 3, now),
      SyncJob::new(JobKind::RefreshTracked, Priority::Low, 3, now),
    ];
    adapter.save_queue(&jobs).await.unwrap();
    assert_eq!(adapter.load_queue().await.unwrap(), jobs);

    adapter.save_queue(&jobs[1..]).await.unwrap();
    assert_eq!(adapter.load_queue().await.unwrap(), jobs[1..].to_vec());
  }
}
