use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use super::{PersistenceAdapter, Record};
use crate::error::{Result, SyncError};
use crate::sync::SyncJob;

#[derive(Default)]
struct State {
  records: HashMap<(String, String), Record>,
  /// Serialized like the durable backends so snapshots round-trip the same way
  queue_slot: Option<String>,
}

/// Process-local backend for tests and deployments without durable infra.
#[derive(Default)]
pub struct MemoryPersistence {
  state: Mutex<State>,
}

impl MemoryPersistence {
  pub fn new() -> Self {
    Self::default()
  }

  fn state(&self) -> Result<MutexGuard<'_, State>> {
    self
      .state
      .lock()
      .map_err(|e| SyncError::Store(format!("Lock poisoned: {}", e)))
  }

  pub fn record_count(&self) -> usize {
    self.state().map(|s| s.records.len()).unwrap_or(0)
  }
}

#[async_trait]
impl PersistenceAdapter for MemoryPersistence {
  async fn apply(&self, records: &[Record]) -> Result<()> {
    let mut state = self.state()?;
    for record in records {
      state
        .records
        .insert((record.kind.clone(), record.key.clone()), record.clone());
    }
    Ok(())
  }

  async fn get(&self, kind: &str, key: &str) -> Result<Option<Record>> {
    let state = self.state()?;
    Ok(
      state
        .records
        .get(&(kind.to_string(), key.to_string()))
        .cloned(),
    )
  }

  async fn load_queue(&self) -> Result<Vec<SyncJob>> {
    match &self.state()?.queue_slot {
      Some(raw) => Ok(serde_json::from_str(raw)?),
      None => Ok(Vec::new()),
    }
  }

  async fn save_queue(&self, jobs: &[SyncJob]) -> Result<()> {
    let raw = serde_json::to_string(jobs)?;
    self.state()?.queue_slot = Some(raw);
    Ok(())
  }

  async fn ping(&self) -> Result<()> {
    self.state().map(|_| ())
  }
}
