use async_trait::async_trait;
use color_eyre::eyre::eyre;
use sha2::{Digest, Sha256};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use super::{PersistenceAdapter, Record, QUEUE_SLOT};
use crate::error::Result;
use crate::sync::SyncJob;

/// JSON files under a directory.
///
/// ```text
/// <root>/sync-queue.json
/// <root>/records/<kind>/<sha256(key)>.json
/// ```
///
/// Every write goes to a temporary file first and is renamed into place, so a
/// crash mid-write leaves the previous version intact.
pub struct FilePersistence {
  root: PathBuf,
}

impl FilePersistence {
  pub fn open(root: &Path) -> color_eyre::Result<Self> {
    std::fs::create_dir_all(root.join("records"))
      .map_err(|e| eyre!("Failed to create store directory {}: {}", root.display(), e))?;
    Ok(Self {
      root: root.to_path_buf(),
    })
  }

  fn slot_path(&self, name: &str) -> PathBuf {
    self.root.join(format!("{}.json", name))
  }

  fn record_path(&self, kind: &str, key: &str) -> PathBuf {
    // Keys may contain characters that are not valid in file names
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    self
      .root
      .join("records")
      .join(kind)
      .join(format!("{}.json", hex::encode(hasher.finalize())))
  }

  async fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
      tokio::fs::create_dir_all(parent).await?;
    }
    let tmp = path.with_extension(format!("tmp-{}", uuid::Uuid::new_v4()));
    tokio::fs::write(&tmp, contents).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
  }

  async fn read_optional(path: &Path) -> Result<Option<Vec<u8>>> {
    match tokio::fs::read(path).await {
      Ok(bytes) => Ok(Some(bytes)),
      Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
      Err(e) => Err(e.into()),
    }
  }
}

#[async_trait]
impl PersistenceAdapter for FilePersistence {
  async fn apply(&self, records: &[Record]) -> Result<()> {
    for record in records {
      let path = self.record_path(&record.kind, &record.key);
      Self::write_atomic(&path, &serde_json::to_vec(record)?).await?;
    }
    Ok(())
  }

  async fn get(&self, kind: &str, key: &str) -> Result<Option<Record>> {
    match Self::read_optional(&self.record_path(kind, key)).await? {
      Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
      None => Ok(None),
    }
  }

  async fn load_queue(&self) -> Result<Vec<SyncJob>> {
    match Self::read_optional(&self.slot_path(QUEUE_SLOT)).await? {
      Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
      None => Ok(Vec::new()),
    }
  }

  async fn save_queue(&self, jobs: &[SyncJob]) -> Result<()> {
    let contents = serde_json::to_vec_pretty(jobs)?;
    Self::write_atomic(&self.slot_path(QUEUE_SLOT), &contents).await
  }

  async fn ping(&self) -> Result<()> {
    tokio::fs::metadata(&self.root).await?;
    Ok(())
  }
}
