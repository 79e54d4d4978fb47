//! Derived sync status and the listeners that observe it.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

/// Snapshot of the engine's sync state, recomputed after every queue mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
  pub is_online: bool,
  pub is_syncing: bool,
  pub queue_size: usize,
  pub last_sync_timestamp: Option<DateTime<Utc>>,
  pub failed_operations_count: u64,
}

type Listener = Arc<dyn Fn(&SyncStatus) + Send + Sync>;
type Registry = Mutex<BTreeMap<u64, Listener>>;

/// Registered status listeners.
#[derive(Default)]
pub(crate) struct Listeners {
  registry: Arc<Registry>,
  next_id: AtomicU64,
}

impl Listeners {
  pub fn subscribe<F>(&self, listener: F) -> Subscription
  where
    F: Fn(&SyncStatus) + Send + Sync + 'static,
  {
    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
    self
      .registry
      .lock()
      .unwrap_or_else(|e| e.into_inner())
      .insert(id, Arc::new(listener));
    Subscription {
      id,
      registry: Arc::downgrade(&self.registry),
    }
  }

  /// Call every listener with `status`.
  ///
  /// The registry lock is released before calling out, so a listener may
  /// unsubscribe itself or read engine state.
  pub fn notify(&self, status: &SyncStatus) {
    let listeners: Vec<Listener> = self
      .registry
      .lock()
      .unwrap_or_else(|e| e.into_inner())
      .values()
      .cloned()
      .collect();
    for listener in listeners {
      listener(status);
    }
  }

  pub fn len(&self) -> usize {
    self.registry.lock().unwrap_or_else(|e| e.into_inner()).len()
  }
}

/// Handle returned by `on_status_change`. Dropping it keeps the listener.
#[derive(Debug)]
pub struct Subscription {
  id: u64,
  registry: Weak<Registry>,
}

impl Subscription {
  /// Stop receiving status updates.
  pub fn unsubscribe(self) {
    if let Some(registry) = self.registry.upgrade() {
      registry
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .remove(&self.id);
    }
  }
}
