//! The sync engine: owns the queue, runs the drain loop, gates on connectivity.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::handler::JobHandler;
use super::job::{Backoff, JobKind, Priority, SyncJob};
use super::queue::SyncQueue;
use super::status::{Listeners, Subscription, SyncStatus};
use crate::clock::Clock;
use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::persist::PersistenceAdapter;

/// Knobs for the drain loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncSettings {
  /// Retry budget given to each new job
  pub max_retries: u32,
  pub backoff: Backoff,
  /// Start draining on enqueue and on reconnect. When off, callers drive
  /// [`SyncEngine::drain`] themselves.
  pub auto_drain: bool,
}

impl Default for SyncSettings {
  fn default() -> Self {
    Self {
      max_retries: 3,
      backoff: Backoff::default(),
      auto_drain: true,
    }
  }
}

impl From<&SyncConfig> for SyncSettings {
  fn from(config: &SyncConfig) -> Self {
    Self {
      max_retries: config.max_retries,
      backoff: Backoff {
        base_ms: config.backoff_base_ms,
        cap_ms: config.backoff_cap_ms,
      },
      auto_drain: config.auto_drain,
    }
  }
}

struct Inner {
  queue: Mutex<SyncQueue>,
  handler: Arc<dyn JobHandler>,
  store: Arc<dyn PersistenceAdapter>,
  clock: Arc<dyn Clock>,
  settings: SyncSettings,
  online: AtomicBool,
  draining: AtomicBool,
  last_sync: Mutex<Option<DateTime<Utc>>>,
  failed: AtomicU64,
  listeners: Listeners,
  /// Serializes snapshot writes so an older snapshot never lands last
  persist_lock: AsyncMutex<()>,
  /// Pending wake-up for a not-yet-due queue head
  wake: Mutex<Option<JoinHandle<()>>>,
}

/// Clears the draining flag however the drain pass ends.
struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
  fn drop(&mut self) {
    self.0.store(false, Ordering::Release);
  }
}

enum Step {
  Idle,
  Blocked(DateTime<Utc>),
  Run(SyncJob),
}

/// Priority queue of sync jobs with a single serialized drain loop.
///
/// Cheap to clone; clones share the same queue.
#[derive(Clone)]
pub struct SyncEngine {
  inner: Arc<Inner>,
}

impl SyncEngine {
  /// Build an engine, rehydrating pending jobs from the store's snapshot.
  ///
  /// An unreadable snapshot is logged and the engine starts empty.
  pub async fn open(
    handler: Arc<dyn JobHandler>,
    store: Arc<dyn PersistenceAdapter>,
    clock: Arc<dyn Clock>,
    settings: SyncSettings,
  ) -> Self {
    let jobs = match store.load_queue().await {
      Ok(jobs) => {
        if !jobs.is_empty() {
          info!(jobs = jobs.len(), "Rehydrated sync queue");
        }
        jobs
      }
      Err(e) => {
        warn!(error = %e, "Failed to load queue snapshot, starting empty");
        Vec::new()
      }
    };

    Self {
      inner: Arc::new(Inner {
        queue: Mutex::new(SyncQueue::from_jobs(jobs)),
        handler,
        store,
        clock,
        settings,
        online: AtomicBool::new(true),
        draining: AtomicBool::new(false),
        last_sync: Mutex::new(None),
        failed: AtomicU64::new(0),
        listeners: Listeners::default(),
        persist_lock: AsyncMutex::new(()),
        wake: Mutex::new(None),
      }),
    }
  }

  fn queue(&self) -> MutexGuard<'_, SyncQueue> {
    self.inner.queue.lock().unwrap_or_else(|e| e.into_inner())
  }

  /// Queue a job and return its id.
  pub async fn enqueue(&self, kind: JobKind, priority: Priority) -> String {
    let job = SyncJob::new(
      kind.normalized(),
      priority,
      self.inner.settings.max_retries,
      self.inner.clock.now(),
    );
    let id = job.id.clone();
    debug!(job_id = %id, kind = %job.kind, %priority, "Enqueued sync job");

    self.queue().push(job);
    self.after_mutation().await;
    self.trigger();
    id
  }

  /// Whether a job of exactly this kind is waiting to run.
  pub fn is_pending(&self, kind: &JobKind) -> bool {
    self.queue().contains_kind(&kind.clone().normalized())
  }

  pub fn is_online(&self) -> bool {
    self.inner.online.load(Ordering::Acquire)
  }

  pub fn is_syncing(&self) -> bool {
    self.inner.draining.load(Ordering::Acquire)
  }

  pub fn queue_len(&self) -> usize {
    self.queue().len()
  }

  /// Jobs in drain order.
  pub fn snapshot(&self) -> Vec<SyncJob> {
    self.queue().snapshot()
  }

  pub fn last_sync(&self) -> Option<DateTime<Utc>> {
    *self.inner.last_sync.lock().unwrap_or_else(|e| e.into_inner())
  }

  pub fn failed_count(&self) -> u64 {
    self.inner.failed.load(Ordering::Relaxed)
  }

  pub fn status(&self) -> SyncStatus {
    SyncStatus {
      is_online: self.is_online(),
      is_syncing: self.is_syncing(),
      queue_size: self.queue_len(),
      last_sync_timestamp: self.last_sync(),
      failed_operations_count: self.failed_count(),
    }
  }

  pub fn subscribe<F>(&self, listener: F) -> Subscription
  where
    F: Fn(&SyncStatus) + Send + Sync + 'static,
  {
    self.inner.listeners.subscribe(listener)
  }

  /// Record a connectivity transition.
  ///
  /// Going offline stops the drain after the in-flight job; coming back
  /// online resumes from the current head.
  pub fn set_online(&self, online: bool) {
    let was_online = self.inner.online.swap(online, Ordering::AcqRel);
    if was_online == online {
      return;
    }
    info!(online, "Connectivity changed");
    self.notify();
    if online {
      self.trigger();
    }
  }

  /// Follow a connectivity signal until its sender is dropped.
  pub fn watch_connectivity(&self, mut signal: watch::Receiver<bool>) -> JoinHandle<()> {
    let engine = self.clone();
    tokio::spawn(async move {
      let online = *signal.borrow_and_update();
      engine.set_online(online);
      while signal.changed().await.is_ok() {
        let online = *signal.borrow_and_update();
        engine.set_online(online);
      }
    })
  }

  /// Run jobs from the head until the queue is empty, the engine goes
  /// offline, or the head is not yet due.
  ///
  /// Returns immediately if another drain is already running.
  pub async fn drain(&self) {
    loop {
      if !self.is_online() {
        return;
      }
      if self
        .inner
        .draining
        .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
        .is_err()
      {
        return;
      }

      {
        let _guard = DrainGuard(&self.inner.draining);
        self.notify();
        self.drain_pass().await;
      }
      self.notify();

      // A trigger that raced with the end of the pass saw the flag still set
      if !self.has_due_work() {
        return;
      }
    }
  }

  async fn drain_pass(&self) {
    loop {
      if !self.is_online() {
        debug!("Offline, pausing drain");
        return;
      }

      let now = self.inner.clock.now();
      let step = {
        let queue = self.queue();
        match queue.head() {
          None => Step::Idle,
          Some(head) if !head.is_due(now) => Step::Blocked(head.next_run_at),
          Some(head) => Step::Run(head.clone()),
        }
      };

      let job = match step {
        Step::Idle => return,
        Step::Blocked(at) => {
          self.schedule_wake(at);
          return;
        }
        Step::Run(job) => job,
      };

      match self.inner.handler.handle(&job.kind).await {
        Ok(()) => {
          self.queue().remove(&job.id);
          *self.inner.last_sync.lock().unwrap_or_else(|e| e.into_inner()) =
            Some(self.inner.clock.now());
          debug!(job_id = %job.id, kind = %job.kind, "Sync job completed");
        }
        Err(err) => self.record_failure(&job, err),
      }
      self.after_mutation().await;
    }
  }

  fn record_failure(&self, job: &SyncJob, err: SyncError) {
    let mut queue = self.queue();
    // Removed by id: a higher-priority enqueue may now sit in front of it
    let Some(mut job) = queue.remove(&job.id) else {
      return;
    };

    if !err.is_retryable() || job.is_exhausted() {
      self.inner.failed.fetch_add(1, Ordering::Relaxed);
      error!(
        job_id = %job.id,
        kind = %job.kind,
        attempts = job.retry_count + 1,
        error = %err,
        "Sync job permanently failed"
      );
      return;
    }

    let delay = self.inner.settings.backoff.delay(job.retry_count);
    job.retry_count += 1;
    job.last_error = Some(err.to_string());
    job.next_run_at = self.inner.clock.now() + delay;
    warn!(
      job_id = %job.id,
      kind = %job.kind,
      attempt = job.retry_count,
      backoff_ms = delay.num_milliseconds(),
      error = %err,
      "Sync job failed, retry scheduled"
    );
    // Retries go behind everything, including newer jobs of lower priority
    queue.requeue_tail(job);
  }

  fn has_due_work(&self) -> bool {
    let now = self.inner.clock.now();
    self.is_online() && self.queue().head().is_some_and(|head| head.is_due(now))
  }

  /// Spawn a drain unless the caller drives draining manually.
  fn trigger(&self) {
    if !self.inner.settings.auto_drain || !self.is_online() {
      return;
    }
    let engine = self.clone();
    tokio::spawn(async move { engine.drain().await });
  }

  /// Trigger a drain once the blocked head becomes due.
  fn schedule_wake(&self, at: DateTime<Utc>) {
    if !self.inner.settings.auto_drain {
      return;
    }
    let wait = (at - self.inner.clock.now()).to_std().unwrap_or_default();
    let inner = Arc::downgrade(&self.inner);
    let task = tokio::spawn(async move {
      tokio::time::sleep(wait).await;
      if let Some(inner) = inner.upgrade() {
        SyncEngine { inner }.trigger();
      }
    });

    let previous = self
      .inner
      .wake
      .lock()
      .unwrap_or_else(|e| e.into_inner())
      .replace(task);
    if let Some(previous) = previous {
      previous.abort();
    }
  }

  /// Cancel the pending wake-up. Queued jobs stay in the snapshot.
  pub fn shutdown(&self) {
    let wake = self
      .inner
      .wake
      .lock()
      .unwrap_or_else(|e| e.into_inner())
      .take();
    if let Some(wake) = wake {
      wake.abort();
    }
  }

  async fn after_mutation(&self) {
    self.persist().await;
    self.notify();
  }

  async fn persist(&self) {
    let _serial = self.inner.persist_lock.lock().await;
    let snapshot = self.queue().snapshot();
    if let Err(e) = self.inner.store.save_queue(&snapshot).await {
      warn!(error = %e, jobs = snapshot.len(), "Failed to persist queue snapshot");
    }
  }

  fn notify(&self) {
    self.inner.listeners.notify(&self.status());
  }
}
