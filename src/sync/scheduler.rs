//! Timers that keep the queue fed: the periodic refresh and per-handle syncs.
//!
//! Timers only ever enqueue. All fetching stays on the engine's drain loop.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::engine::SyncEngine;
use super::job::{JobKind, Priority};
use crate::cache::keys::normalize_handle;
use crate::cache::TtlCache;
use crate::config::SyncConfig;

/// A ticker bound to a cancellation token.
///
/// Cancelling stops future ticks; a tick already running finishes normally.
/// Dropping the task cancels it.
pub struct PeriodicTask {
  token: CancellationToken,
  handle: JoinHandle<()>,
}

impl PeriodicTask {
  /// Run `tick` every `period`. With `immediate`, the first tick fires now
  /// instead of one period from now.
  pub fn spawn<F, Fut>(period: Duration, immediate: bool, mut tick: F) -> Self
  where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
  {
    // interval_at panics on a zero period
    let period = period.max(Duration::from_millis(1));
    let token = CancellationToken::new();
    let cancelled = token.clone();

    let handle = tokio::spawn(async move {
      let start = if immediate {
        Instant::now()
      } else {
        Instant::now() + period
      };
      let mut ticker = interval_at(start, period);
      ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

      loop {
        tokio::select! {
          _ = cancelled.cancelled() => break,
          _ = ticker.tick() => tick().await,
        }
      }
    });

    Self { token, handle }
  }

  pub fn cancel(&self) {
    self.token.cancel();
  }

  pub fn is_cancelled(&self) -> bool {
    self.token.is_cancelled()
  }

  /// Whether the ticker loop has exited.
  pub fn is_finished(&self) -> bool {
    self.handle.is_finished()
  }
}

impl Drop for PeriodicTask {
  fn drop(&mut self) {
    self.token.cancel();
  }
}

/// Timer periods for the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerSettings {
  pub refresh_interval: Duration,
  pub entity_interval: Duration,
  /// Submissions fetched per background sync of a handle
  pub submission_count: u32,
}

impl From<&SyncConfig> for SchedulerSettings {
  fn from(config: &SyncConfig) -> Self {
    Self {
      refresh_interval: config.refresh_interval(),
      entity_interval: config.entity_interval(),
      submission_count: config.submission_count,
    }
  }
}

/// Owns the periodic refresh timer and the per-handle background syncs.
pub struct Scheduler {
  engine: SyncEngine,
  cache: TtlCache,
  settings: SchedulerSettings,
  refresh: Mutex<Option<PeriodicTask>>,
  entities: Mutex<HashMap<String, PeriodicTask>>,
}

impl Scheduler {
  pub fn new(engine: SyncEngine, cache: TtlCache, settings: SchedulerSettings) -> Self {
    Self {
      engine,
      cache,
      settings,
      refresh: Mutex::new(None),
      entities: Mutex::new(HashMap::new()),
    }
  }

  fn refresh_slot(&self) -> MutexGuard<'_, Option<PeriodicTask>> {
    self.refresh.lock().unwrap_or_else(|e| e.into_inner())
  }

  fn entities(&self) -> MutexGuard<'_, HashMap<String, PeriodicTask>> {
    self.entities.lock().unwrap_or_else(|e| e.into_inner())
  }

  /// Start the periodic refresh. Idempotent.
  pub fn start(&self) {
    let mut slot = self.refresh_slot();
    if slot.is_some() {
      return;
    }

    let engine = self.engine.clone();
    let cache = self.cache.clone();
    info!(
      interval_secs = self.settings.refresh_interval.as_secs(),
      "Starting periodic refresh"
    );
    *slot = Some(PeriodicTask::spawn(
      self.settings.refresh_interval,
      false,
      move || refresh_tick(engine.clone(), cache.clone()),
    ));
  }

  /// Stop the periodic refresh and every background sync.
  pub fn stop(&self) {
    if let Some(task) = self.refresh_slot().take() {
      task.cancel();
    }
    let stopped: Vec<_> = self.entities().drain().collect();
    for (handle, task) in stopped {
      task.cancel();
      debug!(handle = %handle, "Stopped background sync");
    }
  }

  pub fn is_running(&self) -> bool {
    self.refresh_slot().is_some()
  }

  /// Sync `handle` now at high priority, then at medium priority on every
  /// entity interval until stopped.
  ///
  /// Returns `false` if a background sync for the handle is already running.
  pub async fn start_background_sync(&self, handle: &str) -> bool {
    let handle = normalize_handle(handle);
    {
      let mut entities = self.entities();
      if entities.contains_key(&handle) {
        return false;
      }
      // Claim the slot before any await so a concurrent start sees it
      let engine = self.engine.clone();
      let submission_count = self.settings.submission_count;
      let tick_handle = handle.clone();
      let task = PeriodicTask::spawn(self.settings.entity_interval, false, move || {
        entity_tick(engine.clone(), tick_handle.clone(), submission_count)
      });
      entities.insert(handle.clone(), task);
    }
    info!(handle = %handle, "Started background sync");

    for kind in entity_jobs(&handle, self.settings.submission_count) {
      self.engine.enqueue(kind, Priority::High).await;
    }
    true
  }

  /// Stop the recurring sync for `handle`. Queued jobs and a fetch already in
  /// flight are left alone.
  pub fn stop_background_sync(&self, handle: &str) -> bool {
    match self.entities().remove(&normalize_handle(handle)) {
      Some(task) => {
        task.cancel();
        info!(handle, "Stopped background sync");
        true
      }
      None => false,
    }
  }

  /// Handles with a running background sync, sorted.
  pub fn active_entities(&self) -> Vec<String> {
    let mut handles: Vec<String> = self.entities().keys().cloned().collect();
    handles.sort();
    handles
  }
}

impl Drop for Scheduler {
  fn drop(&mut self) {
    self.stop();
  }
}

fn entity_jobs(handle: &str, submission_count: u32) -> [JobKind; 2] {
  [
    JobKind::user(handle),
    JobKind::SubmissionSync {
      handle: handle.to_string(),
      count: submission_count,
    },
  ]
}

async fn refresh_tick(engine: SyncEngine, cache: TtlCache) {
  let purged = cache.purge_expired();
  if purged > 0 {
    debug!(purged, "Purged expired cache entries");
  }

  if !engine.is_online() || engine.is_syncing() {
    debug!("Engine busy or offline, skipping refresh");
    return;
  }
  if engine.is_pending(&JobKind::RefreshTracked) {
    return;
  }
  engine.enqueue(JobKind::RefreshTracked, Priority::Low).await;
}

async fn entity_tick(engine: SyncEngine, handle: String, submission_count: u32) {
  for kind in entity_jobs(&handle, submission_count) {
    if !engine.is_pending(&kind) {
      engine.enqueue(kind, Priority::Medium).await;
    }
  }
}
