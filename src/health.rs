//! Health report over the engine's dependencies.
//!
//! Four independent checks run concurrently, each under its own timeout. A check
//! that errors or hangs counts as failed; it never holds up the report.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::cache::TtlCache;
use crate::clock::Clock;
use crate::config::HealthConfig;
use crate::error::{Result, SyncError};
use crate::persist::PersistenceAdapter;
use crate::sync::SyncEngine;

pub const CHECK_CACHE: &str = "cache";
pub const CHECK_STORE: &str = "store";
pub const CHECK_API: &str = "api";
pub const CHECK_QUEUE: &str = "queue";

/// One lightweight call against the judge API.
#[async_trait]
pub trait ApiProbe: Send + Sync {
  async fn probe(&self) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
  Healthy,
  Degraded,
  Unhealthy,
}

impl HealthStatus {
  /// All checks pass: healthy. At least half: degraded. Otherwise unhealthy.
  pub fn aggregate(passed: usize, total: usize) -> Self {
    if passed == total {
      HealthStatus::Healthy
    } else if passed * 2 >= total {
      HealthStatus::Degraded
    } else {
      HealthStatus::Unhealthy
    }
  }
}

impl fmt::Display for HealthStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      HealthStatus::Healthy => write!(f, "healthy"),
      HealthStatus::Degraded => write!(f, "degraded"),
      HealthStatus::Unhealthy => write!(f, "unhealthy"),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
  pub status: HealthStatus,
  /// Check name to pass/fail
  pub checks: BTreeMap<String, bool>,
  pub last_sync_timestamp: Option<DateTime<Utc>>,
  pub queue_backlog: usize,
  pub failed_operations_count: u64,
  pub checked_at: DateTime<Utc>,
}

pub struct HealthMonitor {
  cache: TtlCache,
  store: Arc<dyn PersistenceAdapter>,
  api: Arc<dyn ApiProbe>,
  engine: SyncEngine,
  clock: Arc<dyn Clock>,
  backlog_threshold: usize,
  check_timeout: Duration,
}

impl HealthMonitor {
  pub fn new(
    cache: TtlCache,
    store: Arc<dyn PersistenceAdapter>,
    api: Arc<dyn ApiProbe>,
    engine: SyncEngine,
    clock: Arc<dyn Clock>,
    config: &HealthConfig,
  ) -> Self {
    Self {
      cache,
      store,
      api,
      engine,
      clock,
      backlog_threshold: config.backlog_threshold,
      check_timeout: config.check_timeout(),
    }
  }

  pub async fn check(&self) -> HealthReport {
    let backlog = self.engine.queue_len();

    // Backends may block the thread, so the round trip runs off the runtime
    let cache = self.cache.clone();
    let cache_check = async move {
      match tokio::task::spawn_blocking(move || cache.round_trip()).await {
        Ok(outcome) => outcome,
        Err(e) => Err(SyncError::Cache(format!("cache check aborted: {}", e))),
      }
    };

    let (cache_ok, store_ok, api_ok) = tokio::join!(
      self.timed(CHECK_CACHE, cache_check),
      self.timed(CHECK_STORE, self.store.ping()),
      self.timed(CHECK_API, self.api.probe()),
    );
    let queue_ok = backlog < self.backlog_threshold;
    if !queue_ok {
      warn!(
        check = CHECK_QUEUE,
        backlog,
        threshold = self.backlog_threshold,
        "Health check failed"
      );
    }

    let checks: BTreeMap<String, bool> = [
      (CHECK_CACHE, cache_ok),
      (CHECK_STORE, store_ok),
      (CHECK_API, api_ok),
      (CHECK_QUEUE, queue_ok),
    ]
    .into_iter()
    .map(|(name, ok)| (name.to_string(), ok))
    .collect();

    let passed = checks.values().filter(|ok| **ok).count();
    let status = self.engine.status();
    HealthReport {
      status: HealthStatus::aggregate(passed, checks.len()),
      checks,
      last_sync_timestamp: status.last_sync_timestamp,
      queue_backlog: backlog,
      failed_operations_count: status.failed_operations_count,
      checked_at: self.clock.now(),
    }
  }

  async fn timed<F>(&self, name: &str, check: F) -> bool
  where
    F: Future<Output = Result<()>>,
  {
    let outcome = match tokio::time::timeout(self.check_timeout, check).await {
      Ok(outcome) => outcome,
      Err(_) => Err(SyncError::Timeout),
    };
    match outcome {
      Ok(()) => true,
      Err(e) => {
        warn!(check = name, error = %e, "Health check failed");
        false
      }
    }
  }
}
