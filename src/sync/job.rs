//! Sync jobs: what to fetch, how urgently, and how often it has failed.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::cache::keys::normalize_handle;

/// Scheduling tier. Every `High` job is drained before any `Medium`, and
/// every `Medium` before any `Low`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
  High,
  Medium,
  Low,
}

impl Priority {
  /// Lower rank drains first.
  pub fn rank(self) -> u8 {
    match self {
      Priority::High => 0,
      Priority::Medium => 1,
      Priority::Low => 2,
    }
  }

  /// Whether `self` is strictly less urgent than `other`.
  pub fn is_lower_than(self, other: Priority) -> bool {
    self.rank() > other.rank()
  }
}

impl fmt::Display for Priority {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Priority::High => write!(f, "high"),
      Priority::Medium => write!(f, "medium"),
      Priority::Low => write!(f, "low"),
    }
  }
}

impl FromStr for Priority {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_lowercase().as_str() {
      "high" => Ok(Priority::High),
      "medium" => Ok(Priority::Medium),
      "low" => Ok(Priority::Low),
      other => Err(format!("unknown priority '{}'", other)),
    }
  }
}

/// The work a job performs, with its typed payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum JobKind {
  /// Profile and rating of one handle
  UserSync { handle: String },
  /// Recent submissions of one handle
  SubmissionSync { handle: String, count: u32 },
  /// Contest list, official or gym
  ContestSync { include_gym: bool },
  /// Problem set, optionally filtered by tags
  ProblemsetSync {
    #[serde(default)]
    tags: Vec<String>,
  },
  /// Profiles of every tracked handle in one call
  RefreshTracked,
}

impl JobKind {
  pub fn user(handle: impl AsRef<str>) -> Self {
    JobKind::UserSync {
      handle: normalize_handle(handle.as_ref()),
    }
  }

  /// Same job with handles in canonical case, so equal work compares equal.
  pub fn normalized(self) -> Self {
    match self {
      JobKind::UserSync { handle } => JobKind::UserSync {
        handle: normalize_handle(&handle),
      },
      JobKind::SubmissionSync { handle, count } => JobKind::SubmissionSync {
        handle: normalize_handle(&handle),
        count,
      },
      other => other,
    }
  }

  /// Tag naming the handler, as written to the queue snapshot.
  pub fn type_name(&self) -> &'static str {
    match self {
      JobKind::UserSync { .. } => "user-sync",
      JobKind::SubmissionSync { .. } => "submission-sync",
      JobKind::ContestSync { .. } => "contest-sync",
      JobKind::ProblemsetSync { .. } => "problemset-sync",
      JobKind::RefreshTracked => "refresh-tracked",
    }
  }
}

impl fmt::Display for JobKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      JobKind::UserSync { handle } => write!(f, "user-sync({})", handle),
      JobKind::SubmissionSync { handle, count } => {
        write!(f, "submission-sync({}, {})", handle, count)
      }
      JobKind::ContestSync { include_gym } => write!(f, "contest-sync(gym={})", include_gym),
      JobKind::ProblemsetSync { tags } => write!(f, "problemset-sync({})", tags.join(";")),
      JobKind::RefreshTracked => write!(f, "refresh-tracked"),
    }
  }
}

/// A unit of queued synchronization work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncJob {
  pub id: String,
  pub kind: JobKind,
  pub priority: Priority,
  pub retry_count: u32,
  pub max_retries: u32,
  /// Not eligible to run before this instant
  pub next_run_at: DateTime<Utc>,
  pub created_at: DateTime<Utc>,
  pub last_error: Option<String>,
}

impl SyncJob {
  pub fn new(kind: JobKind, priority: Priority, max_retries: u32, now: DateTime<Utc>) -> Self {
    Self {
      id: uuid::Uuid::new_v4().to_string(),
      kind,
      priority,
      retry_count: 0,
      max_retries,
      next_run_at: now,
      created_at: now,
      last_error: None,
    }
  }

  pub fn is_due(&self, now: DateTime<Utc>) -> bool {
    now >= self.next_run_at
  }

  /// Whether another failure would exhaust the retry budget.
  pub fn is_exhausted(&self) -> bool {
    self.retry_count >= self.max_retries
  }
}

/// Exponential backoff for job retries: `base * 2^retry_count`, capped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
  pub base_ms: u64,
  pub cap_ms: u64,
}

impl Default for Backoff {
  fn default() -> Self {
    Self {
      base_ms: 1000,
      cap_ms: 30_000,
    }
  }
}

impl Backoff {
  pub fn delay(&self, retry_count: u32) -> Duration {
    let factor = 2u64.checked_pow(retry_count).unwrap_or(u64::MAX);
    let ms = self.base_ms.saturating_mul(factor).min(self.cap_ms);
    Duration::milliseconds(ms as i64)
  }
}
