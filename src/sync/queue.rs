//! Tiered FIFO of pending sync jobs.

use std::collections::VecDeque;

use super::job::{JobKind, SyncJob};

/// Pending jobs, `High` before `Medium` before `Low`, FIFO within a tier.
///
/// Retried jobs are the exception: [`requeue_tail`](Self::requeue_tail) puts
/// them at the very end regardless of tier.
#[derive(Debug, Clone, Default)]
pub struct SyncQueue {
  jobs: VecDeque<SyncJob>,
}

impl SyncQueue {
  pub fn new() -> Self {
    Self::default()
  }

  /// Rebuild from a snapshot, keeping the stored order as-is.
  pub fn from_jobs(jobs: Vec<SyncJob>) -> Self {
    Self { jobs: jobs.into() }
  }

  /// Insert before the first job of strictly lower priority.
  pub fn push(&mut self, job: SyncJob) {
    let position = self
      .jobs
      .iter()
      .position(|queued| queued.priority.is_lower_than(job.priority));
    match position {
      Some(index) => self.jobs.insert(index, job),
      None => self.jobs.push_back(job),
    }
  }

  /// Append at the tail, ignoring priority.
  pub fn requeue_tail(&mut self, job: SyncJob) {
    self.jobs.push_back(job);
  }

  pub fn head(&self) -> Option<&SyncJob> {
    self.jobs.front()
  }

  /// Remove a job by id wherever it currently sits.
  pub fn remove(&mut self, id: &str) -> Option<SyncJob> {
    let index = self.jobs.iter().position(|job| job.id == id)?;
    self.jobs.remove(index)
  }

  /// Whether a job of exactly this kind is waiting.
  pub fn contains_kind(&self, kind: &JobKind) -> bool {
    self.jobs.iter().any(|job| &job.kind == kind)
  }

  pub fn len(&self) -> usize {
    self.jobs.len()
  }

  pub fn is_empty(&self) -> bool {
    self.jobs.is_empty()
  }

  pub fn iter(&self) -> impl Iterator<Item = &SyncJob> {
    self.jobs.iter()
  }

  pub fn snapshot(&self) -> Vec<SyncJob> {
    self.jobs.iter().cloned().collect()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::sync::job::Priority;
  use chrono::Utc;

  fn job(handle: &str, priority: Priority) -> SyncJob {
    SyncJob::new(JobKind::user(handle), priority, 3, Utc::now())
  }

  fn handles(queue: &SyncQueue) -> Vec<String> {
    queue
      .iter()
      .map(|job| match &job.kind {
        JobKind::UserSync { handle } => handle.clone(),
        other => other.to_string(),
      })
      .collect()
  }

  #[test]
  fn test_tiers_drain_in_priority_order() {
    let mut queue = SyncQueue::new();
    queue.push(job("a", Priority::Low));
    queue.push(job("b", Priority::High));
    queue.push(job("c", Priority::Medium));

    assert_eq!(handles(&queue), vec!["b", "c", "a"]);
  }

  #[test]
  fn test_fifo_within_tier() {
    let mut queue = SyncQueue::new();
    queue.push(job("m1", Priority::Medium));
    queue.push(job("h1", Priority::High));
    queue.push(job("m2", Priority::Medium));
    queue.push(job("h2", Priority::High));
    queue.push(job("l1", Priority::Low));
    queue.push(job("m3", Priority::Medium));

    assert_eq!(handles(&queue), vec!["h1", "h2", "m1", "m2", "m3", "l1"]);
  }

  #[test]
  fn test_requeue_tail_ignores_priority() {
    let mut queue = SyncQueue::new();
    let retried = job("retried", Priority::High);
    queue.push(job("low", Priority::Low));
    queue.requeue_tail(retried);
    queue.push(job("medium", Priority::Medium));

    assert_eq!(handles(&queue), vec!["medium", "low", "retried"]);
  }

  #[test]
  fn test_remove_by_id() {
    let mut queue = SyncQueue::new();
    let first = job("a", Priority::Medium);
    let id = first.id.clone();
    queue.push(first);
    queue.push(job("b", Priority::Medium));

    assert_eq!(queue.remove(&id).map(|j| j.id), Some(id.clone()));
    assert!(queue.remove(&id).is_none());
    assert_eq!(handles(&queue), vec!["b"]);
  }

  #[test]
  fn test_contains_kind() {
    let mut queue = SyncQueue::new();
    queue.push(SyncJob::new(JobKind::RefreshTracked, Priority::Low, 3, Utc::now()));

    assert!(queue.contains_kind(&JobKind::RefreshTracked));
    assert!(!queue.contains_kind(&JobKind::user("alice")));
  }

  #[test]
  fn test_snapshot_round_trip_keeps_order() {
    let mut queue = SyncQueue::new();
    queue.push(job("x", Priority::Low));
    queue.requeue_tail(job("y", Priority::High));

    let restored = SyncQueue::from_jobs(queue.snapshot());
    assert_eq!(handles(&restored), vec!["x", "y"]);
  }
}
