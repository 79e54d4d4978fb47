//! Time source used for cache expiry and job scheduling.

use chrono::{DateTime, Duration, Utc};
use std::sync::{Arc, Mutex};

/// Anything that can tell the current wall-clock time.
pub trait Clock: Send + Sync {
  fn now(&self) -> DateTime<Utc>;
}

/// Reads the system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
  fn now(&self) -> DateTime<Utc> {
    Utc::now()
  }
}

/// A clock that only moves when told to.
///
/// Clones share the same underlying instant, so a test can hold one handle
/// and hand another to the engine.
#[derive(Debug, Clone)]
pub struct ManualClock {
  now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
  pub fn new(start: DateTime<Utc>) -> Self {
    Self {
      now: Arc::new(Mutex::new(start)),
    }
  }

  /// Start at the current system time.
  pub fn starting_now() -> Self {
    Self::new(Utc::now())
  }

  pub fn advance(&self, by: Duration) {
    let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
    *now += by;
  }
}

impl Clock for ManualClock {
  fn now(&self) -> DateTime<Utc> {
    *self.now.lock().unwrap_or_else(|e| e.into_inner())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_manual_clock_advances_shared_handles() {
    let clock = ManualClock::starting_now();
    let other = clock.clone();
    let before = other.now();

    clock.advance(Duration::seconds(5));

    assert_eq!(other.now() - before, Duration::seconds(5));
  }
}
