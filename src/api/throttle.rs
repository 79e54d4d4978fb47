//! Global spacing of outgoing calls.

use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

/// Enforces a minimum interval between consecutive calls, across all callers.
///
/// Waiters queue on the mutex, so calls are released one at a time in
/// arrival order.
#[derive(Debug)]
pub struct Throttle {
  min_interval: Duration,
  last_call: Mutex<Option<Instant>>,
}

impl Throttle {
  pub fn new(min_interval: Duration) -> Self {
    Self {
      min_interval,
      last_call: Mutex::new(None),
    }
  }

  /// Wait until the next call is allowed and claim the slot.
  pub async fn acquire(&self) {
    let mut last_call = self.last_call.lock().await;

    if let Some(last) = *last_call {
      let ready_at = last + self.min_interval;
      let now = Instant::now();
      if ready_at > now {
        debug!(
          wait_ms = (ready_at - now).as_millis() as u64,
          "Waiting for rate limit"
        );
        tokio::time::sleep_until(ready_at).await;
      }
    }

    *last_call = Some(Instant::now());
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::Arc;

  #[tokio::test]
  async fn test_first_call_is_immediate() {
    let throttle = Throttle::new(Duration::from_secs(10));
    let started = Instant::now();
    throttle.acquire().await;
    assert!(started.elapsed() < Duration::from_millis(50));
  }

  #[tokio::test]
  async fn test_concurrent_callers_are_spaced() {
    let throttle = Arc::new(Throttle::new(Duration::from_millis(40)));
    let started = Instant::now();

    let mut handles = Vec::new();
    for _ in 0..3 {
      let throttle = Arc::clone(&throttle);
      handles.push(tokio::spawn(async move { throttle.acquire().await }));
    }
    for handle in handles {
      handle.await.unwrap();
    }

    // Three calls need at least two full intervals between them
    assert!(started.elapsed() >= Duration::from_millis(80));
  }
}
