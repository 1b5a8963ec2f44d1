//! The cooperative rate-limit window shared by every outbound caller.
//!
//! There are no permits. A caller that was throttled records a "pause until"
//! instant; every caller checks it before sending and sleeps until it has
//! passed.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

#[derive(Debug, Default)]
pub struct RateLimiter {
  pause_until: Mutex<Option<Instant>>,
}

impl RateLimiter {
  pub fn new() -> Self { Self::default() }

  /// Sleep until the current pause, if any, has passed.
  pub async fn wait(&self) {
    let until = *self.pause_until.lock();
    if let Some(until) = until.filter(|u| *u > Instant::now()) {
      tracing::debug!(wait_ms = (until - Instant::now()).as_millis() as u64, "rate limit pause");
      tokio::time::sleep_until(until).await;
    }
  }

  /// Extend the pause to at least `delay` from now. A longer pause already in
  /// force is kept.
  pub fn pause_for(&self, delay: Duration) {
    let candidate = Instant::now() + delay;
    let mut guard = self.pause_until.lock();
    if guard.is_none_or(|current| current < candidate) {
      *guard = Some(candidate);
    }
  }

  pub fn is_paused(&self) -> bool { self.pause_until.lock().is_some_and(|u| u > Instant::now()) }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn waiters_sleep_until_the_pause_passes() {
    let limiter = RateLimiter::new();
    limiter.wait().await;

    limiter.pause_for(Duration::from_millis(150));
    assert!(limiter.is_paused());
    let started = Instant::now();
    limiter.wait().await;
    assert!(started.elapsed() >= Duration::from_millis(140));
    assert!(!limiter.is_paused());
  }

  #[tokio::test]
  async fn shorter_pause_does_not_cut_a_longer_one() {
    let limiter = RateLimiter::new();
    limiter.pause_for(Duration::from_millis(300));
    limiter.pause_for(Duration::from_millis(10));
    let started = Instant::now();
    limiter.wait().await;
    assert!(started.elapsed() >= Duration::from_millis(290));
  }
}
