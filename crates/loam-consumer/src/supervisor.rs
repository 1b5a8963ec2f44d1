//! The consume loop and the supervisor that keeps it connected.
//!
//! A session declares the queue and then leases messages one at a time. A
//! broker failure ends the session; the supervisor waits and starts a new
//! one, backing off from five seconds up to two minutes. Cancellation ends
//! the loop between messages, and a message interrupted mid-flight is
//! released for redelivery.

use std::{sync::Arc, time::Duration};

use loam_core::{
  log::{ErrorHandler, ErrorKind},
  queue::{Broker, Delivery},
};
use tokio_util::sync::CancellationToken;

use crate::LeadProcessor;

pub const INITIAL_BACKOFF: Duration = Duration::from_secs(5);
pub const MAX_BACKOFF: Duration = Duration::from_secs(120);

pub fn next_backoff(current: Duration) -> Duration { (current * 2).min(MAX_BACKOFF) }

#[derive(Debug, Clone)]
pub struct ConsumerSettings {
  pub queue_name:    String,
  /// How long a leased message stays invisible to other consumers.
  pub lease:         Duration,
  /// Idle wait when the queue is empty.
  pub poll_interval: Duration,
  /// Wait after releasing a failed message, before the next lease.
  pub retry_pause:   Duration,
}

pub struct Consumer<Q> {
  queue:     Arc<Q>,
  processor: Arc<LeadProcessor>,
  errors:    Arc<ErrorHandler>,
  settings:  ConsumerSettings,
  cancel:    CancellationToken,
}

/// How a session ended.
enum SessionEnd<E> {
  Cancelled,
  Lost(E),
}

impl<Q: Broker> Consumer<Q> {
  pub fn new(
    queue: Arc<Q>,
    processor: Arc<LeadProcessor>,
    errors: Arc<ErrorHandler>,
    settings: ConsumerSettings,
    cancel: CancellationToken,
  ) -> Self {
    Self { queue, processor, errors, settings, cancel }
  }

  /// Run sessions until cancelled.
  pub async fn run(&self) {
    let mut delay = INITIAL_BACKOFF;
    tracing::info!(queue = %self.settings.queue_name, "consumer started");
    while !self.cancel.is_cancelled() {
      match self.session(&mut delay).await {
        SessionEnd::Cancelled => break,
        SessionEnd::Lost(err) => {
          self.errors.add_error_from(ErrorKind::TransientRemote, "supervisor", &err);
          self.errors.warn("supervisor", format!("reconnecting in {}s", delay.as_secs()));
          tokio::select! {
            _ = self.cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
          }
          delay = next_backoff(delay);
        }
      }
    }
    self.errors.dump();
    tracing::info!("consumer stopped");
  }

  async fn session(&self, delay: &mut Duration) -> SessionEnd<Q::Error> {
    let queue = self.settings.queue_name.as_str();
    if let Err(err) = self.queue.declare(queue).await {
      return SessionEnd::Lost(err);
    }
    *delay = INITIAL_BACKOFF;

    loop {
      let received = tokio::select! {
        _ = self.cancel.cancelled() => return SessionEnd::Cancelled,
        received = self.queue.receive(queue, self.settings.lease) => received,
      };
      let pause = match received {
        Err(err) => return SessionEnd::Lost(err),
        Ok(None) => self.settings.poll_interval,
        Ok(Some(delivery)) => match self.handle(delivery).await {
          Ok(Some(pause)) => pause,
          Ok(None) => continue,
          Err(end) => return end,
        },
      };
      tokio::select! {
        _ = self.cancel.cancelled() => return SessionEnd::Cancelled,
        _ = tokio::time::sleep(pause) => {}
      }
    }
  }

  /// Process one delivery and settle it. Returns the pause owed before the
  /// next lease, if any.
  async fn handle(&self, delivery: Delivery) -> Result<Option<Duration>, SessionEnd<Q::Error>> {
    let tag = delivery.tag;
    let outcome = tokio::select! {
      _ = self.cancel.cancelled() => None,
      outcome = self.processor.process(&delivery) => Some(outcome),
    };

    let (settled, pause) = match outcome {
      None => {
        self.errors.info("consumer", format!("releasing lead {} on shutdown", delivery.message_id));
        if let Err(err) = self.queue.nack(tag).await {
          self.errors.warn("consumer", format!("release failed, lease will expire instead: {err}"));
        }
        return Err(SessionEnd::Cancelled);
      }
      Some(Ok(())) => (self.queue.ack(tag).await, None),
      Some(Err(err)) if err.is_permanent() => {
        self.errors.add_error_from(err.kind(), "consumer", &err);
        self.errors.warn("consumer", format!("dropping lead {}: it can never succeed", delivery.message_id));
        (self.queue.ack(tag).await, None)
      }
      Some(Err(err)) => {
        self.errors.add_error_from(err.kind(), "consumer", &err);
        (self.queue.nack(tag).await, Some(self.settings.retry_pause))
      }
    };
    settled.map(|()| pause).map_err(SessionEnd::Lost)
  }
}
