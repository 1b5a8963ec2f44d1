//! Bounded fan-out for outbound work.
//!
//! The dispatcher knows nothing about entities: it runs futures that resolve
//! to a success flag, at most `concurrency` at a time, and reports which
//! identifiers succeeded. Callers must not hand it two tasks that mutate the
//! same entity.

use std::{future::Future, sync::Arc};

use tokio::{sync::Semaphore, task::JoinSet};
use tokio_util::sync::CancellationToken;

/// What one dispatch achieved.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Outcome {
  pub succeeded:   Vec<String>,
  pub failed:      Vec<String>,
  /// Tasks never started because the dispatcher was cancelled.
  pub not_started: Vec<String>,
}

impl Outcome {
  pub fn total(&self) -> usize { self.succeeded.len() + self.failed.len() + self.not_started.len() }

  pub fn merge(&mut self, other: Outcome) {
    self.succeeded.extend(other.succeeded);
    self.failed.extend(other.failed);
    self.not_started.extend(other.not_started);
  }
}

#[derive(Debug, Clone)]
pub struct Dispatcher {
  permits: Arc<Semaphore>,
  cancel:  CancellationToken,
}

impl Dispatcher {
  pub fn new(concurrency: usize, cancel: CancellationToken) -> Self {
    Self { permits: Arc::new(Semaphore::new(concurrency.max(1))), cancel }
  }

  pub fn is_cancelled(&self) -> bool { self.cancel.is_cancelled() }

  pub fn cancel_token(&self) -> &CancellationToken { &self.cancel }

  /// Run every task and wait for all admitted ones to finish. After a cancel,
  /// no new task is admitted but in-flight tasks run to completion.
  pub async fn run<F>(&self, tasks: impl IntoIterator<Item = (String, F)>) -> Outcome
  where
    F: Future<Output = bool> + Send + 'static,
  {
    let mut outcome = Outcome::default();
    let mut running = JoinSet::new();
    let mut pending = tasks.into_iter();

    while let Some((id, task)) = pending.next() {
      let permit = tokio::select! {
        biased;
        _ = self.cancel.cancelled() => None,
        permit = self.permits.clone().acquire_owned() => permit.ok(),
      };
      let Some(permit) = permit else {
        outcome.not_started.push(id);
        outcome.not_started.extend(pending.by_ref().map(|(id, _)| id));
        break;
      };
      running.spawn(async move {
        let ok = task.await;
        drop(permit);
        (id, ok)
      });
    }

    while let Some(joined) = running.join_next().await {
      match joined {
        Ok((id, true)) => outcome.succeeded.push(id),
        Ok((id, false)) => outcome.failed.push(id),
        Err(err) => {
          tracing::error!(error = %err, "dispatched task panicked");
          outcome.failed.push(String::from("<panicked>"));
        }
      }
    }
    outcome
  }
}
