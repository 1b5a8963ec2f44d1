//! The outbound sync engine.
//!
//! Each entity kind runs a three-phase cycle against its own cursor: delete
//! detection (mapped in the middleware but gone from the POS), change
//! detection (POS rows maintained after the cursor, plus keys that failed
//! last time), and push. Per-entity work fans out through the
//! [`Dispatcher`]; one entity's failure never aborts its batch.

pub mod collections;
pub mod context;
pub mod customers;
pub mod dispatcher;
pub mod error;
pub mod gift_cards;
pub mod metafields;
pub mod orders;
pub mod products;
pub mod promotions;
pub mod stock;
pub mod webhooks;

use std::{sync::Arc, time::Duration};

use chrono::Utc;
use loam_core::storefront::Storefront;
use strum::{Display, EnumIter, EnumString, IntoEnumIterator as _, IntoStaticStr};

pub use context::{Settings, SyncContext};
pub use dispatcher::{Dispatcher, Outcome};
pub use error::{Error, Result};

/// Entity kinds in the order a cycle visits them: definitions and
/// subscriptions first, collections before the products placed in them,
/// products before the promotions that reference their variants, customers
/// before the orders that reference them.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, EnumString, IntoStaticStr,
)]
#[strum(serialize_all = "snake_case")]
pub enum Kind {
  Metafields,
  Webhooks,
  Collections,
  Products,
  Promotions,
  Customers,
  GiftCards,
  Orders,
}

impl Kind {
  /// Cursor and retry key of the kind.
  pub fn name(self) -> &'static str { self.into() }
}

/// Per-kind results of one cycle.
#[derive(Debug, Default)]
pub struct CycleReport {
  pub outcomes: Vec<(Kind, Outcome)>,
  /// Kinds that could not run at all this cycle.
  pub aborted:  Vec<Kind>,
  pub errors:   usize,
}

impl CycleReport {
  pub fn outcome(&self, kind: Kind) -> Option<&Outcome> {
    self.outcomes.iter().find(|(k, _)| *k == kind).map(|(_, o)| o)
  }
}

pub struct Engine<S> {
  ctx:        Arc<SyncContext<S>>,
  dispatcher: Dispatcher,
}

impl<S: Storefront + 'static> Engine<S> {
  pub fn new(ctx: SyncContext<S>, dispatcher: Dispatcher) -> Self {
    Self { ctx: Arc::new(ctx), dispatcher }
  }

  pub fn context(&self) -> &Arc<SyncContext<S>> { &self.ctx }

  /// Run every kind (or only `only`) once.
  ///
  /// A kind's cursor moves to the time its change detection started, and
  /// only when the kind ran to the end; entities that failed inside it are
  /// carried by the retry table instead.
  pub async fn run_cycle(&self, only: Option<Kind>) -> CycleReport {
    let mut report = CycleReport::default();
    for kind in Kind::iter().filter(|k| only.is_none_or(|o| o == *k)) {
      if self.dispatcher.is_cancelled() {
        break;
      }
      let started = Utc::now();
      match self.run_kind(kind).await {
        Ok(outcome) => {
          tracing::info!(
            kind = kind.name(),
            ok = outcome.succeeded.len(),
            failed = outcome.failed.len(),
            "sync finished"
          );
          if outcome.not_started.is_empty() {
            let envelope = self.ctx.middleware.set_cursor(kind.name(), started).await;
            if !envelope.is_ok() {
              self.ctx.errors.warn(kind.name(), format!("cursor not saved: {}", envelope.message));
            }
          }
          report.outcomes.push((kind, outcome));
        }
        Err(err) => {
          self.ctx.errors.add_error_from(err.kind(), kind.name(), &err);
          report.aborted.push(kind);
        }
      }
    }
    report.errors = self.ctx.errors.dump().len();
    report
  }

  async fn run_kind(&self, kind: Kind) -> Result<Outcome> {
    let ctx = &self.ctx;
    let cursor = ctx.cursor(kind).await?;
    match kind {
      Kind::Metafields => metafields::ensure_definitions(ctx).await,
      Kind::Webhooks => webhooks::reconcile(ctx).await,
      Kind::Collections => collections::sync(ctx, cursor).await,
      Kind::Products => products::sync(ctx, &self.dispatcher, cursor).await,
      Kind::Promotions => promotions::sync(ctx, cursor).await,
      Kind::Customers => customers::sync(ctx, &self.dispatcher, cursor).await,
      Kind::GiftCards => gift_cards::sync(ctx, &self.dispatcher).await,
      Kind::Orders => orders::sync(ctx).await,
    }
  }

  /// Run a cycle every `interval` until cancelled. A cycle in progress is
  /// allowed to finish its in-flight calls.
  pub async fn run(&self, interval: Duration, only: Option<Kind>) {
    let cancel = self.dispatcher.cancel_token().clone();
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
      tokio::select! {
        _ = cancel.cancelled() => {
          tracing::info!("sync stopping");
          break;
        }
        _ = ticker.tick() => {
          let report = self.run_cycle(only).await;
          if !report.aborted.is_empty() {
            tracing::warn!(aborted = ?report.aborted, "cycle finished with aborted kinds");
          }
        }
      }
    }
  }
}

#[cfg(test)]
mod tests;
