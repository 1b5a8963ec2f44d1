//! Everything a sync cycle reads from and writes to.

use std::{path::PathBuf, sync::Arc};

use chrono::{DateTime, Utc};
use loam_core::{
  config::Config,
  log::ErrorHandler,
  notify::{Mailer, MediaStorage, SmsSender},
};
use loam_store_sqlite::{MiddlewareDb, PosDb};

use crate::{Error, Kind, Result};

/// The slice of configuration the cycles need.
#[derive(Debug, Clone)]
pub struct Settings {
  pub photos:              PathBuf,
  pub brand_logos:         PathBuf,
  pub webhook_topics:      Vec<String>,
  pub webhook_destination: String,
  pub bogo_promotions:     bool,
  pub company_name:        String,
}

impl Settings {
  pub fn from_config(cfg: &Config) -> Self {
    Self {
      photos:              cfg.paths.photos.clone(),
      brand_logos:         cfg.paths.brand_logos.clone(),
      webhook_topics:      cfg.storefront.webhook_topics.clone(),
      webhook_destination: cfg.storefront.webhook_destination.clone(),
      bogo_promotions:     cfg.features.bogo_promotions,
      company_name:        cfg.company.name.clone(),
    }
  }
}

pub struct SyncContext<S> {
  pub pos:        PosDb,
  pub middleware: MiddlewareDb,
  pub storefront: S,
  pub storage:    Arc<dyn MediaStorage>,
  pub mailer:     Arc<dyn Mailer>,
  pub sms:        Arc<dyn SmsSender>,
  /// The outbound-sync error bag.
  pub errors:     Arc<ErrorHandler>,
  pub settings:   Settings,
}

impl<S> SyncContext<S> {
  /// The kind's cursor; the epoch when it has never run.
  pub async fn cursor(&self, kind: Kind) -> Result<DateTime<Utc>> {
    Ok(self.middleware.cursor(kind.name()).await?.unwrap_or(DateTime::UNIX_EPOCH))
  }

  pub async fn retry_keys(&self, kind: Kind) -> Result<Vec<String>> {
    Ok(self.middleware.retry_keys(kind.name()).await?)
  }

  /// Log a per-entity failure for a kind that re-derives its whole state
  /// every cycle.
  pub fn report(&self, kind: Kind, key: &str, err: &Error) {
    self.errors.add_error_from(err.kind(), &format!("{}/{key}", kind.name()), err);
  }

  /// Log a per-entity failure and keep the entity for the next cycle.
  pub async fn failed(&self, kind: Kind, key: &str, err: &Error) {
    self.report(kind, key, err);
    let origin = format!("{}/{key}", kind.name());
    let reason = err.to_string();
    let envelope = self.middleware.record_retry(kind.name(), key, &reason).await;
    if !envelope.is_ok() {
      self.errors.warn(&origin, format!("retry not recorded: {}", envelope.message));
    }
  }

  pub async fn succeeded(&self, kind: Kind, key: &str) {
    let envelope = self.middleware.clear_retry(kind.name(), key).await;
    if !envelope.is_ok() {
      self.errors.warn(kind.name(), format!("retry for {key} not cleared: {}", envelope.message));
    }
  }
}
