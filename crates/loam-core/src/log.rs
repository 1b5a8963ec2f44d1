//! Per-subsystem logging and error accumulation.
//!
//! Each pipeline (scheduled maintenance, inbound webhooks, outbound sync, SMS
//! traffic, SMS events, lead forms, and a global fallback) writes to its own
//! daily-rolling file under the log root. Routing is by tracing `target`:
//! events emitted through an [`ErrorHandler`] carry the subsystem name as
//! their target, and events from a crate mapped to a subsystem land in that
//! subsystem's file as well.
//!
//! An [`ErrorHandler`] logs every error immediately *and* keeps it in a bag;
//! the owner dumps the bag at the end of a cycle.

use std::{
  error::Error as StdError,
  fs,
  path::Path,
  sync::{Arc, Mutex},
};

use chrono::{DateTime, Utc};
use serde::Serialize;
use strum::{EnumIter, IntoEnumIterator as _, IntoStaticStr};
use tracing::level_filters::LevelFilter;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
  EnvFilter, Layer, filter::filter_fn, fmt, layer::SubscriberExt as _, registry::Registry,
  util::SubscriberInitExt as _,
};

use crate::{Error, Result};

// ─── Subsystems ──────────────────────────────────────────────────────────────

#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, EnumIter, IntoStaticStr,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Subsystem {
  Maintenance,
  Webhook,
  Sync,
  Sms,
  SmsEvents,
  Leads,
  Global,
}

impl Subsystem {
  /// The tracing target and log-file stem for this subsystem.
  pub fn target(self) -> &'static str { self.into() }

  /// Crate whose un-targeted events also belong to this subsystem.
  fn crate_prefix(self) -> Option<&'static str> {
    match self {
      Self::Sync => Some("loam_sync"),
      Self::Webhook => Some("loam_intake"),
      Self::Leads => Some("loam_consumer"),
      _ => None,
    }
  }

  fn claims(self, target: &str) -> bool {
    target == self.target()
      || self.crate_prefix().is_some_and(|prefix| target.starts_with(prefix))
  }

  /// `Global` receives whatever no other subsystem claims.
  fn routes(self, target: &str) -> bool {
    match self {
      Self::Global => Subsystem::iter()
        .filter(|s| *s != Self::Global)
        .all(|s| !s.claims(target)),
      other => other.claims(target),
    }
  }
}

/// Emit a tracing event at `$level` with the subsystem's literal target.
macro_rules! emit {
  ($subsystem:expr, $level:ident, $($arg:tt)+) => {
    match $subsystem {
      Subsystem::Maintenance => tracing::$level!(target: "maintenance", $($arg)+),
      Subsystem::Webhook => tracing::$level!(target: "webhook", $($arg)+),
      Subsystem::Sync => tracing::$level!(target: "sync", $($arg)+),
      Subsystem::Sms => tracing::$level!(target: "sms", $($arg)+),
      Subsystem::SmsEvents => tracing::$level!(target: "sms_events", $($arg)+),
      Subsystem::Leads => tracing::$level!(target: "leads", $($arg)+),
      Subsystem::Global => tracing::$level!(target: "global", $($arg)+),
    }
  };
}

// ─── Initialisation ──────────────────────────────────────────────────────────

/// Install the global subscriber: a console layer filtered by `RUST_LOG`
/// (default `info`, `debug` when verbose) plus one daily-rolling file per
/// subsystem under `log_root`.
pub fn init(log_root: &Path, verbose: bool) -> Result<()> {
  let default_level = if verbose { LevelFilter::DEBUG } else { LevelFilter::INFO };
  fs::create_dir_all(log_root)?;

  let mut file_layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();
  for subsystem in Subsystem::iter() {
    let appender = RollingFileAppender::new(
      Rotation::DAILY,
      log_root,
      format!("{}.log", subsystem.target()),
    );
    let layer = fmt::layer()
      .with_ansi(false)
      .with_target(true)
      .with_writer(Mutex::new(appender))
      .with_filter(filter_fn(move |meta| {
        default_level >= *meta.level() && subsystem.routes(meta.target())
      }))
      .boxed();
    file_layers.push(layer);
  }

  let console_filter = EnvFilter::builder()
    .with_default_directive(default_level.into())
    .from_env_lossy();

  tracing_subscriber::registry()
    .with(file_layers)
    .with(fmt::layer().with_filter(console_filter))
    .try_init()
    .map_err(|e| Error::Log(e.to_string()))
}

/// Console-only subscriber for tests and tooling; ignores repeat calls.
pub fn init_console() {
  let _ = tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::from_default_env())
    .with_test_writer()
    .try_init();
}

// ─── Error records ───────────────────────────────────────────────────────────

/// Error taxonomy shared by all pipelines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
  /// 429, 5xx, network; retried next cycle.
  TransientRemote,
  /// 4xx with a body; logged with the payload and skipped.
  RemoteValidation,
  /// Required fields missing, malformed ids, out-of-range values.
  LocalValidation,
  /// A data-access envelope with a failure code.
  LocalPersistence,
  /// Configuration or start-up failure.
  Fatal,
  /// Anything else worth a line in the bag.
  General,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorRecord {
  pub message:   String,
  pub origin:    String,
  pub timestamp: DateTime<Utc>,
  pub kind:      ErrorKind,
  pub traceback: Option<String>,
}

/// Render an error and its `source()` chain, one cause per line.
pub fn source_chain(err: &(dyn StdError + 'static)) -> String {
  let mut lines = vec![err.to_string()];
  let mut current = err.source();
  while let Some(cause) = current {
    lines.push(format!("caused by: {cause}"));
    current = cause.source();
  }
  lines.join("\n")
}

// ─── ErrorHandler ────────────────────────────────────────────────────────────

/// Accumulating error bag bound to one subsystem log.
#[derive(Debug)]
pub struct ErrorHandler {
  subsystem: Subsystem,
  records:   parking_lot::Mutex<Vec<ErrorRecord>>,
}

impl ErrorHandler {
  pub fn new(subsystem: Subsystem) -> Self {
    Self { subsystem, records: parking_lot::Mutex::new(Vec::new()) }
  }

  pub fn subsystem(&self) -> Subsystem { self.subsystem }

  /// Log an error now and keep it for the end-of-cycle dump.
  pub fn add_error(&self, kind: ErrorKind, origin: &str, message: impl Into<String>) {
    self.push(kind, origin, message.into(), None);
  }

  /// Like [`add_error`](Self::add_error), with the error's cause chain as the
  /// traceback.
  pub fn add_error_from(
    &self,
    kind: ErrorKind,
    origin: &str,
    err: &(dyn StdError + 'static),
  ) {
    self.push(kind, origin, err.to_string(), Some(source_chain(err)));
  }

  fn push(&self, kind: ErrorKind, origin: &str, message: String, traceback: Option<String>) {
    let kind_name: &'static str = kind.into();
    emit!(self.subsystem, error, origin, kind = kind_name, "{message}");
    if let Some(trace) = traceback.as_deref().filter(|t| t.contains('\n')) {
      emit!(self.subsystem, debug, origin, "traceback:\n{trace}");
    }
    self.records.lock().push(ErrorRecord {
      message,
      origin: origin.to_string(),
      timestamp: Utc::now(),
      kind,
      traceback,
    });
  }

  pub fn warn(&self, origin: &str, message: impl AsRef<str>) {
    emit!(self.subsystem, warn, origin, "{}", message.as_ref());
  }

  pub fn info(&self, origin: &str, message: impl AsRef<str>) {
    emit!(self.subsystem, info, origin, "{}", message.as_ref());
  }

  pub fn debug(&self, origin: &str, message: impl AsRef<str>) {
    emit!(self.subsystem, debug, origin, "{}", message.as_ref());
  }

  pub fn len(&self) -> usize { self.records.lock().len() }

  pub fn is_empty(&self) -> bool { self.records.lock().is_empty() }

  /// Snapshot of the bag without clearing it.
  pub fn records(&self) -> Vec<ErrorRecord> { self.records.lock().clone() }

  /// Write a summary of the bag to the subsystem log, clear it, and return
  /// what was in it.
  pub fn dump(&self) -> Vec<ErrorRecord> {
    let drained: Vec<ErrorRecord> = std::mem::take(&mut *self.records.lock());
    if drained.is_empty() {
      return drained;
    }
    emit!(self.subsystem, warn, count = drained.len(), "error summary");
    for record in &drained {
      let kind_name: &'static str = record.kind.into();
      emit!(
        self.subsystem,
        warn,
        origin = %record.origin,
        kind = kind_name,
        at = %record.timestamp.to_rfc3339(),
        "  {}",
        record.message
      );
    }
    drained
  }
}

/// One handler per subsystem, constructed once per process.
#[derive(Debug, Clone)]
pub struct Handlers {
  pub maintenance: Arc<ErrorHandler>,
  pub webhook:     Arc<ErrorHandler>,
  pub sync:        Arc<ErrorHandler>,
  pub sms:         Arc<ErrorHandler>,
  pub sms_events:  Arc<ErrorHandler>,
  pub leads:       Arc<ErrorHandler>,
  pub global:      Arc<ErrorHandler>,
}

impl Handlers {
  pub fn new() -> Self {
    Self {
      maintenance: Arc::new(ErrorHandler::new(Subsystem::Maintenance)),
      webhook:     Arc::new(ErrorHandler::new(Subsystem::Webhook)),
      sync:        Arc::new(ErrorHandler::new(Subsystem::Sync)),
      sms:         Arc::new(ErrorHandler::new(Subsystem::Sms)),
      sms_events:  Arc::new(ErrorHandler::new(Subsystem::SmsEvents)),
      leads:       Arc::new(ErrorHandler::new(Subsystem::Leads)),
      global:      Arc::new(ErrorHandler::new(Subsystem::Global)),
    }
  }
}

impl Default for Handlers {
  fn default() -> Self { Self::new() }
}
