//! Notification and document collaborators.
//!
//! These sit behind object-safe traits so binaries can hold them as
//! `Arc<dyn ..>` and tests can substitute recorders.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Serialize;

use crate::remote;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmailMessage {
  pub to:        String,
  pub to_name:   Option<String>,
  pub subject:   String,
  pub html:      String,
  /// Reply-to override, e.g. the staff inbox on customer confirmations.
  pub reply_to:  Option<String>,
}

#[async_trait]
pub trait SmsSender: Send + Sync {
  /// Send one message; returns the provider's message id.
  async fn send_sms(&self, to: &str, body: &str) -> remote::Result<String>;
}

#[async_trait]
pub trait Mailer: Send + Sync {
  /// Send one message; returns the provider's message id.
  async fn send_email(&self, message: &EmailMessage) -> remote::Result<String>;
}

#[async_trait]
pub trait DocumentPrinter: Send + Sync {
  /// Queue a rendered document for printing; returns the spooled file.
  async fn print(&self, name: &str, document: &str) -> crate::Result<PathBuf>;
}

#[async_trait]
pub trait SpreadsheetSink: Send + Sync {
  async fn append_row(&self, row: &serde_json::Value) -> remote::Result<()>;
}

#[async_trait]
pub trait CaptchaVerifier: Send + Sync {
  async fn verify(&self, token: &str, remote_ip: Option<&str>) -> remote::Result<bool>;
}

#[async_trait]
pub trait MediaStorage: Send + Sync {
  /// Upload a local file under `name`; returns its public URL.
  async fn upload(&self, local: &Path, name: &str) -> remote::Result<String>;

  async fn delete(&self, name: &str) -> remote::Result<()>;
}

/// Fill `{{key}}` placeholders in a template. Unknown placeholders are left
/// as they are.
pub fn render(template: &str, values: &[(&str, &str)]) -> String {
  values.iter().fold(template.to_string(), |acc, (key, value)| {
    acc.replace(&format!("{{{{{key}}}}}"), value)
  })
}
