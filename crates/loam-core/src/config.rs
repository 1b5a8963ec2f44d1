//! Process configuration, read once at start-up from a JSON file.
//!
//! Every binary builds one [`Config`] and threads it (or the pieces it needs)
//! explicitly into the components it constructs. Values can be overridden with
//! `LOAM__<SECTION>__<KEY>` environment variables.

use std::{fmt, path::{Path, PathBuf}};

use serde::Deserialize;

use crate::Result;

// ─── Secret ──────────────────────────────────────────────────────────────────

/// A credential that must never reach a log line.
#[derive(Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
  pub fn new(value: impl Into<String>) -> Self { Self(value.into()) }

  pub fn expose(&self) -> &str { &self.0 }

  pub fn is_empty(&self) -> bool { self.0.is_empty() }
}

impl fmt::Debug for Secret {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str("Secret(***)") }
}

impl fmt::Display for Secret {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str("***") }
}

// ─── Sections ────────────────────────────────────────────────────────────────

/// Location of a SQL store.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
  pub path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorefrontConfig {
  /// Store domain or hash, e.g. `my-shop.example-commerce.com`.
  pub shop:                String,
  #[serde(default = "default_api_version")]
  pub api_version:         String,
  pub access_token:        Secret,
  /// Shared secret used to sign inbound storefront webhooks.
  #[serde(default)]
  pub webhook_secret:      Secret,
  /// Public URL that storefront webhooks are delivered to.
  #[serde(default)]
  pub webhook_destination: String,
  #[serde(default = "default_webhook_topics")]
  pub webhook_topics:      Vec<String>,
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs:        u64,
  /// Timeout for bulk customer operations.
  #[serde(default = "default_bulk_timeout_secs")]
  pub bulk_timeout_secs:   u64,
  /// Override for the API base URL (tests, proxies).
  #[serde(default)]
  pub base_url:            Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SmsConfig {
  pub account_sid:   String,
  pub auth_token:    Secret,
  pub from_number:   String,
  #[serde(default)]
  pub staff_numbers: Vec<String>,
  #[serde(default = "default_sms_base_url")]
  pub base_url:      String,
  /// Token expected on inbound SMS webhooks.
  #[serde(default)]
  pub inbound_token: Secret,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmailConfig {
  pub api_url:       String,
  pub api_key:       Secret,
  pub from_address:  String,
  pub from_name:     String,
  pub staff_address: String,
}

/// WebDAV server that hosts product images for the storefront to ingest.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
  pub webdav_url: String,
  pub username:   String,
  pub password:   Secret,
  /// Public URL prefix under which uploaded files are reachable.
  pub public_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
  pub path:       PathBuf,
  #[serde(default = "default_queue_name")]
  pub name:       String,
  /// Seconds a received message stays invisible before redelivery.
  #[serde(default = "default_lease_secs")]
  pub lease_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IntakeConfig {
  #[serde(default = "default_host")]
  pub host:                  String,
  #[serde(default = "default_port")]
  pub port:                  u16,
  #[serde(default)]
  pub captcha_secret:        Secret,
  #[serde(default = "default_captcha_url")]
  pub captcha_url:           String,
  /// Key for HMAC-signed admin lead-form timestamps.
  #[serde(default)]
  pub admin_hmac_key:        Secret,
  #[serde(default = "default_rate_limit")]
  pub rate_limit_per_minute: u32,
  /// Welcome coupon handed out to new newsletter subscribers.
  #[serde(default)]
  pub newsletter_coupon:     String,
}

impl Default for IntakeConfig {
  fn default() -> Self {
    Self {
      host:                  default_host(),
      port:                  default_port(),
      captcha_secret:        Secret::default(),
      captcha_url:           default_captcha_url(),
      admin_hmac_key:        Secret::default(),
      rate_limit_per_minute: default_rate_limit(),
      newsletter_coupon:     String::new(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
  #[serde(default = "default_interval_secs")]
  pub interval_secs: u64,
  /// Worker-pool size for outbound fan-out.
  #[serde(default = "default_concurrency")]
  pub concurrency:   usize,
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self { interval_secs: default_interval_secs(), concurrency: default_concurrency() }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Features {
  /// Outbound SMS and email are logged instead of sent.
  #[serde(default)]
  pub test_mode:       bool,
  #[serde(default)]
  pub verbose_logging: bool,
  #[serde(default = "default_true")]
  pub bogo_promotions: bool,
}

impl Default for Features {
  fn default() -> Self {
    Self { test_mode: false, verbose_logging: false, bogo_promotions: true }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PathsConfig {
  pub logs:        PathBuf,
  pub photos:      PathBuf,
  pub brand_logos: PathBuf,
  pub leads_csv:   PathBuf,
  pub print_spool: PathBuf,
  pub templates:   PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CompanyConfig {
  pub name:    String,
  #[serde(default)]
  pub phone:   String,
  #[serde(default)]
  pub email:   String,
  #[serde(default)]
  pub address: String,
  #[serde(default)]
  pub website: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SheetsConfig {
  /// Endpoint that appends a JSON row to the leads spreadsheet.
  #[serde(default)]
  pub endpoint: Option<String>,
}

// ─── Root ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub pos:        DatabaseConfig,
  pub middleware: DatabaseConfig,
  pub storefront: StorefrontConfig,
  pub sms:        SmsConfig,
  pub email:      EmailConfig,
  pub storage:    StorageConfig,
  pub queue:      QueueConfig,
  pub paths:      PathsConfig,
  pub company:    CompanyConfig,
  #[serde(default)]
  pub intake:     IntakeConfig,
  #[serde(default)]
  pub sync:       SyncConfig,
  #[serde(default)]
  pub features:   Features,
  #[serde(default)]
  pub sheets:     SheetsConfig,
}

impl Config {
  /// Read the JSON file at `path`, layered with `LOAM__*` environment
  /// overrides.
  pub fn load(path: impl AsRef<Path>) -> Result<Self> {
    let settings = config::Config::builder()
      .add_source(
        config::File::from(path.as_ref()).format(config::FileFormat::Json),
      )
      .add_source(config::Environment::with_prefix("LOAM").separator("__"))
      .build()?;
    Ok(settings.try_deserialize()?)
  }

  /// Parse configuration from a JSON string; used by tests and tooling.
  pub fn from_json(raw: &str) -> Result<Self> {
    let settings = config::Config::builder()
      .add_source(config::File::from_str(raw, config::FileFormat::Json))
      .build()?;
    Ok(settings.try_deserialize()?)
  }
}

// ─── Defaults ────────────────────────────────────────────────────────────────

fn default_api_version() -> String { "2024-10".to_string() }

fn default_webhook_topics() -> Vec<String> {
  [
    "orders/create",
    "customers/update",
    "customers/delete",
    "products/delete",
    "draft_orders/delete",
  ]
  .into_iter()
  .map(str::to_string)
  .collect()
}

fn default_timeout_secs() -> u64 { 30 }

fn default_bulk_timeout_secs() -> u64 { 120 }

fn default_sms_base_url() -> String { "https://api.twilio.com".to_string() }

fn default_queue_name() -> String { "design_lead_form".to_string() }

fn default_lease_secs() -> u64 { 300 }

fn default_host() -> String { "0.0.0.0".to_string() }

fn default_port() -> u16 { 8080 }

fn default_captcha_url() -> String {
  "https://www.google.com/recaptcha/api/siteverify".to_string()
}

fn default_rate_limit() -> u32 { 20 }

fn default_interval_secs() -> u64 { 300 }

fn default_concurrency() -> usize { 4 }

fn default_true() -> bool { true }
