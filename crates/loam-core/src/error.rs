//! Error types for `loam-core`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  /// A required field is absent or empty.
  #[error("{entity} {key}: missing required field `{field}`")]
  MissingField {
    entity: &'static str,
    key:    String,
    field:  &'static str,
  },

  /// A field is present but fails a pre-flight check.
  #[error("{entity} {key}: {reason}")]
  Invalid {
    entity: &'static str,
    key:    String,
    reason: String,
  },

  #[error("invalid phone number: {0:?}")]
  InvalidPhone(String),

  #[error("invalid email address: {0:?}")]
  InvalidEmail(String),

  /// A data-access helper returned a non-success envelope.
  #[error("{origin} failed with code {code}: {message}")]
  Persistence {
    origin:  String,
    code:    i32,
    message: String,
  },

  #[error("configuration error: {0}")]
  Config(#[from] config::ConfigError),

  #[error("log setup failed: {0}")]
  Log(String),

  #[error("io error: {0}")]
  Io(#[from] std::io::Error),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

impl Error {
  pub fn invalid(
    entity: &'static str,
    key: impl Into<String>,
    reason: impl Into<String>,
  ) -> Self {
    Self::Invalid { entity, key: key.into(), reason: reason.into() }
  }

  pub fn missing(entity: &'static str, key: impl Into<String>, field: &'static str) -> Self {
    Self::MissingField { entity, key: key.into(), field }
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
