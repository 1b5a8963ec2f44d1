//! Error types for `loam-consumer`.

use loam_core::{log::ErrorKind, queue::FieldError, remote::RemoteError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  /// The message body is not a lead form.
  #[error("undecodable lead: {0}")]
  Decode(#[from] serde_json::Error),

  #[error("invalid lead: {0}")]
  Invalid(#[from] FieldError),

  #[error(transparent)]
  Core(#[from] loam_core::Error),

  #[error(transparent)]
  Store(#[from] loam_store_sqlite::Error),

  #[error(transparent)]
  Remote(#[from] RemoteError),

  #[error("lead log {path}: {source}")]
  Csv {
    path:   String,
    source: std::io::Error,
  },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
  pub fn kind(&self) -> ErrorKind {
    match self {
      Self::Remote(err) => err.kind(),
      Self::Store(_) | Self::Core(loam_core::Error::Persistence { .. }) => {
        ErrorKind::LocalPersistence
      }
      Self::Decode(_) | Self::Invalid(_) => ErrorKind::LocalValidation,
      Self::Core(_) | Self::Csv { .. } => ErrorKind::General,
    }
  }

  /// Redelivering the message cannot change the outcome.
  pub fn is_permanent(&self) -> bool { matches!(self, Self::Decode(_) | Self::Invalid(_)) }
}

pub(crate) fn persisted(envelope: loam_core::envelope::Envelope, origin: &str) -> Result<u64> {
  Ok(envelope.into_result(origin)?)
}
