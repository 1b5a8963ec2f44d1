//! Error types for `loam-sync`.

use loam_core::{log::ErrorKind, remote::RemoteError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error(transparent)]
  Core(#[from] loam_core::Error),

  #[error(transparent)]
  Store(#[from] loam_store_sqlite::Error),

  #[error(transparent)]
  Remote(#[from] RemoteError),

  #[error("{origin}: {source}")]
  Media {
    origin: String,
    source: std::io::Error,
  },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
  /// Where this failure sits in the shared error taxonomy.
  pub fn kind(&self) -> ErrorKind {
    match self {
      Self::Remote(err) => err.kind(),
      Self::Store(_) | Self::Core(loam_core::Error::Persistence { .. }) => {
        ErrorKind::LocalPersistence
      }
      Self::Core(
        loam_core::Error::MissingField { .. }
        | loam_core::Error::Invalid { .. }
        | loam_core::Error::InvalidPhone(_)
        | loam_core::Error::InvalidEmail(_),
      ) => ErrorKind::LocalValidation,
      Self::Core(_) | Self::Media { .. } => ErrorKind::General,
    }
  }
}

/// Fold a data-access envelope into this crate's error.
pub(crate) fn persisted(envelope: loam_core::envelope::Envelope, origin: &str) -> Result<u64> {
  Ok(envelope.into_result(origin)?)
}

/// A delete of something the storefront no longer has already succeeded.
pub(crate) fn tolerate_missing(result: loam_core::remote::Result<()>) -> loam_core::remote::Result<()> {
  match result {
    Err(RemoteError::NotFound { .. }) => Ok(()),
    other => other,
  }
}
