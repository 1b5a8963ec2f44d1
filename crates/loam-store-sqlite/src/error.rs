//! Error types for `loam-store-sqlite`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  /// A statement failed; `code` is the driver's extended result code.
  #[error("{origin} failed with code {code}: {message}")]
  Persistence {
    origin:  String,
    code:    i32,
    message: String,
  },

  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("queue {0:?} has not been declared")]
  UnknownQueue(String),

  #[error(transparent)]
  Core(#[from] loam_core::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl From<Error> for loam_core::Error {
  fn from(err: Error) -> Self {
    match err {
      Error::Core(inner) => inner,
      Error::Persistence { origin, code, message } => {
        loam_core::Error::Persistence { origin, code, message }
      }
      other => loam_core::Error::Persistence {
        origin:  "store".into(),
        code:    loam_core::envelope::INTERNAL,
        message: other.to_string(),
      },
    }
  }
}
