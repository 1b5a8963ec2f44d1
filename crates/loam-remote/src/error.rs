//! Error types for `loam-remote` construction.
//!
//! Calls made through a client report [`RemoteError`] instead; this type only
//! covers building the clients.
//!
//! [`RemoteError`]: loam_core::remote::RemoteError

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("failed to build HTTP client: {0}")]
  Client(#[from] reqwest::Error),

  #[error("invalid {what}: {reason}")]
  Config {
    what:   &'static str,
    reason: String,
  },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
