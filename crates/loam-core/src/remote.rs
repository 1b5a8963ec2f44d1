//! Failure classification for calls to external services.

use std::time::Duration;

use thiserror::Error;

use crate::log::ErrorKind;

#[derive(Debug, Clone, Error)]
pub enum RemoteError {
  /// HTTP 429. `retry_after` is the server's hint, when it sent one.
  #[error("{service} throttled the request")]
  Throttled {
    service:     &'static str,
    retry_after: Option<Duration>,
  },

  #[error("{service} server error {status}: {body}")]
  Server {
    service: &'static str,
    status:  u16,
    body:    String,
  },

  /// 4xx with a body, or GraphQL `userErrors`.
  #[error("{service} rejected the request ({status}): {body}")]
  Validation {
    service: &'static str,
    status:  u16,
    body:    String,
  },

  #[error("{service} not found: {what}")]
  NotFound {
    service: &'static str,
    what:    String,
  },

  #[error("{service} transport error: {message}")]
  Transport {
    service: &'static str,
    message: String,
  },

  #[error("{service} response could not be decoded: {message}")]
  Decode {
    service: &'static str,
    message: String,
  },
}

impl RemoteError {
  /// Retrying later may succeed.
  pub fn is_transient(&self) -> bool {
    matches!(self, Self::Throttled { .. } | Self::Server { .. } | Self::Transport { .. })
  }

  pub fn kind(&self) -> ErrorKind {
    if self.is_transient() {
      ErrorKind::TransientRemote
    } else {
      ErrorKind::RemoteValidation
    }
  }

  pub fn validation(service: &'static str, body: impl Into<String>) -> Self {
    Self::Validation { service, status: 422, body: body.into() }
  }
}

pub type Result<T, E = RemoteError> = std::result::Result<T, E>;
