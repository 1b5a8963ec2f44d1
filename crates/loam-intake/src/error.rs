//! Intake error type and [`axum::response::IntoResponse`] implementation.
//!
//! Only customer-facing messages reach the response body. Store, queue and
//! provider failures are logged here and answered with a generic line.

use axum::{
  Json,
  http::StatusCode,
  response::{IntoResponse, Response},
};
use loam_core::{log::ErrorKind, queue::FieldError, remote::RemoteError};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("unauthorized")]
  Unauthorized,

  #[error("captcha verification failed")]
  Captcha,

  /// A form field failed validation.
  #[error("invalid field {0}")]
  Field(#[from] FieldError),

  /// A request the customer can correct; the message is shown to them.
  #[error("{0}")]
  Rejected(String),

  #[error("malformed payload: {0}")]
  Payload(String),

  #[error("too many requests")]
  TooManyRequests,

  #[error("store error: {0}")]
  Store(#[from] loam_store_sqlite::Error),

  #[error(transparent)]
  Core(#[from] loam_core::Error),

  #[error("queue error: {0}")]
  Queue(#[source] Box<dyn std::error::Error + Send + Sync>),

  #[error(transparent)]
  Remote(#[from] RemoteError),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
  pub fn rejected(message: impl Into<String>) -> Self { Self::Rejected(message.into()) }

  pub fn queue(err: impl std::error::Error + Send + Sync + 'static) -> Self {
    Self::Queue(Box::new(err))
  }

  /// Where this failure sits in the shared error taxonomy.
  pub fn kind(&self) -> ErrorKind {
    match self {
      Error::Store(_) | Error::Core(loam_core::Error::Persistence { .. }) => ErrorKind::LocalPersistence,
      Error::Remote(e) => e.kind(),
      Error::Queue(_) => ErrorKind::TransientRemote,
      Error::Field(_) | Error::Payload(_) | Error::Core(_) => ErrorKind::LocalValidation,
      _ => ErrorKind::General,
    }
  }
}

impl IntoResponse for Error {
  fn into_response(self) -> Response {
    let (status, message) = match &self {
      Error::Unauthorized => (StatusCode::UNAUTHORIZED, "Unauthorized.".to_string()),
      Error::Captcha => {
        (StatusCode::BAD_REQUEST, "Captcha verification failed. Please try again.".to_string())
      }
      Error::Field(e) => {
        let body = json!({ "error": format!("Please check the {} field.", e.field), "field": e.field });
        return (StatusCode::BAD_REQUEST, Json(body)).into_response();
      }
      Error::Rejected(m) => (StatusCode::BAD_REQUEST, m.clone()),
      Error::Payload(_) => (StatusCode::UNPROCESSABLE_ENTITY, "Malformed request.".to_string()),
      Error::TooManyRequests => {
        (StatusCode::TOO_MANY_REQUESTS, "Too many requests, try again later.".to_string())
      }
      Error::Core(loam_core::Error::MissingField { .. } | loam_core::Error::Invalid { .. }) => {
        (StatusCode::UNPROCESSABLE_ENTITY, "Malformed request.".to_string())
      }
      Error::Remote(_) | Error::Queue(_) => {
        tracing::error!(error = %self, "upstream failure");
        (StatusCode::SERVICE_UNAVAILABLE, "Please try again later.".to_string())
      }
      Error::Store(_) | Error::Core(_) => {
        tracing::error!(error = %self, "internal failure");
        (StatusCode::INTERNAL_SERVER_ERROR, "Something went wrong.".to_string())
      }
    };
    (status, Json(json!({ "error": message }))).into_response()
  }
}
