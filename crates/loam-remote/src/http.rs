//! Send-and-classify shared by every client.

use std::time::Duration;

use loam_core::remote::{RemoteError, Result};
use reqwest::{RequestBuilder, Response, StatusCode, header::HeaderMap};
use serde::de::DeserializeOwned;

use crate::RateLimiter;

/// Milliseconds until the throttle window resets, sent by the storefront.
pub const RESET_MS_HEADER: &str = "x-rate-limit-time-reset-ms";

/// Pause used when a 429 carries no hint.
const DEFAULT_THROTTLE: Duration = Duration::from_secs(1);

/// Longest pause a server hint can impose.
const MAX_THROTTLE: Duration = Duration::from_secs(600);

/// Longest body excerpt kept in an error.
const BODY_EXCERPT: usize = 2000;

pub fn retry_after(headers: &HeaderMap) -> Option<Duration> {
  let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok()).map(str::trim);
  if let Some(ms) = header(RESET_MS_HEADER).and_then(|v| v.parse::<u64>().ok()) {
    return Some(Duration::from_millis(ms).min(MAX_THROTTLE));
  }
  header(reqwest::header::RETRY_AFTER.as_str())
    .and_then(|v| v.parse::<f64>().ok())
    .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
    .map(|pause| pause.min(MAX_THROTTLE))
}

fn transport(service: &'static str, err: reqwest::Error) -> RemoteError {
  RemoteError::Transport { service, message: err.to_string() }
}

fn excerpt(body: String) -> String {
  if body.len() <= BODY_EXCERPT {
    return body;
  }
  let mut end = BODY_EXCERPT;
  while !body.is_char_boundary(end) {
    end -= 1;
  }
  format!("{}…", &body[..end])
}

/// Send the request built by `build`, honouring the shared rate limiter.
///
/// A 429 sets the limiter's pause from the response hint and the request is
/// retried once; a second 429 is reported as `Throttled`. Other non-success
/// statuses are classified without retrying.
pub async fn send<F>(limiter: &RateLimiter, service: &'static str, build: F) -> Result<Response>
where
  F: Fn() -> RequestBuilder,
{
  let mut retried = false;
  loop {
    limiter.wait().await;
    let response = build().send().await.map_err(|e| transport(service, e))?;
    let status = response.status();
    if status == StatusCode::TOO_MANY_REQUESTS {
      let hint = retry_after(response.headers());
      if retried {
        return Err(RemoteError::Throttled { service, retry_after: hint });
      }
      let delay = hint.unwrap_or(DEFAULT_THROTTLE);
      tracing::warn!(service, delay_ms = delay.as_millis() as u64, "throttled, retrying once");
      limiter.pause_for(delay);
      retried = true;
      continue;
    }
    return classify(service, response).await;
  }
}

/// Pass a success through; turn anything else into a [`RemoteError`].
pub async fn classify(service: &'static str, response: Response) -> Result<Response> {
  let status = response.status();
  if status.is_success() {
    return Ok(response);
  }
  let url = response.url().path().to_string();
  let body = excerpt(response.text().await.unwrap_or_default());
  Err(match status {
    StatusCode::NOT_FOUND => RemoteError::NotFound { service, what: url },
    StatusCode::TOO_MANY_REQUESTS => RemoteError::Throttled { service, retry_after: None },
    s if s.is_server_error() => RemoteError::Server { service, status: s.as_u16(), body },
    s => RemoteError::Validation { service, status: s.as_u16(), body },
  })
}

pub async fn json<T: DeserializeOwned>(service: &'static str, response: Response) -> Result<T> {
  response
    .json()
    .await
    .map_err(|e| RemoteError::Decode { service, message: e.to_string() })
}

#[cfg(test)]
mod tests {
  use reqwest::header::HeaderValue;

  use super::*;

  #[test]
  fn reset_header_wins_over_retry_after() {
    let mut headers = HeaderMap::new();
    headers.insert(RESET_MS_HEADER, HeaderValue::from_static("250"));
    headers.insert(reqwest::header::RETRY_AFTER, HeaderValue::from_static("4"));
    assert_eq!(retry_after(&headers), Some(Duration::from_millis(250)));

    headers.remove(RESET_MS_HEADER);
    assert_eq!(retry_after(&headers), Some(Duration::from_secs(4)));

    headers.insert(reqwest::header::RETRY_AFTER, HeaderValue::from_static("soon"));
    assert_eq!(retry_after(&headers), None);
  }

  #[test]
  fn unrepresentable_hints_are_ignored_or_capped() {
    let mut headers = HeaderMap::new();
    for value in ["inf", "-3", "NaN"] {
      headers.insert(reqwest::header::RETRY_AFTER, HeaderValue::from_static(value));
      assert_eq!(retry_after(&headers), None, "{value}");
    }
    headers.insert(reqwest::header::RETRY_AFTER, HeaderValue::from_static("1e30"));
    assert_eq!(retry_after(&headers), None);
    headers.insert(reqwest::header::RETRY_AFTER, HeaderValue::from_static("86400"));
    assert_eq!(retry_after(&headers), Some(MAX_THROTTLE));
  }

  #[test]
  fn long_bodies_are_cut_on_a_char_boundary() {
    let body = "é".repeat(BODY_EXCERPT);
    let cut = excerpt(body);
    assert!(cut.ends_with('…'));
    assert!(cut.len() <= BODY_EXCERPT + '…'.len_utf8());
  }
}
