//! Per-IP, per-route request limiting for the public form routes.

use std::{
  collections::HashMap,
  net::SocketAddr,
  time::{Duration, Instant},
};

use axum::{
  extract::{ConnectInfo, FromRequestParts, MatchedPath, Request, State},
  http::{Extensions, HeaderMap, request::Parts},
  middleware::Next,
  response::{IntoResponse, Response},
};
use parking_lot::Mutex;

use crate::{AppState, Error};

const WINDOW: Duration = Duration::from_secs(60);

struct Window {
  count:   u32,
  started: Instant,
}

/// Fixed one-minute windows keyed by route and client IP.
#[derive(Default)]
pub struct RateLimiter {
  windows: Mutex<HashMap<(String, String), Window>>,
}

impl RateLimiter {
  pub fn new() -> Self { Self::default() }

  /// Count one request; `false` once `limit` is exceeded within the window.
  pub fn check(&self, route: &str, ip: &str, limit: u32) -> bool {
    self.check_at(route, ip, limit, Instant::now())
  }

  fn check_at(&self, route: &str, ip: &str, limit: u32, now: Instant) -> bool {
    let mut windows = self.windows.lock();
    let window = windows
      .entry((route.to_string(), ip.to_string()))
      .or_insert(Window { count: 0, started: now });
    if now.duration_since(window.started) >= WINDOW {
      window.count = 0;
      window.started = now;
    }
    window.count += 1;
    window.count <= limit
  }

  /// Drop windows that have expired.
  pub fn sweep(&self) {
    let now = Instant::now();
    self.windows.lock().retain(|_, w| now.duration_since(w.started) < WINDOW);
  }

  pub fn len(&self) -> usize { self.windows.lock().len() }

  pub fn is_empty(&self) -> bool { self.windows.lock().is_empty() }
}

// ─── Client address ──────────────────────────────────────────────────────────

/// The first `X-Forwarded-For` hop, else the peer address.
pub fn client_ip(headers: &HeaderMap, extensions: &Extensions) -> String {
  let forwarded = headers
    .get("x-forwarded-for")
    .and_then(|v| v.to_str().ok())
    .and_then(|v| v.split(',').next())
    .map(str::trim)
    .filter(|ip| !ip.is_empty());
  if let Some(ip) = forwarded {
    return ip.to_string();
  }
  extensions
    .get::<ConnectInfo<SocketAddr>>()
    .map(|ci| ci.0.ip().to_string())
    .unwrap_or_else(|| "unknown".to_string())
}

/// Extractor for the requesting client's address.
pub struct ClientIp(pub String);

impl<S: Send + Sync> FromRequestParts<S> for ClientIp {
  type Rejection = std::convert::Infallible;

  async fn from_request_parts(parts: &mut Parts, _: &S) -> Result<Self, Self::Rejection> {
    Ok(Self(client_ip(&parts.headers, &parts.extensions)))
  }
}

// ─── Middleware ──────────────────────────────────────────────────────────────

pub async fn enforce<Q>(State(state): State<AppState<Q>>, request: Request, next: Next) -> Response
where
  Q: Send + Sync + 'static,
{
  let ip = client_ip(request.headers(), request.extensions());
  let route = request
    .extensions()
    .get::<MatchedPath>()
    .map(|p| p.as_str().to_string())
    .unwrap_or_else(|| request.uri().path().to_string());
  if !state.limiter.check(&route, &ip, state.settings.rate_limit_per_minute) {
    state.handlers.webhook.warn("rate_limit", format!("{ip} exceeded the limit on {route}"));
    return Error::TooManyRequests.into_response();
  }
  next.run(request).await
}
