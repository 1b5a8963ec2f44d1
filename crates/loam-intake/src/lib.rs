//! Customer-facing HTTP intake and inbound webhooks for the loam hub.
//!
//! Exposes an axum [`Router`] over the POS and middleware stores and the
//! durable lead queue. Public form routes are captcha-gated and rate limited
//! per client IP; webhook routes authenticate with a shared secret instead.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `POST` | `/design` | Public lead form; enqueued |
//! | `POST` | `/design/admin` | Staff lead form; HMAC-signed timestamp |
//! | `POST` | `/stock-notify` | Back-in-stock request |
//! | `POST` | `/newsletter` | Signup with welcome coupon |
//! | `GET`  | `/subscribe?email=` | HTML confirmation |
//! | `GET`  | `/unsubscribe?email=` | HTML confirmation |
//! | `GET`  | `/qr/{id}` | Counts a scan |
//! | `POST` | `/webhooks/storefront` | Signed storefront events |
//! | `POST` | `/webhooks/sms` | Inbound SMS and opt-out keywords |
//! | `POST` | `/webhooks/sms/status` | Delivery status callbacks |

pub mod auth;
pub mod error;
pub mod forms;
pub mod leads;
pub mod limit;
pub mod qr;
pub mod sms;
pub mod storefront;

pub use error::{Error, Result};

use std::sync::Arc;

use axum::{
  Router, middleware,
  routing::{get, post},
};
use loam_core::{
  config::{CompanyConfig, Config, Secret},
  log::Handlers,
  notify::{CaptchaVerifier, Mailer},
  queue::Broker,
};
use loam_store_sqlite::{MiddlewareDb, PosDb};
use tower_http::trace::TraceLayer;

use limit::RateLimiter;

// ─── Settings ────────────────────────────────────────────────────────────────

/// The slice of configuration the intake routes read.
#[derive(Debug, Clone)]
pub struct Settings {
  pub queue_name:            String,
  pub admin_hmac_key:        Secret,
  pub webhook_secret:        Secret,
  pub sms_token:             Secret,
  pub rate_limit_per_minute: u32,
  pub newsletter_coupon:     String,
  pub staff_address:         String,
  pub company:               CompanyConfig,
}

impl Settings {
  pub fn from_config(cfg: &Config) -> Self {
    Self {
      queue_name:            cfg.queue.name.clone(),
      admin_hmac_key:        cfg.intake.admin_hmac_key.clone(),
      webhook_secret:        cfg.storefront.webhook_secret.clone(),
      sms_token:             cfg.sms.inbound_token.clone(),
      rate_limit_per_minute: cfg.intake.rate_limit_per_minute,
      newsletter_coupon:     cfg.intake.newsletter_coupon.clone(),
      staff_address:         cfg.email.staff_address.clone(),
      company:               cfg.company.clone(),
    }
  }
}

// ─── Application state ───────────────────────────────────────────────────────

/// Shared state threaded through all handlers.
pub struct AppState<Q> {
  pub pos:        PosDb,
  pub middleware: MiddlewareDb,
  pub queue:      Arc<Q>,
  pub captcha:    Arc<dyn CaptchaVerifier>,
  pub mailer:     Arc<dyn Mailer>,
  pub handlers:   Handlers,
  pub settings:   Arc<Settings>,
  pub limiter:    Arc<RateLimiter>,
}

impl<Q> Clone for AppState<Q> {
  fn clone(&self) -> Self {
    Self {
      pos:        self.pos.clone(),
      middleware: self.middleware.clone(),
      queue:      self.queue.clone(),
      captcha:    self.captcha.clone(),
      mailer:     self.mailer.clone(),
      handlers:   self.handlers.clone(),
      settings:   self.settings.clone(),
      limiter:    self.limiter.clone(),
    }
  }
}

// ─── Router ──────────────────────────────────────────────────────────────────

/// Build the intake router. The lead queue must already be declared.
pub fn router<Q>(state: AppState<Q>) -> Router<()>
where
  Q: Broker + 'static,
{
  let public = Router::new()
    .route("/design", post(leads::public::<Q>))
    .route("/design/admin", post(leads::admin::<Q>))
    .route("/stock-notify", post(forms::stock_notify::<Q>))
    .route("/newsletter", post(forms::newsletter::<Q>))
    .route("/subscribe", get(forms::subscribe::<Q>))
    .route("/unsubscribe", get(forms::unsubscribe::<Q>))
    .route("/qr/{id}", get(qr::visit::<Q>))
    .route_layer(middleware::from_fn_with_state(state.clone(), limit::enforce::<Q>));

  let hooks = Router::new()
    .route("/webhooks/storefront", post(storefront::receive::<Q>))
    .route("/webhooks/sms", post(sms::inbound::<Q>))
    .route("/webhooks/sms/status", post(sms::status::<Q>));

  public
    .merge(hooks)
    .layer(TraceLayer::new_for_http())
    .with_state(state)
}

#[cfg(test)]
mod tests;
