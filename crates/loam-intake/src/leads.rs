//! Design-service lead forms.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `POST` | `/design` | Lead fields plus `captcha_token` |
//! | `POST` | `/design/admin` | Lead fields plus `timestamp` and hex `signature` |
//!
//! Accepted leads are published to the durable queue; the consumer does the
//! rest.

use axum::{Json, extract::State};
use chrono::Utc;
use loam_core::queue::{Broker, LeadForm, LeadSource};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::{AppState, Error, Result, auth, limit::ClientIp};

#[derive(Debug, Deserialize)]
pub struct PublicLead {
  #[serde(flatten)]
  pub lead:          LeadForm,
  #[serde(default, alias = "g-recaptcha-response")]
  pub captcha_token: String,
}

#[derive(Debug, Deserialize)]
pub struct AdminLead {
  #[serde(flatten)]
  pub lead:      LeadForm,
  pub timestamp: String,
  pub signature: String,
}

/// `POST /design`
pub async fn public<Q: Broker>(
  State(state): State<AppState<Q>>,
  ClientIp(ip): ClientIp,
  Json(body): Json<PublicLead>,
) -> Result<Json<Value>> {
  auth::verify_captcha(state.captcha.as_ref(), &body.captcha_token, &ip).await?;
  let id = enqueue(&state, body.lead, LeadSource::Public).await?;
  state.handlers.leads.info("design", format!("queued public lead {id}"));
  Ok(Json(json!({
    "success": true,
    "message": "Thank you! A member of our design team will be in touch soon.",
  })))
}

/// `POST /design/admin`
pub async fn admin<Q: Broker>(
  State(state): State<AppState<Q>>,
  Json(body): Json<AdminLead>,
) -> Result<Json<Value>> {
  auth::verify_admin(&state.settings.admin_hmac_key, &body.timestamp, &body.signature, Utc::now())
    .inspect_err(|_| state.handlers.leads.warn("design_admin", "rejected admin lead signature"))?;
  let id = enqueue(&state, body.lead, LeadSource::Admin).await?;
  state.handlers.leads.info("design_admin", format!("queued admin lead {id}"));
  Ok(Json(json!({ "success": true, "message": "Lead submitted." })))
}

async fn enqueue<Q: Broker>(state: &AppState<Q>, mut lead: LeadForm, source: LeadSource) -> Result<String> {
  lead.sanitize();
  lead.validate().inspect_err(|e| state.handlers.leads.debug("design", format!("rejected lead: {e}")))?;
  lead.source = source;
  lead.submitted_at = Some(Utc::now());
  let body = serde_json::to_string(&lead).map_err(loam_core::Error::from)?;
  state
    .queue
    .publish(&state.settings.queue_name, &body, true)
    .await
    .map_err(Error::queue)
}
