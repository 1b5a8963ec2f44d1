//! `GET /qr/{id}`: count a scan of a printed QR code.

use axum::{
  Json,
  extract::{Path, State},
  http::{HeaderMap, header},
};
use loam_core::{queue::Broker, sanitize::strip_control};
use serde_json::{Value, json};

use crate::{AppState, limit::ClientIp};

/// Always answers success so a scan never shows an error page; unknown codes
/// are only logged.
pub async fn visit<Q: Broker>(
  State(state): State<AppState<Q>>,
  Path(id): Path<String>,
  ClientIp(ip): ClientIp,
  headers: HeaderMap,
) -> Json<Value> {
  let id = strip_control(&id).trim().to_string();
  let agent = headers.get(header::USER_AGENT).and_then(|v| v.to_str().ok()).map(strip_control);
  let recorded = state.middleware.record_qr_visit(&id, Some(&ip), agent.as_deref()).await;
  if !recorded.is_ok() {
    state
      .handlers
      .webhook
      .add_error(loam_core::log::ErrorKind::LocalPersistence, "qr", recorded.message);
  } else if recorded.count() == 0 {
    state.handlers.webhook.warn("qr", format!("scan of unknown code {id:?}"));
  } else {
    state.handlers.webhook.debug("qr", format!("scan of {id}"));
  }
  Json(json!({ "success": true }))
}
