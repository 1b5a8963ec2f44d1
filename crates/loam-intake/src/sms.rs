//! SMS provider callbacks.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `POST` | `/webhooks/sms?token=` | Form body `From`, `Body`, `MessageSid` |
//! | `POST` | `/webhooks/sms/status?token=` | Form body `MessageSid`, `MessageStatus`, `To`, `ErrorCode`? |
//!
//! Inbound messages are kept in the SMS history. Opt-out and opt-in
//! keywords flip the SMS consent of every POS customer with that mobile
//! number.

use axum::{
  Form,
  extract::{Query, State},
  http::header,
  response::IntoResponse,
};
use loam_core::{log::ErrorKind, queue::Broker, sanitize::canonical_phone};
use loam_store_sqlite::SmsDirection;
use serde::Deserialize;

use crate::{AppState, Result, auth};

const EMPTY_REPLY: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\"?><Response></Response>";

const STOP_WORDS: &[&str] = &["STOP", "STOPALL", "UNSUBSCRIBE", "CANCEL", "END", "QUIT"];
const START_WORDS: &[&str] = &["START", "UNSTOP", "YES"];

#[derive(Debug, Deserialize)]
pub struct TokenQuery {
  #[serde(default)]
  pub token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct InboundSms {
  pub from:        String,
  #[serde(default)]
  pub body:        String,
  #[serde(default)]
  pub message_sid: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StatusCallback {
  pub message_sid:    String,
  pub message_status: String,
  #[serde(default)]
  pub to:             Option<String>,
  #[serde(default)]
  pub error_code:     Option<String>,
}

/// What an inbound message asks of us.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
  Stop,
  Start,
}

impl Keyword {
  pub fn parse(body: &str) -> Option<Self> {
    let word = body.trim().trim_end_matches(['.', '!']).to_uppercase();
    if STOP_WORDS.contains(&word.as_str()) {
      Some(Self::Stop)
    } else if START_WORDS.contains(&word.as_str()) {
      Some(Self::Start)
    } else {
      None
    }
  }
}

fn reply() -> impl IntoResponse { ([(header::CONTENT_TYPE, "text/xml")], EMPTY_REPLY) }

/// `POST /webhooks/sms`
pub async fn inbound<Q: Broker>(
  State(state): State<AppState<Q>>,
  Query(query): Query<TokenQuery>,
  Form(message): Form<InboundSms>,
) -> Result<impl IntoResponse> {
  auth::verify_token(&state.settings.sms_token, query.token.as_deref())?;
  let log = &state.handlers.sms;
  let sid = message.message_sid.as_deref();
  let phone = canonical_phone(&message.from).unwrap_or_else(|| message.from.trim().to_string());

  let recorded = state.middleware.record_sms(SmsDirection::Inbound, &phone, &message.body, sid).await;
  if !recorded.is_ok() {
    log.add_error(ErrorKind::LocalPersistence, "inbound", recorded.message);
  }

  let Some(keyword) = Keyword::parse(&message.body) else {
    log.info("inbound", format!("message from {phone}"));
    return Ok(reply());
  };
  let (subscribed, event) = match keyword {
    Keyword::Stop => (false, "unsubscribe"),
    Keyword::Start => (true, "subscribe"),
  };
  let changed = state.pos.set_sms_subscription(&phone, subscribed).await;
  if !changed.is_ok() {
    log.add_error(ErrorKind::LocalPersistence, "inbound", changed.message.clone());
  }
  let noted = state.middleware.record_sms_event(Some(&phone), event, sid, None).await;
  if !noted.is_ok() {
    state.handlers.sms_events.add_error(ErrorKind::LocalPersistence, "inbound", noted.message);
  }
  state
    .handlers
    .sms_events
    .info("inbound", format!("{phone} {event}d; {} POS customer(s) updated", changed.count()));
  Ok(reply())
}

/// `POST /webhooks/sms/status`
pub async fn status<Q: Broker>(
  State(state): State<AppState<Q>>,
  Query(query): Query<TokenQuery>,
  Form(callback): Form<StatusCallback>,
) -> Result<impl IntoResponse> {
  auth::verify_token(&state.settings.sms_token, query.token.as_deref())?;
  let log = &state.handlers.sms_events;
  let phone = callback.to.as_deref().map(|to| canonical_phone(to).unwrap_or_else(|| to.trim().to_string()));
  let event = callback.message_status.trim().to_lowercase();

  let noted = state
    .middleware
    .record_sms_event(phone.as_deref(), &event, Some(&callback.message_sid), callback.error_code.as_deref())
    .await;
  if !noted.is_ok() {
    log.add_error(ErrorKind::LocalPersistence, "status", noted.message);
  }
  if matches!(event.as_str(), "failed" | "undelivered") {
    log.warn(
      "status",
      format!(
        "message {} {event} (code {})",
        callback.message_sid,
        callback.error_code.as_deref().unwrap_or("none")
      ),
    );
  }
  Ok(reply())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn keywords_are_case_and_punctuation_insensitive() {
    assert_eq!(Keyword::parse(" stop "), Some(Keyword::Stop));
    assert_eq!(Keyword::parse("Unsubscribe."), Some(Keyword::Stop));
    assert_eq!(Keyword::parse("START!"), Some(Keyword::Start));
    assert_eq!(Keyword::parse("stop sending me these"), None);
  }
}
