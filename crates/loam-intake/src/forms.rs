//! Storefront sign-up forms: back-in-stock requests, the newsletter, and the
//! email subscribe/unsubscribe links.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `POST` | `/stock-notify` | `{"item_no", "email"?, "phone"?, "captcha_token"}` |
//! | `POST` | `/newsletter` | `{"email", "first_name"?, "captcha_token"}` |
//! | `GET`  | `/subscribe` | `?email=`; renders a page |
//! | `GET`  | `/unsubscribe` | `?email=`; renders a page |

use axum::{
  Json,
  extract::{Query, State},
  http::StatusCode,
  response::Html,
};
use loam_core::{
  notify::{EmailMessage, render},
  queue::Broker,
  sanitize::{canonical_phone, non_empty, normalize_email, strip_control},
};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::{AppState, Error, Result, auth, limit::ClientIp};

// ─── Back in stock ───────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct StockNotify {
  pub item_no:       String,
  #[serde(default)]
  pub email:         Option<String>,
  #[serde(default)]
  pub phone:         Option<String>,
  #[serde(default, alias = "g-recaptcha-response")]
  pub captcha_token: String,
}

/// `POST /stock-notify`
pub async fn stock_notify<Q: Broker>(
  State(state): State<AppState<Q>>,
  ClientIp(ip): ClientIp,
  Json(body): Json<StockNotify>,
) -> Result<Json<Value>> {
  auth::verify_captcha(state.captcha.as_ref(), &body.captcha_token, &ip).await?;

  let item_no = strip_control(&body.item_no).trim().to_uppercase();
  if item_no.is_empty() {
    return Err(Error::rejected("Please choose an item."));
  }
  let email = match non_empty(body.email.as_deref()) {
    Some(raw) => Some(
      normalize_email(&raw).ok_or_else(|| Error::rejected("Please enter a valid email address."))?,
    ),
    None => None,
  };
  let phone = match non_empty(body.phone.as_deref()) {
    Some(raw) => Some(
      canonical_phone(&raw).ok_or_else(|| Error::rejected("Please enter a valid phone number."))?,
    ),
    None => None,
  };
  if email.is_none() && phone.is_none() {
    return Err(Error::rejected("Please enter an email address or phone number."));
  }
  if state.pos.items(vec![item_no.clone()]).await?.is_empty() {
    return Err(Error::rejected("That item is not available for notifications."));
  }
  if state.middleware.stock_request_exists(&item_no, email.as_deref(), phone.as_deref()).await? {
    return Err(Error::rejected("This contact is already on file for this item."));
  }

  state
    .middleware
    .add_stock_request(&item_no, email.as_deref(), phone.as_deref())
    .await
    .into_result("forms.stock_notify")?;
  state.handlers.webhook.info("stock_notify", format!("stock request recorded for {item_no}"));
  Ok(Json(json!({
    "success": true,
    "message": "You're on the list! We'll let you know when it's back in stock.",
  })))
}

// ─── Newsletter ──────────────────────────────────────────────────────────────

const WELCOME_SUBJECT: &str = "Welcome to the {{company}} newsletter";
const WELCOME_BODY: &str = "<p>Hi {{name}},</p><p>Thanks for joining the {{company}} newsletter. \
                            As a welcome, use code <strong>{{coupon}}</strong> on your next order.</p>\
                            <p>{{company}}<br>{{phone}}<br>{{website}}</p>\
                            <p><a href=\"{{website}}/unsubscribe?email={{email}}\">Unsubscribe</a></p>";

#[derive(Debug, Deserialize)]
pub struct NewsletterSignup {
  pub email:         String,
  #[serde(default)]
  pub first_name:    Option<String>,
  #[serde(default, alias = "g-recaptcha-response")]
  pub captcha_token: String,
}

/// `POST /newsletter`
pub async fn newsletter<Q: Broker>(
  State(state): State<AppState<Q>>,
  ClientIp(ip): ClientIp,
  Json(body): Json<NewsletterSignup>,
) -> Result<Json<Value>> {
  auth::verify_captcha(state.captcha.as_ref(), &body.captcha_token, &ip).await?;
  let email =
    normalize_email(&body.email).ok_or_else(|| Error::rejected("Please enter a valid email address."))?;
  if state.middleware.newsletter_status(&email).await? == Some(true) {
    return Err(Error::rejected("This email address is already on file."));
  }

  let settings = &state.settings;
  let name = non_empty(body.first_name.as_deref().map(strip_control).as_deref()).unwrap_or_else(|| "there".into());
  let values = [
    ("company", settings.company.name.as_str()),
    ("name", name.as_str()),
    ("coupon", settings.newsletter_coupon.as_str()),
    ("phone", settings.company.phone.as_str()),
    ("website", settings.company.website.as_str()),
    ("email", email.as_str()),
  ];
  let message = EmailMessage {
    to:       email.clone(),
    to_name:  None,
    subject:  render(WELCOME_SUBJECT, &values),
    html:     render(WELCOME_BODY, &values),
    reply_to: non_empty(Some(settings.staff_address.as_str())),
  };
  state.mailer.send_email(&message).await?;

  state.middleware.set_newsletter(&email, true).await.into_result("forms.newsletter")?;
  let consent = state.pos.set_email_subscription(&email, true).await;
  if !consent.is_ok() {
    state.handlers.webhook.warn("newsletter", format!("POS consent not updated: {}", consent.message));
  }
  state.handlers.webhook.info("newsletter", "new newsletter subscriber");
  Ok(Json(json!({ "success": true, "message": "Thanks for subscribing! Check your inbox for a welcome gift." })))
}

// ─── Subscribe links ─────────────────────────────────────────────────────────

const PAGE: &str = "<!DOCTYPE html><html><head><meta charset=\"utf-8\"><title>{{company}}</title></head>\
                    <body><h1>{{heading}}</h1><p>{{detail}}</p><p><a href=\"{{website}}\">{{company}}</a></p>\
                    </body></html>";

#[derive(Debug, Deserialize)]
pub struct EmailQuery {
  #[serde(default)]
  pub email: String,
}

/// `GET /subscribe?email=`
pub async fn subscribe<Q: Broker>(
  State(state): State<AppState<Q>>,
  Query(query): Query<EmailQuery>,
) -> (StatusCode, Html<String>) {
  set_subscription(&state, &query.email, true).await
}

/// `GET /unsubscribe?email=`
pub async fn unsubscribe<Q: Broker>(
  State(state): State<AppState<Q>>,
  Query(query): Query<EmailQuery>,
) -> (StatusCode, Html<String>) {
  set_subscription(&state, &query.email, false).await
}

async fn set_subscription<Q>(state: &AppState<Q>, raw: &str, subscribed: bool) -> (StatusCode, Html<String>) {
  let page = |status, heading: &str, detail: &str| {
    let company = &state.settings.company;
    let values = [
      ("company", company.name.as_str()),
      ("website", company.website.as_str()),
      ("heading", heading),
      ("detail", detail),
    ];
    (status, Html(render(PAGE, &values)))
  };

  let Some(email) = normalize_email(raw) else {
    return page(StatusCode::BAD_REQUEST, "Invalid link", "That email address is not valid.");
  };
  let recorded = state.middleware.set_newsletter(&email, subscribed).await;
  if !recorded.is_ok() {
    state
      .handlers
      .webhook
      .add_error(loam_core::log::ErrorKind::LocalPersistence, "subscribe", recorded.message);
    return page(StatusCode::INTERNAL_SERVER_ERROR, "Something went wrong", "Please try again later.");
  }
  let consent = state.pos.set_email_subscription(&email, subscribed).await;
  if !consent.is_ok() {
    state.handlers.webhook.warn("subscribe", format!("POS consent not updated: {}", consent.message));
  }

  if subscribed {
    page(StatusCode::OK, "You're subscribed", "You'll hear about new arrivals and sales first.")
  } else {
    page(StatusCode::OK, "You're unsubscribed", "You won't receive any more marketing emails from us.")
  }
}
