//! Routes exercised through the router against in-memory stores.

use std::{collections::BTreeMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use axum::{
  body::Body,
  http::{Request, StatusCode, header},
};
use chrono::{TimeZone, Utc};
use loam_core::{
  config::{CompanyConfig, Secret},
  log::Handlers,
  notify::{CaptchaVerifier, EmailMessage, Mailer},
  pos::{CustomerRow, GiftCardRow, ItemRow},
  queue::{Broker as _, LeadForm, LeadSource},
  remote::Result as RemoteResult,
};
use loam_store_sqlite::{MiddlewareDb, PosDb, SqliteQueue};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tower::ServiceExt as _;

use crate::{AppState, Settings, auth, limit::RateLimiter, router};

const QUEUE: &str = "design_lead_form";

// ─── Fakes ───────────────────────────────────────────────────────────────────

/// Accepts exactly the token `ok`.
struct Captcha;

#[async_trait]
impl CaptchaVerifier for Captcha {
  async fn verify(&self, token: &str, _: Option<&str>) -> RemoteResult<bool> { Ok(token == "ok") }
}

#[derive(Default)]
struct Outbox {
  sent: Mutex<Vec<EmailMessage>>,
}

#[async_trait]
impl Mailer for Outbox {
  async fn send_email(&self, message: &EmailMessage) -> RemoteResult<String> {
    let mut sent = self.sent.lock();
    sent.push(message.clone());
    Ok(format!("mail-{}", sent.len()))
  }
}

// ─── Harness ─────────────────────────────────────────────────────────────────

struct Harness {
  state:  AppState<SqliteQueue>,
  outbox: Arc<Outbox>,
}

impl Harness {
  async fn new() -> Self { Self::with_settings(|_| {}).await }

  async fn with_settings(tweak: impl FnOnce(&mut Settings)) -> Self {
    let handlers = Handlers::new();
    let pos = PosDb::open_in_memory(handlers.webhook.clone()).await.unwrap();
    let middleware = MiddlewareDb::open_in_memory(handlers.webhook.clone()).await.unwrap();
    let queue = SqliteQueue::open_in_memory(handlers.leads.clone()).await.unwrap();
    queue.declare(QUEUE).await.unwrap();

    let mut settings = Settings {
      queue_name:            QUEUE.into(),
      admin_hmac_key:        Secret::new("admin-key"),
      webhook_secret:        Secret::new("hook-secret"),
      sms_token:             Secret::new("sms-token"),
      rate_limit_per_minute: 20,
      newsletter_coupon:     "WELCOME10".into(),
      staff_address:         "staff@evergreen.example".into(),
      company:               CompanyConfig {
        name:    "Evergreen Nursery".into(),
        phone:   "828-555-0000".into(),
        email:   "hello@evergreen.example".into(),
        address: "1 Main St".into(),
        website: "https://evergreen.example".into(),
      },
    };
    tweak(&mut settings);

    let outbox = Arc::new(Outbox::default());
    let state = AppState {
      pos,
      middleware,
      queue: Arc::new(queue),
      captcha: Arc::new(Captcha),
      mailer: outbox.clone(),
      handlers,
      settings: Arc::new(settings),
      limiter: Arc::new(RateLimiter::new()),
    };
    Self { state, outbox }
  }

  async fn send(&self, req: Request<Body>) -> (StatusCode, String) {
    let resp = router(self.state.clone()).oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    (status, String::from_utf8(bytes.to_vec()).unwrap())
  }

  async fn post_json(&self, uri: &str, body: Value) -> (StatusCode, Value) {
    let req = Request::builder()
      .method("POST")
      .uri(uri)
      .header(header::CONTENT_TYPE, "application/json")
      .header("x-forwarded-for", "198.51.100.7")
      .body(Body::from(body.to_string()))
      .unwrap();
    let (status, text) = self.send(req).await;
    (status, serde_json::from_str(&text).unwrap_or(Value::Null))
  }

  async fn get(&self, uri: &str, ip: &str) -> (StatusCode, String) {
    let req = Request::builder().uri(uri).header("x-forwarded-for", ip).body(Body::empty()).unwrap();
    self.send(req).await
  }

  async fn webhook(&self, topic: &str, body: Value) -> StatusCode {
    let raw = body.to_string();
    let signature = auth::sign_webhook(&self.state.settings.webhook_secret, raw.as_bytes()).unwrap();
    let req = Request::builder()
      .method("POST")
      .uri("/webhooks/storefront")
      .header(header::CONTENT_TYPE, "application/json")
      .header(auth::SIGNATURE_HEADER, signature)
      .header("x-shopify-topic", topic)
      .body(Body::from(raw))
      .unwrap();
    self.send(req).await.0
  }

  async fn sms(&self, uri: &str, form: &str) -> (StatusCode, String) {
    let req = Request::builder()
      .method("POST")
      .uri(uri)
      .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
      .body(Body::from(form.to_string()))
      .unwrap();
    self.send(req).await
  }

  async fn queued(&self) -> Vec<LeadForm> {
    let mut leads = Vec::new();
    while let Some(delivery) = self.state.queue.receive(QUEUE, Duration::from_secs(60)).await.unwrap() {
      leads.push(serde_json::from_str(&delivery.body).unwrap());
    }
    leads
  }
}

// ─── Fixtures ────────────────────────────────────────────────────────────────

fn lead() -> Value {
  json!({
    "first_name": "Jane", "last_name": "Doe", "email": "Jane@Example.com", "phone": "(828) 123 4567",
    "interested_in": ["Landscape Design"], "timeline": "1-3 months",
    "street": "1 Main", "city": "Valdese", "state": "nc", "zip_code": "28690",
    "comments": "Shade garden"
  })
}

fn with(mut base: Value, extra: Value) -> Value {
  if let (Some(base), Value::Object(extra)) = (base.as_object_mut(), extra) {
    base.extend(extra);
  }
  base
}

fn item(item_no: &str) -> ItemRow {
  ItemRow {
    item_no:       item_no.into(),
    binding_id:    None,
    parent_pin:    false,
    is_parent:     false,
    web_enabled:   true,
    web_visible:   true,
    active:        true,
    web_title:     Some("Holly".into()),
    descr:         "HOLLY".into(),
    long_descr:    None,
    html_descr:    None,
    price_1:       25.0,
    price_2:       None,
    sale_price:    None,
    cost:          12.0,
    qty_available: 0,
    variant_name:  None,
    variant_size:  None,
    brand:         None,
    weight:        None,
    categories:    Vec::new(),
    specs:         BTreeMap::new(),
    video_urls:    Vec::new(),
    last_maint:    Utc.with_ymd_and_hms(2026, 5, 1, 9, 0, 0).unwrap(),
  }
}

fn customer(cust_no: &str, email: &str, mobile: Option<&str>) -> CustomerRow {
  CustomerRow {
    cust_no:            cust_no.into(),
    first_name:         Some("Jane".into()),
    last_name:          Some("Doe".into()),
    email_1:            Some(email.into()),
    email_1_subscribed: true,
    email_2:            None,
    email_2_subscribed: false,
    mobile_1:           mobile.map(Into::into),
    sms_1_subscribed:   mobile.is_some(),
    mobile_2:           None,
    sms_2_subscribed:   false,
    loyalty_points:     40,
    category:           "RETAIL".into(),
    birth_month:        None,
    spouse_birth_month: None,
    wholesale_tier:     None,
    web_enabled:        true,
    address:            Default::default(),
    last_maint:         Utc.with_ymd_and_hms(2026, 5, 1, 9, 0, 0).unwrap(),
  }
}

fn order() -> Value {
  json!({
    "id": 820982911946154508u64,
    "name": "#1001",
    "email": "jane@example.com",
    "customer": { "id": 115310627314723954u64 },
    "line_items": [{ "sku": "H1", "title": "Holly", "quantity": 2, "price": "25.00" }],
    "subtotal_price": "50.00",
    "total_tax": "3.50",
    "total_price": "53.50",
    "gift_cards": [{ "code": "gc1", "amount": "20.00" }],
    "note_attributes": [{ "name": "loyalty_points_redeemed", "value": "10" }],
    "created_at": "2026-05-02T15:04:05Z"
  })
}

// ─── Leads ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn public_lead_is_sanitized_and_queued() {
  let h = Harness::new().await;
  let (status, body) = h.post_json("/design", with(lead(), json!({ "captcha_token": "ok" }))).await;
  assert_eq!(status, StatusCode::OK, "{body}");
  assert_eq!(body["success"], true);

  let queued = h.queued().await;
  assert_eq!(queued.len(), 1);
  assert_eq!(queued[0].email, "jane@example.com");
  assert_eq!(queued[0].phone, "828-123-4567");
  assert_eq!(queued[0].state, "NC");
  assert_eq!(queued[0].source, LeadSource::Public);
  assert!(queued[0].submitted_at.is_some());
}

#[tokio::test]
async fn failed_captcha_queues_nothing() {
  let h = Harness::new().await;
  let (status, _) = h.post_json("/design", with(lead(), json!({ "captcha_token": "bot" }))).await;
  assert_eq!(status, StatusCode::BAD_REQUEST);
  assert_eq!(h.state.queue.depth(QUEUE).await.unwrap(), 0);
}

#[tokio::test]
async fn invalid_lead_names_the_first_bad_field() {
  let h = Harness::new().await;
  let body = with(lead(), json!({ "email": "nope", "phone": "12", "captcha_token": "ok" }));
  let (status, body) = h.post_json("/design", body).await;
  assert_eq!(status, StatusCode::BAD_REQUEST);
  assert_eq!(body["field"], "email");
  assert_eq!(h.state.queue.depth(QUEUE).await.unwrap(), 0);
}

#[tokio::test]
async fn admin_lead_needs_a_fresh_signature() {
  let h = Harness::new().await;
  let key = h.state.settings.admin_hmac_key.clone();

  let now = Utc::now().timestamp().to_string();
  let signed = json!({ "timestamp": now, "signature": auth::sign_admin(&key, &now).unwrap() });
  let (status, _) = h.post_json("/design/admin", with(lead(), signed)).await;
  assert_eq!(status, StatusCode::OK);

  let stale = (Utc::now().timestamp() - 3600).to_string();
  let signed = json!({ "timestamp": stale, "signature": auth::sign_admin(&key, &stale).unwrap() });
  let (status, _) = h.post_json("/design/admin", with(lead(), signed)).await;
  assert_eq!(status, StatusCode::UNAUTHORIZED);

  let queued = h.queued().await;
  assert_eq!(queued.len(), 1);
  assert_eq!(queued[0].source, LeadSource::Admin);
}

// ─── Forms ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn stock_request_is_recorded_once_per_contact() {
  let h = Harness::new().await;
  assert!(h.state.pos.put_item(&item("H1")).await.is_ok());
  let request = json!({ "item_no": "h1", "email": "Jane@Example.com", "captcha_token": "ok" });

  let (status, _) = h.post_json("/stock-notify", request.clone()).await;
  assert_eq!(status, StatusCode::OK);
  let (status, body) = h.post_json("/stock-notify", request).await;
  assert_eq!(status, StatusCode::BAD_REQUEST);
  assert!(body["error"].as_str().unwrap().contains("already on file"));

  let (status, _) =
    h.post_json("/stock-notify", json!({ "item_no": "NOPE", "phone": "828-555-0100", "captcha_token": "ok" })).await;
  assert_eq!(status, StatusCode::BAD_REQUEST);

  let pending = h.state.middleware.stock_requests(vec!["H1".into()]).await.unwrap();
  assert_eq!(pending.len(), 1);
  assert_eq!(pending[0].email.as_deref(), Some("jane@example.com"));
}

#[tokio::test]
async fn newsletter_welcomes_a_subscriber_once() {
  let h = Harness::new().await;
  assert!(h.state.pos.put_customer(&customer("1001", "jane@example.com", None)).await.is_ok());
  let signup = json!({ "email": "JANE@example.com", "first_name": "Jane", "captcha_token": "ok" });

  let (status, _) = h.post_json("/newsletter", signup.clone()).await;
  assert_eq!(status, StatusCode::OK);
  let (status, body) = h.post_json("/newsletter", signup).await;
  assert_eq!(status, StatusCode::BAD_REQUEST);
  assert_eq!(body["error"], "This email address is already on file.");

  let sent = h.outbox.sent.lock().clone();
  assert_eq!(sent.len(), 1);
  assert_eq!(sent[0].to, "jane@example.com");
  assert!(sent[0].html.contains("WELCOME10"));
  assert!(sent[0].html.contains("Hi Jane"));
  assert_eq!(h.state.middleware.newsletter_status("jane@example.com").await.unwrap(), Some(true));
}

#[tokio::test]
async fn unsubscribe_link_is_idempotent() {
  let h = Harness::new().await;
  assert!(h.state.pos.put_customer(&customer("1001", "jane@example.com", None)).await.is_ok());

  for _ in 0..2 {
    let (status, page) = h.get("/unsubscribe?email=Jane%40example.com", "198.51.100.7").await;
    assert_eq!(status, StatusCode::OK);
    assert!(page.contains("unsubscribed"));
  }
  let events = h.state.middleware.subscription_events("jane@example.com").await.unwrap();
  assert_eq!(events, vec!["unsubscribe".to_string()]);
  let jane = h.state.pos.customer("1001").await.unwrap().unwrap();
  assert!(!jane.email_1_subscribed);

  let (status, _) = h.get("/subscribe?email=not-an-email", "198.51.100.7").await;
  assert_eq!(status, StatusCode::BAD_REQUEST);
}

// ─── QR and limits ───────────────────────────────────────────────────────────

#[tokio::test]
async fn qr_scans_are_counted_and_unknown_codes_still_succeed() {
  let h = Harness::new().await;
  assert!(h.state.middleware.put_qr_code("SPRING", "https://evergreen.example/spring").await.is_ok());

  for _ in 0..2 {
    let (status, body) = h.get("/qr/SPRING", "198.51.100.7").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("true"));
  }
  let (status, _) = h.get("/qr/MISSING", "198.51.100.7").await;
  assert_eq!(status, StatusCode::OK);

  let (_, visits) = h.state.middleware.qr_code("SPRING").await.unwrap().unwrap();
  assert_eq!(visits, 2);
  assert!(h.state.middleware.qr_code("MISSING").await.unwrap().is_none());
}

#[tokio::test]
async fn rate_limit_is_per_client_and_route() {
  let h = Harness::with_settings(|s| s.rate_limit_per_minute = 2).await;
  assert_eq!(h.get("/qr/A", "203.0.113.1").await.0, StatusCode::OK);
  assert_eq!(h.get("/qr/B", "203.0.113.1").await.0, StatusCode::OK);
  assert_eq!(h.get("/qr/C", "203.0.113.1").await.0, StatusCode::TOO_MANY_REQUESTS);
  assert_eq!(h.get("/qr/C", "203.0.113.2").await.0, StatusCode::OK);
  assert_eq!(h.get("/subscribe?email=a%40b.com", "203.0.113.1").await.0, StatusCode::OK);
}

// ─── Storefront webhooks ─────────────────────────────────────────────────────

#[tokio::test]
async fn order_webhook_synthesizes_one_pos_document() {
  let h = Harness::new().await;
  assert!(h.state.pos.put_customer(&customer("1001", "jane@example.com", None)).await.is_ok());
  let card = GiftCardRow {
    gfc_no:      "GC1".into(),
    balance:     50.0,
    orig_amount: 50.0,
    issued:      None,
    web_enabled: true,
    last_maint:  Utc.with_ymd_and_hms(2026, 5, 1, 9, 0, 0).unwrap(),
  };
  assert!(h.state.pos.put_gift_card(&card).await.is_ok());

  assert_eq!(h.webhook("orders/create", order()).await, StatusCode::OK);
  assert_eq!(h.webhook("orders/create", order()).await, StatusCode::OK);

  let mapping = h.state.middleware.order("820982911946154508").await.unwrap().unwrap();
  assert_eq!(mapping.status, "open");
  let docs = h.state.pos.documents(vec![mapping.doc_id.clone()]).await.unwrap();
  assert_eq!(docs.len(), 1);
  assert_eq!(docs[0].cust_no.as_deref(), Some("1001"));
  assert_eq!(docs[0].order_no.as_deref(), Some("1001"));
  assert_eq!(h.state.pos.next_document_id().await.unwrap(), "2");
  assert_eq!(h.state.pos.gift_card("GC1").await.unwrap().unwrap().balance, 30.0);
}

#[tokio::test]
async fn unsigned_webhook_is_refused() {
  let h = Harness::new().await;
  let req = Request::builder()
    .method("POST")
    .uri("/webhooks/storefront")
    .header(auth::SIGNATURE_HEADER, "bm90IGEgc2lnbmF0dXJl")
    .header("x-shopify-topic", "orders/create")
    .body(Body::from(order().to_string()))
    .unwrap();
  assert_eq!(h.send(req).await.0, StatusCode::UNAUTHORIZED);
  assert!(h.state.middleware.order("820982911946154508").await.unwrap().is_none());
}

#[tokio::test]
async fn customer_consent_and_deletes_flow_back() {
  let h = Harness::new().await;
  assert!(h.state.pos.put_customer(&customer("1001", "jane@example.com", None)).await.is_ok());

  let update = json!({ "id": 7, "email": "jane@example.com", "email_marketing_consent": { "state": "unsubscribed" } });
  assert_eq!(h.webhook("customers/update", update).await, StatusCode::OK);
  assert!(!h.state.pos.customer("1001").await.unwrap().unwrap().email_1_subscribed);

  assert_eq!(h.webhook("draft_orders/delete", json!({ "id": 99 })).await, StatusCode::OK);
  assert_eq!(h.webhook("products/delete", json!({ "id": 42 })).await, StatusCode::OK);
  assert_eq!(h.webhook("shop/update", json!({ "id": 1 })).await, StatusCode::OK);
  assert_eq!(h.webhook("orders/create", json!({ "id": 1 })).await, StatusCode::UNPROCESSABLE_ENTITY);
}

// ─── SMS ─────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn stop_keyword_clears_sms_consent() {
  let h = Harness::new().await;
  assert!(h.state.pos.put_customer(&customer("1001", "jane@example.com", Some("828-555-0100"))).await.is_ok());

  let (status, reply) = h.sms("/webhooks/sms?token=sms-token", "From=%2B18285550100&Body=Stop&MessageSid=SM1").await;
  assert_eq!(status, StatusCode::OK);
  assert!(reply.contains("<Response>"));
  assert!(!h.state.pos.customer("1001").await.unwrap().unwrap().sms_1_subscribed);
  assert_eq!(h.state.middleware.sms_events("unsubscribe").await.unwrap(), 1);
  let history = h.state.middleware.sms_history("828-555-0100").await.unwrap();
  assert_eq!(history.len(), 1);
  assert_eq!(history[0].direction, "inbound");

  let (status, _) = h.sms("/webhooks/sms?token=wrong", "From=%2B18285550100&Body=START").await;
  assert_eq!(status, StatusCode::UNAUTHORIZED);
  assert!(!h.state.pos.customer("1001").await.unwrap().unwrap().sms_1_subscribed);
}

#[tokio::test]
async fn delivery_status_is_recorded() {
  let h = Harness::new().await;
  let form = "MessageSid=SM9&MessageStatus=undelivered&To=%2B18285550100&ErrorCode=30003";
  let (status, _) = h.sms("/webhooks/sms/status?token=sms-token", form).await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(h.state.middleware.sms_events("undelivered").await.unwrap(), 1);
}
