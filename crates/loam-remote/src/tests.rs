use std::{
  collections::VecDeque,
  sync::Arc,
  time::{Duration, Instant},
};

use axum::{
  Router,
  extract::State,
  http::{HeaderMap, StatusCode},
  response::{IntoResponse, Response},
};
use loam_core::{
  config::{Secret, SmsConfig, StorefrontConfig},
  notify::{CaptchaVerifier, DocumentPrinter, SmsSender},
  remote::RemoteError,
  storefront::{CollectionInput, Storefront},
};
use parking_lot::Mutex;
use tokio::net::TcpListener;

use crate::{
  HttpStorefront, RateLimiter, Recaptcha, SpoolPrinter, TwilioSms, http::RESET_MS_HEADER,
  storefront::{TOKEN_HEADER, topic_enum, topic_path},
};

// ─── Stub server ─────────────────────────────────────────────────────────────

/// One canned reply: status, extra header, body.
type Canned = (StatusCode, Option<(&'static str, &'static str)>, String);

#[derive(Clone, Default)]
struct Stub {
  replies:  Arc<Mutex<VecDeque<Canned>>>,
  requests: Arc<Mutex<Vec<(String, HeaderMap, String)>>>,
}

async fn reply(State(stub): State<Stub>, req: axum::extract::Request) -> Response {
  let path = req.uri().path().to_string();
  let headers = req.headers().clone();
  let body = axum::body::to_bytes(req.into_body(), usize::MAX).await.unwrap_or_default();
  stub.requests.lock().push((path, headers, String::from_utf8_lossy(&body).into_owned()));
  let next = stub.replies.lock().pop_front();
  match next {
    Some((status, header, body)) => {
      let mut response = (status, body).into_response();
      if let Some((name, value)) = header {
        response.headers_mut().insert(name, value.parse().unwrap());
      }
      response
    }
    None => (StatusCode::INTERNAL_SERVER_ERROR, "no canned reply").into_response(),
  }
}

async fn serve(replies: Vec<Canned>) -> (String, Stub) {
  let stub = Stub::default();
  stub.replies.lock().extend(replies);
  let app = Router::new().fallback(reply).with_state(stub.clone());
  let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
  let addr = listener.local_addr().unwrap();
  tokio::spawn(async move {
    axum::serve(listener, app).await.unwrap();
  });
  (format!("http://{addr}"), stub)
}

fn ok(body: serde_json::Value) -> Canned { (StatusCode::OK, None, body.to_string()) }

fn storefront(base: &str) -> HttpStorefront {
  let cfg = StorefrontConfig {
    shop:                "garden.example.com".into(),
    api_version:         "2024-10".into(),
    access_token:        Secret::new("shpat_secret"),
    webhook_secret:      Secret::default(),
    webhook_destination: String::new(),
    webhook_topics:      vec![],
    timeout_secs:        5,
    bulk_timeout_secs:   5,
    base_url:            Some(base.to_string()),
  };
  HttpStorefront::new(&cfg, Arc::new(RateLimiter::new())).unwrap()
}

fn collection() -> CollectionInput {
  CollectionInput {
    title:            "Perennials".into(),
    handle:           "perennials".into(),
    description_html: String::new(),
    sort_position:    1,
    published:        true,
    image_src:        None,
    parent_id:        None,
  }
}

fn created_collection() -> Canned {
  ok(serde_json::json!({
    "data": { "collectionCreate": { "collection": { "id": "gid://Collection/7" }, "userErrors": [] } }
  }))
}

// ─── Storefront ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn graphql_requests_carry_the_token_and_return_ids() {
  let (base, stub) = serve(vec![created_collection()]).await;
  let id = storefront(&base).create_collection(&collection()).await.unwrap();
  assert_eq!(id, "gid://Collection/7");

  let requests = stub.requests.lock();
  let (path, headers, body) = &requests[0];
  assert_eq!(path, "/admin/api/2024-10/graphql.json");
  assert_eq!(headers.get(TOKEN_HEADER).unwrap(), "shpat_secret");
  assert!(body.contains("\"descriptionHtml\""), "{body}");
}

#[tokio::test]
async fn throttled_request_pauses_then_retries_once() {
  let (base, stub) = serve(vec![
    (StatusCode::TOO_MANY_REQUESTS, Some((RESET_MS_HEADER, "200")), String::new()),
    created_collection(),
  ])
  .await;
  let started = Instant::now();
  let id = storefront(&base).create_collection(&collection()).await.unwrap();
  assert_eq!(id, "gid://Collection/7");
  assert!(started.elapsed() >= Duration::from_millis(190));
  assert_eq!(stub.requests.lock().len(), 2);
}

#[tokio::test]
async fn second_throttle_is_reported_as_transient() {
  let (base, stub) = serve(vec![
    (StatusCode::TOO_MANY_REQUESTS, Some((RESET_MS_HEADER, "10")), String::new()),
    (StatusCode::TOO_MANY_REQUESTS, Some((RESET_MS_HEADER, "10")), String::new()),
  ])
  .await;
  let err = storefront(&base).create_collection(&collection()).await.unwrap_err();
  assert!(matches!(err, RemoteError::Throttled { .. }), "{err:?}");
  assert!(err.is_transient());
  assert_eq!(stub.requests.lock().len(), 2);
}

#[tokio::test]
async fn user_errors_are_validation_failures() {
  let (base, _) = serve(vec![ok(serde_json::json!({
    "data": { "collectionCreate": {
      "collection": null,
      "userErrors": [{ "field": ["title"], "message": "Title can't be blank" }]
    } }
  }))])
  .await;
  let err = storefront(&base).create_collection(&collection()).await.unwrap_err();
  match err {
    RemoteError::Validation { body, .. } => assert!(body.contains("can't be blank"), "{body}"),
    other => panic!("expected validation, got {other:?}"),
  }
}

#[tokio::test]
async fn server_errors_are_transient_and_not_retried() {
  let (base, stub) =
    serve(vec![(StatusCode::BAD_GATEWAY, None, "upstream down".into())]).await;
  let err = storefront(&base).delete_collection("gid://Collection/7").await.unwrap_err();
  assert!(matches!(err, RemoteError::Server { status: 502, .. }), "{err:?}");
  assert!(err.is_transient());
  assert_eq!(stub.requests.lock().len(), 1);
}

#[tokio::test]
async fn deleting_customers_tolerates_missing_ones() {
  let (base, stub) = serve(vec![
    (StatusCode::NOT_FOUND, None, "{}".into()),
    (StatusCode::OK, None, "{}".into()),
  ])
  .await;
  storefront(&base)
    .delete_customers(&["gid://Customer/1".into(), "gid://Customer/2".into()])
    .await
    .unwrap();
  let paths: Vec<String> = stub.requests.lock().iter().map(|(p, ..)| p.clone()).collect();
  assert_eq!(paths, [
    "/admin/api/2024-10/customers/1.json",
    "/admin/api/2024-10/customers/2.json"
  ]);
}

#[tokio::test]
async fn inventory_location_is_looked_up_once() {
  let located = ok(serde_json::json!({ "data": { "locations": { "nodes": [{ "id": "gid://Location/1" }] } } }));
  let set = || {
    ok(serde_json::json!({
      "data": { "inventorySetQuantities": { "inventoryAdjustmentGroup": { "id": "g" }, "userErrors": [] } }
    }))
  };
  let (base, stub) = serve(vec![located, set(), set()]).await;
  let shop = storefront(&base);
  shop.set_inventory("gid://InventoryItem/3", 5).await.unwrap();
  shop.set_inventory("gid://InventoryItem/3", -2).await.unwrap();

  let requests = stub.requests.lock();
  assert_eq!(requests.len(), 3);
  assert!(requests[2].2.contains("\"quantity\":0"), "{}", requests[2].2);
}

#[test]
fn webhook_topics_convert_between_forms() {
  assert_eq!(topic_enum("orders/create"), "ORDERS_CREATE");
  assert_eq!(topic_enum("draft_orders/delete"), "DRAFT_ORDERS_DELETE");
  assert_eq!(topic_path("DRAFT_ORDERS_DELETE"), "draft_orders/delete");
  assert_eq!(topic_path("CUSTOMERS_UPDATE"), "customers/update");
}

// ─── Notification clients ────────────────────────────────────────────────────

fn sms_config(base: &str) -> SmsConfig {
  SmsConfig {
    account_sid:   "AC123".into(),
    auth_token:    Secret::new("twilio-token"),
    from_number:   "828-555-0100".into(),
    staff_numbers: vec![],
    base_url:      base.to_string(),
    inbound_token: Secret::default(),
  }
}

#[tokio::test]
async fn sms_in_test_mode_never_reaches_the_provider() {
  let (base, stub) = serve(vec![]).await;
  let sms = TwilioSms::new(&sms_config(&base), Arc::new(RateLimiter::new()), true).unwrap();
  let id = sms.send_sms("828-123-4567", "Your plants are ready").await.unwrap();
  assert!(id.starts_with("test-"));
  assert!(stub.requests.lock().is_empty());
}

#[tokio::test]
async fn sms_posts_a_form_with_e164_numbers() {
  let (base, stub) = serve(vec![ok(serde_json::json!({ "sid": "SM1" }))]).await;
  let sms = TwilioSms::new(&sms_config(&base), Arc::new(RateLimiter::new()), false).unwrap();
  assert_eq!(sms.send_sms("(828) 123-4567", "hi").await.unwrap(), "SM1");

  let requests = stub.requests.lock();
  let (path, headers, body) = &requests[0];
  assert_eq!(path, "/2010-04-01/Accounts/AC123/Messages.json");
  assert!(headers.contains_key("authorization"));
  assert!(body.contains("To=%2B18281234567"), "{body}");
}

#[tokio::test]
async fn captcha_reports_the_verdict() {
  let (base, _) = serve(vec![
    ok(serde_json::json!({ "success": true })),
    ok(serde_json::json!({ "success": false, "error-codes": ["invalid-input-response"] })),
  ])
  .await;
  let captcha = Recaptcha::new(base, Secret::new("s"), Arc::new(RateLimiter::new())).unwrap();
  assert!(captcha.verify("good", Some("10.0.0.1")).await.unwrap());
  assert!(!captcha.verify("bad", None).await.unwrap());
  assert!(!captcha.verify("  ", None).await.unwrap());
}

#[tokio::test]
async fn printer_spools_one_file_per_document() {
  let dir = tempfile::tempdir().unwrap();
  let printer = SpoolPrinter::new(dir.path().join("spool"));
  let path = printer.print("lead Jane/Doe", "<h1>Jane</h1>").await.unwrap();
  assert!(path.file_name().unwrap().to_string_lossy().ends_with("lead_Jane_Doe.html"));
  assert_eq!(std::fs::read_to_string(path).unwrap(), "<h1>Jane</h1>");
}
