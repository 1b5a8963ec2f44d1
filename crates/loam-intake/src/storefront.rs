//! `POST /webhooks/storefront`: signed storefront events.
//!
//! The raw body is checked against the base64 HMAC-SHA256 signature header
//! before anything is parsed, then dispatched on the topic header:
//!
//! | Topic | Effect |
//! |-------|--------|
//! | `orders/create` | Synthesize the POS document and record the order |
//! | `customers/update` | Copy email marketing consent to the POS |
//! | `customers/delete` | Unmap the customer |
//! | `products/delete` | Unmap the product and its media |
//! | `draft_orders/delete` | Unmap the draft order |
//!
//! Other topics are acknowledged and ignored.

use axum::{Json, extract::State, http::HeaderMap};
use bytes::Bytes;
use loam_core::{
  mapping::OrderMapping,
  model::order::{OrderStatus, PosDocument, WebOrder},
  queue::Broker,
  sanitize::normalize_email,
};
use serde::{Deserialize, de::DeserializeOwned};
use serde_json::{Value, json};

use crate::{AppState, Error, Result, auth};

pub const TOPIC_HEADER: &str = "x-shopify-topic";

/// The identifying part of a deleted resource.
#[derive(Debug, Deserialize)]
struct Resource {
  id:                   Value,
  #[serde(default)]
  admin_graphql_api_id: Option<String>,
}

impl Resource {
  /// Global id first, then the bare id, as mappings may hold either.
  fn ids(&self) -> Vec<String> {
    let bare = match &self.id {
      Value::String(s) => s.clone(),
      other => other.to_string(),
    };
    self.admin_graphql_api_id.iter().cloned().chain(std::iter::once(bare)).collect()
  }
}

#[derive(Debug, Deserialize)]
struct Consent {
  state: String,
}

#[derive(Debug, Deserialize)]
struct CustomerUpdate {
  #[serde(default)]
  email:                   Option<String>,
  #[serde(default)]
  email_marketing_consent: Option<Consent>,
  #[serde(default)]
  accepts_marketing:       Option<bool>,
}

pub async fn receive<Q: Broker>(
  State(state): State<AppState<Q>>,
  headers: HeaderMap,
  body: Bytes,
) -> Result<Json<Value>> {
  let log = &state.handlers.webhook;
  let signature = headers.get(auth::SIGNATURE_HEADER).and_then(|v| v.to_str().ok());
  auth::verify_webhook(&state.settings.webhook_secret, &body, signature)
    .inspect_err(|_| log.warn("storefront", "rejected webhook with a bad signature"))?;
  let topic = headers
    .get(TOPIC_HEADER)
    .and_then(|v| v.to_str().ok())
    .ok_or_else(|| Error::Payload("missing topic".into()))?
    .to_string();

  let handled = match topic.as_str() {
    "orders/create" => order_created(&state, &body).await,
    "customers/update" => customer_updated(&state, &body).await,
    "customers/delete" => customer_deleted(&state, &body).await,
    "products/delete" => product_deleted(&state, &body).await,
    "draft_orders/delete" => draft_deleted(&state, &body).await,
    other => Ok(format!("ignored topic {other}")),
  };
  match handled {
    Ok(note) => {
      log.info(&topic, note);
      Ok(Json(json!({ "success": true })))
    }
    Err(err) => {
      log.add_error_from(err.kind(), &topic, &err);
      Err(err)
    }
  }
}

fn parse<T: DeserializeOwned>(body: &[u8]) -> Result<T> {
  serde_json::from_slice(body).map_err(|e| Error::Payload(e.to_string()))
}

// ─── Orders ──────────────────────────────────────────────────────────────────

async fn order_created<Q>(state: &AppState<Q>, body: &[u8]) -> Result<String> {
  let order: WebOrder = parse(body)?;
  let order_no = order.order_id();
  if state.middleware.order(&order_no).await?.is_some() {
    return Ok(format!("order {order_no} already recorded"));
  }
  order.validate()?;

  let cust_no = order_customer(state, &order).await?;
  let doc_id = state.pos.next_document_id().await?;
  let document = PosDocument::from_web_order(&order, &doc_id, cust_no)?;
  state.pos.insert_document(&document).await.into_result("storefront.order_document")?;

  let mapping = OrderMapping {
    id: None,
    order_no: order_no.clone(),
    doc_id: doc_id.clone(),
    status: OrderStatus::Open.as_str().to_string(),
  };
  if let Err(err) = state.middleware.insert_order(&mapping).await.into_result("storefront.order_mapping") {
    let undone = state.pos.delete_document(&doc_id).await;
    if !undone.is_ok() {
      state.handlers.webhook.add_error(
        loam_core::log::ErrorKind::LocalPersistence,
        "orders/create",
        format!("document {doc_id} for order {order_no} could not be removed: {}", undone.message),
      );
    }
    return Err(err.into());
  }
  Ok(format!(
    "order {order_no} recorded as document {doc_id} ({} gift card debit(s), {} loyalty point(s))",
    document.gift_debits.len(),
    document.loyalty_points
  ))
}

/// The POS customer behind an order: the mapped storefront customer, else the
/// first POS customer with the order's email.
async fn order_customer<Q>(state: &AppState<Q>, order: &WebOrder) -> Result<Option<String>> {
  if let Some(shop_id) = order.customer_id() {
    if let Some(row) = state.middleware.customer_by_shop_id(&shop_id).await? {
      return Ok(Some(row.cp_cust_no));
    }
  }
  let Some(email) = order.email.as_deref().and_then(normalize_email) else {
    return Ok(None);
  };
  Ok(state.pos.customers_by_email(&email).await?.into_iter().next())
}

// ─── Customers ───────────────────────────────────────────────────────────────

async fn customer_updated<Q>(state: &AppState<Q>, body: &[u8]) -> Result<String> {
  let update: CustomerUpdate = parse(body)?;
  let Some(email) = update.email.as_deref().and_then(normalize_email) else {
    return Ok("customer has no usable email".into());
  };
  let subscribed = match (&update.email_marketing_consent, update.accepts_marketing) {
    (Some(consent), _) => consent.state.eq_ignore_ascii_case("subscribed"),
    (None, Some(accepts)) => accepts,
    (None, None) => return Ok("no consent in payload".into()),
  };
  let changed = state
    .pos
    .set_email_subscription(&email, subscribed)
    .await
    .into_result("storefront.customer_consent")?;
  Ok(format!("email consent {subscribed} applied to {changed} POS slot(s)"))
}

async fn customer_deleted<Q>(state: &AppState<Q>, body: &[u8]) -> Result<String> {
  let resource: Resource = parse(body)?;
  for id in resource.ids() {
    if let Some(row) = state.middleware.customer_by_shop_id(&id).await? {
      state.middleware.delete_customer(&row.cp_cust_no).await.into_result("storefront.customer_delete")?;
      return Ok(format!("customer {} unmapped", row.cp_cust_no));
    }
  }
  Ok("customer was not mapped".into())
}

// ─── Products & drafts ───────────────────────────────────────────────────────

async fn product_deleted<Q>(state: &AppState<Q>, body: &[u8]) -> Result<String> {
  let resource: Resource = parse(body)?;
  for id in resource.ids() {
    let rows = state.middleware.product_rows_by_product_id(&id).await?;
    if rows.is_empty() {
      continue;
    }
    state.middleware.delete_product(&id).await.into_result("storefront.product_delete")?;
    let items: Vec<&str> = rows.iter().map(|r| r.item_no.as_str()).collect();
    return Ok(format!("product {id} unmapped ({})", items.join(", ")));
  }
  Ok("product was not mapped".into())
}

async fn draft_deleted<Q>(state: &AppState<Q>, body: &[u8]) -> Result<String> {
  let resource: Resource = parse(body)?;
  let mut removed = 0;
  for id in resource.ids() {
    removed += state
      .middleware
      .delete_draft_by_remote_id(&id)
      .await
      .into_result("storefront.draft_delete")?;
  }
  Ok(format!("{removed} draft order row(s) removed"))
}
