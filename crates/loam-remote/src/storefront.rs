//! The storefront's admin API over HTTP.
//!
//! Catalog, customer, discount, metafield, order and webhook operations are
//! GraphQL mutations. Bulk customer deletes and gift cards use the REST
//! endpoints.

use std::{sync::Arc, time::Duration};

use loam_core::{
  config::StorefrontConfig,
  model::metafield::{MetafieldDefinition, OwnerType},
  remote::{RemoteError, Result},
  sanitize::e164,
  storefront::{
    BasicDiscountInput, BxgyDiscountInput, CollectionInput, CustomerInput, DiscountValue,
    DraftOrderInput, GiftCardInput, MediaInput, MetafieldInput, MetafieldRef, MetafieldSet,
    ProductIds, ProductInput, RemoteDefinition, StoreCredit, Storefront, VariantIds, VariantInput,
    WebhookSubscription, money,
  },
};
use parking_lot::Mutex;
use reqwest::{Client, Method, RequestBuilder};
use serde::Serialize;
use serde_json::{Value, json};

use crate::{Error, RateLimiter, http};

const SERVICE: &str = "storefront";

/// Header carrying the admin access token.
pub const TOKEN_HEADER: &str = "X-Shopify-Access-Token";

// ─── JSON helpers ────────────────────────────────────────────────────────────

fn decode(message: impl Into<String>) -> RemoteError {
  RemoteError::Decode { service: SERVICE, message: message.into() }
}

fn at<'a>(value: &'a Value, path: &[&str]) -> &'a Value {
  path.iter().fold(value, |v, key| &v[*key])
}

fn string_at(value: &Value, path: &[&str]) -> Result<String> {
  at(value, path)
    .as_str()
    .map(str::to_string)
    .ok_or_else(|| decode(format!("missing {}", path.join("."))))
}

fn opt_string_at(value: &Value, path: &[&str]) -> Option<String> {
  at(value, path).as_str().map(str::to_string)
}

fn nodes<'a>(value: &'a Value, path: &[&str]) -> impl Iterator<Item = &'a Value> + use<'a> {
  at(value, path).as_array().into_iter().flatten()
}

fn to_value<T: Serialize>(input: &T) -> Result<Value> {
  serde_json::to_value(input).map_err(|e| decode(e.to_string()))
}

/// `input` with an `id` member added.
fn with_id<T: Serialize>(id: &str, input: &T) -> Result<Value> {
  let mut value = to_value(input)?;
  if let Value::Object(map) = &mut value {
    map.insert("id".into(), Value::String(id.to_string()));
  }
  Ok(value)
}

/// Any non-empty `*userErrors` list in a mutation result.
fn user_errors(result: &Value) -> Option<String> {
  result.as_object()?.iter().find_map(|(key, value)| {
    let errors = value.as_array().filter(|a| key.ends_with("serErrors") && !a.is_empty())?;
    Some(Value::Array(errors.clone()).to_string())
  })
}

/// `orders/create` → `ORDERS_CREATE`.
pub fn topic_enum(topic: &str) -> String { topic.replace('/', "_").to_uppercase() }

/// `DRAFT_ORDERS_DELETE` → `draft_orders/delete`.
pub fn topic_path(value: &str) -> String {
  let lower = value.to_lowercase();
  match lower.rsplit_once('_') {
    Some((resource, action)) => format!("{resource}/{action}"),
    None => lower,
  }
}

/// A numeric id from a global id, e.g. `gid://shop/Customer/42` → `42`.
fn legacy_id(id: &str) -> &str { id.rsplit('/').next().unwrap_or(id) }

fn owner_enum(owner: OwnerType) -> &'static str { owner.into() }

// ─── Documents ───────────────────────────────────────────────────────────────

const COLLECTION_CREATE: &str = "mutation($input: CollectionInput!) {
  collectionCreate(input: $input) { collection { id } userErrors { field message } } }";
const COLLECTION_UPDATE: &str = "mutation($input: CollectionInput!) {
  collectionUpdate(input: $input) { collection { id } userErrors { field message } } }";
const COLLECTION_DELETE: &str = "mutation($input: CollectionDeleteInput!) {
  collectionDelete(input: $input) { deletedCollectionId userErrors { field message } } }";
const COLLECTION_ADD: &str = "mutation($id: ID!, $productIds: [ID!]!) {
  collectionAddProducts(id: $id, productIds: $productIds) { collection { id } userErrors { field message } } }";
const COLLECTION_REMOVE: &str = "mutation($id: ID!, $productIds: [ID!]!) {
  collectionRemoveProducts(id: $id, productIds: $productIds) { job { id } userErrors { field message } } }";

const PRODUCT_CREATE: &str = "mutation($input: ProductInput!) {
  productCreate(input: $input) { product { id options { id } } userErrors { field message } } }";
const PRODUCT_UPDATE: &str = "mutation($input: ProductInput!) {
  productUpdate(input: $input) { product { id } userErrors { field message } } }";
const PRODUCT_DELETE: &str = "mutation($input: ProductDeleteInput!) {
  productDelete(input: $input) { deletedProductId userErrors { field message } } }";
const VARIANTS_CREATE: &str = "mutation($productId: ID!, $variants: [ProductVariantsBulkInput!]!) {
  productVariantsBulkCreate(productId: $productId, variants: $variants) {
    productVariants { id inventoryItem { id } selectedOptions { optionValue { id } } }
    userErrors { field message } } }";
const VARIANTS_UPDATE: &str = "mutation($productId: ID!, $variants: [ProductVariantsBulkInput!]!) {
  productVariantsBulkUpdate(productId: $productId, variants: $variants) {
    productVariants { id } userErrors { field message } } }";
const VARIANTS_DELETE: &str = "mutation($productId: ID!, $variantsIds: [ID!]!) {
  productVariantsBulkDelete(productId: $productId, variantsIds: $variantsIds) {
    product { id } userErrors { field message } } }";
const LOCATIONS: &str = "{ locations(first: 1) { nodes { id } } }";
const INVENTORY_SET: &str = "mutation($input: InventorySetQuantitiesInput!) {
  inventorySetQuantities(input: $input) { inventoryAdjustmentGroup { id } userErrors { field message } } }";

const MEDIA_CREATE: &str = "mutation($productId: ID!, $media: [CreateMediaInput!]!) {
  productCreateMedia(productId: $productId, media: $media) {
    media { id } mediaUserErrors { field message } } }";
const MEDIA_DELETE: &str = "mutation($productId: ID!, $mediaIds: [ID!]!) {
  productDeleteMedia(productId: $productId, mediaIds: $mediaIds) {
    deletedMediaIds mediaUserErrors { field message } } }";
const MEDIA_REORDER: &str = "mutation($id: ID!, $moves: [MoveInput!]!) {
  productReorderMedia(id: $id, moves: $moves) { job { id } mediaUserErrors { field message } } }";

const METAFIELDS_SET: &str = "mutation($metafields: [MetafieldsSetInput!]!) {
  metafieldsSet(metafields: $metafields) {
    metafields { id key owner { ... on Node { id } } } userErrors { field message } } }";
const METAFIELDS_DELETE: &str = "mutation($metafields: [MetafieldIdentifierInput!]!) {
  metafieldsDelete(metafields: $metafields) { deletedMetafields { key } userErrors { field message } } }";
const DEFINITIONS: &str = "query($ownerType: MetafieldOwnerType!) {
  metafieldDefinitions(first: 250, ownerType: $ownerType) { nodes { id namespace key } } }";
const DEFINITION_CREATE: &str = "mutation($definition: MetafieldDefinitionInput!) {
  metafieldDefinitionCreate(definition: $definition) {
    createdDefinition { id } userErrors { field message } } }";

const CUSTOMER_SEARCH: &str = "query($query: String!) {
  customers(first: 1, query: $query) { nodes { id } } }";
const CUSTOMER_CREATE: &str = "mutation($input: CustomerInput!) {
  customerCreate(input: $input) { customer { id } userErrors { field message } } }";
const CUSTOMER_UPDATE: &str = "mutation($input: CustomerInput!) {
  customerUpdate(input: $input) { customer { id } userErrors { field message } } }";
const STORE_CREDIT: &str = "query($id: ID!) {
  customer(id: $id) { storeCreditAccounts(first: 1) { nodes { id balance { amount } } } } }";
const STORE_CREDIT_CREDIT: &str = "mutation($id: ID!, $creditInput: StoreCreditAccountCreditInput!) {
  storeCreditAccountCredit(id: $id, creditInput: $creditInput) {
    storeCreditAccountTransaction { account { id } } userErrors { field message } } }";
const STORE_CREDIT_DEBIT: &str = "mutation($id: ID!, $debitInput: StoreCreditAccountDebitInput!) {
  storeCreditAccountDebit(id: $id, debitInput: $debitInput) {
    storeCreditAccountTransaction { account { id } } userErrors { field message } } }";

const BASIC_CREATE: &str = "mutation($automaticBasicDiscount: DiscountAutomaticBasicInput!) {
  discountAutomaticBasicCreate(automaticBasicDiscount: $automaticBasicDiscount) {
    automaticDiscountNode { id } userErrors { field message } } }";
const BASIC_UPDATE: &str = "mutation($id: ID!, $automaticBasicDiscount: DiscountAutomaticBasicInput!) {
  discountAutomaticBasicUpdate(id: $id, automaticBasicDiscount: $automaticBasicDiscount) {
    automaticDiscountNode { id } userErrors { field message } } }";
const BXGY_CREATE: &str = "mutation($automaticBxgyDiscount: DiscountAutomaticBxgyInput!) {
  discountAutomaticBxgyCreate(automaticBxgyDiscount: $automaticBxgyDiscount) {
    automaticDiscountNode { id } userErrors { field message } } }";
const BXGY_UPDATE: &str = "mutation($id: ID!, $automaticBxgyDiscount: DiscountAutomaticBxgyInput!) {
  discountAutomaticBxgyUpdate(id: $id, automaticBxgyDiscount: $automaticBxgyDiscount) {
    automaticDiscountNode { id } userErrors { field message } } }";
const DISCOUNT_ACTIVATE: &str = "mutation($id: ID!) {
  discountAutomaticActivate(id: $id) { automaticDiscountNode { id } userErrors { field message } } }";
const DISCOUNT_DEACTIVATE: &str = "mutation($id: ID!) {
  discountAutomaticDeactivate(id: $id) { automaticDiscountNode { id } userErrors { field message } } }";
const DISCOUNT_DELETE: &str = "mutation($id: ID!) {
  discountAutomaticDelete(id: $id) { deletedAutomaticDiscountId userErrors { field message } } }";

const FULFILLMENT_ORDERS: &str = "query($id: ID!) {
  order(id: $id) { fulfillmentOrders(first: 20) { nodes { id status } } } }";
const FULFILLMENT_CREATE: &str = "mutation($fulfillment: FulfillmentInput!) {
  fulfillmentCreate(fulfillment: $fulfillment) { fulfillment { id } userErrors { field message } } }";
const ORDER_CANCEL: &str = "mutation($orderId: ID!) {
  orderCancel(orderId: $orderId, reason: OTHER, refund: false, restock: false, notifyCustomer: false) {
    job { id } orderCancelUserErrors { field message } } }";
const DRAFT_CREATE: &str = "mutation($input: DraftOrderInput!) {
  draftOrderCreate(input: $input) { draftOrder { id } userErrors { field message } } }";
const DRAFT_DELETE: &str = "mutation($input: DraftOrderDeleteInput!) {
  draftOrderDelete(input: $input) { deletedId userErrors { field message } } }";

const WEBHOOKS: &str = "{ webhookSubscriptions(first: 100) {
  nodes { id topic format endpoint { ... on WebhookHttpEndpoint { callbackUrl } } } } }";
const WEBHOOK_CREATE: &str = "mutation($topic: WebhookSubscriptionTopic!, $webhookSubscription: WebhookSubscriptionInput!) {
  webhookSubscriptionCreate(topic: $topic, webhookSubscription: $webhookSubscription) {
    webhookSubscription { id } userErrors { field message } } }";
const WEBHOOK_DELETE: &str = "mutation($id: ID!) {
  webhookSubscriptionDelete(id: $id) { deletedWebhookSubscriptionId userErrors { field message } } }";

// ─── Discount shapes ─────────────────────────────────────────────────────────

fn basic_discount(input: &BasicDiscountInput) -> Value {
  let value = match input.value {
    DiscountValue::Percentage(p) => json!({ "percentage": p }),
    DiscountValue::FixedAmount(a) => {
      json!({ "discountAmount": { "amount": money(a), "appliesOnEachItem": true } })
    }
  };
  let mut discount = json!({
    "title": input.title,
    "startsAt": input.starts_at,
    "endsAt": input.ends_at,
    "customerGets": {
      "value": value,
      "items": { "products": { "productVariantsToAdd": input.variant_ids } },
    },
  });
  if let Some(qty) = input.minimum_quantity {
    discount["minimumRequirement"] =
      json!({ "quantity": { "greaterThanOrEqualToQuantity": qty.to_string() } });
  }
  discount
}

fn bxgy_discount(input: &BxgyDiscountInput) -> Value {
  let items = json!({
    "products": {
      "productVariantsToAdd": input.variants_to_add,
      "productVariantsToRemove": input.variants_to_remove,
    }
  });
  json!({
    "title": input.title,
    "startsAt": input.starts_at,
    "endsAt": input.ends_at,
    "customerBuys": { "value": { "quantity": input.buy_quantity.to_string() }, "items": items },
    "customerGets": {
      "value": {
        "discountOnQuantity": {
          "quantity": input.get_quantity.to_string(),
          "effect": { "percentage": input.get_percentage },
        }
      },
      "items": items,
    },
  })
}

// ─── Client ──────────────────────────────────────────────────────────────────

pub struct HttpStorefront {
  client:       Client,
  limiter:      Arc<RateLimiter>,
  base:         String,
  token:        loam_core::config::Secret,
  bulk_timeout: Duration,
  /// Inventory location, looked up on first use.
  location:     Mutex<Option<String>>,
}

impl HttpStorefront {
  pub fn new(cfg: &StorefrontConfig, limiter: Arc<RateLimiter>) -> crate::Result<Self> {
    if cfg.access_token.is_empty() {
      return Err(Error::Config { what: "storefront access token", reason: "empty".into() });
    }
    let client = Client::builder().timeout(Duration::from_secs(cfg.timeout_secs)).build()?;
    let root = cfg
      .base_url
      .clone()
      .unwrap_or_else(|| format!("https://{}", cfg.shop.trim_end_matches('/')));
    Ok(Self {
      client,
      limiter,
      base: format!("{}/admin/api/{}", root.trim_end_matches('/'), cfg.api_version),
      token: cfg.access_token.clone(),
      bulk_timeout: Duration::from_secs(cfg.bulk_timeout_secs),
      location: Mutex::new(None),
    })
  }

  fn request(&self, method: Method, path: &str) -> RequestBuilder {
    self
      .client
      .request(method, format!("{}/{}", self.base, path.trim_start_matches('/')))
      .header(TOKEN_HEADER, self.token.expose())
  }

  /// Run one GraphQL document. With `op`, the named root field of `data` is
  /// returned and its user errors become `Validation` failures; without it the
  /// whole `data` object is returned.
  async fn graphql(&self, document: &str, variables: Value, op: Option<&str>) -> Result<Value> {
    let body = json!({ "query": document, "variables": variables });
    let response =
      http::send(&self.limiter, SERVICE, || self.request(Method::POST, "graphql.json").json(&body))
        .await?;
    let mut reply: Value = http::json(SERVICE, response).await?;

    if let Some(errors) = reply["errors"].as_array().filter(|e| !e.is_empty()) {
      let throttled = errors.iter().any(|e| e["extensions"]["code"] == "THROTTLED");
      if throttled {
        return Err(RemoteError::Throttled { service: SERVICE, retry_after: None });
      }
      return Err(RemoteError::validation(SERVICE, Value::Array(errors.clone()).to_string()));
    }
    let data = reply.get_mut("data").map(Value::take).unwrap_or(Value::Null);
    let Some(op) = op else {
      return Ok(data);
    };
    let result = data.get(op).cloned().unwrap_or(Value::Null);
    if let Some(errors) = user_errors(&result) {
      tracing::warn!(op, %errors, "storefront rejected mutation");
      return Err(RemoteError::validation(SERVICE, errors));
    }
    Ok(result)
  }

  async fn location_id(&self) -> Result<String> {
    if let Some(id) = self.location.lock().clone() {
      return Ok(id);
    }
    let data = self.graphql(LOCATIONS, json!({}), None).await?;
    let id = nodes(&data, &["locations", "nodes"])
      .next()
      .and_then(|n| n["id"].as_str())
      .map(str::to_string)
      .ok_or_else(|| decode("no inventory location"))?;
    *self.location.lock() = Some(id.clone());
    Ok(id)
  }

  async fn find_customer(&self, query: String) -> Result<Option<String>> {
    let data = self.graphql(CUSTOMER_SEARCH, json!({ "query": query }), None).await?;
    Ok(nodes(&data, &["customers", "nodes"]).next().and_then(|n| n["id"].as_str()).map(str::to_string))
  }

  async fn rest(&self, method: Method, path: &str, body: Option<Value>) -> Result<Value> {
    let response = http::send(&self.limiter, SERVICE, || {
      let req = self.request(method.clone(), path);
      match &body {
        Some(body) => req.json(body),
        None => req,
      }
    })
    .await?;
    let text = response.text().await.map_err(|e| decode(e.to_string()))?;
    if text.trim().is_empty() {
      return Ok(Value::Null);
    }
    serde_json::from_str(&text).map_err(|e| decode(e.to_string()))
  }
}

impl Storefront for HttpStorefront {
  // ── Collections ───────────────────────────────────────────────────────

  async fn create_collection(&self, input: &CollectionInput) -> Result<String> {
    let result =
      self.graphql(COLLECTION_CREATE, json!({ "input": input }), Some("collectionCreate")).await?;
    string_at(&result, &["collection", "id"])
  }

  async fn update_collection(&self, id: &str, input: &CollectionInput) -> Result<()> {
    let input = with_id(id, input)?;
    self.graphql(COLLECTION_UPDATE, json!({ "input": input }), Some("collectionUpdate")).await?;
    Ok(())
  }

  async fn delete_collection(&self, id: &str) -> Result<()> {
    self
      .graphql(COLLECTION_DELETE, json!({ "input": { "id": id } }), Some("collectionDelete"))
      .await?;
    Ok(())
  }

  async fn add_to_collection(&self, collection_id: &str, product_ids: &[String]) -> Result<()> {
    let vars = json!({ "id": collection_id, "productIds": product_ids });
    self.graphql(COLLECTION_ADD, vars, Some("collectionAddProducts")).await?;
    Ok(())
  }

  async fn remove_from_collection(&self, collection_id: &str, product_ids: &[String]) -> Result<()> {
    let vars = json!({ "id": collection_id, "productIds": product_ids });
    self.graphql(COLLECTION_REMOVE, vars, Some("collectionRemoveProducts")).await?;
    Ok(())
  }

  // ── Products & variants ───────────────────────────────────────────────

  async fn create_product(&self, input: &ProductInput) -> Result<ProductIds> {
    let result =
      self.graphql(PRODUCT_CREATE, json!({ "input": input }), Some("productCreate")).await?;
    Ok(ProductIds {
      product_id: string_at(&result, &["product", "id"])?,
      option_id:  nodes(&result, &["product", "options"])
        .next()
        .and_then(|o| o["id"].as_str())
        .map(str::to_string),
    })
  }

  async fn update_product(&self, product_id: &str, input: &ProductInput) -> Result<()> {
    let input = with_id(product_id, input)?;
    self.graphql(PRODUCT_UPDATE, json!({ "input": input }), Some("productUpdate")).await?;
    Ok(())
  }

  async fn delete_product(&self, product_id: &str) -> Result<()> {
    self
      .graphql(PRODUCT_DELETE, json!({ "input": { "id": product_id } }), Some("productDelete"))
      .await?;
    Ok(())
  }

  async fn create_variant(&self, product_id: &str, input: &VariantInput) -> Result<VariantIds> {
    let vars = json!({ "productId": product_id, "variants": [input] });
    let result = self.graphql(VARIANTS_CREATE, vars, Some("productVariantsBulkCreate")).await?;
    let variant = nodes(&result, &["productVariants"]).next().ok_or_else(|| decode("no variant"))?;
    Ok(VariantIds {
      variant_id:      string_at(variant, &["id"])?,
      inventory_id:    opt_string_at(variant, &["inventoryItem", "id"]),
      option_value_id: nodes(variant, &["selectedOptions"])
        .next()
        .and_then(|o| o["optionValue"]["id"].as_str())
        .map(str::to_string),
    })
  }

  async fn update_variant(&self, product_id: &str, variant_id: &str, input: &VariantInput) -> Result<()> {
    let variant = with_id(variant_id, input)?;
    let vars = json!({ "productId": product_id, "variants": [variant] });
    self.graphql(VARIANTS_UPDATE, vars, Some("productVariantsBulkUpdate")).await?;
    Ok(())
  }

  async fn delete_variant(&self, product_id: &str, variant_id: &str) -> Result<()> {
    let vars = json!({ "productId": product_id, "variantsIds": [variant_id] });
    self.graphql(VARIANTS_DELETE, vars, Some("productVariantsBulkDelete")).await?;
    Ok(())
  }

  async fn set_inventory(&self, inventory_id: &str, quantity: i64) -> Result<()> {
    let location = self.location_id().await?;
    let vars = json!({
      "input": {
        "name": "available",
        "reason": "correction",
        "ignoreCompareQuantity": true,
        "quantities": [{
          "inventoryItemId": inventory_id,
          "locationId": location,
          "quantity": quantity.max(0),
        }],
      }
    });
    self.graphql(INVENTORY_SET, vars, Some("inventorySetQuantities")).await?;
    Ok(())
  }

  // ── Media ─────────────────────────────────────────────────────────────

  async fn create_media(&self, product_id: &str, media: &[MediaInput]) -> Result<Vec<String>> {
    let vars = json!({ "productId": product_id, "media": media });
    let result = self.graphql(MEDIA_CREATE, vars, Some("productCreateMedia")).await?;
    let ids: Vec<String> =
      nodes(&result, &["media"]).filter_map(|m| m["id"].as_str().map(str::to_string)).collect();
    if ids.len() != media.len() {
      return Err(decode(format!("{} media created, {} requested", ids.len(), media.len())));
    }
    Ok(ids)
  }

  async fn delete_media(&self, product_id: &str, media_ids: &[String]) -> Result<()> {
    let vars = json!({ "productId": product_id, "mediaIds": media_ids });
    self.graphql(MEDIA_DELETE, vars, Some("productDeleteMedia")).await?;
    Ok(())
  }

  async fn reorder_media(&self, product_id: &str, moves: &[(String, u32)]) -> Result<()> {
    let moves: Vec<Value> = moves
      .iter()
      .map(|(id, pos)| json!({ "id": id, "newPosition": pos.to_string() }))
      .collect();
    self
      .graphql(MEDIA_REORDER, json!({ "id": product_id, "moves": moves }), Some("productReorderMedia"))
      .await?;
    Ok(())
  }

  // ── Metafields ────────────────────────────────────────────────────────

  async fn set_metafields(&self, fields: &[MetafieldInput]) -> Result<Vec<MetafieldSet>> {
    if fields.is_empty() {
      return Ok(Vec::new());
    }
    let result =
      self.graphql(METAFIELDS_SET, json!({ "metafields": fields }), Some("metafieldsSet")).await?;
    nodes(&result, &["metafields"])
      .map(|m| {
        Ok(MetafieldSet {
          id:       string_at(m, &["id"])?,
          owner_id: string_at(m, &["owner", "id"])?,
          key:      string_at(m, &["key"])?,
        })
      })
      .collect()
  }

  async fn delete_metafields(&self, fields: &[MetafieldRef]) -> Result<()> {
    if fields.is_empty() {
      return Ok(());
    }
    self
      .graphql(METAFIELDS_DELETE, json!({ "metafields": fields }), Some("metafieldsDelete"))
      .await?;
    Ok(())
  }

  async fn list_metafield_definitions(&self, owner: OwnerType) -> Result<Vec<RemoteDefinition>> {
    let data = self.graphql(DEFINITIONS, json!({ "ownerType": owner_enum(owner) }), None).await?;
    nodes(&data, &["metafieldDefinitions", "nodes"])
      .map(|d| {
        Ok(RemoteDefinition {
          id:        string_at(d, &["id"])?,
          namespace: string_at(d, &["namespace"])?,
          key:       string_at(d, &["key"])?,
        })
      })
      .collect()
  }

  async fn create_metafield_definition(&self, definition: &MetafieldDefinition) -> Result<String> {
    let validations: Vec<Value> = definition
      .validations
      .iter()
      .map(|v| json!({ "name": v.name, "value": v.value }))
      .collect();
    let vars = json!({
      "definition": {
        "name": definition.name,
        "description": definition.description,
        "namespace": definition.namespace,
        "key": definition.key,
        "type": definition.kind.storefront_name(),
        "ownerType": owner_enum(definition.owner),
        "validations": validations,
        "pin": definition.pin.is_some(),
      }
    });
    let result = self.graphql(DEFINITION_CREATE, vars, Some("metafieldDefinitionCreate")).await?;
    string_at(&result, &["createdDefinition", "id"])
  }

  // ── Customers ─────────────────────────────────────────────────────────

  async fn find_customer_by_email(&self, email: &str) -> Result<Option<String>> {
    let email: String = email.chars().filter(|c| !matches!(c, '"' | '\\')).collect();
    self.find_customer(format!("email:\"{email}\"")).await
  }

  async fn find_customer_by_phone(&self, phone: &str) -> Result<Option<String>> {
    let Some(phone) = e164(phone) else {
      return Ok(None);
    };
    self.find_customer(format!("phone:\"{phone}\"")).await
  }

  async fn create_customer(&self, input: &CustomerInput) -> Result<String> {
    let result =
      self.graphql(CUSTOMER_CREATE, json!({ "input": input }), Some("customerCreate")).await?;
    string_at(&result, &["customer", "id"])
  }

  async fn update_customer(&self, id: &str, input: &CustomerInput) -> Result<()> {
    let input = with_id(id, input)?;
    self.graphql(CUSTOMER_UPDATE, json!({ "input": input }), Some("customerUpdate")).await?;
    Ok(())
  }

  async fn delete_customers(&self, ids: &[String]) -> Result<()> {
    for id in ids {
      let path = format!("customers/{}.json", legacy_id(id));
      let outcome = http::send(&self.limiter, SERVICE, || {
        self.request(Method::DELETE, &path).timeout(self.bulk_timeout)
      })
      .await;
      match outcome {
        Ok(_) | Err(RemoteError::NotFound { .. }) => {}
        Err(err) => return Err(err),
      }
    }
    Ok(())
  }

  async fn store_credit(&self, customer_id: &str) -> Result<Option<StoreCredit>> {
    let data = self.graphql(STORE_CREDIT, json!({ "id": customer_id }), None).await?;
    let Some(account) = nodes(&data, &["customer", "storeCreditAccounts", "nodes"]).next() else {
      return Ok(None);
    };
    let balance = account["balance"]["amount"]
      .as_str()
      .and_then(|a| a.parse::<f64>().ok())
      .ok_or_else(|| decode("store credit balance"))?;
    Ok(Some(StoreCredit { account_id: string_at(account, &["id"])?, balance }))
  }

  async fn credit_store_credit(&self, customer_id: &str, amount: f64) -> Result<String> {
    let vars = json!({
      "id": customer_id,
      "creditInput": { "creditAmount": { "amount": money(amount), "currencyCode": "USD" } },
    });
    let result = self.graphql(STORE_CREDIT_CREDIT, vars, Some("storeCreditAccountCredit")).await?;
    string_at(&result, &["storeCreditAccountTransaction", "account", "id"])
  }

  async fn debit_store_credit(&self, account_id: &str, amount: f64) -> Result<()> {
    let vars = json!({
      "id": account_id,
      "debitInput": { "debitAmount": { "amount": money(amount), "currencyCode": "USD" } },
    });
    self.graphql(STORE_CREDIT_DEBIT, vars, Some("storeCreditAccountDebit")).await?;
    Ok(())
  }

  // ── Discounts ─────────────────────────────────────────────────────────

  async fn create_basic_discount(&self, input: &BasicDiscountInput) -> Result<String> {
    let vars = json!({ "automaticBasicDiscount": basic_discount(input) });
    let result = self.graphql(BASIC_CREATE, vars, Some("discountAutomaticBasicCreate")).await?;
    string_at(&result, &["automaticDiscountNode", "id"])
  }

  async fn update_basic_discount(&self, id: &str, input: &BasicDiscountInput) -> Result<()> {
    let vars = json!({ "id": id, "automaticBasicDiscount": basic_discount(input) });
    self.graphql(BASIC_UPDATE, vars, Some("discountAutomaticBasicUpdate")).await?;
    Ok(())
  }

  async fn create_bxgy_discount(&self, input: &BxgyDiscountInput) -> Result<String> {
    let vars = json!({ "automaticBxgyDiscount": bxgy_discount(input) });
    let result = self.graphql(BXGY_CREATE, vars, Some("discountAutomaticBxgyCreate")).await?;
    string_at(&result, &["automaticDiscountNode", "id"])
  }

  async fn update_bxgy_discount(&self, id: &str, input: &BxgyDiscountInput) -> Result<()> {
    let vars = json!({ "id": id, "automaticBxgyDiscount": bxgy_discount(input) });
    self.graphql(BXGY_UPDATE, vars, Some("discountAutomaticBxgyUpdate")).await?;
    Ok(())
  }

  async fn set_discount_active(&self, id: &str, active: bool) -> Result<()> {
    let (document, op) = if active {
      (DISCOUNT_ACTIVATE, "discountAutomaticActivate")
    } else {
      (DISCOUNT_DEACTIVATE, "discountAutomaticDeactivate")
    };
    self.graphql(document, json!({ "id": id }), Some(op)).await?;
    Ok(())
  }

  async fn delete_discount(&self, id: &str) -> Result<()> {
    self.graphql(DISCOUNT_DELETE, json!({ "id": id }), Some("discountAutomaticDelete")).await?;
    Ok(())
  }

  // ── Gift cards ────────────────────────────────────────────────────────

  async fn create_gift_card(&self, input: &GiftCardInput) -> Result<String> {
    let reply = self.rest(Method::POST, "gift_cards.json", Some(json!({ "gift_card": input }))).await?;
    match &reply["gift_card"]["id"] {
      Value::Number(n) => Ok(n.to_string()),
      Value::String(s) => Ok(s.clone()),
      _ => Err(decode("missing gift_card.id")),
    }
  }

  async fn adjust_gift_card(&self, id: &str, delta: f64) -> Result<()> {
    let body = json!({ "adjustment": { "amount": money(delta), "note": "POS balance sync" } });
    self.rest(Method::POST, &format!("gift_cards/{}/adjustments.json", legacy_id(id)), Some(body)).await?;
    Ok(())
  }

  async fn deactivate_gift_card(&self, id: &str) -> Result<()> {
    self.rest(Method::POST, &format!("gift_cards/{}/disable.json", legacy_id(id)), None).await?;
    Ok(())
  }

  // ── Orders ────────────────────────────────────────────────────────────

  async fn fulfill_order(&self, order_id: &str) -> Result<()> {
    let data = self.graphql(FULFILLMENT_ORDERS, json!({ "id": order_id }), None).await?;
    let open: Vec<Value> = nodes(&data, &["order", "fulfillmentOrders", "nodes"])
      .filter(|f| matches!(f["status"].as_str(), Some("OPEN" | "IN_PROGRESS")))
      .map(|f| json!({ "fulfillmentOrderId": f["id"] }))
      .collect();
    if open.is_empty() {
      return Ok(());
    }
    let vars = json!({ "fulfillment": { "lineItemsByFulfillmentOrder": open, "notifyCustomer": false } });
    self.graphql(FULFILLMENT_CREATE, vars, Some("fulfillmentCreate")).await?;
    Ok(())
  }

  async fn cancel_order(&self, order_id: &str) -> Result<()> {
    self.graphql(ORDER_CANCEL, json!({ "orderId": order_id }), Some("orderCancel")).await?;
    Ok(())
  }

  async fn create_draft_order(&self, input: &DraftOrderInput) -> Result<String> {
    let result =
      self.graphql(DRAFT_CREATE, json!({ "input": input }), Some("draftOrderCreate")).await?;
    string_at(&result, &["draftOrder", "id"])
  }

  async fn delete_draft_order(&self, id: &str) -> Result<()> {
    self.graphql(DRAFT_DELETE, json!({ "input": { "id": id } }), Some("draftOrderDelete")).await?;
    Ok(())
  }

  // ── Webhooks ──────────────────────────────────────────────────────────

  async fn list_webhooks(&self) -> Result<Vec<WebhookSubscription>> {
    let data = self.graphql(WEBHOOKS, json!({}), None).await?;
    nodes(&data, &["webhookSubscriptions", "nodes"])
      .map(|w| {
        Ok(WebhookSubscription {
          id:          opt_string_at(w, &["id"]),
          topic:       topic_path(&string_at(w, &["topic"])?),
          destination: opt_string_at(w, &["endpoint", "callbackUrl"]).unwrap_or_default(),
          format:      opt_string_at(w, &["format"]).unwrap_or_default().to_lowercase(),
        })
      })
      .collect()
  }

  async fn create_webhook(&self, subscription: &WebhookSubscription) -> Result<String> {
    let vars = json!({
      "topic": topic_enum(&subscription.topic),
      "webhookSubscription": {
        "callbackUrl": subscription.destination,
        "format": subscription.format.to_uppercase(),
      },
    });
    let result = self.graphql(WEBHOOK_CREATE, vars, Some("webhookSubscriptionCreate")).await?;
    string_at(&result, &["webhookSubscription", "id"])
  }

  async fn delete_webhook(&self, id: &str) -> Result<()> {
    self.graphql(WEBHOOK_DELETE, json!({ "id": id }), Some("webhookSubscriptionDelete")).await?;
    Ok(())
  }
}
