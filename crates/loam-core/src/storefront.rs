//! The `Storefront` trait and the payload types exchanged with it.
//!
//! Payload structs serialize to the storefront's native (camelCase) input
//! shape. They are built by the entity model and are stable for a given entity
//! state, which is what makes payload fingerprints usable for diffing.
//!
//! The trait is implemented by `loam-remote`'s HTTP client; the sync engine's
//! tests implement it with an in-process fake.

use std::future::Future;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
  model::metafield::{MetafieldDefinition, OwnerType},
  remote::Result,
};

// ─── Catalog payloads ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionInput {
  pub title:            String,
  pub handle:           String,
  pub description_html: String,
  pub sort_position:    i64,
  pub published:        bool,
  /// Public URL of the collection image, when one exists.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub image_src:        Option<String>,
  /// Storefront id of the parent collection, for menu nesting.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub parent_id:        Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProductStatus {
  Active,
  Draft,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductInput {
  pub title:            String,
  pub handle:           String,
  pub description_html: String,
  pub vendor:           Option<String>,
  pub status:           ProductStatus,
  pub published:        bool,
  pub tags:             Vec<String>,
  /// Option name for bound families; `None` for single items.
  pub option_name:      Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VariantInput {
  pub sku:                String,
  pub price:              String,
  pub compare_at_price:   Option<String>,
  pub cost:               String,
  pub inventory_quantity: i64,
  pub option_value:       Option<String>,
  pub weight:             Option<f64>,
  /// Variant order within the product; the parent is position 1.
  pub position:           u32,
}

/// Identifiers assigned when a product is created.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ProductIds {
  pub product_id: String,
  pub option_id:  Option<String>,
}

/// Identifiers assigned when a variant is created.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct VariantIds {
  pub variant_id:      String,
  pub inventory_id:    Option<String>,
  pub option_value_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MediaContentType {
  Image,
  ExternalVideo,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaInput {
  pub media_content_type: MediaContentType,
  pub original_source:    String,
  pub alt:                String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetafieldInput {
  pub owner_id:  String,
  pub namespace: String,
  pub key:       String,
  #[serde(rename = "type")]
  pub kind:      String,
  pub value:     String,
}

/// A metafield value as stored on the storefront.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MetafieldSet {
  pub id:       String,
  pub owner_id: String,
  pub key:      String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetafieldRef {
  pub owner_id:  String,
  pub namespace: String,
  pub key:       String,
}

/// A metafield definition that already exists on the storefront.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RemoteDefinition {
  pub id:        String,
  pub namespace: String,
  pub key:       String,
}

// ─── Customer payloads ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MarketingState {
  Subscribed,
  Unsubscribed,
}

impl MarketingState {
  pub fn from_flag(subscribed: bool) -> Self {
    if subscribed { Self::Subscribed } else { Self::Unsubscribed }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressInput {
  pub first_name: Option<String>,
  pub last_name:  Option<String>,
  pub company:    Option<String>,
  pub address1:   Option<String>,
  pub address2:   Option<String>,
  pub city:       Option<String>,
  pub province:   Option<String>,
  pub zip:        Option<String>,
  pub country:    Option<String>,
  pub phone:      Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerInput {
  pub first_name:      Option<String>,
  pub last_name:       Option<String>,
  pub email:           Option<String>,
  pub phone:           Option<String>,
  pub email_marketing: MarketingState,
  pub sms_marketing:   MarketingState,
  pub tags:            Vec<String>,
  pub addresses:       Vec<AddressInput>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StoreCredit {
  pub account_id: String,
  pub balance:    f64,
}

// ─── Discount and gift-card payloads ─────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase", tag = "type", content = "value")]
pub enum DiscountValue {
  Percentage(f64),
  FixedAmount(f64),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BasicDiscountInput {
  pub title:            String,
  pub starts_at:        DateTime<Utc>,
  pub ends_at:          Option<DateTime<Utc>>,
  pub value:            DiscountValue,
  pub minimum_quantity: Option<u32>,
  pub variant_ids:      Vec<String>,
  /// Customer tags the discount is restricted to; empty means everyone.
  pub customer_tags:    Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BxgyDiscountInput {
  pub title:              String,
  pub starts_at:          DateTime<Utc>,
  pub ends_at:            Option<DateTime<Utc>>,
  pub buy_quantity:       u32,
  pub get_quantity:       u32,
  pub get_percentage:     f64,
  pub variants_to_add:    Vec<String>,
  pub variants_to_remove: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GiftCardInput {
  pub code:          String,
  pub initial_value: String,
  pub note:          String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DraftLineInput {
  pub variant_id: Option<String>,
  pub title:      String,
  pub quantity:   u32,
  pub price:      String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DraftOrderInput {
  pub customer_id: Option<String>,
  pub note:        String,
  pub line_items:  Vec<DraftLineInput>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookSubscription {
  pub id:          Option<String>,
  pub topic:       String,
  pub destination: String,
  pub format:      String,
}

// ─── Trait ───────────────────────────────────────────────────────────────────

/// The operations the hub performs against the e-commerce storefront.
///
/// Every call classifies its failure as a [`RemoteError`](crate::remote::RemoteError)
/// so callers can decide between retry-next-cycle and skip. Implementations
/// honour the process-wide rate limiter themselves.
pub trait Storefront: Send + Sync {
  // ── Collections ───────────────────────────────────────────────────────

  fn create_collection(
    &self,
    input: &CollectionInput,
  ) -> impl Future<Output = Result<String>> + Send;

  fn update_collection(
    &self,
    id: &str,
    input: &CollectionInput,
  ) -> impl Future<Output = Result<()>> + Send;

  fn delete_collection(&self, id: &str) -> impl Future<Output = Result<()>> + Send;

  fn add_to_collection(
    &self,
    collection_id: &str,
    product_ids: &[String],
  ) -> impl Future<Output = Result<()>> + Send;

  fn remove_from_collection(
    &self,
    collection_id: &str,
    product_ids: &[String],
  ) -> impl Future<Output = Result<()>> + Send;

  // ── Products & variants ───────────────────────────────────────────────

  fn create_product(
    &self,
    input: &ProductInput,
  ) -> impl Future<Output = Result<ProductIds>> + Send;

  fn update_product(
    &self,
    product_id: &str,
    input: &ProductInput,
  ) -> impl Future<Output = Result<()>> + Send;

  /// Deleting a product removes its variants and media.
  fn delete_product(&self, product_id: &str) -> impl Future<Output = Result<()>> + Send;

  fn create_variant(
    &self,
    product_id: &str,
    input: &VariantInput,
  ) -> impl Future<Output = Result<VariantIds>> + Send;

  fn update_variant(
    &self,
    product_id: &str,
    variant_id: &str,
    input: &VariantInput,
  ) -> impl Future<Output = Result<()>> + Send;

  fn delete_variant(
    &self,
    product_id: &str,
    variant_id: &str,
  ) -> impl Future<Output = Result<()>> + Send;

  fn set_inventory(
    &self,
    inventory_id: &str,
    quantity: i64,
  ) -> impl Future<Output = Result<()>> + Send;

  // ── Media ─────────────────────────────────────────────────────────────

  /// Attach media in order; returns the new media ids in the same order.
  fn create_media(
    &self,
    product_id: &str,
    media: &[MediaInput],
  ) -> impl Future<Output = Result<Vec<String>>> + Send;

  fn delete_media(
    &self,
    product_id: &str,
    media_ids: &[String],
  ) -> impl Future<Output = Result<()>> + Send;

  /// Move media to the given zero-based positions.
  fn reorder_media(
    &self,
    product_id: &str,
    moves: &[(String, u32)],
  ) -> impl Future<Output = Result<()>> + Send;

  // ── Metafields ────────────────────────────────────────────────────────

  fn set_metafields(
    &self,
    fields: &[MetafieldInput],
  ) -> impl Future<Output = Result<Vec<MetafieldSet>>> + Send;

  fn delete_metafields(
    &self,
    fields: &[MetafieldRef],
  ) -> impl Future<Output = Result<()>> + Send;

  fn list_metafield_definitions(
    &self,
    owner: OwnerType,
  ) -> impl Future<Output = Result<Vec<RemoteDefinition>>> + Send;

  fn create_metafield_definition(
    &self,
    definition: &MetafieldDefinition,
  ) -> impl Future<Output = Result<String>> + Send;

  // ── Customers ─────────────────────────────────────────────────────────

  fn find_customer_by_email(
    &self,
    email: &str,
  ) -> impl Future<Output = Result<Option<String>>> + Send;

  fn find_customer_by_phone(
    &self,
    phone: &str,
  ) -> impl Future<Output = Result<Option<String>>> + Send;

  fn create_customer(
    &self,
    input: &CustomerInput,
  ) -> impl Future<Output = Result<String>> + Send;

  fn update_customer(
    &self,
    id: &str,
    input: &CustomerInput,
  ) -> impl Future<Output = Result<()>> + Send;

  /// Bulk delete; uses the longer bulk timeout.
  fn delete_customers(&self, ids: &[String]) -> impl Future<Output = Result<()>> + Send;

  fn store_credit(
    &self,
    customer_id: &str,
  ) -> impl Future<Output = Result<Option<StoreCredit>>> + Send;

  /// Credit the customer's store-credit account, creating it if needed;
  /// returns the account id.
  fn credit_store_credit(
    &self,
    customer_id: &str,
    amount: f64,
  ) -> impl Future<Output = Result<String>> + Send;

  fn debit_store_credit(
    &self,
    account_id: &str,
    amount: f64,
  ) -> impl Future<Output = Result<()>> + Send;

  // ── Discounts ─────────────────────────────────────────────────────────

  fn create_basic_discount(
    &self,
    input: &BasicDiscountInput,
  ) -> impl Future<Output = Result<String>> + Send;

  fn update_basic_discount(
    &self,
    id: &str,
    input: &BasicDiscountInput,
  ) -> impl Future<Output = Result<()>> + Send;

  fn create_bxgy_discount(
    &self,
    input: &BxgyDiscountInput,
  ) -> impl Future<Output = Result<String>> + Send;

  fn update_bxgy_discount(
    &self,
    id: &str,
    input: &BxgyDiscountInput,
  ) -> impl Future<Output = Result<()>> + Send;

  fn set_discount_active(
    &self,
    id: &str,
    active: bool,
  ) -> impl Future<Output = Result<()>> + Send;

  fn delete_discount(&self, id: &str) -> impl Future<Output = Result<()>> + Send;

  // ── Gift cards ────────────────────────────────────────────────────────

  fn create_gift_card(
    &self,
    input: &GiftCardInput,
  ) -> impl Future<Output = Result<String>> + Send;

  /// Positive credits, negative debits.
  fn adjust_gift_card(
    &self,
    id: &str,
    delta: f64,
  ) -> impl Future<Output = Result<()>> + Send;

  fn deactivate_gift_card(&self, id: &str) -> impl Future<Output = Result<()>> + Send;

  // ── Orders ────────────────────────────────────────────────────────────

  fn fulfill_order(&self, order_id: &str) -> impl Future<Output = Result<()>> + Send;

  fn cancel_order(&self, order_id: &str) -> impl Future<Output = Result<()>> + Send;

  fn create_draft_order(
    &self,
    input: &DraftOrderInput,
  ) -> impl Future<Output = Result<String>> + Send;

  fn delete_draft_order(&self, id: &str) -> impl Future<Output = Result<()>> + Send;

  // ── Webhooks ──────────────────────────────────────────────────────────

  fn list_webhooks(&self) -> impl Future<Output = Result<Vec<WebhookSubscription>>> + Send;

  fn create_webhook(
    &self,
    subscription: &WebhookSubscription,
  ) -> impl Future<Output = Result<String>> + Send;

  fn delete_webhook(&self, id: &str) -> impl Future<Output = Result<()>> + Send;
}

/// Format a money amount the way the storefront expects it.
pub fn money(amount: f64) -> String { format!("{amount:.2}") }
