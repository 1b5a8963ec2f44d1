//! Rows of the middleware store: the mapping between POS identifiers and
//! storefront identifiers, plus the per-kind bookkeeping the sync engine
//! keeps between cycles.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::metafield::{CustomerField, MetafieldType, OwnerType, SpecField, Validation};

// ─── Catalog ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductMapping {
  pub id:                   Option<i64>,
  pub item_no:              String,
  pub binding_id:           Option<String>,
  pub is_parent:            bool,
  pub product_id:           Option<String>,
  pub variant_id:           Option<String>,
  pub inventory_id:         Option<String>,
  pub variant_name:         Option<String>,
  pub option_id:            Option<String>,
  pub option_value_id:      Option<String>,
  /// Storefront collection ids the product was last placed in.
  pub category_ids:         Vec<String>,
  pub meta_ids:             BTreeMap<SpecField, String>,
  pub variant_size_meta_id: Option<String>,
  /// Fingerprint of the family payload last pushed.
  pub payload_hash:         Option<String>,
  /// Available quantity at the last push.
  pub last_qty:             i64,
  pub last_maint:           DateTime<Utc>,
}

impl ProductMapping {
  pub fn new(item_no: impl Into<String>) -> Self {
    Self {
      id:                   None,
      item_no:              item_no.into(),
      binding_id:           None,
      is_parent:            false,
      product_id:           None,
      variant_id:           None,
      inventory_id:         None,
      variant_name:         None,
      option_id:            None,
      option_value_id:      None,
      category_ids:         Vec::new(),
      meta_ids:             BTreeMap::new(),
      variant_size_meta_id: None,
      payload_hash:         None,
      last_qty:             0,
      last_maint:           Utc::now(),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageMapping {
  pub id:               Option<i64>,
  /// File name on disk, e.g. `200373^1.jpg`.
  pub name:             String,
  pub item_no:          Option<String>,
  pub file_path:        String,
  pub product_id:       Option<String>,
  pub image_id:         Option<String>,
  pub thumbnail:        bool,
  pub image_number:     u32,
  pub sort_order:       u32,
  pub is_binding_image: bool,
  pub binding_id:       Option<String>,
  pub is_variant_image: bool,
  pub description:      Option<String>,
  pub size:             u64,
  /// Modification time of the file that was uploaded.
  pub modified:         DateTime<Utc>,
  pub last_maint:       DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoMapping {
  pub id:          Option<i64>,
  pub url:         String,
  pub item_no:     Option<String>,
  pub product_id:  Option<String>,
  pub media_id:    Option<String>,
  pub sort_order:  u32,
  pub binding_id:  Option<String>,
  pub description: Option<String>,
  pub last_maint:  DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionMapping {
  pub cp_id:        String,
  pub shop_id:      Option<String>,
  pub menu_id:      Option<String>,
  pub parent_cp_id: Option<String>,
  pub name:         String,
  pub sort:         i64,
  pub description:  Option<String>,
  pub visible:      bool,
  pub image_size:   Option<u64>,
  /// Brand collections are keyed by profile code instead of category code.
  pub is_brand:     bool,
  pub last_maint:   DateTime<Utc>,
}

// ─── Customers ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomerMapping {
  pub id:              Option<i64>,
  pub cp_cust_no:      String,
  pub shop_cust_id:    Option<String>,
  pub store_credit_id: Option<String>,
  pub meta_ids:        BTreeMap<CustomerField, String>,
  /// Loyalty balance last converged on the storefront.
  pub loyalty_balance: i64,
  pub payload_hash:    Option<String>,
  pub last_maint:      DateTime<Utc>,
}

impl CustomerMapping {
  pub fn new(cust_no: impl Into<String>) -> Self {
    Self {
      id:              None,
      cp_cust_no:      cust_no.into(),
      shop_cust_id:    None,
      store_credit_id: None,
      meta_ids:        BTreeMap::new(),
      loyalty_balance: 0,
      payload_hash:    None,
      last_maint:      Utc::now(),
    }
  }
}

// ─── Commerce ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderMapping {
  pub id:       Option<i64>,
  /// Storefront order id.
  pub order_no: String,
  pub doc_id:   String,
  pub status:   String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DraftOrderMapping {
  pub id:       Option<i64>,
  pub doc_id:   String,
  pub draft_id: String,
  pub created:  DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GiftCertificateMapping {
  pub id:          Option<i64>,
  pub gfc_no:      String,
  pub shop_gfc_id: String,
  /// Balance last converged on the storefront.
  pub balance:     f64,
  pub last_maint:  DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromotionMapping {
  pub id:          Option<i64>,
  pub group_code:  String,
  pub rule_seq_no: i64,
  /// Storefront discount id; absent for rules materialized only in the POS.
  pub shop_id:     Option<String>,
  pub enabled:     bool,
  pub last_maint:  DateTime<Utc>,
}

/// An item currently included in a buy-X-get-Y discount.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BogoLine {
  pub shop_id:     String,
  pub group_code:  String,
  pub rule_seq_no: i64,
  pub item_no:     String,
}

/// An item whose POS sale price is set by a rule.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FixedLine {
  pub group_code:  String,
  pub rule_seq_no: i64,
  pub item_no:     String,
}

/// A one-off storefront discount code (e.g. a welcome coupon).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscountMapping {
  pub id:      Option<i64>,
  pub shop_id: String,
  pub disc_id: String,
  pub created: DateTime<Utc>,
}

// ─── Definitions and subscriptions ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetafieldMapping {
  pub meta_id:     String,
  pub name:        String,
  pub descr:       String,
  pub namespace:   String,
  pub key:         String,
  pub kind:        MetafieldType,
  pub pinned:      bool,
  pub pinned_pos:  Option<u32>,
  pub owner:       OwnerType,
  pub validations: Vec<Validation>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookMapping {
  pub hook_id:     String,
  pub topic:       String,
  pub destination: String,
  pub format:      String,
  pub domain:      Option<String>,
}
