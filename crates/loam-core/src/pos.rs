//! Typed rows read from the point-of-sale store.
//!
//! These mirror the fixed subset of POS tables the hub consumes. Entities in
//! [`crate::model`] are constructed from them.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::model::metafield::SpecField;

// ─── Items ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemRow {
  pub item_no:       String,
  /// Groups sibling variants into one storefront product.
  pub binding_id:    Option<String>,
  /// Staff-pinned parent of a bound family; overrides price election.
  pub parent_pin:    bool,
  /// Parent flag maintained by the sync engine.
  pub is_parent:     bool,
  pub web_enabled:   bool,
  pub web_visible:   bool,
  pub active:        bool,
  pub web_title:     Option<String>,
  pub descr:         String,
  pub long_descr:    Option<String>,
  pub html_descr:    Option<String>,
  pub price_1:       f64,
  /// Wholesale price.
  pub price_2:       Option<f64>,
  pub sale_price:    Option<f64>,
  pub cost:          f64,
  pub qty_available: i64,
  pub variant_name:  Option<String>,
  pub variant_size:  Option<String>,
  pub brand:         Option<String>,
  pub weight:        Option<f64>,
  /// Category codes in assignment order.
  pub categories:    Vec<String>,
  pub specs:         BTreeMap<SpecField, String>,
  pub video_urls:    Vec<String>,
  pub last_maint:    DateTime<Utc>,
}

impl ItemRow {
  /// Title shown on the storefront; falls back to the register description.
  pub fn title(&self) -> &str {
    self
      .web_title
      .as_deref()
      .filter(|t| !t.trim().is_empty())
      .unwrap_or(&self.descr)
  }

  pub fn spec(&self, field: SpecField) -> Option<&str> {
    self.specs.get(&field).map(String::as_str).filter(|v| !v.trim().is_empty())
  }

  pub fn is_on_sale(&self) -> bool { self.spec(SpecField::IsOnSale) == Some("Y") }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryRow {
  pub code:        String,
  pub parent_code: Option<String>,
  pub name:        String,
  pub description: Option<String>,
  pub sort:        i64,
  pub web_enabled: bool,
  pub visible:     bool,
  pub last_maint:  DateTime<Utc>,
}

/// A brand (POS profile code).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrandRow {
  pub code:        String,
  pub name:        String,
  pub description: Option<String>,
  pub web_enabled: bool,
  pub last_maint:  DateTime<Utc>,
}

// ─── Customers ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AddressRow {
  pub first_name: Option<String>,
  pub last_name:  Option<String>,
  pub company:    Option<String>,
  pub address_1:  Option<String>,
  pub address_2:  Option<String>,
  pub city:       Option<String>,
  pub state:      Option<String>,
  pub zip:        Option<String>,
  pub country:    Option<String>,
  pub phone:      Option<String>,
}

impl AddressRow {
  pub fn is_usable(&self) -> bool {
    [&self.address_1, &self.city, &self.zip]
      .iter()
      .all(|f| f.as_deref().is_some_and(|v| !v.trim().is_empty()))
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomerRow {
  pub cust_no:            String,
  pub first_name:         Option<String>,
  pub last_name:          Option<String>,
  pub email_1:            Option<String>,
  pub email_1_subscribed: bool,
  pub email_2:            Option<String>,
  pub email_2_subscribed: bool,
  pub mobile_1:           Option<String>,
  pub sms_1_subscribed:   bool,
  pub mobile_2:           Option<String>,
  pub sms_2_subscribed:   bool,
  pub loyalty_points:     i64,
  pub category:           String,
  pub birth_month:        Option<u32>,
  pub spouse_birth_month: Option<u32>,
  pub wholesale_tier:     Option<String>,
  pub web_enabled:        bool,
  pub address:            AddressRow,
  pub last_maint:         DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShipToRow {
  pub cust_no:  String,
  pub ship_seq: i64,
  pub address:  AddressRow,
}

/// Fields needed to add a customer to the POS.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewCustomer {
  pub first_name: String,
  pub last_name:  String,
  pub email:      Option<String>,
  pub phone:      Option<String>,
  pub category:   String,
  pub address:    AddressRow,
}

// ─── Promotions ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromotionGroupRow {
  pub group_code: String,
  pub descr:      String,
  pub enabled:    bool,
  pub begin_date: Option<NaiveDate>,
  /// Seconds after midnight; `0` means start of day.
  pub begin_time: i64,
  pub end_date:   Option<NaiveDate>,
  /// Seconds after midnight; `0` means end of day.
  pub end_time:   i64,
  pub last_maint: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromotionRuleRow {
  pub group_code:      String,
  pub rule_seq_no:     i64,
  pub descr:           String,
  pub enabled:         bool,
  /// Comma-separated customer categories; empty means everyone.
  pub customer_filter: Option<String>,
  /// Comma-separated item categories matched in addition to listed items.
  pub item_filter:     Option<String>,
  pub is_bogo:         bool,
  pub bogo_buy_qty:    i64,
  pub bogo_get_qty:    i64,
  pub badge_suffix:    Option<String>,
  /// `R` retail, `W` wholesale, `B` both.
  pub audience:        String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceBreakRow {
  pub group_code:  String,
  pub rule_seq_no: i64,
  pub min_qty:     f64,
  /// `D` percent discount, `A` amount off, `F` fixed price.
  pub method:      String,
  pub amount:      f64,
}

/// An item resolved into a rule, with the price needed to compute its sale
/// price.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleItemRow {
  pub group_code:  String,
  pub rule_seq_no: i64,
  pub item_no:     String,
  pub price_1:     f64,
}

// ─── Documents ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRow {
  pub doc_id:      String,
  /// `T` ticket/order, `H` hold.
  pub doc_type:    String,
  pub order_no:    Option<String>,
  pub cust_no:     Option<String>,
  /// `open`, `closed`, `voided`.
  pub status:      String,
  pub web_invoice: bool,
  pub subtotal:    f64,
  pub tax:         f64,
  pub total:       f64,
  pub created:     DateTime<Utc>,
  pub last_maint:  DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentLineRow {
  pub doc_id:   String,
  pub line_seq: i64,
  pub item_no:  String,
  pub descr:    String,
  pub qty:      f64,
  pub price:    f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentPaymentRow {
  pub doc_id:       String,
  pub pay_seq:      i64,
  /// `WEB`, `GIFT`, `LOYALTY`.
  pub pay_code:     String,
  pub amount:       f64,
  pub gift_card_no: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentDiscountRow {
  pub doc_id:   String,
  pub disc_seq: i64,
  pub code:     String,
  pub amount:   f64,
}

// ─── Gift cards & loyalty ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GiftCardRow {
  pub gfc_no:      String,
  pub balance:     f64,
  pub orig_amount: f64,
  pub issued:      Option<NaiveDate>,
  pub web_enabled: bool,
  pub last_maint:  DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GiftCardActivityRow {
  pub gfc_no: String,
  pub doc_id: String,
  /// Negative for redemptions.
  pub amount: f64,
  pub reason: String,
  pub at:     DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoyaltyEntryRow {
  pub cust_no: String,
  pub doc_id:  Option<String>,
  /// Negative for redemptions.
  pub points:  i64,
  pub reason:  String,
  pub at:      DateTime<Utc>,
}
