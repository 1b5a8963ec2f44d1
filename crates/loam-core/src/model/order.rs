//! Orders in both directions: storefront orders synthesized into POS
//! documents, POS status changes pushed back, and POS holds published as
//! draft orders.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::{
  Error, Result,
  model::cents,
  pos::{DocumentDiscountRow, DocumentLineRow, DocumentPaymentRow, DocumentRow},
  storefront::{DraftLineInput, DraftOrderInput, money},
};

/// Note attribute carrying the loyalty points redeemed at checkout.
pub const LOYALTY_ATTRIBUTE: &str = "loyalty_points_redeemed";

// ─── Inbound ─────────────────────────────────────────────────────────────────

fn money_string<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<f64, D::Error> {
  #[derive(Deserialize)]
  #[serde(untagged)]
  enum Raw {
    Num(f64),
    Str(String),
  }
  match Raw::deserialize(d)? {
    Raw::Num(n) => Ok(n),
    Raw::Str(s) => s.trim().parse().map_err(serde::de::Error::custom),
  }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct WebOrderCustomer {
  pub id: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct WebLineItem {
  #[serde(default)]
  pub sku:      Option<String>,
  pub title:    String,
  pub quantity: u32,
  #[serde(deserialize_with = "money_string")]
  pub price:    f64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct WebDiscountCode {
  pub code:   String,
  #[serde(deserialize_with = "money_string")]
  pub amount: f64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct WebGiftCard {
  /// Full code when the storefront exposes it, otherwise the last characters.
  pub code:   String,
  #[serde(deserialize_with = "money_string")]
  pub amount: f64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NoteAttribute {
  pub name:  String,
  pub value: serde_json::Value,
}

/// The `orders/create` webhook body, reduced to what the POS needs.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct WebOrder {
  pub id:              serde_json::Value,
  /// Human order number, e.g. `#1042` or `1042`.
  pub name:            String,
  #[serde(default)]
  pub email:           Option<String>,
  #[serde(default)]
  pub phone:           Option<String>,
  #[serde(default)]
  pub customer:        Option<WebOrderCustomer>,
  pub line_items:      Vec<WebLineItem>,
  #[serde(deserialize_with = "money_string")]
  pub subtotal_price:  f64,
  #[serde(deserialize_with = "money_string")]
  pub total_tax:       f64,
  #[serde(deserialize_with = "money_string")]
  pub total_price:     f64,
  #[serde(default)]
  pub discount_codes:  Vec<WebDiscountCode>,
  #[serde(default)]
  pub gift_cards:      Vec<WebGiftCard>,
  #[serde(default)]
  pub note_attributes: Vec<NoteAttribute>,
  pub created_at:      DateTime<Utc>,
}

fn id_string(value: &serde_json::Value) -> String {
  match value {
    serde_json::Value::String(s) => s.clone(),
    other => other.to_string(),
  }
}

impl WebOrder {
  pub fn order_id(&self) -> String { id_string(&self.id) }

  pub fn customer_id(&self) -> Option<String> { self.customer.as_ref().map(|c| id_string(&c.id)) }

  pub fn loyalty_redeemed(&self) -> i64 {
    self
      .note_attributes
      .iter()
      .find(|a| a.name == LOYALTY_ATTRIBUTE)
      .and_then(|a| match &a.value {
        serde_json::Value::Number(n) => n.as_i64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
      })
      .unwrap_or(0)
      .max(0)
  }

  pub fn validate(&self) -> Result<()> {
    let key = self.order_id();
    if self.line_items.is_empty() {
      return Err(Error::missing("order", key, "line_items"));
    }
    if let Some(line) = self.line_items.iter().find(|l| l.sku.as_deref().is_none_or(|s| s.trim().is_empty())) {
      return Err(Error::invalid("order", key, format!("line {:?} has no sku", line.title)));
    }
    if self.total_price < 0.0 {
      return Err(Error::invalid("order", key, "negative total"));
    }
    Ok(())
  }
}

/// A gift-card debit to apply while synthesizing an order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GiftCardDebit {
  pub code:   String,
  pub amount: f64,
}

/// Everything the POS receives for one storefront order.
#[derive(Debug, Clone, PartialEq)]
pub struct PosDocument {
  pub header:         DocumentRow,
  pub lines:          Vec<DocumentLineRow>,
  pub payments:       Vec<DocumentPaymentRow>,
  pub discounts:      Vec<DocumentDiscountRow>,
  pub gift_debits:    Vec<GiftCardDebit>,
  pub loyalty_points: i64,
}

impl PosDocument {
  /// Synthesize the POS document for `order`, owned by `cust_no` when the
  /// customer is known.
  pub fn from_web_order(order: &WebOrder, doc_id: &str, cust_no: Option<String>) -> Result<Self> {
    order.validate()?;
    let now = Utc::now();

    let lines = order
      .line_items
      .iter()
      .enumerate()
      .map(|(idx, l)| DocumentLineRow {
        doc_id:   doc_id.to_string(),
        line_seq: idx as i64 + 1,
        item_no:  l.sku.clone().unwrap_or_default().trim().to_string(),
        descr:    l.title.clone(),
        qty:      f64::from(l.quantity),
        price:    cents(l.price),
      })
      .collect();

    let discounts = order
      .discount_codes
      .iter()
      .enumerate()
      .map(|(idx, d)| DocumentDiscountRow {
        doc_id:   doc_id.to_string(),
        disc_seq: idx as i64 + 1,
        code:     d.code.clone(),
        amount:   cents(d.amount),
      })
      .collect();

    let gift_debits: Vec<GiftCardDebit> = order
      .gift_cards
      .iter()
      .filter(|g| g.amount > 0.0)
      .map(|g| GiftCardDebit { code: g.code.trim().to_uppercase(), amount: cents(g.amount) })
      .collect();
    let loyalty_points = order.loyalty_redeemed();

    let mut payments = Vec::new();
    let mut seq = 1;
    for debit in &gift_debits {
      payments.push(DocumentPaymentRow {
        doc_id:       doc_id.to_string(),
        pay_seq:      seq,
        pay_code:     "GIFT".into(),
        amount:       debit.amount,
        gift_card_no: Some(debit.code.clone()),
      });
      seq += 1;
    }
    if loyalty_points > 0 {
      payments.push(DocumentPaymentRow {
        doc_id:       doc_id.to_string(),
        pay_seq:      seq,
        pay_code:     "LOYALTY".into(),
        amount:       loyalty_points as f64,
        gift_card_no: None,
      });
      seq += 1;
    }
    let covered: f64 = payments.iter().map(|p| p.amount).sum();
    let remainder = cents(order.total_price - covered);
    if remainder > 0.0 {
      payments.push(DocumentPaymentRow {
        doc_id:       doc_id.to_string(),
        pay_seq:      seq,
        pay_code:     "WEB".into(),
        amount:       remainder,
        gift_card_no: None,
      });
    }

    Ok(Self {
      header: DocumentRow {
        doc_id:      doc_id.to_string(),
        doc_type:    "T".into(),
        order_no:    Some(order.name.trim_start_matches('#').to_string()),
        cust_no,
        status:      OrderStatus::Open.as_str().into(),
        web_invoice: false,
        subtotal:    cents(order.subtotal_price),
        tax:         cents(order.total_tax),
        total:       cents(order.total_price),
        created:     order.created_at,
        last_maint:  now,
      },
      lines,
      payments,
      discounts,
      gift_debits,
      loyalty_points,
    })
  }
}

// ─── Status ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderStatus {
  Open,
  Closed,
  Voided,
}

impl OrderStatus {
  pub fn parse(raw: &str) -> Option<Self> {
    match raw.trim().to_ascii_lowercase().as_str() {
      "open" => Some(Self::Open),
      "closed" => Some(Self::Closed),
      "voided" | "void" => Some(Self::Voided),
      _ => None,
    }
  }

  pub fn as_str(self) -> &'static str {
    match self {
      Self::Open => "open",
      Self::Closed => "closed",
      Self::Voided => "voided",
    }
  }
}

/// What the storefront must do when a mapped order's POS status moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderAction {
  Fulfill,
  Cancel,
}

/// `recorded` is the status last pushed; `current` the POS status now.
pub fn order_action(recorded: OrderStatus, current: OrderStatus) -> Option<OrderAction> {
  match (recorded, current) {
    (OrderStatus::Open, OrderStatus::Closed) => Some(OrderAction::Fulfill),
    (OrderStatus::Open | OrderStatus::Closed, OrderStatus::Voided) => Some(OrderAction::Cancel),
    _ => None,
  }
}

// ─── Draft orders ────────────────────────────────────────────────────────────

/// Draft order payload for a POS hold. `variant_for` resolves an item number
/// to its storefront variant id; unmapped items become custom lines.
pub fn draft_order(
  header: &DocumentRow,
  lines: &[DocumentLineRow],
  customer_id: Option<String>,
  variant_for: impl Fn(&str) -> Option<String>,
) -> Result<DraftOrderInput> {
  if lines.is_empty() {
    return Err(Error::missing("draft order", &header.doc_id, "lines"));
  }
  let line_items = lines
    .iter()
    .map(|l| DraftLineInput {
      variant_id: variant_for(&l.item_no),
      title:      l.descr.clone(),
      quantity:   l.qty.max(1.0).round() as u32,
      price:      money(l.price),
    })
    .collect();
  Ok(DraftOrderInput {
    customer_id,
    note: format!("POS hold {}", header.doc_id),
    line_items,
  })
}

#[cfg(test)]
mod tests {
  use super::*;

  const ORDER: &str = r##"{
    "id": 5501,
    "name": "#1042",
    "email": "j@d.com",
    "customer": { "id": 777 },
    "line_items": [
      { "sku": "200373", "title": "Green Giant", "quantity": 2, "price": "29.99" }
    ],
    "subtotal_price": "59.98",
    "total_tax": "4.20",
    "total_price": "64.18",
    "discount_codes": [{ "code": "WELCOME10", "amount": "5.00" }],
    "gift_cards": [{ "code": "gc1234", "amount": "20.00" }],
    "note_attributes": [{ "name": "loyalty_points_redeemed", "value": "10" }],
    "created_at": "2026-05-01T14:00:00Z"
  }"##;

  #[test]
  fn web_order_becomes_document() {
    let order: WebOrder = serde_json::from_str(ORDER).unwrap();
    assert_eq!(order.order_id(), "5501");
    assert_eq!(order.customer_id().as_deref(), Some("777"));

    let doc = PosDocument::from_web_order(&order, "WEB-1042", Some("10042".into())).unwrap();
    assert_eq!(doc.header.order_no.as_deref(), Some("1042"));
    assert_eq!(doc.lines.len(), 1);
    assert_eq!(doc.lines[0].qty, 2.0);
    assert_eq!(doc.gift_debits, vec![GiftCardDebit { code: "GC1234".into(), amount: 20.0 }]);
    assert_eq!(doc.loyalty_points, 10);

    let codes: Vec<&str> = doc.payments.iter().map(|p| p.pay_code.as_str()).collect();
    assert_eq!(codes, vec!["GIFT", "LOYALTY", "WEB"]);
    let paid: f64 = doc.payments.iter().map(|p| p.amount).sum();
    assert!((paid - 64.18).abs() < 0.001);
  }

  #[test]
  fn line_without_sku_is_rejected() {
    let mut order: WebOrder = serde_json::from_str(ORDER).unwrap();
    order.line_items[0].sku = None;
    assert!(PosDocument::from_web_order(&order, "WEB-1", None).is_err());
  }

  #[test]
  fn status_transitions() {
    assert_eq!(order_action(OrderStatus::Open, OrderStatus::Closed), Some(OrderAction::Fulfill));
    assert_eq!(order_action(OrderStatus::Closed, OrderStatus::Voided), Some(OrderAction::Cancel));
    assert_eq!(order_action(OrderStatus::Closed, OrderStatus::Closed), None);
    assert_eq!(order_action(OrderStatus::Voided, OrderStatus::Closed), None);
  }

  #[test]
  fn draft_uses_known_variants() {
    let header = DocumentRow {
      doc_id:      "H-9".into(),
      doc_type:    "H".into(),
      order_no:    None,
      cust_no:     Some("10042".into()),
      status:      "open".into(),
      web_invoice: true,
      subtotal:    10.0,
      tax:         0.0,
      total:       10.0,
      created:     Utc::now(),
      last_maint:  Utc::now(),
    };
    let line = |item: &str| DocumentLineRow {
      doc_id:   "H-9".into(),
      line_seq: 1,
      item_no:  item.into(),
      descr:    "Mulch".into(),
      qty:      1.0,
      price:    5.0,
    };
    let draft = draft_order(&header, &[line("A"), line("B")], None, |item| {
      (item == "A").then(|| "v-a".to_string())
    })
    .unwrap();
    assert_eq!(draft.line_items[0].variant_id.as_deref(), Some("v-a"));
    assert_eq!(draft.line_items[1].variant_id, None);
    assert_eq!(draft.line_items[1].price, "5.00");
  }
}
