//! Typed helpers over the point-of-sale store.
//!
//! Reads return typed rows; every mutation answers with an [`Envelope`] so
//! that callers decide whether a failure aborts the enclosing operation.

use std::{
  collections::{BTreeMap, BTreeSet},
  path::Path,
  sync::Arc,
};

use chrono::{DateTime, Utc};
use loam_core::{
  envelope::Envelope,
  log::ErrorHandler,
  model::{metafield::SpecField, order::PosDocument},
  pos::{
    AddressRow, BrandRow, CategoryRow, CustomerRow, DocumentLineRow, DocumentRow, GiftCardRow,
    ItemRow, LoyaltyEntryRow, NewCustomer, PriceBreakRow, PromotionGroupRow, PromotionRuleRow,
    RuleItemRow, ShipToRow,
  },
};
use rusqlite::{OptionalExtension, Row, params, params_from_iter, types::Value};

use crate::{
  Dal, QueryBuilder, Result,
  encode::{csv_at, date_at, dt_at, encode_csv, encode_date, encode_dt},
  schema::POS_SCHEMA,
};

/// First number handed out when the POS has no numeric customer yet.
const FIRST_CUST_NO: i64 = 100_001;

/// Document type of a POS hold (a quote awaiting payment).
pub const HOLD: &str = "H";

// ─── Column lists ────────────────────────────────────────────────────────────

const ITEM_COLUMNS: [&str; 20] = [
  "item_no",
  "binding_id",
  "parent_pin",
  "is_parent",
  "web_enabled",
  "web_visible",
  "active",
  "web_title",
  "descr",
  "long_descr",
  "price_1",
  "price_2",
  "sale_price",
  "cost",
  "variant_name",
  "variant_size",
  "brand",
  "weight",
  "video_urls",
  "last_maint",
];

fn item_columns() -> Vec<String> {
  ITEM_COLUMNS
    .iter()
    .map(|c| c.to_string())
    .chain(SpecField::all().map(SpecField::pos_column))
    .collect()
}

const CUSTOMER_COLUMNS: &str = "cust_no, first_name, last_name, email_1, email_1_subscribed, \
  email_2, email_2_subscribed, mobile_1, sms_1_subscribed, mobile_2, sms_2_subscribed, \
  loyalty_points, category, birth_month, spouse_birth_month, wholesale_tier, web_enabled, \
  company, address_1, address_2, city, state, zip, country, phone, last_maint";

const ADDRESS_COLUMNS: &str =
  "first_name, last_name, company, address_1, address_2, city, state, zip, country, phone";

const DOCUMENT_COLUMNS: &str =
  "doc_id, doc_type, order_no, cust_no, status, web_invoice, subtotal, tax, total, created, last_maint";

// ─── Row decoding ────────────────────────────────────────────────────────────

fn item_row(row: &Row<'_>) -> rusqlite::Result<ItemRow> {
  let mut specs = BTreeMap::new();
  for (offset, field) in SpecField::all().enumerate() {
    let value: Option<String> = row.get(ITEM_COLUMNS.len() + offset)?;
    if let Some(value) = value.filter(|v| !v.trim().is_empty()) {
      specs.insert(field, value);
    }
  }
  Ok(ItemRow {
    item_no: row.get(0)?,
    binding_id: row.get::<_, Option<String>>(1)?.filter(|b| !b.trim().is_empty()),
    parent_pin: row.get(2)?,
    is_parent: row.get(3)?,
    web_enabled: row.get(4)?,
    web_visible: row.get(5)?,
    active: row.get(6)?,
    web_title: row.get(7)?,
    descr: row.get(8)?,
    long_descr: row.get(9)?,
    html_descr: None,
    price_1: row.get(10)?,
    price_2: row.get(11)?,
    sale_price: row.get(12)?,
    cost: row.get(13)?,
    qty_available: 0,
    variant_name: row.get(14)?,
    variant_size: row.get(15)?,
    brand: row.get(16)?,
    weight: row.get(17)?,
    categories: Vec::new(),
    specs,
    video_urls: csv_at(row, 18)?,
    last_maint: dt_at(row, 19)?,
  })
}

/// Fill in the parts of an item that live in side tables.
fn attach_item_details(conn: &rusqlite::Connection, item: &mut ItemRow) -> rusqlite::Result<()> {
  let mut stmt = conn
    .prepare_cached("SELECT category FROM item_categories WHERE item_no = ?1 ORDER BY seq, category")?;
  item.categories = stmt
    .query_map(params![item.item_no], |r| r.get::<_, String>(0))?
    .collect::<rusqlite::Result<_>>()?;
  item.html_descr = conn
    .query_row("SELECT html FROM item_html WHERE item_no = ?1", params![item.item_no], |r| r.get(0))
    .optional()?;
  item.qty_available = conn
    .query_row(
      "SELECT qty_available FROM inventory WHERE item_no = ?1",
      params![item.item_no],
      |r| r.get(0),
    )
    .optional()?
    .unwrap_or(0);
  Ok(())
}

fn load_items(
  conn: &rusqlite::Connection,
  sql: &str,
  params: &[Value],
) -> rusqlite::Result<Vec<ItemRow>> {
  let mut stmt = conn.prepare(sql)?;
  let mut items = stmt
    .query_map(params_from_iter(params.iter()), item_row)?
    .collect::<rusqlite::Result<Vec<_>>>()?;
  for item in &mut items {
    attach_item_details(conn, item)?;
  }
  Ok(items)
}

fn family_query(binding_id: &str) -> (String, Vec<Value>) {
  QueryBuilder::select("items", &item_columns())
    .eq("binding_id", binding_id.to_string())
    .eq("web_enabled", true)
    .eq("active", true)
    .order_by("item_no")
    .build()
}

fn address_at(row: &Row<'_>, start: usize) -> rusqlite::Result<AddressRow> {
  Ok(AddressRow {
    first_name: row.get(start)?,
    last_name:  row.get(start + 1)?,
    company:    row.get(start + 2)?,
    address_1:  row.get(start + 3)?,
    address_2:  row.get(start + 4)?,
    city:       row.get(start + 5)?,
    state:      row.get(start + 6)?,
    zip:        row.get(start + 7)?,
    country:    row.get(start + 8)?,
    phone:      row.get(start + 9)?,
  })
}

fn customer_row(row: &Row<'_>) -> rusqlite::Result<CustomerRow> {
  let first_name: Option<String> = row.get(1)?;
  let last_name: Option<String> = row.get(2)?;
  Ok(CustomerRow {
    cust_no: row.get(0)?,
    email_1: row.get(3)?,
    email_1_subscribed: row.get(4)?,
    email_2: row.get(5)?,
    email_2_subscribed: row.get(6)?,
    mobile_1: row.get(7)?,
    sms_1_subscribed: row.get(8)?,
    mobile_2: row.get(9)?,
    sms_2_subscribed: row.get(10)?,
    loyalty_points: row.get(11)?,
    category: row.get(12)?,
    birth_month: row.get(13)?,
    spouse_birth_month: row.get(14)?,
    wholesale_tier: row.get(15)?,
    web_enabled: row.get(16)?,
    address: AddressRow {
      first_name: first_name.clone(),
      last_name:  last_name.clone(),
      company:    row.get(17)?,
      address_1:  row.get(18)?,
      address_2:  row.get(19)?,
      city:       row.get(20)?,
      state:      row.get(21)?,
      zip:        row.get(22)?,
      country:    row.get(23)?,
      phone:      row.get(24)?,
    },
    last_maint: dt_at(row, 25)?,
    first_name,
    last_name,
  })
}

fn ship_tos_for(conn: &rusqlite::Connection, cust_no: &str) -> rusqlite::Result<Vec<ShipToRow>> {
  let mut stmt = conn.prepare_cached(&format!(
    "SELECT cust_no, ship_seq, {ADDRESS_COLUMNS} FROM customer_ship_tos
     WHERE cust_no = ?1 ORDER BY ship_seq"
  ))?;
  stmt
    .query_map(params![cust_no], |row| {
      Ok(ShipToRow { cust_no: row.get(0)?, ship_seq: row.get(1)?, address: address_at(row, 2)? })
    })?
    .collect()
}

fn document_row(row: &Row<'_>) -> rusqlite::Result<DocumentRow> {
  Ok(DocumentRow {
    doc_id:      row.get(0)?,
    doc_type:    row.get(1)?,
    order_no:    row.get(2)?,
    cust_no:     row.get(3)?,
    status:      row.get(4)?,
    web_invoice: row.get(5)?,
    subtotal:    row.get(6)?,
    tax:         row.get(7)?,
    total:       row.get(8)?,
    created:     dt_at(row, 9)?,
    last_maint:  dt_at(row, 10)?,
  })
}

fn gift_card_row(row: &Row<'_>) -> rusqlite::Result<GiftCardRow> {
  Ok(GiftCardRow {
    gfc_no:      row.get(0)?,
    balance:     row.get(1)?,
    orig_amount: row.get(2)?,
    issued:      date_at(row, 3)?,
    web_enabled: row.get(4)?,
    last_maint:  dt_at(row, 5)?,
  })
}

// ─── PosDb ───────────────────────────────────────────────────────────────────

/// The rows that make up one promotion group.
#[derive(Debug, Clone, PartialEq)]
pub struct PromotionRows {
  pub group:  PromotionGroupRow,
  pub rules:  Vec<PromotionRuleRow>,
  pub breaks: Vec<PriceBreakRow>,
  pub items:  Vec<RuleItemRow>,
}

#[derive(Clone)]
pub struct PosDb {
  dal: Dal,
}

impl PosDb {
  pub async fn open(path: impl AsRef<Path>, errors: Arc<ErrorHandler>) -> Result<Self> {
    Ok(Self { dal: Dal::open(path, POS_SCHEMA, errors).await? })
  }

  pub async fn open_in_memory(errors: Arc<ErrorHandler>) -> Result<Self> {
    Ok(Self { dal: Dal::open_in_memory(POS_SCHEMA, errors).await? })
  }

  pub fn dal(&self) -> &Dal { &self.dal }

  // ─── Items ─────────────────────────────────────────────────────────────────

  /// Item numbers the POS presents as syncable.
  pub async fn syncable_item_numbers(&self) -> Result<BTreeSet<String>> {
    self
      .dal
      .read("pos.syncable_item_numbers", |conn| {
        let mut stmt =
          conn.prepare("SELECT item_no FROM items WHERE web_enabled = 1 AND active = 1")?;
        stmt.query_map([], |r| r.get(0))?.collect()
      })
      .await
  }

  pub async fn items(&self, item_nos: Vec<String>) -> Result<Vec<ItemRow>> {
    let (sql, params) = QueryBuilder::select("items", &item_columns())
      .is_in("item_no", item_nos)
      .order_by("item_no")
      .build();
    self.dal.read("pos.items", move |conn| load_items(conn, &sql, &params)).await
  }

  /// Every syncable member of a bound family.
  pub async fn family(&self, binding_id: &str) -> Result<Vec<ItemRow>> {
    let (sql, params) = family_query(binding_id);
    self.dal.read("pos.family", move |conn| load_items(conn, &sql, &params)).await
  }

  /// Product families with at least one member maintained after `since`, or
  /// whose product key (item number or binding id) is in `retry`. A changed
  /// bound item brings its whole family along.
  pub async fn changed_families(
    &self,
    since: DateTime<Utc>,
    retry: &[String],
  ) -> Result<Vec<Vec<ItemRow>>> {
    let (sql, params) = QueryBuilder::select("items", &item_columns())
      .eq("web_enabled", true)
      .eq("active", true)
      .changed_since("last_maint", encode_dt(since), &["item_no", "binding_id"], retry)
      .order_by("item_no")
      .build();
    self
      .dal
      .read("pos.changed_families", move |conn| {
        let changed = load_items(conn, &sql, &params)?;
        let mut families: BTreeMap<String, Vec<ItemRow>> = BTreeMap::new();
        for item in changed {
          match item.binding_id.clone() {
            Some(binding) => {
              if !families.contains_key(&binding) {
                let (family_sql, family_params) = family_query(&binding);
                let members = load_items(conn, &family_sql, &family_params)?;
                families.insert(binding, members);
              }
            }
            None => {
              families.insert(item.item_no.clone(), vec![item]);
            }
          }
        }
        Ok(families.into_values().filter(|f| !f.is_empty()).collect())
      })
      .await
  }

  /// Record the elected parent of a bound family.
  pub async fn set_parent(&self, binding_id: &str, parent_item: &str) -> Envelope {
    let (binding_id, parent_item) = (binding_id.to_string(), parent_item.to_string());
    self
      .dal
      .write("pos.set_parent", move |conn| {
        conn.execute(
          "UPDATE items SET is_parent = (item_no = ?2)
           WHERE binding_id = ?1 AND is_parent != (item_no = ?2)",
          params![binding_id, parent_item],
        )
      })
      .await
  }

  /// Bump `last_maint` so the items are picked up by the next product cycle.
  pub async fn touch_items(&self, item_nos: Vec<String>, at: DateTime<Utc>) -> Envelope {
    let at = encode_dt(at);
    self
      .dal
      .write("pos.touch_items", move |conn| {
        let tx = conn.transaction()?;
        let mut n = 0;
        {
          let mut stmt = tx.prepare("UPDATE items SET last_maint = ?2 WHERE item_no = ?1")?;
          for item in &item_nos {
            n += stmt.execute(params![item, at])?;
          }
        }
        tx.commit()?;
        Ok(n)
      })
      .await
  }

  /// Set or clear an item's sale state. Only rows whose state actually
  /// changes are touched, so re-applying the same state affects nothing.
  pub async fn set_sale(
    &self,
    item_no: &str,
    sale_price: Option<f64>,
    description: Option<String>,
  ) -> Envelope {
    let item_no = item_no.to_string();
    let on_sale = description.as_ref().map(|_| "Y");
    let now = encode_dt(Utc::now());
    self
      .dal
      .write("pos.set_sale", move |conn| {
        conn.execute(
          "UPDATE items
           SET sale_price = ?2, spec_is_on_sale = ?3, spec_sale_description = ?4, last_maint = ?5
           WHERE item_no = ?1
             AND (sale_price IS NOT ?2 OR spec_is_on_sale IS NOT ?3
                  OR spec_sale_description IS NOT ?4)",
          params![item_no, sale_price, on_sale, description, now],
        )
      })
      .await
  }

  /// Items currently flagged on sale.
  pub async fn on_sale_items(&self) -> Result<BTreeSet<String>> {
    self
      .dal
      .read("pos.on_sale_items", |conn| {
        let mut stmt = conn.prepare("SELECT item_no FROM items WHERE spec_is_on_sale = 'Y'")?;
        stmt.query_map([], |r| r.get(0))?.collect()
      })
      .await
  }

  // ─── Categories & brands ───────────────────────────────────────────────────

  pub async fn web_categories(&self) -> Result<Vec<CategoryRow>> {
    self
      .dal
      .read("pos.web_categories", |conn| {
        let mut stmt = conn.prepare(
          "SELECT code, parent_code, name, description, sort, web_enabled, visible, last_maint
           FROM categories WHERE web_enabled = 1 ORDER BY sort, code",
        )?;
        stmt
          .query_map([], |row| {
            Ok(CategoryRow {
              code:        row.get(0)?,
              parent_code: row.get::<_, Option<String>>(1)?.filter(|p| !p.trim().is_empty()),
              name:        row.get(2)?,
              description: row.get(3)?,
              sort:        row.get(4)?,
              web_enabled: row.get(5)?,
              visible:     row.get(6)?,
              last_maint:  dt_at(row, 7)?,
            })
          })?
          .collect()
      })
      .await
  }

  pub async fn web_brands(&self) -> Result<Vec<BrandRow>> {
    self
      .dal
      .read("pos.web_brands", |conn| {
        let mut stmt = conn.prepare(
          "SELECT code, name, description, web_enabled, last_maint
           FROM brands WHERE web_enabled = 1 ORDER BY code",
        )?;
        stmt
          .query_map([], |row| {
            Ok(BrandRow {
              code:        row.get(0)?,
              name:        row.get(1)?,
              description: row.get(2)?,
              web_enabled: row.get(3)?,
              last_maint:  dt_at(row, 4)?,
            })
          })?
          .collect()
      })
      .await
  }

  pub async fn touch_brand(&self, code: &str, at: DateTime<Utc>) -> Envelope {
    let (code, at) = (code.to_string(), encode_dt(at));
    self
      .dal
      .write("pos.touch_brand", move |conn| {
        conn.execute("UPDATE brands SET last_maint = ?2 WHERE code = ?1", params![code, at])
      })
      .await
  }

  // ─── Customers ─────────────────────────────────────────────────────────────

  pub async fn syncable_customer_numbers(&self) -> Result<BTreeSet<String>> {
    self
      .dal
      .read("pos.syncable_customer_numbers", |conn| {
        let mut stmt = conn.prepare("SELECT cust_no FROM customers WHERE web_enabled = 1")?;
        stmt.query_map([], |r| r.get(0))?.collect()
      })
      .await
  }

  /// Customers maintained after `since` or listed in `retry`, each with its
  /// ship-to addresses.
  pub async fn changed_customers(
    &self,
    since: DateTime<Utc>,
    retry: &[String],
  ) -> Result<Vec<(CustomerRow, Vec<ShipToRow>)>> {
    let columns: Vec<&str> = CUSTOMER_COLUMNS.split(',').map(str::trim).collect();
    let (sql, params) = QueryBuilder::select("customers", &columns)
      .eq("web_enabled", true)
      .changed_since("last_maint", encode_dt(since), &["cust_no"], retry)
      .order_by("cust_no")
      .build();
    self
      .dal
      .read("pos.changed_customers", move |conn| {
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
          .query_map(params_from_iter(params.iter()), customer_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        rows
          .into_iter()
          .map(|row| {
            let ship = ship_tos_for(conn, &row.cust_no)?;
            Ok((row, ship))
          })
          .collect()
      })
      .await
  }

  pub async fn customer(&self, cust_no: &str) -> Result<Option<CustomerRow>> {
    let cust_no = cust_no.to_string();
    self
      .dal
      .read("pos.customer", move |conn| {
        conn
          .query_row(
            &format!("SELECT {CUSTOMER_COLUMNS} FROM customers WHERE cust_no = ?1"),
            params![cust_no],
            customer_row,
          )
          .optional()
      })
      .await
  }

  /// Customer numbers holding `email` in either email slot.
  pub async fn customers_by_email(&self, email: &str) -> Result<Vec<String>> {
    let email = email.trim().to_lowercase();
    self
      .dal
      .read("pos.customers_by_email", move |conn| {
        let mut stmt = conn.prepare(
          "SELECT cust_no FROM customers
           WHERE lower(email_1) = ?1 OR lower(email_2) = ?1 ORDER BY cust_no",
        )?;
        stmt.query_map(params![email], |r| r.get(0))?.collect()
      })
      .await
  }

  /// Customer numbers holding the canonical `phone` in either mobile slot.
  pub async fn customers_by_phone(&self, phone: &str) -> Result<Vec<String>> {
    let phone = phone.to_string();
    self
      .dal
      .read("pos.customers_by_phone", move |conn| {
        let mut stmt = conn.prepare(
          "SELECT cust_no FROM customers WHERE mobile_1 = ?1 OR mobile_2 = ?1 ORDER BY cust_no",
        )?;
        stmt.query_map(params![phone], |r| r.get(0))?.collect()
      })
      .await
  }

  /// Create a POS customer and return the assigned customer number.
  pub async fn add_customer(&self, customer: &NewCustomer) -> Result<String> {
    let c = customer.clone();
    let now = encode_dt(Utc::now());
    self
      .dal
      .read("pos.add_customer", move |conn| {
        let tx = conn.transaction()?;
        let next: i64 = tx.query_row(
          "SELECT COALESCE(MAX(CAST(cust_no AS INTEGER)) + 1, ?1)
           FROM customers WHERE cust_no NOT GLOB '*[^0-9]*'",
          params![FIRST_CUST_NO],
          |r| r.get(0),
        )?;
        let cust_no = next.max(FIRST_CUST_NO).to_string();
        tx.execute(
          "INSERT INTO customers (
             cust_no, first_name, last_name, email_1, email_1_subscribed, mobile_1,
             sms_1_subscribed, category, company, address_1, address_2, city, state, zip,
             country, phone, last_maint)
           VALUES (?1, ?2, ?3, ?4, 0, ?5, 0, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
          params![
            cust_no,
            c.first_name,
            c.last_name,
            c.email,
            c.phone,
            c.category,
            c.address.company,
            c.address.address_1,
            c.address.address_2,
            c.address.city,
            c.address.state,
            c.address.zip,
            c.address.country,
            c.address.phone,
            now,
          ],
        )?;
        tx.commit()?;
        Ok(cust_no)
      })
      .await
  }

  /// Overwrite a loyalty balance without bumping `last_maint`.
  pub async fn set_loyalty_points(&self, cust_no: &str, points: i64) -> Envelope {
    let cust_no = cust_no.to_string();
    self
      .dal
      .write("pos.set_loyalty_points", move |conn| {
        conn.execute(
          "UPDATE customers SET loyalty_points = ?2 WHERE cust_no = ?1",
          params![cust_no, points],
        )
      })
      .await
  }

  pub async fn add_loyalty_entry(&self, entry: &LoyaltyEntryRow) -> Envelope {
    let e = entry.clone();
    self
      .dal
      .write("pos.add_loyalty_entry", move |conn| {
        conn.execute(
          "INSERT INTO loyalty_history (cust_no, doc_id, points, reason, at)
           VALUES (?1, ?2, ?3, ?4, ?5)",
          params![e.cust_no, e.doc_id, e.points, e.reason, encode_dt(e.at)],
        )
      })
      .await
  }

  /// Set the email consent of every slot holding `email`. Changed customers
  /// are bumped so the next customer cycle pushes the consent.
  pub async fn set_email_subscription(&self, email: &str, subscribed: bool) -> Envelope {
    let email = email.trim().to_lowercase();
    let now = encode_dt(Utc::now());
    self
      .dal
      .write("pos.set_email_subscription", move |conn| {
        let tx = conn.transaction()?;
        let mut n = tx.execute(
          "UPDATE customers SET email_1_subscribed = ?2, last_maint = ?3
           WHERE lower(email_1) = ?1 AND email_1_subscribed != ?2",
          params![email, subscribed, now],
        )?;
        n += tx.execute(
          "UPDATE customers SET email_2_subscribed = ?2, last_maint = ?3
           WHERE lower(email_2) = ?1 AND email_2_subscribed != ?2",
          params![email, subscribed, now],
        )?;
        tx.commit()?;
        Ok(n)
      })
      .await
  }

  /// Set the SMS consent of every mobile slot holding the canonical `phone`.
  pub async fn set_sms_subscription(&self, phone: &str, subscribed: bool) -> Envelope {
    let phone = phone.to_string();
    let now = encode_dt(Utc::now());
    self
      .dal
      .write("pos.set_sms_subscription", move |conn| {
        let tx = conn.transaction()?;
        let mut n = tx.execute(
          "UPDATE customers SET sms_1_subscribed = ?2, last_maint = ?3
           WHERE mobile_1 = ?1 AND sms_1_subscribed != ?2",
          params![phone, subscribed, now],
        )?;
        n += tx.execute(
          "UPDATE customers SET sms_2_subscribed = ?2, last_maint = ?3
           WHERE mobile_2 = ?1 AND sms_2_subscribed != ?2",
          params![phone, subscribed, now],
        )?;
        tx.commit()?;
        Ok(n)
      })
      .await
  }

  // ─── Promotions ────────────────────────────────────────────────────────────

  /// Every promotion group with its rules, price breaks and resolved items.
  /// A rule's items are its explicit item list plus every web item in one of
  /// the categories named by its item filter.
  pub async fn promotions(&self) -> Result<Vec<PromotionRows>> {
    self
      .dal
      .read("pos.promotions", |conn| {
        let mut stmt = conn.prepare(
          "SELECT group_code, descr, enabled, begin_date, begin_time, end_date, end_time, last_maint
           FROM promotion_groups ORDER BY group_code",
        )?;
        let groups = stmt
          .query_map([], |row| {
            Ok(PromotionGroupRow {
              group_code: row.get(0)?,
              descr:      row.get(1)?,
              enabled:    row.get(2)?,
              begin_date: date_at(row, 3)?,
              begin_time: row.get(4)?,
              end_date:   date_at(row, 5)?,
              end_time:   row.get(6)?,
              last_maint: dt_at(row, 7)?,
            })
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut out = Vec::with_capacity(groups.len());
        for group in groups {
          let mut stmt = conn.prepare_cached(
            "SELECT group_code, rule_seq_no, descr, enabled, customer_filter, item_filter,
                    is_bogo, bogo_buy_qty, bogo_get_qty, badge_suffix, audience
             FROM promotion_rules WHERE group_code = ?1 ORDER BY rule_seq_no",
          )?;
          let rules = stmt
            .query_map(params![group.group_code], |row| {
              Ok(PromotionRuleRow {
                group_code:      row.get(0)?,
                rule_seq_no:     row.get(1)?,
                descr:           row.get(2)?,
                enabled:         row.get(3)?,
                customer_filter: row.get(4)?,
                item_filter:     row.get(5)?,
                is_bogo:         row.get(6)?,
                bogo_buy_qty:    row.get(7)?,
                bogo_get_qty:    row.get(8)?,
                badge_suffix:    row.get(9)?,
                audience:        row.get(10)?,
              })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

          let mut stmt = conn.prepare_cached(
            "SELECT group_code, rule_seq_no, min_qty, method, amount
             FROM price_breaks WHERE group_code = ?1 ORDER BY rule_seq_no, min_qty",
          )?;
          let breaks = stmt
            .query_map(params![group.group_code], |row| {
              Ok(PriceBreakRow {
                group_code:  row.get(0)?,
                rule_seq_no: row.get(1)?,
                min_qty:     row.get(2)?,
                method:      row.get(3)?,
                amount:      row.get(4)?,
              })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

          let mut items = Vec::new();
          for rule in &rules {
            items.extend(rule_items(conn, rule)?);
          }
          out.push(PromotionRows { group, rules, breaks, items });
        }
        Ok(out)
      })
      .await
  }

  // ─── Documents ─────────────────────────────────────────────────────────────

  /// The next free ticket number.
  pub async fn next_document_id(&self) -> Result<String> {
    self
      .dal
      .read("pos.next_document_id", |conn| {
        let next: i64 = conn.query_row(
          "SELECT COALESCE(MAX(CAST(doc_id AS INTEGER)), 0) + 1
           FROM documents WHERE doc_id NOT GLOB '*[^0-9]*'",
          [],
          |r| r.get(0),
        )?;
        Ok(next.to_string())
      })
      .await
  }

  /// Insert a synthesized document in one transaction: header, lines,
  /// payments and discounts, gift-card debits with their activity rows, and
  /// the loyalty debit with its history row. Balances never go below zero.
  pub async fn insert_document(&self, doc: &PosDocument) -> Envelope {
    let doc = doc.clone();
    self
      .dal
      .write("pos.insert_document", move |conn| {
        let tx = conn.transaction()?;
        let h = &doc.header;
        let mut n = tx.execute(
          &format!(
            "INSERT INTO documents ({DOCUMENT_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"
          ),
          params![
            h.doc_id,
            h.doc_type,
            h.order_no,
            h.cust_no,
            h.status,
            h.web_invoice,
            h.subtotal,
            h.tax,
            h.total,
            encode_dt(h.created),
            encode_dt(h.last_maint),
          ],
        )?;
        for l in &doc.lines {
          n += tx.execute(
            "INSERT INTO document_lines (doc_id, line_seq, item_no, descr, qty, price)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![l.doc_id, l.line_seq, l.item_no, l.descr, l.qty, l.price],
          )?;
        }
        for p in &doc.payments {
          n += tx.execute(
            "INSERT INTO document_payments (doc_id, pay_seq, pay_code, amount, gift_card_no)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![p.doc_id, p.pay_seq, p.pay_code, p.amount, p.gift_card_no],
          )?;
        }
        for d in &doc.discounts {
          n += tx.execute(
            "INSERT INTO document_discounts (doc_id, disc_seq, code, amount)
             VALUES (?1, ?2, ?3, ?4)",
            params![d.doc_id, d.disc_seq, d.code, d.amount],
          )?;
        }
        let now = encode_dt(Utc::now());
        for debit in &doc.gift_debits {
          n += tx.execute(
            "UPDATE gift_cards SET balance = MAX(balance - ?2, 0), last_maint = ?3
             WHERE upper(gfc_no) = ?1",
            params![debit.code, debit.amount, now],
          )?;
          n += tx.execute(
            "INSERT INTO gift_card_activity (gfc_no, doc_id, amount, reason, at)
             VALUES (?1, ?2, ?3, 'WEB ORDER', ?4)",
            params![debit.code, h.doc_id, -debit.amount, now],
          )?;
        }
        let points = doc.loyalty_points;
        if let Some(cust_no) = h.cust_no.as_ref().filter(|_| points > 0) {
          n += tx.execute(
            "UPDATE customers SET loyalty_points = MAX(loyalty_points - ?2, 0), last_maint = ?3
             WHERE cust_no = ?1",
            params![cust_no, points, now],
          )?;
          n += tx.execute(
            "INSERT INTO loyalty_history (cust_no, doc_id, points, reason, at)
             VALUES (?1, ?2, ?3, 'WEB REDEMPTION', ?4)",
            params![cust_no, h.doc_id, -points, now],
          )?;
        }
        tx.commit()?;
        Ok(n)
      })
      .await
  }

  pub async fn documents(&self, doc_ids: Vec<String>) -> Result<Vec<DocumentRow>> {
    let columns: Vec<&str> = DOCUMENT_COLUMNS.split(',').map(str::trim).collect();
    let (sql, params) = QueryBuilder::select("documents", &columns)
      .is_in("doc_id", doc_ids)
      .order_by("doc_id")
      .build();
    self
      .dal
      .read("pos.documents", move |conn| {
        let mut stmt = conn.prepare(&sql)?;
        stmt.query_map(params_from_iter(params.iter()), document_row)?.collect()
      })
      .await
  }

  pub async fn document_lines(&self, doc_id: &str) -> Result<Vec<DocumentLineRow>> {
    let doc_id = doc_id.to_string();
    self
      .dal
      .read("pos.document_lines", move |conn| {
        let mut stmt = conn.prepare(
          "SELECT doc_id, line_seq, item_no, descr, qty, price
           FROM document_lines WHERE doc_id = ?1 ORDER BY line_seq",
        )?;
        stmt
          .query_map(params![doc_id], |row| {
            Ok(DocumentLineRow {
              doc_id:   row.get(0)?,
              line_seq: row.get(1)?,
              item_no:  row.get(2)?,
              descr:    row.get(3)?,
              qty:      row.get(4)?,
              price:    row.get(5)?,
            })
          })?
          .collect()
      })
      .await
  }

  /// Hold documents flagged for web invoicing.
  pub async fn web_holds(&self) -> Result<Vec<DocumentRow>> {
    self
      .dal
      .read("pos.web_holds", |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {DOCUMENT_COLUMNS} FROM documents
           WHERE doc_type = ?1 AND web_invoice = 1 ORDER BY doc_id"
        ))?;
        stmt.query_map(params![HOLD], document_row)?.collect()
      })
      .await
  }

  pub async fn set_document_status(&self, doc_id: &str, status: &str) -> Envelope {
    let (doc_id, status) = (doc_id.to_string(), status.to_string());
    let now = encode_dt(Utc::now());
    self
      .dal
      .write("pos.set_document_status", move |conn| {
        conn.execute(
          "UPDATE documents SET status = ?2, last_maint = ?3 WHERE doc_id = ?1",
          params![doc_id, status, now],
        )
      })
      .await
  }

  pub async fn delete_document(&self, doc_id: &str) -> Envelope {
    let doc_id = doc_id.to_string();
    self
      .dal
      .write("pos.delete_document", move |conn| {
        let tx = conn.transaction()?;
        let mut n = 0;
        for table in ["document_lines", "document_payments", "document_discounts", "documents"] {
          n += tx.execute(&format!("DELETE FROM {table} WHERE doc_id = ?1"), params![doc_id])?;
        }
        tx.commit()?;
        Ok(n)
      })
      .await
  }

  // ─── Gift cards ────────────────────────────────────────────────────────────

  pub async fn gift_cards(&self) -> Result<Vec<GiftCardRow>> {
    self
      .dal
      .read("pos.gift_cards", |conn| {
        let mut stmt = conn.prepare(
          "SELECT gfc_no, balance, orig_amount, issued, web_enabled, last_maint
           FROM gift_cards ORDER BY gfc_no",
        )?;
        stmt.query_map([], gift_card_row)?.collect()
      })
      .await
  }

  pub async fn gift_card(&self, gfc_no: &str) -> Result<Option<GiftCardRow>> {
    let gfc_no = gfc_no.trim().to_uppercase();
    self
      .dal
      .read("pos.gift_card", move |conn| {
        conn
          .query_row(
            "SELECT gfc_no, balance, orig_amount, issued, web_enabled, last_maint
             FROM gift_cards WHERE upper(gfc_no) = ?1",
            params![gfc_no],
            gift_card_row,
          )
          .optional()
      })
      .await
  }

  // ─── Seeding ───────────────────────────────────────────────────────────────
  //
  // The POS software owns these rows. The writers below exist for fixtures
  // and for standing up a development POS store.

  pub async fn put_item(&self, item: &ItemRow) -> Envelope {
    let item = item.clone();
    let columns = item_columns();
    self
      .dal
      .write("pos.put_item", move |conn| {
        let tx = conn.transaction()?;
        let mut values: Vec<Value> = vec![
          item.item_no.clone().into(),
          item.binding_id.clone().into(),
          item.parent_pin.into(),
          item.is_parent.into(),
          item.web_enabled.into(),
          item.web_visible.into(),
          item.active.into(),
          item.web_title.clone().into(),
          item.descr.clone().into(),
          item.long_descr.clone().into(),
          item.price_1.into(),
          item.price_2.into(),
          item.sale_price.into(),
          item.cost.into(),
          item.variant_name.clone().into(),
          item.variant_size.clone().into(),
          item.brand.clone().into(),
          item.weight.into(),
          encode_csv(&item.video_urls).into(),
          encode_dt(item.last_maint).into(),
        ];
        values.extend(SpecField::all().map(|f| Value::from(item.specs.get(&f).cloned())));
        let placeholders = vec!["?"; values.len()].join(", ");
        let mut n = tx.execute(
          &format!("INSERT OR REPLACE INTO items ({}) VALUES ({placeholders})", columns.join(", ")),
          params_from_iter(values.iter()),
        )?;
        tx.execute("DELETE FROM item_categories WHERE item_no = ?1", params![item.item_no])?;
        for (seq, category) in item.categories.iter().enumerate() {
          n += tx.execute(
            "INSERT OR IGNORE INTO item_categories (item_no, category, seq) VALUES (?1, ?2, ?3)",
            params![item.item_no, category, seq as i64],
          )?;
        }
        if let Some(html) = &item.html_descr {
          tx.execute(
            "INSERT OR REPLACE INTO item_html (item_no, html) VALUES (?1, ?2)",
            params![item.item_no, html],
          )?;
        }
        tx.execute(
          "INSERT OR REPLACE INTO inventory (item_no, qty_available) VALUES (?1, ?2)",
          params![item.item_no, item.qty_available],
        )?;
        tx.commit()?;
        Ok(n)
      })
      .await
  }

  pub async fn put_category(&self, row: &CategoryRow) -> Envelope {
    let r = row.clone();
    self
      .dal
      .write("pos.put_category", move |conn| {
        conn.execute(
          "INSERT OR REPLACE INTO categories
             (code, parent_code, name, description, sort, web_enabled, visible, last_maint)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
          params![
            r.code,
            r.parent_code,
            r.name,
            r.description,
            r.sort,
            r.web_enabled,
            r.visible,
            encode_dt(r.last_maint),
          ],
        )
      })
      .await
  }

  pub async fn put_brand(&self, row: &BrandRow) -> Envelope {
    let r = row.clone();
    self
      .dal
      .write("pos.put_brand", move |conn| {
        conn.execute(
          "INSERT OR REPLACE INTO brands (code, name, description, web_enabled, last_maint)
           VALUES (?1, ?2, ?3, ?4, ?5)",
          params![r.code, r.name, r.description, r.web_enabled, encode_dt(r.last_maint)],
        )
      })
      .await
  }

  pub async fn put_customer(&self, row: &CustomerRow) -> Envelope {
    let r = row.clone();
    self
      .dal
      .write("pos.put_customer", move |conn| {
        let a = &r.address;
        conn.execute(
          &format!(
            "INSERT OR REPLACE INTO customers ({CUSTOMER_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17,
                     ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26)"
          ),
          params![
            r.cust_no,
            r.first_name,
            r.last_name,
            r.email_1,
            r.email_1_subscribed,
            r.email_2,
            r.email_2_subscribed,
            r.mobile_1,
            r.sms_1_subscribed,
            r.mobile_2,
            r.sms_2_subscribed,
            r.loyalty_points,
            r.category,
            r.birth_month,
            r.spouse_birth_month,
            r.wholesale_tier,
            r.web_enabled,
            a.company,
            a.address_1,
            a.address_2,
            a.city,
            a.state,
            a.zip,
            a.country,
            a.phone,
            encode_dt(r.last_maint),
          ],
        )
      })
      .await
  }

  pub async fn put_ship_to(&self, row: &ShipToRow) -> Envelope {
    let r = row.clone();
    self
      .dal
      .write("pos.put_ship_to", move |conn| {
        let a = &r.address;
        conn.execute(
          &format!(
            "INSERT OR REPLACE INTO customer_ship_tos (cust_no, ship_seq, {ADDRESS_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"
          ),
          params![
            r.cust_no,
            r.ship_seq,
            a.first_name,
            a.last_name,
            a.company,
            a.address_1,
            a.address_2,
            a.city,
            a.state,
            a.zip,
            a.country,
            a.phone,
          ],
        )
      })
      .await
  }

  /// Replace a promotion group with its rules, breaks and explicit items.
  pub async fn put_promotion(&self, rows: &PromotionRows) -> Envelope {
    let p = rows.clone();
    self
      .dal
      .write("pos.put_promotion", move |conn| {
        let tx = conn.transaction()?;
        let g = &p.group;
        for table in ["promotion_rules", "price_breaks", "promotion_rule_items"] {
          tx.execute(&format!("DELETE FROM {table} WHERE group_code = ?1"), params![g.group_code])?;
        }
        let mut n = tx.execute(
          "INSERT OR REPLACE INTO promotion_groups
             (group_code, descr, enabled, begin_date, begin_time, end_date, end_time, last_maint)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
          params![
            g.group_code,
            g.descr,
            g.enabled,
            g.begin_date.map(encode_date),
            g.begin_time,
            g.end_date.map(encode_date),
            g.end_time,
            encode_dt(g.last_maint),
          ],
        )?;
        for r in &p.rules {
          n += tx.execute(
            "INSERT INTO promotion_rules
               (group_code, rule_seq_no, descr, enabled, customer_filter, item_filter, is_bogo,
                bogo_buy_qty, bogo_get_qty, badge_suffix, audience)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
              r.group_code,
              r.rule_seq_no,
              r.descr,
              r.enabled,
              r.customer_filter,
              r.item_filter,
              r.is_bogo,
              r.bogo_buy_qty,
              r.bogo_get_qty,
              r.badge_suffix,
              r.audience,
            ],
          )?;
        }
        for b in &p.breaks {
          n += tx.execute(
            "INSERT INTO price_breaks (group_code, rule_seq_no, min_qty, method, amount)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![b.group_code, b.rule_seq_no, b.min_qty, b.method, b.amount],
          )?;
        }
        for i in &p.items {
          n += tx.execute(
            "INSERT OR IGNORE INTO promotion_rule_items (group_code, rule_seq_no, item_no)
             VALUES (?1, ?2, ?3)",
            params![i.group_code, i.rule_seq_no, i.item_no],
          )?;
        }
        tx.commit()?;
        Ok(n)
      })
      .await
  }

  pub async fn put_gift_card(&self, row: &GiftCardRow) -> Envelope {
    let r = row.clone();
    self
      .dal
      .write("pos.put_gift_card", move |conn| {
        conn.execute(
          "INSERT OR REPLACE INTO gift_cards
             (gfc_no, balance, orig_amount, issued, web_enabled, last_maint)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
          params![
            r.gfc_no,
            r.balance,
            r.orig_amount,
            r.issued.map(encode_date),
            r.web_enabled,
            encode_dt(r.last_maint),
          ],
        )
      })
      .await
  }
}

/// Items covered by one rule, with their regular price.
fn rule_items(conn: &rusqlite::Connection, rule: &PromotionRuleRow) -> rusqlite::Result<Vec<RuleItemRow>> {
  let mut stmt = conn.prepare_cached(
    "SELECT i.item_no, i.price_1 FROM promotion_rule_items r
     JOIN items i ON i.item_no = r.item_no
     WHERE r.group_code = ?1 AND r.rule_seq_no = ?2",
  )?;
  let mut found: BTreeMap<String, f64> = stmt
    .query_map(params![rule.group_code, rule.rule_seq_no], |r| Ok((r.get(0)?, r.get(1)?)))?
    .collect::<rusqlite::Result<_>>()?;

  let categories: Vec<String> = rule
    .item_filter
    .as_deref()
    .unwrap_or_default()
    .split(',')
    .map(|c| c.trim().to_uppercase())
    .filter(|c| !c.is_empty())
    .collect();
  if !categories.is_empty() {
    let placeholders = vec!["?"; categories.len()].join(", ");
    let mut stmt = conn.prepare(&format!(
      "SELECT DISTINCT i.item_no, i.price_1 FROM item_categories c
       JOIN items i ON i.item_no = c.item_no
       WHERE i.web_enabled = 1 AND upper(c.category) IN ({placeholders})"
    ))?;
    let rows = stmt.query_map(params_from_iter(categories.iter()), |r| {
      Ok((r.get::<_, String>(0)?, r.get::<_, f64>(1)?))
    })?;
    for row in rows {
      let (item_no, price_1) = row?;
      found.insert(item_no, price_1);
    }
  }

  Ok(
    found
      .into_iter()
      .map(|(item_no, price_1)| RuleItemRow {
        group_code: rule.group_code.clone(),
        rule_seq_no: rule.rule_seq_no,
        item_no,
        price_1,
      })
      .collect(),
  )
}
