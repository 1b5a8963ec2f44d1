//! Typed helpers over the middleware store: identifier mappings, sync
//! cursors and the retry ledger.

use std::{
  collections::{BTreeMap, BTreeSet},
  path::Path,
  str::FromStr,
  sync::Arc,
};

use chrono::{DateTime, Utc};
use loam_core::{
  envelope::Envelope,
  log::ErrorHandler,
  mapping::{
    BogoLine, CollectionMapping, CustomerMapping, DiscountMapping, DraftOrderMapping, FixedLine,
    GiftCertificateMapping, ImageMapping, MetafieldMapping, OrderMapping, ProductMapping,
    PromotionMapping, VideoMapping, WebhookMapping,
  },
  model::metafield::{CustomerField, SpecField, Validation},
};
use rusqlite::{OptionalExtension, Row, params, params_from_iter, types::Value};

use crate::{
  Dal, QueryBuilder, Result,
  encode::{conversion, csv_at, dt_at, encode_csv, encode_dt},
  schema::MIDDLEWARE_SCHEMA,
};

fn parse_at<T: FromStr>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
  T::Err: std::error::Error + Send + Sync + 'static,
{
  let raw: String = row.get(idx)?;
  raw.parse().map_err(|e| conversion(idx, e))
}

// ─── Products ────────────────────────────────────────────────────────────────

const PRODUCT_HEAD: [&str; 11] = [
  "id",
  "item_no",
  "binding_id",
  "is_parent",
  "product_id",
  "variant_id",
  "inventory_id",
  "variant_name",
  "option_id",
  "option_value_id",
  "category_ids",
];

const PRODUCT_TAIL: [&str; 4] = ["variant_size_meta_id", "payload_hash", "last_qty", "last_maint"];

fn product_columns() -> Vec<String> {
  PRODUCT_HEAD
    .iter()
    .map(|c| c.to_string())
    .chain(SpecField::all().map(SpecField::id_column))
    .chain(PRODUCT_TAIL.iter().map(|c| c.to_string()))
    .collect()
}

fn product_row(row: &Row<'_>) -> rusqlite::Result<ProductMapping> {
  let mut meta_ids = BTreeMap::new();
  let mut idx = PRODUCT_HEAD.len();
  for field in SpecField::all() {
    if let Some(id) = row.get::<_, Option<String>>(idx)? {
      meta_ids.insert(field, id);
    }
    idx += 1;
  }
  Ok(ProductMapping {
    id: row.get(0)?,
    item_no: row.get(1)?,
    binding_id: row.get(2)?,
    is_parent: row.get(3)?,
    product_id: row.get(4)?,
    variant_id: row.get(5)?,
    inventory_id: row.get(6)?,
    variant_name: row.get(7)?,
    option_id: row.get(8)?,
    option_value_id: row.get(9)?,
    category_ids: csv_at(row, 10)?,
    meta_ids,
    variant_size_meta_id: row.get(idx)?,
    payload_hash: row.get(idx + 1)?,
    last_qty: row.get(idx + 2)?,
    last_maint: dt_at(row, idx + 3)?,
  })
}

fn product_values(p: &ProductMapping) -> Vec<Value> {
  let mut values: Vec<Value> = vec![
    p.item_no.clone().into(),
    p.binding_id.clone().into(),
    p.is_parent.into(),
    p.product_id.clone().into(),
    p.variant_id.clone().into(),
    p.inventory_id.clone().into(),
    p.variant_name.clone().into(),
    p.option_id.clone().into(),
    p.option_value_id.clone().into(),
    encode_csv(&p.category_ids).into(),
  ];
  values.extend(SpecField::all().map(|f| Value::from(p.meta_ids.get(&f).cloned())));
  values.push(p.variant_size_meta_id.clone().into());
  values.push(p.payload_hash.clone().into());
  values.push(p.last_qty.into());
  values.push(encode_dt(p.last_maint).into());
  values
}

fn upsert_product_sql() -> String {
  let columns: Vec<String> = product_columns().into_iter().skip(1).collect();
  let placeholders = vec!["?"; columns.len()].join(", ");
  let updates = columns
    .iter()
    .skip(1)
    .map(|c| format!("{c} = excluded.{c}"))
    .collect::<Vec<_>>()
    .join(", ");
  format!(
    "INSERT INTO products ({}) VALUES ({placeholders})
     ON CONFLICT(item_no) DO UPDATE SET {updates}",
    columns.join(", ")
  )
}

// ─── Media ───────────────────────────────────────────────────────────────────

const IMAGE_COLUMNS: &str = "id, name, item_no, file_path, product_id, image_id, thumbnail, \
  image_number, sort_order, is_binding_image, binding_id, is_variant_image, description, size, \
  modified, last_maint";

const VIDEO_COLUMNS: &str =
  "id, url, item_no, product_id, media_id, sort_order, binding_id, description, last_maint";

fn image_row(row: &Row<'_>) -> rusqlite::Result<ImageMapping> {
  Ok(ImageMapping {
    id:               row.get(0)?,
    name:             row.get(1)?,
    item_no:          row.get(2)?,
    file_path:        row.get(3)?,
    product_id:       row.get(4)?,
    image_id:         row.get(5)?,
    thumbnail:        row.get(6)?,
    image_number:     row.get(7)?,
    sort_order:       row.get(8)?,
    is_binding_image: row.get(9)?,
    binding_id:       row.get(10)?,
    is_variant_image: row.get(11)?,
    description:      row.get(12)?,
    size:             row.get::<_, i64>(13)?.max(0) as u64,
    modified:         dt_at(row, 14)?,
    last_maint:       dt_at(row, 15)?,
  })
}

fn video_row(row: &Row<'_>) -> rusqlite::Result<VideoMapping> {
  Ok(VideoMapping {
    id:          row.get(0)?,
    url:         row.get(1)?,
    item_no:     row.get(2)?,
    product_id:  row.get(3)?,
    media_id:    row.get(4)?,
    sort_order:  row.get(5)?,
    binding_id:  row.get(6)?,
    description: row.get(7)?,
    last_maint:  dt_at(row, 8)?,
  })
}

// ─── Customers ───────────────────────────────────────────────────────────────

/// The middleware column holding the storefront id of a customer metafield.
pub fn customer_meta_column(field: CustomerField) -> &'static str {
  match field {
    CustomerField::CustomerNumber => "meta_cust_no_id",
    CustomerField::LoyaltyPoints => "meta_loyalty_id",
    CustomerField::Category => "meta_category_id",
    CustomerField::BirthMonth => "meta_birth_month_id",
    CustomerField::SpouseBirthMonth => "meta_spouse_birth_month_id",
    CustomerField::WholesalePriceTier => "wholesale_price_tier_id",
  }
}

fn customer_columns() -> Vec<&'static str> {
  let mut columns = vec!["id", "cp_cust_no", "shop_cust_id", "store_credit_id"];
  columns.extend(CustomerField::all().map(customer_meta_column));
  columns.extend(["loyalty_balance", "payload_hash", "last_maint"]);
  columns
}

fn customer_row(row: &Row<'_>) -> rusqlite::Result<CustomerMapping> {
  let mut meta_ids = BTreeMap::new();
  let mut idx = 4;
  for field in CustomerField::all() {
    if let Some(id) = row.get::<_, Option<String>>(idx)? {
      meta_ids.insert(field, id);
    }
    idx += 1;
  }
  Ok(CustomerMapping {
    id: row.get(0)?,
    cp_cust_no: row.get(1)?,
    shop_cust_id: row.get(2)?,
    store_credit_id: row.get(3)?,
    meta_ids,
    loyalty_balance: row.get(idx)?,
    payload_hash: row.get(idx + 1)?,
    last_maint: dt_at(row, idx + 2)?,
  })
}

// ─── Promotions & metafields ─────────────────────────────────────────────────

fn promotion_row(row: &Row<'_>) -> rusqlite::Result<PromotionMapping> {
  Ok(PromotionMapping {
    id:          row.get(0)?,
    group_code:  row.get(1)?,
    rule_seq_no: row.get(2)?,
    shop_id:     row.get(3)?,
    enabled:     row.get(4)?,
    last_maint:  dt_at(row, 5)?,
  })
}

fn metafield_row(row: &Row<'_>) -> rusqlite::Result<MetafieldMapping> {
  let mut validations = Vec::new();
  for slot in 0..loam_core::model::metafield::MAX_VALIDATIONS {
    let base = 9 + slot * 3;
    let name: Option<String> = row.get(base)?;
    if let Some(name) = name.filter(|n| !n.is_empty()) {
      validations.push(Validation {
        name,
        value: row.get::<_, Option<String>>(base + 1)?.unwrap_or_default(),
        kind: row.get::<_, Option<String>>(base + 2)?.unwrap_or_default(),
      });
    }
  }
  Ok(MetafieldMapping {
    meta_id: row.get(0)?,
    name: row.get(1)?,
    descr: row.get(2)?,
    namespace: row.get(3)?,
    key: row.get(4)?,
    kind: parse_at(row, 5)?,
    pinned: row.get(6)?,
    pinned_pos: row.get(7)?,
    owner: parse_at(row, 8)?,
    validations,
  })
}

fn validation_columns() -> Vec<String> {
  (1..=loam_core::model::metafield::MAX_VALIDATIONS)
    .flat_map(|i| {
      [
        format!("validation_{i}_name"),
        format!("validation_{i}_value"),
        format!("validation_{i}_type"),
      ]
    })
    .collect()
}

// ─── MiddlewareDb ────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct MiddlewareDb {
  pub(crate) dal: Dal,
}

impl MiddlewareDb {
  pub async fn open(path: impl AsRef<Path>, errors: Arc<ErrorHandler>) -> Result<Self> {
    Ok(Self { dal: Dal::open(path, MIDDLEWARE_SCHEMA, errors).await? })
  }

  pub async fn open_in_memory(errors: Arc<ErrorHandler>) -> Result<Self> {
    Ok(Self { dal: Dal::open_in_memory(MIDDLEWARE_SCHEMA, errors).await? })
  }

  pub fn dal(&self) -> &Dal { &self.dal }

  // ─── Cursors & retries ─────────────────────────────────────────────────────

  pub async fn cursor(&self, entity: &str) -> Result<Option<DateTime<Utc>>> {
    let entity = entity.to_string();
    self
      .dal
      .read("middleware.cursor", move |conn| {
        conn
          .query_row(
            "SELECT last_sync FROM sync_cursors WHERE entity = ?1",
            params![entity],
            |r| dt_at(r, 0),
          )
          .optional()
      })
      .await
  }

  pub async fn set_cursor(&self, entity: &str, at: DateTime<Utc>) -> Envelope {
    let (entity, at) = (entity.to_string(), encode_dt(at));
    self
      .dal
      .write("middleware.set_cursor", move |conn| {
        conn.execute(
          "INSERT INTO sync_cursors (entity, last_sync) VALUES (?1, ?2)
           ON CONFLICT(entity) DO UPDATE SET last_sync = excluded.last_sync",
          params![entity, at],
        )
      })
      .await
  }

  /// Keys of `entity` that failed in an earlier cycle.
  pub async fn retry_keys(&self, entity: &str) -> Result<Vec<String>> {
    let entity = entity.to_string();
    self
      .dal
      .read("middleware.retry_keys", move |conn| {
        let mut stmt = conn.prepare("SELECT key FROM sync_retries WHERE entity = ?1 ORDER BY key")?;
        stmt.query_map(params![entity], |r| r.get(0))?.collect()
      })
      .await
  }

  pub async fn record_retry(&self, entity: &str, key: &str, reason: &str) -> Envelope {
    let (entity, key, reason) = (entity.to_string(), key.to_string(), reason.to_string());
    let now = encode_dt(Utc::now());
    self
      .dal
      .write("middleware.record_retry", move |conn| {
        conn.execute(
          "INSERT INTO sync_retries (entity, key, reason, attempts, last_attempt)
           VALUES (?1, ?2, ?3, 1, ?4)
           ON CONFLICT(entity, key) DO UPDATE SET
             reason = excluded.reason,
             attempts = attempts + 1,
             last_attempt = excluded.last_attempt",
          params![entity, key, reason, now],
        )
      })
      .await
  }

  pub async fn clear_retry(&self, entity: &str, key: &str) -> Envelope {
    let (entity, key) = (entity.to_string(), key.to_string());
    self
      .dal
      .write("middleware.clear_retry", move |conn| {
        conn.execute("DELETE FROM sync_retries WHERE entity = ?1 AND key = ?2", params![entity, key])
      })
      .await
  }

  // ─── Products ──────────────────────────────────────────────────────────────

  pub async fn product_rows(&self) -> Result<Vec<ProductMapping>> {
    let (sql, params) = QueryBuilder::select("products", &product_columns()).order_by("item_no").build();
    self.product_query("middleware.product_rows", sql, params).await
  }

  /// Rows of one storefront product, looked up by its product key (an item
  /// number, or the binding id of a family).
  pub async fn product_rows_for_key(&self, key: &str) -> Result<Vec<ProductMapping>> {
    let key = key.to_string();
    let (sql, params) = QueryBuilder::select("products", &product_columns())
      .raw("item_no = ? OR binding_id = ?")
      .order_by("item_no")
      .build();
    let params = params.into_iter().chain([Value::Text(key.clone()), Value::Text(key)]).collect();
    self.product_query("middleware.product_rows_for_key", sql, params).await
  }

  pub async fn product_rows_by_product_id(&self, product_id: &str) -> Result<Vec<ProductMapping>> {
    let (sql, params) = QueryBuilder::select("products", &product_columns())
      .eq("product_id", product_id.to_string())
      .order_by("item_no")
      .build();
    self.product_query("middleware.product_rows_by_product_id", sql, params).await
  }

  async fn product_query(
    &self,
    origin: &str,
    sql: String,
    params: Vec<Value>,
  ) -> Result<Vec<ProductMapping>> {
    self
      .dal
      .read(origin, move |conn| {
        let mut stmt = conn.prepare(&sql)?;
        stmt.query_map(params_from_iter(params.iter()), product_row)?.collect()
      })
      .await
  }

  pub async fn upsert_product(&self, row: &ProductMapping) -> Envelope {
    self.replace_product_rows(None, vec![row.clone()]).await
  }

  /// Write the rows of one product in a transaction. With a `key`, rows
  /// previously recorded under that key and absent from `rows` are removed.
  pub async fn replace_product_rows(&self, key: Option<String>, rows: Vec<ProductMapping>) -> Envelope {
    let sql = upsert_product_sql();
    self
      .dal
      .write("middleware.replace_product_rows", move |conn| {
        let tx = conn.transaction()?;
        let mut n = 0;
        if let Some(key) = &key {
          let keep: BTreeSet<&str> = rows.iter().map(|r| r.item_no.as_str()).collect();
          let existing: Vec<String> = {
            let mut stmt =
              tx.prepare("SELECT item_no FROM products WHERE item_no = ?1 OR binding_id = ?1")?;
            stmt.query_map(params![key], |r| r.get(0))?.collect::<rusqlite::Result<_>>()?
          };
          for stale in existing.iter().filter(|i| !keep.contains(i.as_str())) {
            n += tx.execute("DELETE FROM products WHERE item_no = ?1", params![stale])?;
          }
        }
        for row in &rows {
          n += tx.execute(&sql, params_from_iter(product_values(row).iter()))?;
        }
        tx.commit()?;
        Ok(n)
      })
      .await
  }

  /// Remove every middleware trace of a storefront product: its variant
  /// rows, images and videos.
  pub async fn delete_product(&self, product_id: &str) -> Envelope {
    let product_id = product_id.to_string();
    self
      .dal
      .write("middleware.delete_product", move |conn| {
        let tx = conn.transaction()?;
        let mut n = 0;
        for table in ["images", "videos", "products"] {
          n += tx.execute(&format!("DELETE FROM {table} WHERE product_id = ?1"), params![product_id])?;
        }
        tx.commit()?;
        Ok(n)
      })
      .await
  }

  /// Remove the rows of a product key that never received a product id.
  pub async fn delete_product_key(&self, key: &str) -> Envelope {
    let key = key.to_string();
    self
      .dal
      .write("middleware.delete_product_key", move |conn| {
        let tx = conn.transaction()?;
        let mut n = 0;
        for table in ["images", "videos", "products"] {
          n += tx.execute(
            &format!("DELETE FROM {table} WHERE item_no = ?1 OR binding_id = ?1"),
            params![key],
          )?;
        }
        tx.commit()?;
        Ok(n)
      })
      .await
  }

  // ─── Media ─────────────────────────────────────────────────────────────────

  pub async fn images(&self, product_id: &str) -> Result<Vec<ImageMapping>> {
    let product_id = product_id.to_string();
    self
      .dal
      .read("middleware.images", move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {IMAGE_COLUMNS} FROM images WHERE product_id = ?1 ORDER BY sort_order, id"
        ))?;
        stmt.query_map(params![product_id], image_row)?.collect()
      })
      .await
  }

  pub async fn all_images(&self) -> Result<Vec<ImageMapping>> {
    self
      .dal
      .read("middleware.all_images", |conn| {
        let mut stmt =
          conn.prepare(&format!("SELECT {IMAGE_COLUMNS} FROM images ORDER BY product_id, sort_order"))?;
        stmt.query_map([], image_row)?.collect()
      })
      .await
  }

  pub async fn videos(&self, product_id: &str) -> Result<Vec<VideoMapping>> {
    let product_id = product_id.to_string();
    self
      .dal
      .read("middleware.videos", move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {VIDEO_COLUMNS} FROM videos WHERE product_id = ?1 ORDER BY sort_order, id"
        ))?;
        stmt.query_map(params![product_id], video_row)?.collect()
      })
      .await
  }

  /// Replace the media rows of a product with the given, already ordered,
  /// rows.
  pub async fn replace_media(
    &self,
    product_id: &str,
    images: Vec<ImageMapping>,
    videos: Vec<VideoMapping>,
  ) -> Envelope {
    let product_id = product_id.to_string();
    self
      .dal
      .write("middleware.replace_media", move |conn| {
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM images WHERE product_id = ?1", params![product_id])?;
        tx.execute("DELETE FROM videos WHERE product_id = ?1", params![product_id])?;
        let mut n = 0;
        for i in &images {
          n += tx.execute(
            "INSERT INTO images (name, item_no, file_path, product_id, image_id, thumbnail,
               image_number, sort_order, is_binding_image, binding_id, is_variant_image,
               description, size, modified, last_maint)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            params![
              i.name,
              i.item_no,
              i.file_path,
              product_id,
              i.image_id,
              i.thumbnail,
              i.image_number,
              i.sort_order,
              i.is_binding_image,
              i.binding_id,
              i.is_variant_image,
              i.description,
              i.size as i64,
              encode_dt(i.modified),
              encode_dt(i.last_maint),
            ],
          )?;
        }
        for v in &videos {
          n += tx.execute(
            "INSERT INTO videos (url, item_no, product_id, media_id, sort_order, binding_id,
               description, last_maint)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
              v.url,
              v.item_no,
              product_id,
              v.media_id,
              v.sort_order,
              v.binding_id,
              v.description,
              encode_dt(v.last_maint),
            ],
          )?;
        }
        tx.commit()?;
        Ok(n)
      })
      .await
  }

  // ─── Collections ───────────────────────────────────────────────────────────

  pub async fn collections(&self) -> Result<Vec<CollectionMapping>> {
    self
      .dal
      .read("middleware.collections", |conn| {
        let mut stmt = conn.prepare(
          "SELECT cp_id, shop_id, menu_id, parent_cp_id, name, sort, description, visible,
                  image_size, is_brand, last_maint
           FROM collections ORDER BY cp_id",
        )?;
        stmt
          .query_map([], |row| {
            Ok(CollectionMapping {
              cp_id:        row.get(0)?,
              shop_id:      row.get(1)?,
              menu_id:      row.get(2)?,
              parent_cp_id: row.get(3)?,
              name:         row.get(4)?,
              sort:         row.get(5)?,
              description:  row.get(6)?,
              visible:      row.get(7)?,
              image_size:   row.get::<_, Option<i64>>(8)?.map(|s| s.max(0) as u64),
              is_brand:     row.get(9)?,
              last_maint:   dt_at(row, 10)?,
            })
          })?
          .collect()
      })
      .await
  }

  pub async fn upsert_collection(&self, row: &CollectionMapping) -> Envelope {
    let r = row.clone();
    self
      .dal
      .write("middleware.upsert_collection", move |conn| {
        conn.execute(
          "INSERT OR REPLACE INTO collections
             (cp_id, shop_id, menu_id, parent_cp_id, name, sort, description, visible, image_size,
              is_brand, last_maint)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
          params![
            r.cp_id,
            r.shop_id,
            r.menu_id,
            r.parent_cp_id,
            r.name,
            r.sort,
            r.description,
            r.visible,
            r.image_size.map(|s| s as i64),
            r.is_brand,
            encode_dt(r.last_maint),
          ],
        )
      })
      .await
  }

  pub async fn delete_collection(&self, cp_id: &str) -> Envelope {
    let cp_id = cp_id.to_string();
    self
      .dal
      .write("middleware.delete_collection", move |conn| {
        conn.execute("DELETE FROM collections WHERE cp_id = ?1", params![cp_id])
      })
      .await
  }

  // ─── Customers ─────────────────────────────────────────────────────────────

  pub async fn customer_rows(&self) -> Result<Vec<CustomerMapping>> {
    let (sql, params) =
      QueryBuilder::select("customers", &customer_columns()).order_by("cp_cust_no").build();
    self.customer_query("middleware.customer_rows", sql, params).await
  }

  pub async fn customer_row(&self, cust_no: &str) -> Result<Option<CustomerMapping>> {
    let (sql, params) = QueryBuilder::select("customers", &customer_columns())
      .eq("cp_cust_no", cust_no.to_string())
      .build();
    Ok(self.customer_query("middleware.customer_row", sql, params).await?.into_iter().next())
  }

  pub async fn customer_by_shop_id(&self, shop_id: &str) -> Result<Option<CustomerMapping>> {
    let (sql, params) = QueryBuilder::select("customers", &customer_columns())
      .eq("shop_cust_id", shop_id.to_string())
      .build();
    Ok(self.customer_query("middleware.customer_by_shop_id", sql, params).await?.into_iter().next())
  }

  async fn customer_query(
    &self,
    origin: &str,
    sql: String,
    params: Vec<Value>,
  ) -> Result<Vec<CustomerMapping>> {
    self
      .dal
      .read(origin, move |conn| {
        let mut stmt = conn.prepare(&sql)?;
        stmt.query_map(params_from_iter(params.iter()), customer_row)?.collect()
      })
      .await
  }

  pub async fn upsert_customer(&self, row: &CustomerMapping) -> Envelope {
    let r = row.clone();
    let columns: Vec<&str> = customer_columns().into_iter().skip(1).collect();
    let updates = columns
      .iter()
      .skip(1)
      .map(|c| format!("{c} = excluded.{c}"))
      .collect::<Vec<_>>()
      .join(", ");
    let sql = format!(
      "INSERT INTO customers ({}) VALUES ({})
       ON CONFLICT(cp_cust_no) DO UPDATE SET {updates}",
      columns.join(", "),
      vec!["?"; columns.len()].join(", ")
    );
    self
      .dal
      .write("middleware.upsert_customer", move |conn| {
        let mut values: Vec<Value> = vec![
          r.cp_cust_no.clone().into(),
          r.shop_cust_id.clone().into(),
          r.store_credit_id.clone().into(),
        ];
        values.extend(CustomerField::all().map(|f| Value::from(r.meta_ids.get(&f).cloned())));
        values.push(r.loyalty_balance.into());
        values.push(r.payload_hash.clone().into());
        values.push(encode_dt(r.last_maint).into());
        conn.execute(&sql, params_from_iter(values.iter()))
      })
      .await
  }

  /// Remove a customer mapping together with its metafield ids.
  pub async fn delete_customer(&self, cust_no: &str) -> Envelope {
    let cust_no = cust_no.to_string();
    self
      .dal
      .write("middleware.delete_customer", move |conn| {
        conn.execute("DELETE FROM customers WHERE cp_cust_no = ?1", params![cust_no])
      })
      .await
  }

  // ─── Orders & drafts ───────────────────────────────────────────────────────

  pub async fn order(&self, order_no: &str) -> Result<Option<OrderMapping>> {
    let order_no = order_no.to_string();
    self
      .dal
      .read("middleware.order", move |conn| {
        conn
          .query_row(
            "SELECT id, order_no, doc_id, status FROM orders WHERE order_no = ?1",
            params![order_no],
            |row| {
              Ok(OrderMapping {
                id:       row.get(0)?,
                order_no: row.get(1)?,
                doc_id:   row.get(2)?,
                status:   row.get(3)?,
              })
            },
          )
          .optional()
      })
      .await
  }

  /// Orders whose final status has not been pushed yet.
  pub async fn open_orders(&self) -> Result<Vec<OrderMapping>> {
    self
      .dal
      .read("middleware.open_orders", |conn| {
        let mut stmt = conn.prepare(
          "SELECT id, order_no, doc_id, status FROM orders
           WHERE status NOT IN ('closed', 'voided') ORDER BY order_no",
        )?;
        stmt
          .query_map([], |row| {
            Ok(OrderMapping {
              id:       row.get(0)?,
              order_no: row.get(1)?,
              doc_id:   row.get(2)?,
              status:   row.get(3)?,
            })
          })?
          .collect()
      })
      .await
  }

  pub async fn insert_order(&self, row: &OrderMapping) -> Envelope {
    let r = row.clone();
    self
      .dal
      .write("middleware.insert_order", move |conn| {
        conn.execute(
          "INSERT INTO orders (order_no, doc_id, status) VALUES (?1, ?2, ?3)",
          params![r.order_no, r.doc_id, r.status],
        )
      })
      .await
  }

  pub async fn set_order_status(&self, order_no: &str, status: &str) -> Envelope {
    let (order_no, status) = (order_no.to_string(), status.to_string());
    self
      .dal
      .write("middleware.set_order_status", move |conn| {
        conn.execute("UPDATE orders SET status = ?2 WHERE order_no = ?1", params![order_no, status])
      })
      .await
  }

  pub async fn drafts(&self) -> Result<Vec<DraftOrderMapping>> {
    self
      .dal
      .read("middleware.drafts", |conn| {
        let mut stmt =
          conn.prepare("SELECT id, doc_id, draft_id, created FROM draft_orders ORDER BY doc_id")?;
        stmt
          .query_map([], |row| {
            Ok(DraftOrderMapping {
              id:       row.get(0)?,
              doc_id:   row.get(1)?,
              draft_id: row.get(2)?,
              created:  dt_at(row, 3)?,
            })
          })?
          .collect()
      })
      .await
  }

  pub async fn insert_draft(&self, row: &DraftOrderMapping) -> Envelope {
    let r = row.clone();
    self
      .dal
      .write("middleware.insert_draft", move |conn| {
        conn.execute(
          "INSERT OR REPLACE INTO draft_orders (doc_id, draft_id, created) VALUES (?1, ?2, ?3)",
          params![r.doc_id, r.draft_id, encode_dt(r.created)],
        )
      })
      .await
  }

  pub async fn delete_draft(&self, doc_id: &str) -> Envelope {
    let doc_id = doc_id.to_string();
    self
      .dal
      .write("middleware.delete_draft", move |conn| {
        conn.execute("DELETE FROM draft_orders WHERE doc_id = ?1", params![doc_id])
      })
      .await
  }

  pub async fn delete_draft_by_remote_id(&self, draft_id: &str) -> Envelope {
    let draft_id = draft_id.to_string();
    self
      .dal
      .write("middleware.delete_draft_by_remote_id", move |conn| {
        conn.execute("DELETE FROM draft_orders WHERE draft_id = ?1", params![draft_id])
      })
      .await
  }

  // ─── Gift certificates ─────────────────────────────────────────────────────

  pub async fn gift_certificates(&self) -> Result<Vec<GiftCertificateMapping>> {
    self
      .dal
      .read("middleware.gift_certificates", |conn| {
        let mut stmt = conn.prepare(
          "SELECT id, gfc_no, shop_gfc_id, balance, last_maint FROM gift_certificates ORDER BY gfc_no",
        )?;
        stmt
          .query_map([], |row| {
            Ok(GiftCertificateMapping {
              id:          row.get(0)?,
              gfc_no:      row.get(1)?,
              shop_gfc_id: row.get(2)?,
              balance:     row.get(3)?,
              last_maint:  dt_at(row, 4)?,
            })
          })?
          .collect()
      })
      .await
  }

  pub async fn upsert_gift_certificate(&self, row: &GiftCertificateMapping) -> Envelope {
    let r = row.clone();
    self
      .dal
      .write("middleware.upsert_gift_certificate", move |conn| {
        conn.execute(
          "INSERT INTO gift_certificates (gfc_no, shop_gfc_id, balance, last_maint)
           VALUES (?1, ?2, ?3, ?4)
           ON CONFLICT(gfc_no) DO UPDATE SET
             shop_gfc_id = excluded.shop_gfc_id,
             balance = excluded.balance,
             last_maint = excluded.last_maint",
          params![r.gfc_no, r.shop_gfc_id, r.balance, encode_dt(r.last_maint)],
        )
      })
      .await
  }

  pub async fn delete_gift_certificate(&self, gfc_no: &str) -> Envelope {
    let gfc_no = gfc_no.to_string();
    self
      .dal
      .write("middleware.delete_gift_certificate", move |conn| {
        conn.execute("DELETE FROM gift_certificates WHERE gfc_no = ?1", params![gfc_no])
      })
      .await
  }

  // ─── Promotions ────────────────────────────────────────────────────────────

  pub async fn promotion_rows(&self) -> Result<Vec<PromotionMapping>> {
    self
      .dal
      .read("middleware.promotion_rows", |conn| {
        let mut stmt = conn.prepare(
          "SELECT id, group_code, rule_seq_no, shop_id, enabled, last_maint
           FROM promotions ORDER BY group_code, rule_seq_no",
        )?;
        stmt.query_map([], promotion_row)?.collect()
      })
      .await
  }

  pub async fn upsert_promotion(&self, row: &PromotionMapping) -> Envelope {
    let r = row.clone();
    self
      .dal
      .write("middleware.upsert_promotion", move |conn| {
        conn.execute(
          "INSERT INTO promotions (group_code, rule_seq_no, shop_id, enabled, last_maint)
           VALUES (?1, ?2, ?3, ?4, ?5)
           ON CONFLICT(group_code, rule_seq_no) DO UPDATE SET
             shop_id = excluded.shop_id,
             enabled = excluded.enabled,
             last_maint = excluded.last_maint",
          params![r.group_code, r.rule_seq_no, r.shop_id, r.enabled, encode_dt(r.last_maint)],
        )
      })
      .await
  }

  /// Remove a rule mapping and every line row materialized for it.
  pub async fn delete_promotion(&self, group_code: &str, rule_seq_no: i64) -> Envelope {
    let group_code = group_code.to_string();
    self
      .dal
      .write("middleware.delete_promotion", move |conn| {
        let tx = conn.transaction()?;
        let mut n = 0;
        for table in ["promotion_lines_fixed", "promotion_lines_bogo", "promotions"] {
          n += tx.execute(
            &format!("DELETE FROM {table} WHERE group_code = ?1 AND rule_seq_no = ?2"),
            params![group_code, rule_seq_no],
          )?;
        }
        tx.commit()?;
        Ok(n)
      })
      .await
  }

  pub async fn fixed_lines(&self) -> Result<Vec<FixedLine>> {
    self
      .dal
      .read("middleware.fixed_lines", |conn| {
        let mut stmt = conn.prepare(
          "SELECT group_code, rule_seq_no, item_no FROM promotion_lines_fixed
           ORDER BY group_code, rule_seq_no, item_no",
        )?;
        stmt
          .query_map([], |row| {
            Ok(FixedLine { group_code: row.get(0)?, rule_seq_no: row.get(1)?, item_no: row.get(2)? })
          })?
          .collect()
      })
      .await
  }

  /// Make the fixed lines of one rule exactly `item_nos`.
  pub async fn replace_fixed_lines(
    &self,
    group_code: &str,
    rule_seq_no: i64,
    item_nos: Vec<String>,
  ) -> Envelope {
    let group_code = group_code.to_string();
    self
      .dal
      .write("middleware.replace_fixed_lines", move |conn| {
        let tx = conn.transaction()?;
        let mut n = tx.execute(
          "DELETE FROM promotion_lines_fixed WHERE group_code = ?1 AND rule_seq_no = ?2",
          params![group_code, rule_seq_no],
        )?;
        for item in &item_nos {
          n += tx.execute(
            "INSERT OR IGNORE INTO promotion_lines_fixed (group_code, rule_seq_no, item_no)
             VALUES (?1, ?2, ?3)",
            params![group_code, rule_seq_no, item],
          )?;
        }
        tx.commit()?;
        Ok(n)
      })
      .await
  }

  pub async fn bogo_lines(&self, group_code: &str, rule_seq_no: i64) -> Result<Vec<BogoLine>> {
    let group_code = group_code.to_string();
    self
      .dal
      .read("middleware.bogo_lines", move |conn| {
        let mut stmt = conn.prepare(
          "SELECT shop_id, group_code, rule_seq_no, item_no FROM promotion_lines_bogo
           WHERE group_code = ?1 AND rule_seq_no = ?2 ORDER BY item_no",
        )?;
        stmt
          .query_map(params![group_code, rule_seq_no], |row| {
            Ok(BogoLine {
              shop_id:     row.get(0)?,
              group_code:  row.get(1)?,
              rule_seq_no: row.get(2)?,
              item_no:     row.get(3)?,
            })
          })?
          .collect()
      })
      .await
  }

  /// Make the bogo lines of one rule exactly `lines`.
  pub async fn replace_bogo_lines(
    &self,
    group_code: &str,
    rule_seq_no: i64,
    lines: Vec<BogoLine>,
  ) -> Envelope {
    let group_code = group_code.to_string();
    self
      .dal
      .write("middleware.replace_bogo_lines", move |conn| {
        let tx = conn.transaction()?;
        let mut n = tx.execute(
          "DELETE FROM promotion_lines_bogo WHERE group_code = ?1 AND rule_seq_no = ?2",
          params![group_code, rule_seq_no],
        )?;
        for l in &lines {
          n += tx.execute(
            "INSERT OR REPLACE INTO promotion_lines_bogo (shop_id, group_code, rule_seq_no, item_no)
             VALUES (?1, ?2, ?3, ?4)",
            params![l.shop_id, l.group_code, l.rule_seq_no, l.item_no],
          )?;
        }
        tx.commit()?;
        Ok(n)
      })
      .await
  }

  pub async fn discounts(&self) -> Result<Vec<DiscountMapping>> {
    self
      .dal
      .read("middleware.discounts", |conn| {
        let mut stmt = conn.prepare("SELECT id, shop_id, disc_id, created FROM discounts ORDER BY id")?;
        stmt
          .query_map([], |row| {
            Ok(DiscountMapping {
              id:      row.get(0)?,
              shop_id: row.get(1)?,
              disc_id: row.get(2)?,
              created: dt_at(row, 3)?,
            })
          })?
          .collect()
      })
      .await
  }

  pub async fn insert_discount(&self, row: &DiscountMapping) -> Envelope {
    let r = row.clone();
    self
      .dal
      .write("middleware.insert_discount", move |conn| {
        conn.execute(
          "INSERT INTO discounts (shop_id, disc_id, created) VALUES (?1, ?2, ?3)",
          params![r.shop_id, r.disc_id, encode_dt(r.created)],
        )
      })
      .await
  }

  pub async fn delete_discounts_for(&self, shop_id: &str) -> Envelope {
    let shop_id = shop_id.to_string();
    self
      .dal
      .write("middleware.delete_discounts_for", move |conn| {
        conn.execute("DELETE FROM discounts WHERE shop_id = ?1", params![shop_id])
      })
      .await
  }

  // ─── Metafield definitions ─────────────────────────────────────────────────

  pub async fn metafield_definitions(&self) -> Result<Vec<MetafieldMapping>> {
    let columns = format!(
      "meta_id, name, descr, namespace, key, type, pinned, pinned_pos, owner_type, {}",
      validation_columns().join(", ")
    );
    self
      .dal
      .read("middleware.metafield_definitions", move |conn| {
        let mut stmt =
          conn.prepare(&format!("SELECT {columns} FROM metafields ORDER BY owner_type, key"))?;
        stmt.query_map([], metafield_row)?.collect()
      })
      .await
  }

  pub async fn upsert_metafield_definition(&self, row: &MetafieldMapping) -> Envelope {
    let r = row.clone();
    let validation = validation_columns();
    let sql = format!(
      "INSERT OR REPLACE INTO metafields
         (meta_id, name, descr, namespace, key, type, pinned, pinned_pos, owner_type, {})
       VALUES ({})",
      validation.join(", "),
      vec!["?"; 9 + validation.len()].join(", ")
    );
    self
      .dal
      .write("middleware.upsert_metafield_definition", move |conn| {
        let kind: &'static str = r.kind.into();
        let owner: &'static str = r.owner.into();
        let mut values: Vec<Value> = vec![
          r.meta_id.clone().into(),
          r.name.clone().into(),
          r.descr.clone().into(),
          r.namespace.clone().into(),
          r.key.clone().into(),
          kind.to_string().into(),
          r.pinned.into(),
          r.pinned_pos.into(),
          owner.to_string().into(),
        ];
        for slot in 0..loam_core::model::metafield::MAX_VALIDATIONS {
          let v = r.validations.get(slot);
          values.push(v.map(|v| v.name.clone()).into());
          values.push(v.map(|v| v.value.clone()).into());
          values.push(v.map(|v| v.kind.clone()).into());
        }
        conn.execute(&sql, params_from_iter(values.iter()))
      })
      .await
  }

  // ─── Webhooks ──────────────────────────────────────────────────────────────

  pub async fn webhooks(&self) -> Result<Vec<WebhookMapping>> {
    self
      .dal
      .read("middleware.webhooks", |conn| {
        let mut stmt = conn
          .prepare("SELECT hook_id, topic, destination, format, domain FROM webhooks ORDER BY topic")?;
        stmt
          .query_map([], |row| {
            Ok(WebhookMapping {
              hook_id:     row.get(0)?,
              topic:       row.get(1)?,
              destination: row.get(2)?,
              format:      row.get(3)?,
              domain:      row.get(4)?,
            })
          })?
          .collect()
      })
      .await
  }

  pub async fn insert_webhook(&self, row: &WebhookMapping) -> Envelope {
    let r = row.clone();
    self
      .dal
      .write("middleware.insert_webhook", move |conn| {
        conn.execute(
          "INSERT OR REPLACE INTO webhooks (hook_id, topic, destination, format, domain)
           VALUES (?1, ?2, ?3, ?4, ?5)",
          params![r.hook_id, r.topic, r.destination, r.format, r.domain],
        )
      })
      .await
  }

  pub async fn delete_webhook(&self, hook_id: &str) -> Envelope {
    let hook_id = hook_id.to_string();
    self
      .dal
      .write("middleware.delete_webhook", move |conn| {
        conn.execute("DELETE FROM webhooks WHERE hook_id = ?1", params![hook_id])
      })
      .await
  }
}
