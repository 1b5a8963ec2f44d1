//! Products and variants.
//!
//! A product is either a single POS item or a *bound family*: every
//! web-enabled item sharing a binding id. Exactly one member of a family is
//! the parent, whose product-level fields (title, description, brand,
//! categories, specification fields) drive the storefront product.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use crate::{
  Error, Result,
  mapping::ProductMapping,
  model::{
    cents,
    fingerprint,
    handle,
    media::{Media, MediaKind},
    metafield::{MetafieldType, SpecField},
  },
  pos::ItemRow,
  storefront::{
    ProductIds, ProductInput, ProductStatus, VariantIds, VariantInput, money,
  },
};

const MAX_TITLE: usize = 255;

/// Option name used for bound families.
pub const OPTION_NAME: &str = "Option";

// ─── Keys and election ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum ProductKey {
  Single(String),
  Bound(String),
}

impl ProductKey {
  pub fn for_item(item: &ItemRow) -> Self {
    match item.binding_id.as_deref().map(str::trim).filter(|b| !b.is_empty()) {
      Some(binding) => Self::Bound(binding.to_string()),
      None => Self::Single(item.item_no.clone()),
    }
  }

  pub fn as_str(&self) -> &str {
    match self {
      Self::Single(key) | Self::Bound(key) => key,
    }
  }

  pub fn binding_id(&self) -> Option<&str> {
    match self {
      Self::Bound(id) => Some(id),
      Self::Single(_) => None,
    }
  }
}

/// Pick the parent of a family.
///
/// A staff pin wins (lowest item number if several are pinned). Otherwise the
/// lowest `price_1` among active members, ties broken by item number
/// ascending; inactive members are only considered when no member is active.
pub fn elect_parent(items: &[ItemRow]) -> Option<usize> {
  let by_price = |a: &(usize, &ItemRow), b: &(usize, &ItemRow)| {
    a.1
      .price_1
      .total_cmp(&b.1.price_1)
      .then_with(|| a.1.item_no.cmp(&b.1.item_no))
  };

  if let Some((idx, _)) = items
    .iter()
    .enumerate()
    .filter(|(_, i)| i.parent_pin)
    .min_by(|a, b| a.1.item_no.cmp(&b.1.item_no))
  {
    return Some(idx);
  }

  items
    .iter()
    .enumerate()
    .filter(|(_, i)| i.active)
    .min_by(by_price)
    .or_else(|| items.iter().enumerate().min_by(by_price))
    .map(|(idx, _)| idx)
}

// ─── Variant ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Variant {
  pub item_no:         String,
  /// Option-value label.
  pub variant_name:    Option<String>,
  pub price_1:         f64,
  /// Selling price; the sale price while the item is on sale.
  pub price:           f64,
  pub compare_at:      Option<f64>,
  pub cost:            f64,
  pub qty_available:   i64,
  pub weight:          Option<f64>,
  pub size:            Option<String>,
  pub is_parent:       bool,
  pub position:        u32,
  #[serde(skip)]
  pub variant_id:      Option<String>,
  #[serde(skip)]
  pub inventory_id:    Option<String>,
  #[serde(skip)]
  pub option_value_id: Option<String>,
}

impl Variant {
  fn from_row(row: &ItemRow, is_parent: bool, position: u32) -> Self {
    let sale = row.sale_price.filter(|p| row.is_on_sale() && *p >= 0.0 && *p < row.price_1);
    Self {
      item_no: row.item_no.clone(),
      variant_name: row
        .variant_name
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string),
      price_1: row.price_1,
      price: cents(sale.unwrap_or(row.price_1)),
      compare_at: sale.map(|_| cents(row.price_1)),
      cost: cents(row.cost),
      qty_available: row.qty_available.max(0),
      weight: row.weight,
      size: row.variant_size.clone().filter(|s| !s.trim().is_empty()),
      is_parent,
      position,
      variant_id: None,
      inventory_id: None,
      option_value_id: None,
    }
  }

  pub fn payload(&self) -> VariantInput {
    VariantInput {
      sku:                self.item_no.clone(),
      price:              money(self.price),
      compare_at_price:   self.compare_at.map(money),
      cost:               money(self.cost),
      inventory_quantity: self.qty_available,
      option_value:       self.variant_name.clone(),
      weight:             self.weight,
      position:           self.position,
    }
  }

  pub fn apply_created(&mut self, ids: VariantIds) {
    self.variant_id = Some(ids.variant_id);
    self.inventory_id = ids.inventory_id;
    self.option_value_id = ids.option_value_id;
  }
}

// ─── Product ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct Product {
  pub key:              ProductKey,
  pub title:            String,
  pub description_html: String,
  pub vendor:           Option<String>,
  /// The POS visibility flag; see [`Product::is_visible`].
  pub web_visible:      bool,
  /// POS category codes of the parent, in assignment order.
  pub categories:       Vec<String>,
  pub specs:            BTreeMap<SpecField, String>,
  /// Parent first, then the other members by item number.
  pub variants:         Vec<Variant>,
  pub media:            Vec<Media>,
  pub product_id:       Option<String>,
  pub option_id:        Option<String>,
  pub last_maint:       DateTime<Utc>,
}

/// Everything that determines what the storefront shows for a family.
#[derive(Serialize)]
struct FamilyPayload<'a> {
  product:     ProductInput,
  variants:    Vec<VariantInput>,
  metafields:  Vec<(SpecField, Option<String>)>,
  sizes:       Vec<(&'a str, Option<&'a str>)>,
  collections: &'a BTreeSet<String>,
  media:       Vec<(&'a str, u64, i64, u32)>,
}

impl Product {
  /// Build a product from the web-enabled members of one family (or a single
  /// item). Members must share the same product key.
  pub fn from_items(mut items: Vec<ItemRow>) -> Result<Self> {
    let Some(first) = items.first() else {
      return Err(Error::invalid("product", "", "no items"));
    };
    let key = ProductKey::for_item(first);
    if let Some(stray) = items.iter().find(|i| ProductKey::for_item(i) != key) {
      return Err(Error::invalid(
        "product",
        key.as_str(),
        format!("item {} belongs to another family", stray.item_no),
      ));
    }

    let parent_idx = elect_parent(&items)
      .ok_or_else(|| Error::invalid("product", key.as_str(), "no parent"))?;
    let parent = items.swap_remove(parent_idx);
    items.sort_by(|a, b| a.item_no.cmp(&b.item_no));

    let mut variants = vec![Variant::from_row(&parent, true, 1)];
    variants.extend(
      items
        .iter()
        .enumerate()
        .map(|(idx, row)| Variant::from_row(row, false, idx as u32 + 2)),
    );

    let description_html = parent
      .html_descr
      .clone()
      .filter(|d| !d.trim().is_empty())
      .or_else(|| parent.long_descr.clone().map(|d| format!("<p>{}</p>", d.trim())))
      .unwrap_or_default();

    let last_maint = items
      .iter()
      .map(|i| i.last_maint)
      .chain(std::iter::once(parent.last_maint))
      .max()
      .unwrap_or(parent.last_maint);

    Ok(Self {
      title: parent.title().trim().to_string(),
      description_html,
      vendor: parent.brand.clone().filter(|b| !b.trim().is_empty()),
      web_visible: parent.web_visible,
      categories: parent.categories.clone(),
      specs: parent
        .specs
        .iter()
        .filter(|(_, v)| !v.trim().is_empty())
        .map(|(k, v)| (*k, v.trim().to_string()))
        .collect(),
      key,
      variants,
      media: Vec::new(),
      product_id: None,
      option_id: None,
      last_maint,
    })
  }

  pub fn parent(&self) -> &Variant { &self.variants[0] }

  pub fn is_bound(&self) -> bool { matches!(self.key, ProductKey::Bound(_)) }

  /// A product without images is never visible, whatever the POS says.
  pub fn is_visible(&self) -> bool {
    self.web_visible && self.media.iter().any(|m| m.kind == MediaKind::Image)
  }

  pub fn validate(&self) -> Result<()> {
    let key = self.key.as_str();
    if self.title.is_empty() {
      return Err(Error::missing("product", key, "title"));
    }
    if self.title.chars().count() > MAX_TITLE {
      return Err(Error::invalid("product", key, format!("title longer than {MAX_TITLE}")));
    }
    for variant in &self.variants {
      if variant.price < 0.0 || variant.price_1 < 0.0 {
        return Err(Error::invalid("product", &variant.item_no, "negative price"));
      }
    }
    if self.is_bound() {
      let mut names = BTreeSet::new();
      for variant in &self.variants {
        let Some(name) = variant.variant_name.as_deref() else {
          return Err(Error::missing("variant", &variant.item_no, "variant_name"));
        };
        if !names.insert(name.to_lowercase()) {
          return Err(Error::invalid(
            "variant",
            &variant.item_no,
            format!("duplicate option value {name:?}"),
          ));
        }
      }
    }
    if let Some(date) = self.specs.get(&SpecField::PreorderDate) {
      if parse_date(date).is_none() {
        return Err(Error::invalid("product", key, format!("unreadable preorder date {date:?}")));
      }
    }
    Ok(())
  }

  pub fn payload(&self) -> ProductInput {
    let mut tags: Vec<String> = self.categories.clone();
    if self.specs.get(&SpecField::IsOnSale).is_some_and(|v| v == "Y") {
      tags.push("sale".into());
    }
    ProductInput {
      title:            self.title.clone(),
      handle:           handle(&format!("{} {}", self.title, self.key.as_str())),
      description_html: self.description_html.clone(),
      vendor:           self.vendor.clone(),
      status:           if self.is_visible() { ProductStatus::Active } else { ProductStatus::Draft },
      published:        self.is_visible(),
      tags,
      option_name:      self.is_bound().then(|| OPTION_NAME.to_string()),
    }
  }

  pub fn variant_payloads(&self) -> Vec<VariantInput> {
    self.variants.iter().map(Variant::payload).collect()
  }

  /// Storefront value of every specification field; `None` means the field
  /// must be removed from the storefront.
  pub fn metafields(&self) -> Vec<(SpecField, Option<String>)> {
    SpecField::all()
      .map(|field| {
        let value = self.specs.get(&field).and_then(|raw| format_value(field.kind(), raw));
        (field, value)
      })
      .collect()
  }

  /// Fingerprint of everything pushed for this family.
  pub fn fingerprint(&self, collections: &BTreeSet<String>) -> Result<String> {
    fingerprint(&FamilyPayload {
      product: self.payload(),
      variants: self.variant_payloads(),
      metafields: self.metafields(),
      sizes: self
        .variants
        .iter()
        .map(|v| (v.item_no.as_str(), v.size.as_deref()))
        .collect(),
      collections,
      media: self
        .media
        .iter()
        .map(|m| (m.name.as_str(), m.size, m.modified.timestamp_millis(), m.sort_order))
        .collect(),
    })
  }

  /// Resolve category codes to storefront collection ids. Codes that are not
  /// web-enabled collections are returned separately.
  pub fn collections(&self, web_enabled: &BTreeMap<String, String>) -> (BTreeSet<String>, Vec<String>) {
    let mut ids = BTreeSet::new();
    let mut unknown = Vec::new();
    for code in &self.categories {
      match web_enabled.get(code) {
        Some(id) => {
          ids.insert(id.clone());
        }
        None => unknown.push(code.clone()),
      }
    }
    (ids, unknown)
  }

  /// Carry known storefront ids over from the middleware rows.
  pub fn apply_mapping(&mut self, rows: &[ProductMapping]) {
    for row in rows {
      if self.product_id.is_none() {
        self.product_id = row.product_id.clone();
      }
      if self.option_id.is_none() {
        self.option_id = row.option_id.clone();
      }
      if let Some(variant) = self.variants.iter_mut().find(|v| v.item_no == row.item_no) {
        variant.variant_id = row.variant_id.clone();
        variant.inventory_id = row.inventory_id.clone();
        variant.option_value_id = row.option_value_id.clone();
      }
    }
  }

  pub fn apply_created(&mut self, ids: ProductIds) {
    self.product_id = Some(ids.product_id);
    self.option_id = ids.option_id;
  }

  /// The middleware rows describing this family after a successful push.
  pub fn mapping_rows(
    &self,
    collections: &BTreeSet<String>,
    previous: &[ProductMapping],
    payload_hash: &str,
  ) -> Vec<ProductMapping> {
    self
      .variants
      .iter()
      .map(|variant| {
        let mut row = previous
          .iter()
          .find(|r| r.item_no == variant.item_no)
          .cloned()
          .unwrap_or_else(|| ProductMapping::new(variant.item_no.clone()));
        row.binding_id = self.key.binding_id().map(str::to_string);
        row.is_parent = variant.is_parent;
        row.product_id = self.product_id.clone();
        row.option_id = self.option_id.clone();
        row.variant_id = variant.variant_id.clone();
        row.inventory_id = variant.inventory_id.clone();
        row.option_value_id = variant.option_value_id.clone();
        row.variant_name = variant.variant_name.clone();
        row.category_ids = collections.iter().cloned().collect();
        row.payload_hash = Some(payload_hash.to_string());
        row.last_qty = variant.qty_available;
        row.last_maint = Utc::now();
        row
      })
      .collect()
  }
}

// ─── Values ──────────────────────────────────────────────────────────────────

fn parse_date(raw: &str) -> Option<NaiveDate> {
  let raw = raw.trim();
  let raw = raw.split_whitespace().next().unwrap_or(raw);
  ["%Y-%m-%d", "%m/%d/%Y", "%m/%d/%y"]
    .iter()
    .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
}

/// Render a POS value in the storefront's representation for `kind`.
pub fn format_value(kind: MetafieldType, raw: &str) -> Option<String> {
  let raw = raw.trim();
  if raw.is_empty() {
    return None;
  }
  match kind {
    MetafieldType::Boolean => match raw.to_ascii_uppercase().as_str() {
      "Y" | "YES" | "TRUE" | "1" => Some("true".into()),
      "N" | "NO" | "FALSE" | "0" => Some("false".into()),
      _ => None,
    },
    MetafieldType::Date => parse_date(raw).map(|d| d.format("%Y-%m-%d").to_string()),
    MetafieldType::Integer => raw.parse::<i64>().ok().map(|n| n.to_string()),
    MetafieldType::SingleLineText => Some(raw.replace(['\r', '\n'], " ")),
    MetafieldType::MultiLineText => Some(raw.to_string()),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn item(item_no: &str, binding: Option<&str>, price: f64) -> ItemRow {
    ItemRow {
      item_no:       item_no.into(),
      binding_id:    binding.map(str::to_string),
      parent_pin:    false,
      is_parent:     false,
      web_enabled:   true,
      web_visible:   true,
      active:        true,
      web_title:     Some("Green Giant Arborvitae".into()),
      descr:         "ARBORVITAE GREEN GIANT".into(),
      long_descr:    None,
      html_descr:    Some("<p>Fast growing</p>".into()),
      price_1:       price,
      price_2:       None,
      sale_price:    None,
      cost:          price / 2.0,
      qty_available: 3,
      variant_name:  Some(format!("#{item_no}")),
      variant_size:  None,
      brand:         None,
      weight:        None,
      categories:    vec!["TREES".into(), "EVERGREEN".into()],
      specs:         BTreeMap::new(),
      video_urls:    vec![],
      last_maint:    Utc::now(),
    }
  }

  #[test]
  fn lowest_price_is_parent_with_item_tiebreak() {
    let items = vec![
      item("200375", Some("B0006"), 19.99),
      item("200374", Some("B0006"), 19.99),
      item("200373", Some("B0006"), 29.99),
    ];
    assert_eq!(elect_parent(&items), Some(1));
  }

  #[test]
  fn pin_overrides_price() {
    let mut items = vec![item("1", Some("B"), 10.0), item("2", Some("B"), 50.0)];
    items[1].parent_pin = true;
    assert_eq!(elect_parent(&items), Some(1));
  }

  #[test]
  fn inactive_members_do_not_win() {
    let mut items = vec![item("1", Some("B"), 5.0), item("2", Some("B"), 50.0)];
    items[0].active = false;
    assert_eq!(elect_parent(&items), Some(1));
  }

  #[test]
  fn family_builds_with_parent_first() {
    let product = Product::from_items(vec![
      item("200373", Some("B0006"), 29.99),
      item("200374", Some("B0006"), 24.99),
    ])
    .unwrap();
    assert_eq!(product.key, ProductKey::Bound("B0006".into()));
    assert_eq!(product.parent().item_no, "200374");
    assert!(product.parent().is_parent);
    assert_eq!(product.variants.iter().filter(|v| v.is_parent).count(), 1);
    assert_eq!(product.variants[1].position, 2);
    product.validate().unwrap();
  }

  #[test]
  fn mixed_families_are_rejected() {
    let err = Product::from_items(vec![item("1", Some("A"), 1.0), item("2", Some("B"), 1.0)]);
    assert!(err.is_err());
  }

  #[test]
  fn no_images_means_hidden() {
    let product = Product::from_items(vec![item("200373", None, 29.99)]).unwrap();
    assert!(product.web_visible);
    assert!(!product.is_visible());
    assert_eq!(product.payload().status, ProductStatus::Draft);
  }

  #[test]
  fn sale_price_sets_compare_at() {
    let mut row = item("1", None, 20.0);
    row.sale_price = Some(15.0);
    row.specs.insert(SpecField::IsOnSale, "Y".into());
    let product = Product::from_items(vec![row]).unwrap();
    let payload = product.parent().payload();
    assert_eq!(payload.price, "15.00");
    assert_eq!(payload.compare_at_price.as_deref(), Some("20.00"));
  }

  #[test]
  fn duplicate_option_values_fail_validation() {
    let mut a = item("1", Some("B"), 1.0);
    let mut b = item("2", Some("B"), 2.0);
    a.variant_name = Some("Gallon".into());
    b.variant_name = Some("gallon".into());
    let product = Product::from_items(vec![a, b]).unwrap();
    assert!(product.validate().is_err());
  }

  #[test]
  fn metafield_values_render_by_type() {
    assert_eq!(format_value(MetafieldType::Boolean, "Y").as_deref(), Some("true"));
    assert_eq!(format_value(MetafieldType::Date, "04/15/2026").as_deref(), Some("2026-04-15"));
    assert_eq!(format_value(MetafieldType::SingleLineText, "  "), None);
  }

  #[test]
  fn cleared_spec_becomes_none() {
    let mut row = item("1", None, 1.0);
    row.specs.insert(SpecField::Height, "6 ft".into());
    row.specs.insert(SpecField::Width, "".into());
    let product = Product::from_items(vec![row]).unwrap();
    let fields: BTreeMap<_, _> = product.metafields().into_iter().collect();
    assert_eq!(fields[&SpecField::Height].as_deref(), Some("6 ft"));
    assert_eq!(fields[&SpecField::Width], None);
  }

  #[test]
  fn fingerprint_tracks_changes() {
    let collections = BTreeSet::from(["c1".to_string()]);
    let a = Product::from_items(vec![item("1", None, 10.0)]).unwrap();
    let b = Product::from_items(vec![item("1", None, 11.0)]).unwrap();
    assert_eq!(a.fingerprint(&collections).unwrap(), a.fingerprint(&collections).unwrap());
    assert_ne!(a.fingerprint(&collections).unwrap(), b.fingerprint(&collections).unwrap());
  }

  #[test]
  fn unknown_categories_are_reported() {
    let product = Product::from_items(vec![item("1", None, 10.0)]).unwrap();
    let web = BTreeMap::from([("TREES".to_string(), "col-1".to_string())]);
    let (ids, unknown) = product.collections(&web);
    assert_eq!(ids, BTreeSet::from(["col-1".to_string()]));
    assert_eq!(unknown, vec!["EVERGREEN".to_string()]);
  }
}
