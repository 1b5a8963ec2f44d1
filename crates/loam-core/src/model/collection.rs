//! Collections: web-enabled POS categories and brands.

use std::path::PathBuf;

use chrono::{DateTime, Utc};

use crate::{
  Error, Result,
  mapping::CollectionMapping,
  model::handle,
  pos::{BrandRow, CategoryRow},
  storefront::CollectionInput,
};

#[derive(Debug, Clone, PartialEq)]
pub struct Collection {
  /// Category code, or brand profile code for brand collections.
  pub cp_id:        String,
  pub parent_cp_id: Option<String>,
  pub name:         String,
  pub description:  Option<String>,
  pub sort:         i64,
  pub visible:      bool,
  pub is_brand:     bool,
  /// Logo on disk (brands only).
  pub image:        Option<PathBuf>,
  pub image_size:   Option<u64>,
  pub shop_id:      Option<String>,
  pub last_maint:   DateTime<Utc>,
}

impl Collection {
  pub fn from_category(row: &CategoryRow) -> Self {
    Self {
      cp_id:        row.code.trim().to_uppercase(),
      parent_cp_id: row
        .parent_code
        .as_deref()
        .map(|p| p.trim().to_uppercase())
        .filter(|p| !p.is_empty()),
      name:         row.name.trim().to_string(),
      description:  row.description.clone().filter(|d| !d.trim().is_empty()),
      sort:         row.sort,
      visible:      row.visible,
      is_brand:     false,
      image:        None,
      image_size:   None,
      shop_id:      None,
      last_maint:   row.last_maint,
    }
  }

  pub fn from_brand(row: &BrandRow, logo: Option<(PathBuf, u64)>) -> Self {
    let (image, image_size) = logo.map_or((None, None), |(p, s)| (Some(p), Some(s)));
    Self {
      cp_id: row.code.trim().to_uppercase(),
      parent_cp_id: None,
      name: row.name.trim().to_string(),
      description: row.description.clone().filter(|d| !d.trim().is_empty()),
      sort: 0,
      visible: true,
      is_brand: true,
      image,
      image_size,
      shop_id: None,
      last_maint: row.last_maint,
    }
  }

  pub fn validate(&self) -> Result<()> {
    if self.cp_id.is_empty() {
      return Err(Error::missing("collection", &self.name, "code"));
    }
    if self.name.is_empty() {
      return Err(Error::missing("collection", &self.cp_id, "name"));
    }
    if self.parent_cp_id.as_deref() == Some(self.cp_id.as_str()) {
      return Err(Error::invalid("collection", &self.cp_id, "is its own parent"));
    }
    Ok(())
  }

  /// `image_url` is the public URL of the uploaded logo; `parent_shop_id`
  /// the storefront id of the parent collection.
  pub fn payload(&self, image_url: Option<String>, parent_shop_id: Option<String>) -> CollectionInput {
    let prefix = if self.is_brand { "brand " } else { "" };
    CollectionInput {
      title:            self.name.clone(),
      handle:           handle(&format!("{prefix}{}", self.name)),
      description_html: self.description.clone().unwrap_or_default(),
      sort_position:    self.sort,
      published:        self.visible,
      image_src:        image_url,
      parent_id:        parent_shop_id,
    }
  }

  /// Whether the mapped row differs from this collection in anything the
  /// storefront shows.
  pub fn differs_from(&self, row: &CollectionMapping) -> bool {
    row.name != self.name
      || row.description != self.description
      || row.sort != self.sort
      || row.visible != self.visible
      || row.parent_cp_id != self.parent_cp_id
      || row.image_size != self.image_size
  }

  pub fn mapping_row(&self, shop_id: String, menu_id: Option<String>) -> CollectionMapping {
    CollectionMapping {
      cp_id: self.cp_id.clone(),
      shop_id: Some(shop_id),
      menu_id,
      parent_cp_id: self.parent_cp_id.clone(),
      name: self.name.clone(),
      sort: self.sort,
      description: self.description.clone(),
      visible: self.visible,
      image_size: self.image_size,
      is_brand: self.is_brand,
      last_maint: Utc::now(),
    }
  }
}

/// Order collections so every parent precedes its children. Collections whose
/// parent is not in the set keep their relative order at the front.
pub fn parents_first(mut collections: Vec<Collection>) -> Vec<Collection> {
  let mut ordered = Vec::with_capacity(collections.len());
  let mut placed = std::collections::HashSet::new();
  let codes: std::collections::HashSet<String> =
    collections.iter().map(|c| c.cp_id.clone()).collect();

  while !collections.is_empty() {
    let before = collections.len();
    collections.retain(|c| {
      let ready = match &c.parent_cp_id {
        Some(parent) => !codes.contains(parent) || placed.contains(parent),
        None => true,
      };
      if ready {
        placed.insert(c.cp_id.clone());
        ordered.push(c.clone());
      }
      !ready
    });
    if collections.len() == before {
      // Cycle: place the rest as they are.
      ordered.append(&mut collections);
    }
  }
  ordered
}
