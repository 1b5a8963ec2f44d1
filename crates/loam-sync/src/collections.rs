//! Category and brand collections.

use std::{
  collections::{BTreeSet, HashMap},
  fs,
  path::{Path, PathBuf},
  sync::Arc,
};

use chrono::{DateTime, Utc};
use loam_core::{
  mapping::CollectionMapping,
  model::{
    collection::{Collection, parents_first},
    media::IMAGE_EXTENSIONS,
  },
  storefront::Storefront,
};

use crate::{
  Kind, Outcome, Result, SyncContext,
  error::{persisted, tolerate_missing},
};

/// A brand's logo: `<brand_logos>/<code>.<ext>`, matched case-insensitively.
fn find_logo(root: &Path, code: &str) -> Option<(PathBuf, u64, DateTime<Utc>)> {
  let entries = fs::read_dir(root).ok()?;
  for entry in entries.flatten() {
    let name = entry.file_name().to_string_lossy().into_owned();
    let Some((stem, ext)) = name.rsplit_once('.') else {
      continue;
    };
    if !stem.eq_ignore_ascii_case(code) || !IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()) {
      continue;
    }
    let meta = entry.metadata().ok()?;
    let modified = meta.modified().map(DateTime::<Utc>::from).unwrap_or_else(|_| Utc::now());
    return Some((entry.path(), meta.len(), modified));
  }
  None
}

pub async fn sync<S: Storefront>(ctx: &Arc<SyncContext<S>>, cursor: DateTime<Utc>) -> Result<Outcome> {
  let categories = ctx.pos.web_categories().await?;
  let brands = ctx.pos.web_brands().await?;
  let mut outcome = Outcome::default();

  // ── Deletes ──────────────────────────────────────────────────────────
  let category_codes: BTreeSet<String> =
    categories.iter().map(|c| c.code.trim().to_uppercase()).collect();
  let brand_codes: BTreeSet<String> = brands.iter().map(|b| b.code.trim().to_uppercase()).collect();

  let mut mapped: HashMap<String, CollectionMapping> = HashMap::new();
  for row in ctx.middleware.collections().await? {
    let live = if row.is_brand { &brand_codes } else { &category_codes };
    if live.contains(&row.cp_id) {
      mapped.insert(row.cp_id.clone(), row);
      continue;
    }
    let deleted = match &row.shop_id {
      Some(id) => tolerate_missing(ctx.storefront.delete_collection(id).await),
      None => Ok(()),
    };
    match deleted {
      Ok(()) => {
        persisted(ctx.middleware.delete_collection(&row.cp_id).await, "collections.delete")?;
        ctx.errors.info("collections", format!("deleted collection {}", row.cp_id));
        outcome.succeeded.push(row.cp_id);
      }
      Err(err) => {
        ctx.failed(Kind::Collections, &row.cp_id, &err.into()).await;
        outcome.failed.push(row.cp_id);
      }
    }
  }

  // ── Changes ──────────────────────────────────────────────────────────
  let mut wanted = Vec::with_capacity(categories.len() + brands.len());
  wanted.extend(categories.iter().map(Collection::from_category));
  for brand in &brands {
    let logo = find_logo(&ctx.settings.brand_logos, brand.code.trim());
    let mut collection = Collection::from_brand(brand, logo.as_ref().map(|(p, s, _)| (p.clone(), *s)));
    let modified = logo.map(|(_, _, m)| m).filter(|m| *m > cursor && *m > collection.last_maint);
    if let Some(modified) = modified {
      persisted(ctx.pos.touch_brand(&brand.code, modified).await, "collections.touch_brand")?;
      collection.last_maint = modified;
    }
    wanted.push(collection);
  }

  let retry: BTreeSet<String> = ctx.retry_keys(Kind::Collections).await?.into_iter().collect();
  let mut shop_ids: HashMap<String, String> = mapped
    .values()
    .filter_map(|r| r.shop_id.clone().map(|id| (r.cp_id.clone(), id)))
    .collect();

  // ── Push ─────────────────────────────────────────────────────────────
  for collection in parents_first(wanted) {
    let row = mapped.get(&collection.cp_id);
    let due = match row {
      Some(row) => {
        row.shop_id.is_none()
          || collection.differs_from(row)
          || collection.last_maint > cursor
          || retry.contains(&collection.cp_id)
      }
      None => true,
    };
    if !due {
      continue;
    }
    let key = collection.cp_id.clone();
    match push(ctx, &collection, row, &shop_ids).await {
      Ok(shop_id) => {
        shop_ids.insert(key.clone(), shop_id);
        ctx.succeeded(Kind::Collections, &key).await;
        outcome.succeeded.push(key);
      }
      Err(err) => {
        ctx.failed(Kind::Collections, &key, &err).await;
        outcome.failed.push(key);
      }
    }
  }
  Ok(outcome)
}

async fn push<S: Storefront>(
  ctx: &SyncContext<S>,
  collection: &Collection,
  row: Option<&CollectionMapping>,
  shop_ids: &HashMap<String, String>,
) -> Result<String> {
  collection.validate()?;

  let image_url = match &collection.image {
    Some(path) => {
      let file = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
      Some(ctx.storage.upload(path, &format!("brands/{file}")).await?)
    }
    None => None,
  };
  let parent = collection.parent_cp_id.as_ref().and_then(|p| shop_ids.get(p)).cloned();
  if collection.parent_cp_id.is_some() && parent.is_none() {
    ctx.errors.warn(
      "collections",
      format!("{}: parent {:?} has no storefront id yet", collection.cp_id, collection.parent_cp_id),
    );
  }
  let input = collection.payload(image_url, parent);

  let existing = row.and_then(|r| r.shop_id.clone());
  let shop_id = match existing {
    Some(id) => {
      ctx.storefront.update_collection(&id, &input).await?;
      id
    }
    None => {
      let id = ctx.storefront.create_collection(&input).await?;
      ctx.errors.info("collections", format!("created collection {} as {id}", collection.cp_id));
      id
    }
  };

  let menu_id = row.and_then(|r| r.menu_id.clone());
  let mapping = collection.mapping_row(shop_id.clone(), menu_id);
  persisted(ctx.middleware.upsert_collection(&mapping).await, "collections.record")?;
  Ok(shop_id)
}
