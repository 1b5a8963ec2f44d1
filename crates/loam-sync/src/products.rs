//! Products, variants, product metafields and media.

use std::{
  collections::{BTreeMap, BTreeSet, HashMap},
  sync::Arc,
};

use chrono::{DateTime, Utc};
use loam_core::{
  mapping::{ImageMapping, ProductMapping, VideoMapping},
  model::{
    media::{self, FamilyMedia, ImageFile, Media, MediaKind, arrange, compact, scan_images},
    metafield::{MetafieldType, NAMESPACE, SpecField, VARIANT_SIZE_KEY},
    product::{Product, ProductKey},
  },
  pos::ItemRow,
  storefront::{MediaContentType, MediaInput, MetafieldInput, MetafieldRef, Storefront},
};

use crate::{
  Dispatcher, Error, Kind, Outcome, Result, SyncContext,
  error::{persisted, tolerate_missing},
  stock,
};

type ImageIndex = BTreeMap<String, Vec<ImageFile>>;

pub async fn sync<S: Storefront + 'static>(
  ctx: &Arc<SyncContext<S>>,
  dispatcher: &Dispatcher,
  cursor: DateTime<Utc>,
) -> Result<Outcome> {
  let live = ctx.pos.syncable_item_numbers().await?;
  let mut outcome = remove_vanished(ctx, &live).await?;

  let images = match scan_images(&ctx.settings.photos) {
    Ok(index) => index,
    Err(err) => {
      ctx.errors.warn(
        "products.photos",
        format!("cannot scan {}: {err}", ctx.settings.photos.display()),
      );
      ImageIndex::new()
    }
  };
  bump_changed_photos(ctx, &images, &live, cursor).await?;

  let retry = ctx.retry_keys(Kind::Products).await?;
  let families = ctx.pos.changed_families(cursor, &retry).await?;
  let collections: Arc<BTreeMap<String, String>> = Arc::new(
    ctx
      .middleware
      .collections()
      .await?
      .into_iter()
      .filter(|c| !c.is_brand)
      .filter_map(|c| c.shop_id.map(|id| (c.cp_id, id)))
      .collect(),
  );
  let images = Arc::new(images);

  let tasks = families.into_iter().filter_map(|items| {
    let key = ProductKey::for_item(items.first()?).as_str().to_string();
    let (ctx, images, collections) = (ctx.clone(), images.clone(), collections.clone());
    let task_key = key.clone();
    Some((key, async move {
      match push_family(&ctx, items, &images, &collections).await {
        Ok(()) => {
          ctx.succeeded(Kind::Products, &task_key).await;
          true
        }
        Err(err) => {
          ctx.failed(Kind::Products, &task_key, &err).await;
          false
        }
      }
    }))
  });
  outcome.merge(dispatcher.run(tasks).await);
  Ok(outcome)
}

// ─── Deletes ─────────────────────────────────────────────────────────────────

/// Remove storefront products whose items all left the syncable set. A family
/// that only lost some members is queued for a re-push, which drops the
/// stale variants.
async fn remove_vanished<S: Storefront>(
  ctx: &SyncContext<S>,
  live: &BTreeSet<String>,
) -> Result<Outcome> {
  let mut outcome = Outcome::default();
  let mut by_product: BTreeMap<String, Vec<ProductMapping>> = BTreeMap::new();
  for row in ctx.middleware.product_rows().await? {
    match row.product_id.clone() {
      Some(pid) => by_product.entry(pid).or_default().push(row),
      None if !live.contains(&row.item_no) => {
        persisted(ctx.middleware.delete_product_key(&row.item_no).await, "products.forget")?;
      }
      None => {}
    }
  }

  for (product_id, rows) in by_product {
    let gone = rows.iter().filter(|r| !live.contains(&r.item_no)).count();
    if gone == 0 {
      continue;
    }
    let key = rows[0].binding_id.clone().unwrap_or_else(|| rows[0].item_no.clone());
    if gone < rows.len() {
      let envelope = ctx.middleware.record_retry(Kind::Products.name(), &key, "members removed").await;
      persisted(envelope, "products.requeue")?;
      continue;
    }

    let names: Vec<String> = ctx.middleware.images(&product_id).await?.into_iter().map(|i| i.name).collect();
    match tolerate_missing(ctx.storefront.delete_product(&product_id).await) {
      Ok(()) => {
        for name in &names {
          if let Err(err) = ctx.storage.delete(name).await {
            ctx.errors.warn("products.media", format!("{name} left in storage: {err}"));
          }
        }
        persisted(ctx.middleware.delete_product(&product_id).await, "products.forget")?;
        ctx.errors.info("products", format!("deleted product {key} ({product_id})"));
        outcome.succeeded.push(key);
      }
      Err(err) => {
        ctx.failed(Kind::Products, &key, &err.into()).await;
        outcome.failed.push(key);
      }
    }
  }
  Ok(outcome)
}

// ─── Photo changes ───────────────────────────────────────────────────────────

/// Items whose image files changed after the cursor are touched so change
/// detection picks them up. Binding images touch the whole family.
async fn bump_changed_photos<S: Storefront>(
  ctx: &SyncContext<S>,
  images: &ImageIndex,
  live: &BTreeSet<String>,
  cursor: DateTime<Utc>,
) -> Result<()> {
  let items: HashMap<String, &String> = live.iter().map(|i| (i.to_uppercase(), i)).collect();
  for (key, files) in images {
    let Some(modified) = files.iter().map(|f| f.modified).filter(|m| *m > cursor).max() else {
      continue;
    };
    let targets = match items.get(key) {
      Some(item) => vec![(*item).clone()],
      None => ctx.pos.family(key).await?.into_iter().map(|i| i.item_no).collect(),
    };
    if targets.is_empty() {
      continue;
    }
    persisted(ctx.pos.touch_items(targets, modified).await, "products.touch_items")?;
  }
  Ok(())
}

// ─── Push ────────────────────────────────────────────────────────────────────

fn family_media(product: &Product, items: &[ItemRow], images: &ImageIndex) -> FamilyMedia {
  let files = |key: &str| images.get(&key.to_uppercase()).cloned().unwrap_or_default();
  let parent = product.parent().item_no.clone();
  let mut videos = Vec::new();
  for variant in &product.variants {
    if let Some(row) = items.iter().find(|i| i.item_no == variant.item_no) {
      videos.extend(row.video_urls.iter().map(|url| (row.item_no.clone(), url.clone())));
    }
  }
  FamilyMedia {
    binding: product.key.binding_id().map(files).unwrap_or_default(),
    parent: files(&parent),
    variants: product
      .variants
      .iter()
      .skip(1)
      .map(|v| (v.item_no.clone(), files(&v.item_no)))
      .collect(),
    videos,
  }
}

async fn push_family<S: Storefront>(
  ctx: &SyncContext<S>,
  items: Vec<ItemRow>,
  images: &ImageIndex,
  collection_ids: &BTreeMap<String, String>,
) -> Result<()> {
  let mut product = Product::from_items(items.clone())?;
  let key = product.key.as_str().to_string();
  if let Some(binding) = product.key.binding_id() {
    let parent = product.parent().item_no.clone();
    persisted(ctx.pos.set_parent(binding, &parent).await, "products.set_parent")?;
  }
  let family = family_media(&product, &items, images);
  product.media = arrange(&family, &product.parent().item_no, &product.title);
  product.validate()?;

  let previous = ctx.middleware.product_rows_for_key(&key).await?;
  product.apply_mapping(&previous);
  retire_rebound_items(ctx, &product, &previous).await?;

  let (collections, unknown) = product.collections(collection_ids);
  if !unknown.is_empty() {
    ctx.errors.warn("products", format!("{key}: categories without a collection: {unknown:?}"));
  }

  let hash = product.fingerprint(&collections)?;
  let same_members = previous.iter().map(|r| r.item_no.as_str()).collect::<BTreeSet<_>>()
    == product.variants.iter().map(|v| v.item_no.as_str()).collect();
  let unchanged = !previous.is_empty()
    && same_members
    && product.product_id.is_some()
    && product.variants.iter().all(|v| v.variant_id.is_some())
    && previous.iter().all(|r| r.payload_hash.as_deref() == Some(hash.as_str()));
  if unchanged {
    ctx.errors.debug("products", format!("{key} unchanged"));
    return Ok(());
  }

  // ── Product ──────────────────────────────────────────────────────────
  let input = product.payload();
  let created = match product.product_id.clone() {
    Some(pid) => {
      ctx.storefront.update_product(&pid, &input).await?;
      false
    }
    None => {
      let ids = ctx.storefront.create_product(&input).await?;
      ctx.errors.info("products", format!("created product {key} as {}", ids.product_id));
      product.apply_created(ids);
      true
    }
  };
  let Some(product_id) = product.product_id.clone() else {
    return Err(loam_core::Error::missing("product", &key, "product_id").into());
  };

  // ── Variants ─────────────────────────────────────────────────────────
  if let Err(err) = push_variants(ctx, &mut product, &product_id, &previous).await {
    if created {
      // A half-created product must not stay on the storefront.
      if let Err(undo) = tolerate_missing(ctx.storefront.delete_product(&product_id).await) {
        ctx.errors.warn("products", format!("{key}: rollback of {product_id} failed: {undo}"));
      }
      persisted(ctx.middleware.delete_product_key(&key).await, "products.rollback")?;
    } else {
      undo_new_variants(ctx, &product, &product_id, &previous).await;
    }
    return Err(err);
  }

  // ── Collections ──────────────────────────────────────────────────────
  let before: BTreeSet<String> = if created {
    BTreeSet::new()
  } else {
    previous.iter().flat_map(|r| r.category_ids.iter().cloned()).collect()
  };
  let product_ids = [product_id.clone()];
  for id in collections.difference(&before) {
    ctx.storefront.add_to_collection(id, &product_ids).await?;
  }
  for id in before.difference(&collections) {
    tolerate_missing(ctx.storefront.remove_from_collection(id, &product_ids).await)?;
  }

  // ── Metafields ───────────────────────────────────────────────────────
  let (meta_ids, size_ids) = push_metafields(ctx, &product, &product_id, &previous).await?;

  // ── Media ────────────────────────────────────────────────────────────
  push_media(ctx, &mut product, &product_id).await?;

  // ── Record ───────────────────────────────────────────────────────────
  let mut rows = product.mapping_rows(&collections, &previous, &hash);
  for row in &mut rows {
    row.meta_ids = meta_ids.clone();
    row.variant_size_meta_id = size_ids.get(&row.item_no).cloned();
  }
  persisted(ctx.middleware.replace_product_rows(Some(key.clone()), rows).await, "products.record")?;

  let restocked: Vec<(String, String)> = product
    .variants
    .iter()
    .filter(|v| v.qty_available > 0)
    .filter(|v| previous.iter().any(|r| r.item_no == v.item_no && r.last_qty <= 0))
    .map(|v| (v.item_no.clone(), product.title.clone()))
    .collect();
  if !restocked.is_empty() {
    stock::notify_restocked(ctx, &restocked).await;
  }
  Ok(())
}

/// Members that moved into this family from another product (e.g. a single
/// item that was given a binding id) take their old product down with them.
async fn retire_rebound_items<S: Storefront>(
  ctx: &SyncContext<S>,
  product: &Product,
  previous: &[ProductMapping],
) -> Result<()> {
  if !product.is_bound() {
    return Ok(());
  }
  for variant in &product.variants {
    if previous.iter().any(|r| r.item_no == variant.item_no) {
      continue;
    }
    for row in ctx.middleware.product_rows_for_key(&variant.item_no).await? {
      let Some(old) = row.product_id.filter(|pid| Some(pid) != product.product_id.as_ref()) else {
        continue;
      };
      tolerate_missing(ctx.storefront.delete_product(&old).await)?;
      persisted(ctx.middleware.delete_product(&old).await, "products.retire")?;
      ctx.errors.info("products", format!("{} moved into {}; retired {old}", variant.item_no, product.key.as_str()));
    }
  }
  Ok(())
}

/// Delete the variants this attempt created but never recorded, so the retry
/// creates them again instead of leaving unmapped duplicates behind.
async fn undo_new_variants<S: Storefront>(
  ctx: &SyncContext<S>,
  product: &Product,
  product_id: &str,
  previous: &[ProductMapping],
) {
  let key = product.key.as_str();
  for variant in &product.variants {
    let Some(vid) = &variant.variant_id else {
      continue;
    };
    if previous.iter().any(|r| r.variant_id.as_ref() == Some(vid)) {
      continue;
    }
    match tolerate_missing(ctx.storefront.delete_variant(product_id, vid).await) {
      Ok(()) => ctx.errors.info("products", format!("{key}: withdrew unrecorded variant {}", variant.item_no)),
      Err(undo) => ctx.errors.warn("products", format!("{key}: rollback of variant {vid} failed: {undo}")),
    }
  }
}

async fn push_variants<S: Storefront>(
  ctx: &SyncContext<S>,
  product: &mut Product,
  product_id: &str,
  previous: &[ProductMapping],
) -> Result<()> {
  for variant in &mut product.variants {
    let input = variant.payload();
    match variant.variant_id.clone() {
      Some(vid) => ctx.storefront.update_variant(product_id, &vid, &input).await?,
      None => {
        let ids = ctx.storefront.create_variant(product_id, &input).await?;
        variant.apply_created(ids);
      }
    }
    if let Some(inventory) = &variant.inventory_id {
      ctx.storefront.set_inventory(inventory, variant.qty_available).await?;
    }
  }

  let members: BTreeSet<&str> = product.variants.iter().map(|v| v.item_no.as_str()).collect();
  for row in previous.iter().filter(|r| !members.contains(r.item_no.as_str())) {
    if let Some(vid) = &row.variant_id {
      tolerate_missing(ctx.storefront.delete_variant(product_id, vid).await)?;
      ctx.errors.info("products", format!("removed variant {} from {product_id}", row.item_no));
    }
  }
  Ok(())
}

/// Write every specification field that has a value and remove the ones that
/// lost theirs. Returns the product-level metafield ids and the variant size
/// ids by item number.
async fn push_metafields<S: Storefront>(
  ctx: &SyncContext<S>,
  product: &Product,
  product_id: &str,
  previous: &[ProductMapping],
) -> Result<(BTreeMap<SpecField, String>, BTreeMap<String, String>)> {
  let mut meta_ids: BTreeMap<SpecField, String> =
    previous.iter().flat_map(|r| r.meta_ids.clone()).collect();
  let mut size_ids: BTreeMap<String, String> = previous
    .iter()
    .filter_map(|r| r.variant_size_meta_id.clone().map(|id| (r.item_no.clone(), id)))
    .collect();

  let mut set = Vec::new();
  let mut clear = Vec::new();
  for (field, value) in product.metafields() {
    match value {
      Some(value) => set.push(MetafieldInput {
        owner_id:  product_id.to_string(),
        namespace: NAMESPACE.to_string(),
        key:       field.key().to_string(),
        kind:      field.kind().storefront_name().to_string(),
        value,
      }),
      None => {
        if meta_ids.remove(&field).is_some() {
          clear.push(MetafieldRef {
            owner_id:  product_id.to_string(),
            namespace: NAMESPACE.to_string(),
            key:       field.key().to_string(),
          });
        }
      }
    }
  }
  for variant in &product.variants {
    let Some(vid) = &variant.variant_id else { continue };
    match &variant.size {
      Some(size) => set.push(MetafieldInput {
        owner_id:  vid.clone(),
        namespace: NAMESPACE.to_string(),
        key:       VARIANT_SIZE_KEY.to_string(),
        kind:      MetafieldType::SingleLineText.storefront_name().to_string(),
        value:     size.clone(),
      }),
      None => {
        if size_ids.remove(&variant.item_no).is_some() {
          clear.push(MetafieldRef {
            owner_id:  vid.clone(),
            namespace: NAMESPACE.to_string(),
            key:       VARIANT_SIZE_KEY.to_string(),
          });
        }
      }
    }
  }

  if !clear.is_empty() {
    ctx.storefront.delete_metafields(&clear).await?;
  }
  if !set.is_empty() {
    let owners: HashMap<&str, &str> = product
      .variants
      .iter()
      .filter_map(|v| v.variant_id.as_deref().map(|vid| (vid, v.item_no.as_str())))
      .collect();
    for stored in ctx.storefront.set_metafields(&set).await? {
      if stored.owner_id == product_id {
        if let Some(field) = SpecField::all().find(|f| f.key() == stored.key) {
          meta_ids.insert(field, stored.id);
        }
      } else if let Some(item) = owners.get(stored.owner_id.as_str()) {
        size_ids.insert(item.to_string(), stored.id);
      }
    }
  }
  Ok((meta_ids, size_ids))
}

async fn push_media<S: Storefront>(ctx: &SyncContext<S>, product: &mut Product, product_id: &str) -> Result<()> {
  let images = ctx.middleware.images(product_id).await?;
  let videos = ctx.middleware.videos(product_id).await?;
  let plan = media::plan(&product.media, &images, &videos);

  if !plan.delete.is_empty() {
    tolerate_missing(ctx.storefront.delete_media(product_id, &plan.delete).await)?;
    for row in images.iter().filter(|r| r.image_id.as_ref().is_some_and(|id| plan.delete.contains(id))) {
      if let Err(err) = ctx.storage.delete(&row.name).await {
        ctx.errors.warn("products.media", format!("{} left in storage: {err}", row.name));
      }
    }
  }

  let mut moved = false;
  for (idx, id) in &plan.keep {
    let media = &mut product.media[*idx];
    let mapped = match media.kind {
      MediaKind::Image => images.iter().find(|r| r.image_id.as_ref() == Some(id)).map(|r| r.sort_order),
      MediaKind::ExternalVideo => {
        videos.iter().find(|r| r.media_id.as_ref() == Some(id)).map(|r| r.sort_order)
      }
    };
    moved |= mapped != Some(media.sort_order);
    media.remote_id = Some(id.clone());
  }

  if !plan.upload.is_empty() {
    let mut inputs = Vec::with_capacity(plan.upload.len());
    for idx in &plan.upload {
      inputs.push(media_input(ctx, &product.media[*idx]).await?);
    }
    let ids = ctx.storefront.create_media(product_id, &inputs).await?;
    for (idx, id) in plan.upload.iter().zip(ids) {
      product.media[*idx].remote_id = Some(id);
    }
  }

  if moved || !plan.is_empty() {
    let moves = media::positions(&product.media);
    if !moves.is_empty() {
      ctx.storefront.reorder_media(product_id, &moves).await?;
    }
  }

  let binding = product.key.binding_id().map(str::to_string);
  let mut image_rows = Vec::new();
  let mut video_rows = Vec::new();
  for media in product.media.iter().filter(|m| m.remote_id.is_some()) {
    match media.kind {
      MediaKind::Image => image_rows.push(ImageMapping {
        id:               None,
        name:             media.name.clone(),
        item_no:          media.item_no.clone(),
        file_path:        media.file_path.as_ref().map(|p| p.display().to_string()).unwrap_or_default(),
        product_id:       Some(product_id.to_string()),
        image_id:         media.remote_id.clone(),
        thumbnail:        media.is_thumbnail(),
        image_number:     media.image_number,
        sort_order:       media.sort_order,
        is_binding_image: media.is_binding_image,
        binding_id:       binding.clone(),
        is_variant_image: media.is_variant_image,
        description:      Some(media.alt.clone()),
        size:             media.size,
        modified:         media.modified,
        last_maint:       Utc::now(),
      }),
      MediaKind::ExternalVideo => video_rows.push(VideoMapping {
        id:          None,
        url:         media.name.clone(),
        item_no:     media.item_no.clone(),
        product_id:  Some(product_id.to_string()),
        media_id:    media.remote_id.clone(),
        sort_order:  media.sort_order,
        binding_id:  binding.clone(),
        description: Some(media.alt.clone()),
        last_maint:  Utc::now(),
      }),
    }
  }
  compact(&mut image_rows);
  persisted(ctx.middleware.replace_media(product_id, image_rows, video_rows).await, "products.media")?;
  Ok(())
}

async fn media_input<S>(ctx: &SyncContext<S>, media: &Media) -> Result<MediaInput> {
  match media.kind {
    MediaKind::Image => {
      let Some(path) = &media.file_path else {
        return Err(Error::Media {
          origin: media.name.clone(),
          source: std::io::Error::new(std::io::ErrorKind::NotFound, "image has no file"),
        });
      };
      let url = ctx.storage.upload(path, &media.name).await?;
      Ok(MediaInput {
        media_content_type: MediaContentType::Image,
        original_source:    url,
        alt:                media.alt.clone(),
      })
    }
    MediaKind::ExternalVideo => Ok(MediaInput {
      media_content_type: MediaContentType::ExternalVideo,
      original_source:    media.name.clone(),
      alt:                media.alt.clone(),
    }),
  }
}
