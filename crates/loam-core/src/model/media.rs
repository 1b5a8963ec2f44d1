//! Product media: image discovery on disk, ordering, and reconciliation
//! against what the middleware says is already on the storefront.

use std::{
  collections::{BTreeMap, HashMap},
  fs, io,
  path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::mapping::{ImageMapping, VideoMapping};

pub const IMAGE_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "webp"];

/// Separator between the key and the image number in `<key>^<n>.<ext>`.
const NUMBER_SEPARATOR: char = '^';

// ─── Discovery ───────────────────────────────────────────────────────────────

/// An image file found under the photo root.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageFile {
  /// Item number or binding id the file belongs to.
  pub key:      String,
  /// `0` for `<key>.<ext>`, `n` for `<key>^<n>.<ext>`.
  pub number:   u32,
  pub name:     String,
  pub path:     PathBuf,
  pub size:     u64,
  pub modified: DateTime<Utc>,
}

/// Split a file name into its key and image number. Returns `None` for files
/// that do not follow the naming convention or carry another extension.
pub fn parse_image_name(name: &str) -> Option<(String, u32)> {
  let (stem, ext) = name.rsplit_once('.')?;
  if !IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()) {
    return None;
  }
  let (key, number) = match stem.split_once(NUMBER_SEPARATOR) {
    Some((key, n)) => (key, n.parse().ok()?),
    None => (stem, 0),
  };
  if key.is_empty() {
    return None;
  }
  Some((key.to_uppercase(), number))
}

/// Index every image under `root` by key, each list ordered by image number.
pub fn scan_images(root: &Path) -> io::Result<BTreeMap<String, Vec<ImageFile>>> {
  let mut index: BTreeMap<String, Vec<ImageFile>> = BTreeMap::new();
  for entry in fs::read_dir(root)? {
    let entry = entry?;
    let meta = entry.metadata()?;
    if !meta.is_file() {
      continue;
    }
    let name = entry.file_name().to_string_lossy().into_owned();
    let Some((key, number)) = parse_image_name(&name) else {
      continue;
    };
    let modified = meta.modified().map(DateTime::<Utc>::from).unwrap_or_else(|_| Utc::now());
    index.entry(key.clone()).or_default().push(ImageFile {
      key,
      number,
      name,
      path: entry.path(),
      size: meta.len(),
      modified,
    });
  }
  for files in index.values_mut() {
    files.sort_by(|a, b| a.number.cmp(&b.number).then_with(|| a.name.cmp(&b.name)));
  }
  Ok(index)
}

// ─── Media ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MediaKind {
  Image,
  ExternalVideo,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Media {
  pub kind:             MediaKind,
  /// File name for images, URL for videos.
  pub name:             String,
  pub item_no:          Option<String>,
  #[serde(skip)]
  pub file_path:        Option<PathBuf>,
  pub size:             u64,
  /// File modification time; the epoch for videos.
  pub modified:         DateTime<Utc>,
  pub alt:              String,
  pub image_number:     u32,
  pub is_binding_image: bool,
  pub is_variant_image: bool,
  /// Dense and zero-based within its kind.
  pub sort_order:       u32,
  #[serde(skip)]
  pub remote_id:        Option<String>,
}

impl Media {
  pub fn is_thumbnail(&self) -> bool { self.kind == MediaKind::Image && self.sort_order == 0 }
}

/// The raw media of a product family before ordering.
#[derive(Debug, Clone, Default)]
pub struct FamilyMedia {
  /// Images named after the binding id; they apply to the whole family.
  pub binding:  Vec<ImageFile>,
  /// The parent item's own images.
  pub parent:   Vec<ImageFile>,
  /// Other variants' images, in variant order.
  pub variants: Vec<(String, Vec<ImageFile>)>,
  /// `(item_no, url)` pairs.
  pub videos:   Vec<(String, String)>,
}

/// Lay out a family's media: binding images, then the parent's, then other
/// variants', each image range and the video range dense from zero.
pub fn arrange(family: &FamilyMedia, parent_item: &str, alt: &str) -> Vec<Media> {
  let mut out = Vec::new();
  let mut order = 0;

  let mut push_image = |file: &ImageFile, item: Option<&str>, binding: bool, variant: bool| {
    out.push(Media {
      kind:             MediaKind::Image,
      name:             file.name.clone(),
      item_no:          item.map(str::to_string),
      file_path:        Some(file.path.clone()),
      size:             file.size,
      modified:         file.modified,
      alt:              alt.to_string(),
      image_number:     file.number,
      is_binding_image: binding,
      is_variant_image: variant,
      sort_order:       order,
      remote_id:        None,
    });
    order += 1;
  };

  for file in &family.binding {
    push_image(file, None, true, false);
  }
  for file in &family.parent {
    push_image(file, Some(parent_item), false, false);
  }
  for (item, files) in &family.variants {
    for file in files {
      push_image(file, Some(item), false, true);
    }
  }

  let mut seen = std::collections::HashSet::new();
  for (idx, (item, url)) in family
    .videos
    .iter()
    .filter(|(_, url)| seen.insert(url.clone()))
    .enumerate()
  {
    out.push(Media {
      kind:             MediaKind::ExternalVideo,
      name:             url.clone(),
      item_no:          Some(item.clone()),
      file_path:        None,
      size:             0,
      modified:         DateTime::<Utc>::UNIX_EPOCH,
      alt:              alt.to_string(),
      image_number:     0,
      is_binding_image: false,
      is_variant_image: false,
      sort_order:       idx as u32,
      remote_id:        None,
    });
  }
  out
}

/// Renumber image rows to `0..n` in their current order and move the
/// thumbnail flag to the first.
pub fn compact(rows: &mut [ImageMapping]) {
  rows.sort_by_key(|r| (r.sort_order, r.image_number));
  for (idx, row) in rows.iter_mut().enumerate() {
    row.sort_order = idx as u32;
    row.thumbnail = idx == 0;
  }
}

// ─── Reconciliation ──────────────────────────────────────────────────────────

/// What must happen on the storefront to make its media match `desired`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MediaPlan {
  /// Indices into `desired` that need uploading.
  pub upload: Vec<usize>,
  /// Remote media ids to delete.
  pub delete: Vec<String>,
  /// Indices into `desired` already on the storefront, with their remote id.
  pub keep:   Vec<(usize, String)>,
}

impl MediaPlan {
  pub fn is_empty(&self) -> bool { self.upload.is_empty() && self.delete.is_empty() }
}

/// Whether a mapped image still shows the file on disk. Times compare at
/// millisecond precision, which the middleware store preserves.
pub fn same_file(row: &ImageMapping, media: &Media) -> bool {
  row.size == media.size && row.modified.timestamp_millis() == media.modified.timestamp_millis()
}

/// Diff the desired media against the mapped rows. Images match by file name,
/// size and modification time (a rewritten file is replaced), videos by URL.
pub fn plan(desired: &[Media], images: &[ImageMapping], videos: &[VideoMapping]) -> MediaPlan {
  let mut remote_images: HashMap<&str, (&ImageMapping, bool)> = images
    .iter()
    .filter(|r| r.image_id.is_some())
    .map(|r| (r.name.as_str(), (r, false)))
    .collect();
  let mut remote_videos: HashMap<&str, (&VideoMapping, bool)> = videos
    .iter()
    .filter(|r| r.media_id.is_some())
    .map(|r| (r.url.as_str(), (r, false)))
    .collect();

  let mut out = MediaPlan::default();
  for (idx, media) in desired.iter().enumerate() {
    let matched = match media.kind {
      MediaKind::Image => remote_images
        .get_mut(media.name.as_str())
        .filter(|(row, _)| same_file(row, media))
        .and_then(|(row, used)| {
          *used = true;
          row.image_id.clone()
        }),
      MediaKind::ExternalVideo => {
        remote_videos.get_mut(media.name.as_str()).and_then(|(row, used)| {
          *used = true;
          row.media_id.clone()
        })
      }
    };
    match matched {
      Some(id) => out.keep.push((idx, id)),
      None => out.upload.push(idx),
    }
  }

  out.delete.extend(
    remote_images
      .values()
      .filter(|(_, used)| !used)
      .filter_map(|(row, _)| row.image_id.clone()),
  );
  out.delete.extend(
    remote_videos
      .values()
      .filter(|(_, used)| !used)
      .filter_map(|(row, _)| row.media_id.clone()),
  );
  out.delete.sort();
  out
}

/// Storefront positions for a fully uploaded media list: images first, then
/// videos after the last image.
pub fn positions(desired: &[Media]) -> Vec<(String, u32)> {
  let images = desired.iter().filter(|m| m.kind == MediaKind::Image).count() as u32;
  desired
    .iter()
    .filter_map(|m| {
      let pos = match m.kind {
        MediaKind::Image => m.sort_order,
        MediaKind::ExternalVideo => images + m.sort_order,
      };
      m.remote_id.clone().map(|id| (id, pos))
    })
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;

  fn file(key: &str, number: u32, size: u64) -> ImageFile {
    let name = if number == 0 { format!("{key}.jpg") } else { format!("{key}^{number}.jpg") };
    ImageFile {
      key: key.into(),
      number,
      path: PathBuf::from("/photos").join(&name),
      name,
      size,
      modified: stamp(),
    }
  }

  fn stamp() -> DateTime<Utc> { DateTime::from_timestamp(1_777_000_000, 0).unwrap() }

  fn row(name: &str, image_id: &str, sort_order: u32, size: u64) -> ImageMapping {
    ImageMapping {
      id: None,
      name: name.into(),
      item_no: None,
      file_path: format!("/photos/{name}"),
      product_id: Some("p1".into()),
      image_id: Some(image_id.into()),
      thumbnail: sort_order == 0,
      image_number: 0,
      sort_order,
      is_binding_image: false,
      binding_id: None,
      is_variant_image: false,
      description: None,
      size,
      modified: stamp(),
      last_maint: Utc::now(),
    }
  }

  #[test]
  fn names_parse() {
    assert_eq!(parse_image_name("200373.jpg"), Some(("200373".into(), 0)));
    assert_eq!(parse_image_name("b0006^2.JPEG"), Some(("B0006".into(), 2)));
    assert_eq!(parse_image_name("200373.gif"), None);
    assert_eq!(parse_image_name("200373^x.jpg"), None);
    assert_eq!(parse_image_name(".jpg"), None);
  }

  #[test]
  fn scan_groups_by_key() {
    let dir = tempfile::tempdir().unwrap();
    for name in ["200373.jpg", "200373^1.png", "B0006.webp", "notes.txt"] {
      fs::write(dir.path().join(name), b"img").unwrap();
    }
    let index = scan_images(dir.path()).unwrap();
    assert_eq!(index.len(), 2);
    let numbers: Vec<u32> = index["200373"].iter().map(|f| f.number).collect();
    assert_eq!(numbers, vec![0, 1]);
  }

  #[test]
  fn arrange_orders_binding_parent_variants_then_videos() {
    let family = FamilyMedia {
      binding:  vec![file("B0006", 0, 10)],
      parent:   vec![file("200374", 0, 10), file("200374", 1, 10)],
      variants: vec![("200375".into(), vec![file("200375", 0, 10)])],
      videos:   vec![
        ("200374".into(), "https://video.example/a".into()),
        ("200375".into(), "https://video.example/a".into()),
      ],
    };
    let media = arrange(&family, "200374", "Maple");
    let images: Vec<_> = media.iter().filter(|m| m.kind == MediaKind::Image).collect();
    let orders: Vec<u32> = images.iter().map(|m| m.sort_order).collect();
    assert_eq!(orders, vec![0, 1, 2, 3]);
    assert!(images[0].is_binding_image && images[0].is_thumbnail());
    assert!(images[3].is_variant_image);
    let videos: Vec<_> = media.iter().filter(|m| m.kind == MediaKind::ExternalVideo).collect();
    assert_eq!(videos.len(), 1);
    assert_eq!(videos[0].sort_order, 0);
  }

  #[test]
  fn compact_closes_gaps_and_promotes_thumbnail() {
    let mut rows = vec![row("a^3.jpg", "m3", 3, 1), row("a^1.jpg", "m1", 1, 1)];
    compact(&mut rows);
    assert_eq!(rows[0].name, "a^1.jpg");
    assert_eq!(rows[0].sort_order, 0);
    assert!(rows[0].thumbnail);
    assert_eq!(rows[1].sort_order, 1);
    assert!(!rows[1].thumbnail);
  }

  #[test]
  fn plan_uploads_new_deletes_removed_replaces_resized() {
    let family = FamilyMedia {
      parent: vec![file("100", 0, 10), file("100", 1, 99)],
      ..Default::default()
    };
    let desired = arrange(&family, "100", "Fern");
    let existing = vec![row("100.jpg", "m0", 0, 10), row("100^1.jpg", "m1", 1, 50), row("100^2.jpg", "m2", 2, 5)];
    let plan = plan(&desired, &existing, &[]);
    assert_eq!(plan.keep, vec![(0, "m0".to_string())]);
    assert_eq!(plan.upload, vec![1]);
    assert_eq!(plan.delete, vec!["m1".to_string(), "m2".to_string()]);
  }

  #[test]
  fn unchanged_media_plan_is_empty() {
    let family = FamilyMedia { parent: vec![file("100", 0, 10)], ..Default::default() };
    let desired = arrange(&family, "100", "Fern");
    let plan = plan(&desired, &[row("100.jpg", "m0", 0, 10)], &[]);
    assert!(plan.is_empty());
  }

  #[test]
  fn rewritten_file_of_the_same_size_is_replaced() {
    let mut rewritten = file("100", 0, 10);
    rewritten.modified = stamp() + chrono::Duration::seconds(2);
    let family = FamilyMedia { parent: vec![rewritten], ..Default::default() };
    let desired = arrange(&family, "100", "Fern");
    let plan = plan(&desired, &[row("100.jpg", "m0", 0, 10)], &[]);
    assert_eq!(plan.upload, vec![0]);
    assert_eq!(plan.delete, vec!["m0".to_string()]);
    assert!(plan.keep.is_empty());
  }

  #[test]
  fn sub_millisecond_differences_still_match() {
    let mut precise = file("100", 0, 10);
    precise.modified = stamp() + chrono::Duration::nanoseconds(250);
    let family = FamilyMedia { parent: vec![precise], ..Default::default() };
    let desired = arrange(&family, "100", "Fern");
    assert!(plan(&desired, &[row("100.jpg", "m0", 0, 10)], &[]).is_empty());
  }
}
