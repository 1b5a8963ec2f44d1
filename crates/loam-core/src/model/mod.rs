//! In-memory entities built from POS rows.
//!
//! Each entity is constructed from typed POS rows (validating required fields
//! and deriving computed ones), builds its storefront payloads, records the
//! identifiers the storefront assigns, and exposes a pre-flight validator.

pub mod collection;
pub mod customer;
pub mod gift_card;
pub mod media;
pub mod metafield;
pub mod order;
pub mod product;
pub mod promotion;
pub mod webhook;

use serde::Serialize;
use sha2::{Digest as _, Sha256};

/// SHA-256 of a payload's canonical JSON rendering, hex encoded.
///
/// Payload structs serialize their fields in declaration order and map-typed
/// fields are `BTreeMap`s, so equal entity states produce equal fingerprints.
pub fn fingerprint<T: Serialize + ?Sized>(payload: &T) -> crate::Result<String> {
  let bytes = serde_json::to_vec(payload)?;
  Ok(hex::encode(Sha256::digest(&bytes)))
}

/// Round to whole cents.
pub fn cents(amount: f64) -> f64 { (amount * 100.0).round() / 100.0 }

/// URL-safe handle derived from a title.
pub fn handle(title: &str) -> String {
  let mut out = String::with_capacity(title.len());
  let mut dash = false;
  for c in title.chars() {
    if c.is_ascii_alphanumeric() {
      out.push(c.to_ascii_lowercase());
      dash = false;
    } else if !dash && !out.is_empty() {
      out.push('-');
      dash = true;
    }
  }
  while out.ends_with('-') {
    out.pop();
  }
  out
}
