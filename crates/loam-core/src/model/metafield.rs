//! Metafield catalog: the fixed specification fields carried on products and
//! variants, the customer fields, and their storefront definitions.

use serde::{Deserialize, Serialize};
use strum::{EnumIter, EnumString, IntoEnumIterator as _, IntoStaticStr};

/// Namespace every loam-managed metafield lives in.
pub const NAMESPACE: &str = "loam";

/// Maximum number of validation rules a definition may carry.
pub const MAX_VALIDATIONS: usize = 5;

// ─── Field sets ──────────────────────────────────────────────────────────────

/// The enumerated specification fields of a product.
///
/// The snake-case name doubles as the storefront metafield key, the POS column
/// name, and (prefixed with `meta_` and suffixed with `_id`) the middleware
/// column that records the storefront metafield id.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  PartialOrd,
  Ord,
  Hash,
  Serialize,
  Deserialize,
  EnumIter,
  EnumString,
  IntoStaticStr,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SpecField {
  BotanicalName,
  PlantType,
  Height,
  Width,
  ClimateZone,
  Colors,
  Size,
  BloomSeason,
  BloomColor,
  LightRequirements,
  Features,
  IsPreorder,
  PreorderDate,
  PreorderMessage,
  IsFeatured,
  InStoreOnly,
  IsOnSale,
  SaleDescription,
  IsNew,
  IsBackInStock,
}

impl SpecField {
  pub fn key(self) -> &'static str { self.into() }

  /// POS items column holding the value.
  pub fn pos_column(self) -> String { format!("spec_{}", self.key()) }

  /// Middleware products column holding the storefront metafield id.
  pub fn id_column(self) -> String { format!("meta_{}_id", self.key()) }

  pub fn kind(self) -> MetafieldType {
    match self {
      Self::IsPreorder
      | Self::IsFeatured
      | Self::InStoreOnly
      | Self::IsOnSale
      | Self::IsNew
      | Self::IsBackInStock => MetafieldType::Boolean,
      Self::PreorderDate => MetafieldType::Date,
      Self::PreorderMessage | Self::SaleDescription => MetafieldType::MultiLineText,
      _ => MetafieldType::SingleLineText,
    }
  }

  pub fn label(self) -> String {
    self
      .key()
      .split('_')
      .map(|word| {
        let mut chars = word.chars();
        match chars.next() {
          Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
          None => String::new(),
        }
      })
      .collect::<Vec<_>>()
      .join(" ")
  }

  pub fn all() -> impl Iterator<Item = SpecField> { SpecField::iter() }
}

/// Metafields written on each customer.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  PartialOrd,
  Ord,
  Hash,
  Serialize,
  Deserialize,
  EnumIter,
  IntoStaticStr,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum CustomerField {
  CustomerNumber,
  LoyaltyPoints,
  Category,
  BirthMonth,
  SpouseBirthMonth,
  WholesalePriceTier,
}

impl CustomerField {
  pub fn key(self) -> &'static str { self.into() }

  pub fn kind(self) -> MetafieldType {
    match self {
      Self::LoyaltyPoints | Self::BirthMonth | Self::SpouseBirthMonth => {
        MetafieldType::Integer
      }
      _ => MetafieldType::SingleLineText,
    }
  }

  pub fn all() -> impl Iterator<Item = CustomerField> { CustomerField::iter() }
}

/// Key of the per-variant size metafield.
pub const VARIANT_SIZE_KEY: &str = "variant_size";

// ─── Definitions ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, IntoStaticStr, EnumString)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum MetafieldType {
  SingleLineText,
  MultiLineText,
  Boolean,
  Date,
  Integer,
}

impl MetafieldType {
  /// The storefront's type identifier.
  pub fn storefront_name(self) -> &'static str {
    match self {
      Self::SingleLineText => "single_line_text_field",
      Self::MultiLineText => "multi_line_text_field",
      Self::Boolean => "boolean",
      Self::Date => "date",
      Self::Integer => "number_integer",
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, IntoStaticStr, EnumString)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OwnerType {
  Product,
  Productvariant,
  Customer,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validation {
  pub name:  String,
  pub value: String,
  /// Value type hint (`int`, `string`, `date`).
  pub kind:  String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetafieldDefinition {
  pub name:        String,
  pub description: String,
  pub namespace:   String,
  pub key:         String,
  pub kind:        MetafieldType,
  pub owner:       OwnerType,
  pub validations: Vec<Validation>,
  /// Position in the storefront admin's pinned list.
  pub pin:         Option<u32>,
}

impl MetafieldDefinition {
  pub fn validate(&self) -> crate::Result<()> {
    if self.key.is_empty() || self.namespace.is_empty() {
      return Err(crate::Error::missing("metafield definition", &self.name, "key"));
    }
    if self.validations.len() > MAX_VALIDATIONS {
      return Err(crate::Error::invalid(
        "metafield definition",
        &self.key,
        format!("{} validations exceed the limit of {MAX_VALIDATIONS}", self.validations.len()),
      ));
    }
    Ok(())
  }
}

fn max_length(len: u32) -> Validation {
  Validation { name: "max".into(), value: len.to_string(), kind: "int".into() }
}

/// Every definition the sync engine expects to exist on the storefront.
pub fn catalog() -> Vec<MetafieldDefinition> {
  let mut defs = Vec::new();
  let mut pin = 1;

  for field in SpecField::all() {
    let validations = match field.kind() {
      MetafieldType::SingleLineText => vec![max_length(255)],
      MetafieldType::MultiLineText => vec![max_length(2000)],
      _ => vec![],
    };
    defs.push(MetafieldDefinition {
      name: field.label(),
      description: format!("{} from the point-of-sale item record", field.label()),
      namespace: NAMESPACE.into(),
      key: field.key().into(),
      kind: field.kind(),
      owner: OwnerType::Product,
      validations,
      pin: Some(pin),
    });
    pin += 1;
  }

  defs.push(MetafieldDefinition {
    name:        "Variant Size".into(),
    description: "Size label of an individual variant".into(),
    namespace:   NAMESPACE.into(),
    key:         VARIANT_SIZE_KEY.into(),
    kind:        MetafieldType::SingleLineText,
    owner:       OwnerType::Productvariant,
    validations: vec![max_length(100)],
    pin:         Some(1),
  });

  for (idx, field) in CustomerField::all().enumerate() {
    let validations = match field {
      CustomerField::BirthMonth | CustomerField::SpouseBirthMonth => vec![
        Validation { name: "min".into(), value: "1".into(), kind: "int".into() },
        Validation { name: "max".into(), value: "12".into(), kind: "int".into() },
      ],
      CustomerField::LoyaltyPoints => vec![Validation {
        name:  "min".into(),
        value: "0".into(),
        kind:  "int".into(),
      }],
      _ => vec![max_length(100)],
    };
    defs.push(MetafieldDefinition {
      name: field.key().replace('_', " "),
      description: format!("Customer {} mirrored from the point of sale", field.key().replace('_', " ")),
      namespace: NAMESPACE.into(),
      key: field.key().into(),
      kind: field.kind(),
      owner: OwnerType::Customer,
      validations,
      pin: Some(idx as u32 + 1),
    });
  }

  defs
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn twenty_spec_fields() {
    assert_eq!(SpecField::all().count(), 20);
  }

  #[test]
  fn column_names() {
    assert_eq!(SpecField::BotanicalName.pos_column(), "spec_botanical_name");
    assert_eq!(SpecField::IsBackInStock.id_column(), "meta_is_back_in_stock_id");
    assert_eq!(SpecField::LightRequirements.label(), "Light Requirements");
  }

  #[test]
  fn catalog_is_valid_and_unique() {
    let defs = catalog();
    for def in &defs {
      def.validate().unwrap();
    }
    let mut keys: Vec<_> = defs.iter().map(|d| (d.owner, d.key.clone())).collect();
    let before = keys.len();
    keys.sort_by(|a, b| a.1.cmp(&b.1).then((a.0 as u8).cmp(&(b.0 as u8))));
    keys.dedup();
    assert_eq!(keys.len(), before);
  }
}
