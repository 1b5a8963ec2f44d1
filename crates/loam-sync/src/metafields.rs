//! Metafield definition bootstrap.
//!
//! The catalog of product, variant and customer fields must exist on the
//! storefront before values are written. Definitions already there are
//! adopted; missing ones are created. Either way the middleware records the
//! remote id.

use std::{collections::HashMap, sync::Arc};

use loam_core::{
  mapping::MetafieldMapping,
  model::metafield::{MetafieldDefinition, OwnerType, catalog},
  storefront::Storefront,
};

use crate::{Kind, Outcome, Result, SyncContext, error::persisted};

fn mapping_row(def: &MetafieldDefinition, meta_id: String) -> MetafieldMapping {
  MetafieldMapping {
    meta_id,
    name: def.name.clone(),
    descr: def.description.clone(),
    namespace: def.namespace.clone(),
    key: def.key.clone(),
    kind: def.kind,
    pinned: def.pin.is_some(),
    pinned_pos: def.pin,
    owner: def.owner,
    validations: def.validations.clone(),
  }
}

pub async fn ensure_definitions<S: Storefront>(ctx: &Arc<SyncContext<S>>) -> Result<Outcome> {
  let recorded: HashMap<(String, String, String), MetafieldMapping> = ctx
    .middleware
    .metafield_definitions()
    .await?
    .into_iter()
    .map(|row| {
      let owner: &'static str = row.owner.into();
      ((owner.to_string(), row.namespace.clone(), row.key.clone()), row)
    })
    .collect();

  let mut remote = HashMap::new();
  for owner in [OwnerType::Product, OwnerType::Productvariant, OwnerType::Customer] {
    let owner_name: &'static str = owner.into();
    for def in ctx.storefront.list_metafield_definitions(owner).await? {
      remote.insert((owner_name.to_string(), def.namespace, def.key), def.id);
    }
  }

  let mut outcome = Outcome::default();
  for def in catalog() {
    let owner: &'static str = def.owner.into();
    let key = (owner.to_string(), def.namespace.clone(), def.key.clone());
    let label = format!("{owner}/{}", def.key);
    if let Err(err) = def.validate() {
      ctx.report(Kind::Metafields, &label, &err.into());
      outcome.failed.push(label);
      continue;
    }

    let meta_id = match remote.get(&key) {
      Some(id) => id.clone(),
      None => match ctx.storefront.create_metafield_definition(&def).await {
        Ok(id) => {
          ctx.errors.info("metafields", format!("created definition {label}"));
          id
        }
        Err(err) => {
          ctx.report(Kind::Metafields, &label, &err.into());
          outcome.failed.push(label);
          continue;
        }
      },
    };

    let row = mapping_row(&def, meta_id);
    if recorded.get(&key) != Some(&row) {
      persisted(ctx.middleware.upsert_metafield_definition(&row).await, "metafields.record")?;
    }
    outcome.succeeded.push(label);
  }
  Ok(outcome)
}
