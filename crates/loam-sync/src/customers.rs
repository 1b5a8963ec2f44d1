//! Customers, their metafields and loyalty store credit.

use std::{collections::BTreeMap, sync::Arc};

use chrono::{DateTime, Utc};
use loam_core::{
  mapping::CustomerMapping,
  model::{
    customer::{Customer, LoyaltyAdjustment},
    metafield::{CustomerField, NAMESPACE},
  },
  pos::{CustomerRow, ShipToRow},
  storefront::{MetafieldInput, MetafieldRef, Storefront},
};

use crate::{Dispatcher, Kind, Outcome, Result, SyncContext, error::persisted};

pub async fn sync<S: Storefront + 'static>(
  ctx: &Arc<SyncContext<S>>,
  dispatcher: &Dispatcher,
  cursor: DateTime<Utc>,
) -> Result<Outcome> {
  let mut outcome = remove_vanished(ctx).await?;

  let retry = ctx.retry_keys(Kind::Customers).await?;
  let changed = ctx.pos.changed_customers(cursor, &retry).await?;
  let tasks = changed.into_iter().map(|(row, ship_tos)| {
    let ctx = ctx.clone();
    let key = row.cust_no.clone();
    (key.clone(), async move {
      match push_customer(&ctx, &row, &ship_tos).await {
        Ok(()) => {
          ctx.succeeded(Kind::Customers, &key).await;
          true
        }
        Err(err) => {
          ctx.failed(Kind::Customers, &key, &err).await;
          false
        }
      }
    })
  });
  outcome.merge(dispatcher.run(tasks).await);
  Ok(outcome)
}

/// Mapped customers no longer syncable in the POS are removed from the
/// storefront in one bulk call.
async fn remove_vanished<S: Storefront>(ctx: &SyncContext<S>) -> Result<Outcome> {
  let live = ctx.pos.syncable_customer_numbers().await?;
  let orphans: Vec<CustomerMapping> = ctx
    .middleware
    .customer_rows()
    .await?
    .into_iter()
    .filter(|r| !live.contains(&r.cp_cust_no))
    .collect();
  let mut outcome = Outcome::default();
  if orphans.is_empty() {
    return Ok(outcome);
  }

  let ids: Vec<String> = orphans.iter().filter_map(|r| r.shop_cust_id.clone()).collect();
  if !ids.is_empty() {
    if let Err(err) = ctx.storefront.delete_customers(&ids).await {
      let err = err.into();
      for row in &orphans {
        ctx.failed(Kind::Customers, &row.cp_cust_no, &err).await;
        outcome.failed.push(row.cp_cust_no.clone());
      }
      return Ok(outcome);
    }
  }
  for row in orphans {
    persisted(ctx.middleware.delete_customer(&row.cp_cust_no).await, "customers.delete")?;
    outcome.succeeded.push(row.cp_cust_no);
  }
  ctx.errors.info("customers", format!("removed {} customers", outcome.succeeded.len()));
  Ok(outcome)
}

async fn push_customer<S: Storefront>(
  ctx: &SyncContext<S>,
  row: &CustomerRow,
  ship_tos: &[ShipToRow],
) -> Result<()> {
  let customer = Customer::from_rows(row, ship_tos)?;
  let no = customer.cust_no.clone();
  if customer.clamped {
    ctx.errors.warn("customers", format!("{no}: negative loyalty balance reset to 0"));
    persisted(ctx.pos.set_loyalty_points(&no, 0).await, "customers.clamp")?;
  }
  for value in &customer.rejected {
    ctx.errors.warn("customers", format!("{no}: dropped invalid contact {value:?}"));
  }
  customer.validate()?;

  let mut mapping = ctx.middleware.customer_row(&no).await?.unwrap_or_else(|| CustomerMapping::new(&no));
  let hash = customer.fingerprint()?;
  if mapping.shop_cust_id.is_some()
    && mapping.payload_hash.as_deref() == Some(hash.as_str())
    && mapping.loyalty_balance == customer.loyalty_points
  {
    ctx.errors.debug("customers", format!("{no} unchanged"));
    return Ok(());
  }

  let input = customer.payload();
  let shop_id = match mapping.shop_cust_id.clone() {
    Some(id) => {
      ctx.storefront.update_customer(&id, &input).await?;
      id
    }
    None => match adopt(ctx, &customer).await? {
      Some(id) => {
        ctx.errors.info("customers", format!("{no} adopted storefront customer {id}"));
        ctx.storefront.update_customer(&id, &input).await?;
        id
      }
      None => {
        let id = ctx.storefront.create_customer(&input).await?;
        ctx.errors.info("customers", format!("created customer {no} as {id}"));
        id
      }
    },
  };
  mapping.shop_cust_id = Some(shop_id.clone());

  push_metafields(ctx, &customer, &shop_id, &mut mapping.meta_ids).await?;

  let remote = ctx.storefront.store_credit(&shop_id).await?;
  if let Some(account) = &remote {
    mapping.store_credit_id = Some(account.account_id.clone());
  }
  match customer.loyalty_adjustment(remote.as_ref().map_or(0.0, |c| c.balance)) {
    LoyaltyAdjustment::Converged => {}
    LoyaltyAdjustment::Credit(amount) => {
      let account = ctx.storefront.credit_store_credit(&shop_id, amount).await?;
      mapping.store_credit_id = Some(account);
    }
    LoyaltyAdjustment::Debit(amount) => {
      if let Some(account) = &mapping.store_credit_id {
        ctx.storefront.debit_store_credit(account, amount).await?;
      }
    }
  }

  mapping.loyalty_balance = customer.loyalty_points;
  mapping.payload_hash = Some(hash);
  mapping.last_maint = Utc::now();
  persisted(ctx.middleware.upsert_customer(&mapping).await, "customers.record")?;
  Ok(())
}

/// Look an unmapped customer up on the storefront by email, then phone. A
/// storefront customer already mapped to another POS customer is not adopted.
async fn adopt<S: Storefront>(ctx: &SyncContext<S>, customer: &Customer) -> Result<Option<String>> {
  let (email, phone) = customer.adoption_keys();
  let mut found = None;
  if let Some(email) = &email {
    found = ctx.storefront.find_customer_by_email(email).await?;
  }
  if found.is_none() {
    if let Some(phone) = &phone {
      found = ctx.storefront.find_customer_by_phone(phone).await?;
    }
  }
  let Some(id) = found else {
    return Ok(None);
  };
  match ctx.middleware.customer_by_shop_id(&id).await? {
    Some(owner) if owner.cp_cust_no != customer.cust_no => {
      ctx.errors.warn(
        "customers",
        format!("{}: storefront customer {id} already belongs to {}", customer.cust_no, owner.cp_cust_no),
      );
      Ok(None)
    }
    _ => Ok(Some(id)),
  }
}

async fn push_metafields<S: Storefront>(
  ctx: &SyncContext<S>,
  customer: &Customer,
  shop_id: &str,
  meta_ids: &mut BTreeMap<CustomerField, String>,
) -> Result<()> {
  let mut set = Vec::new();
  let mut clear = Vec::new();
  for (field, value) in customer.metafields() {
    match value {
      Some(value) => set.push(MetafieldInput {
        owner_id: shop_id.to_string(),
        namespace: NAMESPACE.to_string(),
        key: field.key().to_string(),
        kind: field.kind().storefront_name().to_string(),
        value,
      }),
      None => {
        if meta_ids.remove(&field).is_some() {
          clear.push(MetafieldRef {
            owner_id:  shop_id.to_string(),
            namespace: NAMESPACE.to_string(),
            key:       field.key().to_string(),
          });
        }
      }
    }
  }
  if !clear.is_empty() {
    ctx.storefront.delete_metafields(&clear).await?;
  }
  if !set.is_empty() {
    for stored in ctx.storefront.set_metafields(&set).await? {
      if let Some(field) = CustomerField::all().find(|f| f.key() == stored.key) {
        meta_ids.insert(field, stored.id);
      }
    }
  }
  Ok(())
}
