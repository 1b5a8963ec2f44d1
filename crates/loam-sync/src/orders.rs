//! POS document status pushed back to storefront orders, and POS holds
//! mirrored as draft orders.

use std::{
  collections::{BTreeMap, BTreeSet},
  sync::Arc,
};

use chrono::Utc;
use loam_core::{
  mapping::DraftOrderMapping,
  model::order::{OrderAction, OrderStatus, draft_order, order_action},
  pos::DocumentRow,
  storefront::Storefront,
};

use crate::{
  Kind, Outcome, Result, SyncContext,
  error::{persisted, tolerate_missing},
};

pub async fn sync<S: Storefront>(ctx: &Arc<SyncContext<S>>) -> Result<Outcome> {
  let mut outcome = push_status(ctx).await?;
  outcome.merge(push_drafts(ctx).await?);
  Ok(outcome)
}

/// Fulfil orders whose document the POS closed and cancel voided ones.
async fn push_status<S: Storefront>(ctx: &SyncContext<S>) -> Result<Outcome> {
  let open = ctx.middleware.open_orders().await?;
  let mut outcome = Outcome::default();
  if open.is_empty() {
    return Ok(outcome);
  }
  let documents: BTreeMap<String, DocumentRow> = ctx
    .pos
    .documents(open.iter().map(|o| o.doc_id.clone()).collect())
    .await?
    .into_iter()
    .map(|d| (d.doc_id.clone(), d))
    .collect();

  for order in open {
    let Some(doc) = documents.get(&order.doc_id) else {
      ctx.errors.warn("orders", format!("order {} lost its document {}", order.order_no, order.doc_id));
      continue;
    };
    let (Some(recorded), Some(current)) = (OrderStatus::parse(&order.status), OrderStatus::parse(&doc.status))
    else {
      ctx.errors.warn("orders", format!("order {}: unknown status {:?}", order.order_no, doc.status));
      continue;
    };
    let Some(action) = order_action(recorded, current) else {
      continue;
    };
    let pushed = match action {
      OrderAction::Fulfill => ctx.storefront.fulfill_order(&order.order_no).await,
      OrderAction::Cancel => ctx.storefront.cancel_order(&order.order_no).await,
    };
    match pushed {
      Ok(()) => {
        persisted(ctx.middleware.set_order_status(&order.order_no, current.as_str()).await, "orders.status")?;
        ctx.errors.info("orders", format!("order {} is now {}", order.order_no, current.as_str()));
        outcome.succeeded.push(order.order_no);
      }
      Err(err) => {
        ctx.report(Kind::Orders, &order.order_no, &err.into());
        outcome.failed.push(order.order_no);
      }
    }
  }
  Ok(outcome)
}

/// Web-invoiced holds become draft orders; a draft whose hold is gone is
/// deleted.
async fn push_drafts<S: Storefront>(ctx: &SyncContext<S>) -> Result<Outcome> {
  let holds = ctx.pos.web_holds().await?;
  let drafts = ctx.middleware.drafts().await?;
  let drafted: BTreeSet<&str> = drafts.iter().map(|d| d.doc_id.as_str()).collect();
  let held: BTreeSet<&str> = holds.iter().map(|h| h.doc_id.as_str()).collect();
  let mut outcome = Outcome::default();

  let variants: BTreeMap<String, String> = if holds.iter().any(|h| !drafted.contains(h.doc_id.as_str())) {
    ctx
      .middleware
      .product_rows()
      .await?
      .into_iter()
      .filter_map(|r| r.variant_id.map(|v| (r.item_no, v)))
      .collect()
  } else {
    BTreeMap::new()
  };

  for hold in holds.iter().filter(|h| !drafted.contains(h.doc_id.as_str())) {
    match create_draft(ctx, hold, &variants).await {
      Ok(()) => outcome.succeeded.push(hold.doc_id.clone()),
      Err(err) => {
        ctx.report(Kind::Orders, &hold.doc_id, &err);
        outcome.failed.push(hold.doc_id.clone());
      }
    }
  }

  for draft in drafts.iter().filter(|d| !held.contains(d.doc_id.as_str())) {
    match tolerate_missing(ctx.storefront.delete_draft_order(&draft.draft_id).await) {
      Ok(()) => {
        persisted(ctx.middleware.delete_draft(&draft.doc_id).await, "orders.draft_delete")?;
        ctx.errors.info("orders", format!("hold {} released; deleted draft {}", draft.doc_id, draft.draft_id));
        outcome.succeeded.push(draft.doc_id.clone());
      }
      Err(err) => {
        ctx.report(Kind::Orders, &draft.doc_id, &err.into());
        outcome.failed.push(draft.doc_id.clone());
      }
    }
  }
  Ok(outcome)
}

async fn create_draft<S: Storefront>(
  ctx: &SyncContext<S>,
  hold: &DocumentRow,
  variants: &BTreeMap<String, String>,
) -> Result<()> {
  let lines = ctx.pos.document_lines(&hold.doc_id).await?;
  let customer = match &hold.cust_no {
    Some(no) => ctx.middleware.customer_row(no).await?.and_then(|c| c.shop_cust_id),
    None => None,
  };
  let input = draft_order(hold, &lines, customer, |item| variants.get(item).cloned())?;
  let draft_id = ctx.storefront.create_draft_order(&input).await?;
  let row = DraftOrderMapping {
    id: None,
    doc_id: hold.doc_id.clone(),
    draft_id: draft_id.clone(),
    created: Utc::now(),
  };
  persisted(ctx.middleware.insert_draft(&row).await, "orders.draft")?;
  ctx.errors.info("orders", format!("hold {} drafted as {draft_id}", hold.doc_id));
  Ok(())
}
