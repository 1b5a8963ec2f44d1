//! Gift certificates.
//!
//! There is no cursor here: each POS card is compared with the balance last
//! converged on the storefront and adjusted by the difference.

use std::{collections::HashMap, sync::Arc};

use chrono::Utc;
use loam_core::{
  mapping::GiftCertificateMapping,
  model::gift_card::{GiftCardAction, GiftCertificate},
  storefront::Storefront,
};

use crate::{
  Dispatcher, Kind, Outcome, Result, SyncContext,
  error::{persisted, tolerate_missing},
};

pub async fn sync<S: Storefront + 'static>(ctx: &Arc<SyncContext<S>>, dispatcher: &Dispatcher) -> Result<Outcome> {
  let cards: Vec<GiftCertificate> = ctx.pos.gift_cards().await?.iter().map(GiftCertificate::from_row).collect();
  let mut mapped: HashMap<String, GiftCertificateMapping> = ctx
    .middleware
    .gift_certificates()
    .await?
    .into_iter()
    .map(|r| (r.gfc_no.clone(), r))
    .collect();

  let mut tasks = Vec::new();
  for card in cards {
    let row = mapped.remove(&card.code);
    tasks.push((card.code.clone(), Job::Converge(card, row)));
  }
  // Whatever is still mapped has left the POS.
  for (code, row) in mapped {
    tasks.push((code, Job::Retire(row)));
  }

  let tasks = tasks.into_iter().map(|(code, job)| {
    let ctx = ctx.clone();
    let key = code.clone();
    (code, async move {
      match job.run(&ctx).await {
        Ok(()) => true,
        Err(err) => {
          ctx.report(Kind::GiftCards, &key, &err);
          false
        }
      }
    })
  });
  Ok(dispatcher.run(tasks).await)
}

enum Job {
  Converge(GiftCertificate, Option<GiftCertificateMapping>),
  Retire(GiftCertificateMapping),
}

impl Job {
  async fn run<S: Storefront>(self, ctx: &SyncContext<S>) -> Result<()> {
    match self {
      Self::Retire(row) => retire(ctx, &row).await,
      Self::Converge(card, row) => {
        card.validate()?;
        match (card.action(row.as_ref().map(|r| r.balance)), row) {
          (GiftCardAction::Create, _) => {
            let id = ctx.storefront.create_gift_card(&card.payload()).await?;
            ctx.errors.info("gift_cards", format!("issued {} as {id}", card.code));
            record(ctx, &card, None, id).await
          }
          (GiftCardAction::Adjust(delta), Some(row)) => {
            ctx.storefront.adjust_gift_card(&row.shop_gfc_id, delta).await?;
            record(ctx, &card, row.id, row.shop_gfc_id).await
          }
          (GiftCardAction::Deactivate, Some(row)) => retire(ctx, &row).await,
          _ => Ok(()),
        }
      }
    }
  }
}

async fn record<S>(ctx: &SyncContext<S>, card: &GiftCertificate, id: Option<i64>, shop_id: String) -> Result<()> {
  let row = GiftCertificateMapping {
    id,
    gfc_no: card.code.clone(),
    shop_gfc_id: shop_id,
    balance: card.balance,
    last_maint: Utc::now(),
  };
  persisted(ctx.middleware.upsert_gift_certificate(&row).await, "gift_cards.record")?;
  Ok(())
}

async fn retire<S: Storefront>(ctx: &SyncContext<S>, row: &GiftCertificateMapping) -> Result<()> {
  tolerate_missing(ctx.storefront.deactivate_gift_card(&row.shop_gfc_id).await)?;
  persisted(ctx.middleware.delete_gift_certificate(&row.gfc_no).await, "gift_cards.retire")?;
  ctx.errors.info("gift_cards", format!("deactivated {}", row.gfc_no));
  Ok(())
}
