//! Webhook registration reconcile.

use std::{collections::BTreeSet, sync::Arc};

use loam_core::{
  mapping::WebhookMapping,
  model::webhook::{plan, validate_topics},
  storefront::{Storefront, WebhookSubscription},
};

use crate::{Kind, Outcome, Result, SyncContext, error::persisted};

fn mapping_row(sub: &WebhookSubscription, hook_id: String) -> WebhookMapping {
  WebhookMapping {
    hook_id,
    topic: sub.topic.clone(),
    destination: sub.destination.clone(),
    format: sub.format.clone(),
    domain: url_host(&sub.destination),
  }
}

fn url_host(url: &str) -> Option<String> {
  let rest = url.split_once("://").map_or(url, |(_, rest)| rest);
  rest.split(['/', '?']).next().filter(|h| !h.is_empty()).map(str::to_string)
}

/// Make the storefront's subscriptions for our destination exactly the
/// configured topics, and the middleware table mirror them.
pub async fn reconcile<S: Storefront>(ctx: &Arc<SyncContext<S>>) -> Result<Outcome> {
  let settings = &ctx.settings;
  let mut outcome = Outcome::default();
  if settings.webhook_destination.is_empty() {
    ctx.errors.debug("webhooks", "no destination configured; skipping");
    return Ok(outcome);
  }
  validate_topics(&settings.webhook_topics, &settings.webhook_destination)?;

  let existing = ctx.storefront.list_webhooks().await?;
  let plan = plan(&settings.webhook_topics, &settings.webhook_destination, &existing);

  let mut live = BTreeSet::new();
  for sub in &plan.keep {
    if let Some(id) = &sub.id {
      live.insert(id.clone());
      persisted(ctx.middleware.insert_webhook(&mapping_row(sub, id.clone())).await, "webhooks.record")?;
    }
  }

  for id in &plan.delete {
    match ctx.storefront.delete_webhook(id).await {
      Ok(()) => {
        persisted(ctx.middleware.delete_webhook(id).await, "webhooks.forget")?;
        outcome.succeeded.push(id.clone());
      }
      Err(err) => {
        ctx.report(Kind::Webhooks, id, &err.into());
        outcome.failed.push(id.clone());
      }
    }
  }

  for sub in &plan.create {
    match ctx.storefront.create_webhook(sub).await {
      Ok(id) => {
        ctx.errors.info("webhooks", format!("subscribed {} as {id}", sub.topic));
        persisted(ctx.middleware.insert_webhook(&mapping_row(sub, id.clone())).await, "webhooks.record")?;
        live.insert(id);
        outcome.succeeded.push(sub.topic.clone());
      }
      Err(err) => {
        ctx.report(Kind::Webhooks, &sub.topic, &err.into());
        outcome.failed.push(sub.topic.clone());
      }
    }
  }

  for row in ctx.middleware.webhooks().await? {
    if !live.contains(&row.hook_id) && !plan.delete.contains(&row.hook_id) {
      persisted(ctx.middleware.delete_webhook(&row.hook_id).await, "webhooks.forget")?;
    }
  }
  Ok(outcome)
}
