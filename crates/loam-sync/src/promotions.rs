//! Promotions: POS sale prices, storefront discounts and their line tables.
//!
//! Every cycle re-derives the sale state of all items from the live rules,
//! so an item whose rule expired or was removed is taken off sale even when
//! nothing about the item itself changed. Storefront discounts follow the
//! rules: created while live, deactivated (not deleted) when disabled or out
//! of their window, hard-deleted when the rule is gone from the POS.

use std::{
  collections::{BTreeMap, BTreeSet},
  sync::Arc,
};

use chrono::{DateTime, Local, Utc};
use loam_core::{
  mapping::{BogoLine, PromotionMapping},
  model::promotion::{Promotion, Rule, SaleItem, sale_union},
  storefront::Storefront,
};

use crate::{
  Kind, Outcome, Result, SyncContext,
  error::{persisted, tolerate_missing},
};

type RuleKey = (String, i64);

fn label((group, seq): &RuleKey) -> String { format!("{group}/{seq}") }

pub async fn sync<S: Storefront>(ctx: &Arc<SyncContext<S>>, cursor: DateTime<Utc>) -> Result<Outcome> {
  let now = Local::now().naive_local();
  let mut outcome = Outcome::default();

  let mut present: BTreeSet<RuleKey> = BTreeSet::new();
  let mut promotions = Vec::new();
  for rows in ctx.pos.promotions().await? {
    present.extend(rows.rules.iter().map(|r| (r.group_code.clone(), r.rule_seq_no)));
    match Promotion::from_rows(&rows.group, &rows.rules, &rows.breaks, &rows.items) {
      Ok(promotion) => promotions.push(promotion),
      Err(err) => {
        ctx.report(Kind::Promotions, &rows.group.group_code, &err.into());
        outcome.failed.push(rows.group.group_code);
      }
    }
  }

  // ── Deletes ──────────────────────────────────────────────────────────
  let mut mapped: BTreeMap<RuleKey, PromotionMapping> = BTreeMap::new();
  for row in ctx.middleware.promotion_rows().await? {
    let key = (row.group_code.clone(), row.rule_seq_no);
    if present.contains(&key) {
      mapped.insert(key, row);
      continue;
    }
    let deleted = match &row.shop_id {
      Some(id) => tolerate_missing(ctx.storefront.delete_discount(id).await),
      None => Ok(()),
    };
    match deleted {
      Ok(()) => {
        persisted(ctx.middleware.delete_promotion(&row.group_code, row.rule_seq_no).await, "promotions.delete")?;
        ctx.errors.info("promotions", format!("removed rule {}", label(&key)));
        outcome.succeeded.push(label(&key));
      }
      Err(err) => {
        ctx.failed(Kind::Promotions, &label(&key), &err.into()).await;
        outcome.failed.push(label(&key));
      }
    }
  }

  // ── POS sale state ───────────────────────────────────────────────────
  let union = sale_union(&promotions, now);
  apply_sale_state(ctx, &union).await?;
  apply_fixed_lines(ctx, &union).await?;

  // ── Storefront discounts ─────────────────────────────────────────────
  let retry: BTreeSet<String> = ctx.retry_keys(Kind::Promotions).await?.into_iter().collect();
  let variants: BTreeMap<String, String> = ctx
    .middleware
    .product_rows()
    .await?
    .into_iter()
    .filter_map(|r| r.variant_id.map(|v| (r.item_no, v)))
    .collect();

  for promotion in &promotions {
    if let Err(err) = promotion.validate() {
      ctx.report(Kind::Promotions, &promotion.group_code, &err.into());
      outcome.failed.push(promotion.group_code.clone());
      continue;
    }
    for rule in &promotion.rules {
      let key = (promotion.group_code.clone(), rule.seq_no);
      let name = label(&key);
      let due = promotion.last_maint > cursor || retry.contains(&name);
      let push = RulePush {
        promotion,
        rule,
        mapping: mapped.get(&key),
        live: promotion.rule_is_live(rule, now),
        due,
        variants: &variants,
      };
      match push.run(ctx).await {
        Ok(()) => {
          if retry.contains(&name) {
            ctx.succeeded(Kind::Promotions, &name).await;
          }
          outcome.succeeded.push(name);
        }
        Err(err) => {
          ctx.failed(Kind::Promotions, &name, &err).await;
          outcome.failed.push(name);
        }
      }
    }
  }
  Ok(outcome)
}

/// Put every union item on sale and take every other flagged item off.
async fn apply_sale_state<S>(ctx: &SyncContext<S>, union: &BTreeMap<String, SaleItem>) -> Result<()> {
  for (item, sale) in union {
    persisted(
      ctx.pos.set_sale(item, sale.price, Some(sale.description.clone())).await,
      "promotions.set_sale",
    )?;
  }
  for item in ctx.pos.on_sale_items().await? {
    if !union.contains_key(&item) {
      persisted(ctx.pos.set_sale(&item, None, None).await, "promotions.clear_sale")?;
      ctx.errors.debug("promotions", format!("{item} is no longer on sale"));
    }
  }
  Ok(())
}

/// Record which items each rule currently prices, rewriting only the rules
/// whose set changed.
async fn apply_fixed_lines<S>(ctx: &SyncContext<S>, union: &BTreeMap<String, SaleItem>) -> Result<()> {
  let mut wanted: BTreeMap<RuleKey, BTreeSet<String>> = BTreeMap::new();
  for (item, sale) in union.iter().filter(|(_, s)| s.price.is_some()) {
    wanted
      .entry((sale.group_code.clone(), sale.rule_seq_no))
      .or_default()
      .insert(item.clone());
  }
  let mut recorded: BTreeMap<RuleKey, BTreeSet<String>> = BTreeMap::new();
  for line in ctx.middleware.fixed_lines().await? {
    recorded.entry((line.group_code, line.rule_seq_no)).or_default().insert(line.item_no);
  }

  let keys: BTreeSet<&RuleKey> = wanted.keys().chain(recorded.keys()).collect();
  for key in keys {
    let want = wanted.get(key).cloned().unwrap_or_default();
    if recorded.get(key).is_some_and(|have| *have == want) {
      continue;
    }
    persisted(
      ctx.middleware.replace_fixed_lines(&key.0, key.1, want.into_iter().collect()).await,
      "promotions.fixed_lines",
    )?;
  }
  Ok(())
}

struct RulePush<'a> {
  promotion: &'a Promotion,
  rule:      &'a Rule,
  mapping:   Option<&'a PromotionMapping>,
  live:      bool,
  /// The rule changed since the last cycle or failed in it.
  due:       bool,
  variants:  &'a BTreeMap<String, String>,
}

impl RulePush<'_> {
  fn variant_ids(&self) -> Vec<String> {
    self.rule.items.iter().filter_map(|i| self.variants.get(&i.item_no).cloned()).collect()
  }

  async fn run<S: Storefront>(&self, ctx: &SyncContext<S>) -> Result<()> {
    let group = &self.promotion.group_code;
    let mut shop_id = self.mapping.and_then(|m| m.shop_id.clone());
    let mut enabled = self.mapping.map(|m| m.enabled);

    if self.rule.bogo.is_some() {
      if !ctx.settings.bogo_promotions {
        ctx.errors.debug("promotions", format!("{group}/{}: BOGO disabled", self.rule.seq_no));
        return Ok(());
      }
      if let Some(id) = self.push_bogo(ctx, shop_id.clone()).await? {
        if shop_id.is_none() {
          enabled = Some(true);
        }
        shop_id = Some(id);
      }
    } else if self.rule.wants_basic_discount() {
      let input = self.rule.basic_discount(self.promotion, self.variant_ids());
      match (&shop_id, input) {
        (None, Some(input)) if self.live => {
          let id = ctx.storefront.create_basic_discount(&input).await?;
          ctx.errors.info("promotions", format!("created discount {} as {id}", input.title));
          shop_id = Some(id);
          enabled = Some(true);
        }
        (Some(id), Some(input)) if self.due => {
          ctx.storefront.update_basic_discount(id, &input).await?;
        }
        _ => {}
      }
    }

    if let Some(id) = &shop_id {
      if enabled != Some(self.live) {
        ctx.storefront.set_discount_active(id, self.live).await?;
      }
    }

    let row = PromotionMapping {
      id:          self.mapping.and_then(|m| m.id),
      group_code:  group.clone(),
      rule_seq_no: self.rule.seq_no,
      shop_id,
      enabled:     self.live,
      last_maint:  Utc::now(),
    };
    let changed = self
      .mapping
      .is_none_or(|m| m.shop_id != row.shop_id || m.enabled != row.enabled || self.due);
    if changed {
      persisted(ctx.middleware.upsert_promotion(&row).await, "promotions.record")?;
    }
    Ok(())
  }

  /// Converge a buy-X-get-Y discount with the rule's items. Returns the
  /// discount id once one exists.
  async fn push_bogo<S: Storefront>(
    &self,
    ctx: &SyncContext<S>,
    shop_id: Option<String>,
  ) -> Result<Option<String>> {
    let (group, seq) = (&self.promotion.group_code, self.rule.seq_no);
    let current: BTreeSet<String> =
      ctx.middleware.bogo_lines(group, seq).await?.into_iter().map(|l| l.item_no).collect();
    let wanted: BTreeSet<String> = self
      .rule
      .items
      .iter()
      .filter(|i| self.variants.contains_key(&i.item_no))
      .map(|i| i.item_no.clone())
      .collect();
    let ids = |items: Vec<&String>| -> Vec<String> {
      items.into_iter().filter_map(|i| self.variants.get(i).cloned()).collect()
    };

    let id = match shop_id {
      None if !self.live => return Ok(None),
      None => {
        let Some(input) = self.rule.bxgy_discount(self.promotion, ids(wanted.iter().collect()), Vec::new())
        else {
          return Ok(None);
        };
        ctx.storefront.create_bxgy_discount(&input).await?
      }
      Some(id) => {
        let add = ids(wanted.difference(&current).collect());
        let remove = ids(current.difference(&wanted).collect());
        if !add.is_empty() || !remove.is_empty() || self.due {
          if let Some(input) = self.rule.bxgy_discount(self.promotion, add, remove) {
            ctx.storefront.update_bxgy_discount(&id, &input).await?;
          }
        }
        id
      }
    };

    if current != wanted {
      let lines = wanted
        .into_iter()
        .map(|item_no| BogoLine {
          shop_id: id.clone(),
          group_code: group.clone(),
          rule_seq_no: seq,
          item_no,
        })
        .collect();
      persisted(ctx.middleware.replace_bogo_lines(group, seq, lines).await, "promotions.bogo_lines")?;
    }
    Ok(Some(id))
  }
}
