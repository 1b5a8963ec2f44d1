//! Promotions, their rules and price breaks.
//!
//! A promotion groups rules; each rule lists price breaks and the items it
//! covers. Fixed-price rules are materialized as POS sale prices, percent and
//! amount-off rules also become storefront automatic discounts, and BOGO rules
//! become buy-X-get-Y discounts.

use std::collections::BTreeMap;

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, NaiveTime, TimeZone as _, Utc};
use serde::Serialize;

use crate::{
  Error, Result,
  model::cents,
  pos::{PriceBreakRow, PromotionGroupRow, PromotionRuleRow, RuleItemRow},
  storefront::{BasicDiscountInput, BxgyDiscountInput, DiscountValue},
};

// ─── Parts ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PriceMethod {
  PercentOff,
  AmountOff,
  FixedPrice,
}

impl PriceMethod {
  pub fn from_code(code: &str) -> Option<Self> {
    match code.trim().to_ascii_uppercase().as_str() {
      "D" | "P" => Some(Self::PercentOff),
      "A" => Some(Self::AmountOff),
      "F" => Some(Self::FixedPrice),
      _ => None,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriceBreak {
  pub min_qty: f64,
  pub method:  PriceMethod,
  pub amount:  f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Bogo {
  pub buy:    u32,
  pub get:    u32,
  pub suffix: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Audience {
  Retail,
  Wholesale,
  Both,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PromotionItem {
  pub item_no: String,
  pub price_1: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Rule {
  pub seq_no:          i64,
  pub descr:           String,
  pub enabled:         bool,
  pub customer_filter: Vec<String>,
  pub audience:        Audience,
  pub bogo:            Option<Bogo>,
  /// Ordered by minimum quantity.
  pub breaks:          Vec<PriceBreak>,
  pub items:           Vec<PromotionItem>,
}

/// The sale state of one item, as the union over all live rules.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SaleItem {
  /// `None` for items that are on sale only through a BOGO rule.
  pub price:       Option<f64>,
  pub description: String,
  pub group_code:  String,
  pub rule_seq_no: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Promotion {
  pub group_code: String,
  pub descr:      String,
  pub enabled:    bool,
  /// `None` starts immediately.
  pub starts:     Option<NaiveDateTime>,
  /// `None` never expires.
  pub ends:       Option<NaiveDateTime>,
  pub rules:      Vec<Rule>,
  pub last_maint: DateTime<Utc>,
}

// ─── Construction ────────────────────────────────────────────────────────────

fn split_list(raw: Option<&str>) -> Vec<String> {
  raw
    .unwrap_or("")
    .split(',')
    .map(|s| s.trim().to_uppercase())
    .filter(|s| !s.is_empty())
    .collect()
}

/// Combine a date and a seconds-after-midnight offset. A zero offset expands
/// to `default_time`.
fn at(date: NaiveDate, secs: i64, default_time: NaiveTime) -> NaiveDateTime {
  let time = if secs <= 0 {
    default_time
  } else {
    NaiveTime::from_num_seconds_from_midnight_opt(secs.min(86_399) as u32, 0).unwrap_or(default_time)
  };
  date.and_time(time)
}

impl Promotion {
  pub fn from_rows(
    group: &PromotionGroupRow,
    rules: &[PromotionRuleRow],
    breaks: &[PriceBreakRow],
    items: &[RuleItemRow],
  ) -> Result<Self> {
    let group_code = group.group_code.trim().to_string();
    if group_code.is_empty() {
      return Err(Error::missing("promotion", "", "group_code"));
    }

    let mut out_rules = Vec::new();
    for rule in rules.iter().filter(|r| r.group_code == group.group_code) {
      let mut rule_breaks = Vec::new();
      for b in breaks
        .iter()
        .filter(|b| b.group_code == rule.group_code && b.rule_seq_no == rule.rule_seq_no)
      {
        let method = PriceMethod::from_code(&b.method).ok_or_else(|| {
          Error::invalid(
            "promotion rule",
            format!("{group_code}/{}", rule.rule_seq_no),
            format!("unknown price method {:?}", b.method),
          )
        })?;
        rule_breaks.push(PriceBreak { min_qty: b.min_qty, method, amount: b.amount });
      }
      rule_breaks.sort_by(|a, b| a.min_qty.total_cmp(&b.min_qty));

      let mut rule_items: Vec<PromotionItem> = items
        .iter()
        .filter(|i| i.group_code == rule.group_code && i.rule_seq_no == rule.rule_seq_no)
        .map(|i| PromotionItem { item_no: i.item_no.clone(), price_1: i.price_1 })
        .collect();
      rule_items.sort_by(|a, b| a.item_no.cmp(&b.item_no));
      rule_items.dedup_by(|a, b| a.item_no == b.item_no);

      out_rules.push(Rule {
        seq_no: rule.rule_seq_no,
        descr: rule.descr.trim().to_string(),
        enabled: rule.enabled,
        customer_filter: split_list(rule.customer_filter.as_deref()),
        audience: match rule.audience.trim().to_ascii_uppercase().as_str() {
          "W" => Audience::Wholesale,
          "B" => Audience::Both,
          _ => Audience::Retail,
        },
        bogo: rule.is_bogo.then(|| Bogo {
          buy:    rule.bogo_buy_qty.max(0) as u32,
          get:    rule.bogo_get_qty.max(0) as u32,
          suffix: rule.badge_suffix.clone().filter(|s| !s.trim().is_empty()),
        }),
        breaks: rule_breaks,
        items: rule_items,
      });
    }
    out_rules.sort_by_key(|r| r.seq_no);

    Ok(Self {
      group_code,
      descr: group.descr.trim().to_string(),
      enabled: group.enabled,
      starts: group.begin_date.map(|d| at(d, group.begin_time, NaiveTime::default())),
      ends: group.end_date.map(|d| {
        let end_of_day = NaiveTime::from_hms_opt(23, 59, 59).unwrap_or(NaiveTime::default());
        at(d, group.end_time, end_of_day)
      }),
      rules: out_rules,
      last_maint: group.last_maint,
    })
  }

  pub fn validate(&self) -> Result<()> {
    if let (Some(start), Some(end)) = (self.starts, self.ends) {
      if start > end {
        return Err(Error::invalid(
          "promotion",
          &self.group_code,
          format!("begins {start} after it ends {end}"),
        ));
      }
    }
    for rule in &self.rules {
      rule.validate(&self.group_code)?;
    }
    Ok(())
  }

  pub fn is_current(&self, now: NaiveDateTime) -> bool {
    self.starts.is_none_or(|s| s <= now) && self.ends.is_none_or(|e| now <= e)
  }

  /// Enabled, in its date window, and the group itself enabled.
  pub fn rule_is_live(&self, rule: &Rule, now: NaiveDateTime) -> bool {
    self.enabled && rule.enabled && self.is_current(now)
  }

  pub fn starts_at(&self) -> DateTime<Utc> {
    self.starts.map(local_to_utc).unwrap_or(self.last_maint)
  }

  pub fn ends_at(&self) -> Option<DateTime<Utc>> { self.ends.map(local_to_utc) }

  pub fn rule(&self, seq_no: i64) -> Option<&Rule> { self.rules.iter().find(|r| r.seq_no == seq_no) }
}

fn local_to_utc(naive: NaiveDateTime) -> DateTime<Utc> {
  Local
    .from_local_datetime(&naive)
    .earliest()
    .map(|d| d.with_timezone(&Utc))
    .unwrap_or_else(|| naive.and_utc())
}

// ─── Rules ───────────────────────────────────────────────────────────────────

/// `25.0` → `"25"`, `2.5` → `"2.5"`, `4.99` → `"4.99"`.
fn trim_amount(amount: f64) -> String {
  let s = format!("{:.2}", cents(amount));
  s.trim_end_matches('0').trim_end_matches('.').to_string()
}

impl Rule {
  fn key(&self, group: &str) -> String { format!("{group}/{}", self.seq_no) }

  pub fn validate(&self, group: &str) -> Result<()> {
    let key = self.key(group);
    if let Some(bogo) = &self.bogo {
      if bogo.buy == 0 || bogo.get == 0 {
        return Err(Error::invalid("promotion rule", key, "BOGO quantities must be positive"));
      }
      return Ok(());
    }
    let Some(first) = self.breaks.first() else {
      return Err(Error::missing("promotion rule", key, "price break"));
    };
    for b in &self.breaks {
      let ok = match b.method {
        PriceMethod::PercentOff => b.amount > 0.0 && b.amount <= 100.0,
        PriceMethod::AmountOff => b.amount > 0.0,
        PriceMethod::FixedPrice => b.amount >= 0.0,
      };
      if !ok {
        return Err(Error::invalid(
          "promotion rule",
          key,
          format!("{:?} amount {} out of range", b.method, b.amount),
        ));
      }
    }
    if first.min_qty > 1.0 && first.method == PriceMethod::FixedPrice {
      return Err(Error::invalid(
        "promotion rule",
        key,
        "fixed price requires a single-unit break",
      ));
    }
    Ok(())
  }

  pub fn primary_break(&self) -> Option<&PriceBreak> { self.breaks.first() }

  /// Badge shown on the storefront for items in this rule.
  pub fn badge(&self) -> String {
    if let Some(bogo) = &self.bogo {
      let base = format!("BUY {} GET {}", bogo.buy, bogo.get);
      return match &bogo.suffix {
        Some(suffix) => format!("{base} {}", suffix.trim()),
        None => format!("{base} FREE"),
      };
    }
    match self.primary_break() {
      Some(PriceBreak { method: PriceMethod::PercentOff, amount, .. }) if *amount >= 100.0 => {
        "FREE".into()
      }
      Some(PriceBreak { method: PriceMethod::PercentOff, amount, .. }) => {
        format!("{}% OFF", trim_amount(*amount))
      }
      Some(PriceBreak { method: PriceMethod::AmountOff, amount, .. }) => {
        format!("${} OFF", trim_amount(*amount))
      }
      Some(PriceBreak { method: PriceMethod::FixedPrice, amount, .. }) if *amount <= 0.0 => {
        "FREE".into()
      }
      Some(PriceBreak { method: PriceMethod::FixedPrice, amount, .. }) => {
        format!("NOW ${}", trim_amount(*amount))
      }
      None => "SALE".into(),
    }
  }

  /// Single-unit sale price of an item under this rule.
  pub fn sale_price(&self, price_1: f64) -> Option<f64> {
    if self.bogo.is_some() {
      return None;
    }
    let b = self.breaks.iter().find(|b| b.min_qty <= 1.0)?;
    let price = match b.method {
      PriceMethod::PercentOff => price_1 * (1.0 - b.amount / 100.0),
      PriceMethod::AmountOff => price_1 - b.amount,
      PriceMethod::FixedPrice => b.amount,
    };
    Some(cents(price.max(0.0)))
  }

  /// Whether the rule is surfaced as a storefront basic discount.
  pub fn wants_basic_discount(&self) -> bool {
    self.bogo.is_none()
      && self
        .primary_break()
        .is_some_and(|b| matches!(b.method, PriceMethod::PercentOff | PriceMethod::AmountOff))
  }

  fn customer_tags(&self) -> Vec<String> {
    match self.audience {
      Audience::Wholesale => vec!["WHOLESALE".into()],
      Audience::Retail | Audience::Both => self.customer_filter.clone(),
    }
  }

  fn title(&self, promotion: &Promotion) -> String {
    let descr = if self.descr.is_empty() { &promotion.descr } else { &self.descr };
    format!("{} [{}]", descr, self.key(&promotion.group_code))
  }

  pub fn basic_discount(&self, promotion: &Promotion, variant_ids: Vec<String>) -> Option<BasicDiscountInput> {
    if !self.wants_basic_discount() {
      return None;
    }
    let b = self.primary_break()?;
    let value = match b.method {
      PriceMethod::PercentOff => DiscountValue::Percentage(b.amount / 100.0),
      _ => DiscountValue::FixedAmount(cents(b.amount)),
    };
    Some(BasicDiscountInput {
      title: self.title(promotion),
      starts_at: promotion.starts_at(),
      ends_at: promotion.ends_at(),
      value,
      minimum_quantity: (b.min_qty > 1.0).then(|| b.min_qty.ceil() as u32),
      variant_ids,
      customer_tags: self.customer_tags(),
    })
  }

  pub fn bxgy_discount(
    &self,
    promotion: &Promotion,
    variants_to_add: Vec<String>,
    variants_to_remove: Vec<String>,
  ) -> Option<BxgyDiscountInput> {
    let bogo = self.bogo.as_ref()?;
    Some(BxgyDiscountInput {
      title: self.title(promotion),
      starts_at: promotion.starts_at(),
      ends_at: promotion.ends_at(),
      buy_quantity: bogo.buy,
      get_quantity: bogo.get,
      get_percentage: 1.0,
      variants_to_add,
      variants_to_remove,
    })
  }
}

// ─── Sale union ──────────────────────────────────────────────────────────────

/// The sale state of every item covered by at least one live rule. Where
/// rules overlap the lowest sale price wins; a priced sale beats a BOGO-only
/// one.
pub fn sale_union<'a>(
  promotions: impl IntoIterator<Item = &'a Promotion>,
  now: NaiveDateTime,
) -> BTreeMap<String, SaleItem> {
  let mut out: BTreeMap<String, SaleItem> = BTreeMap::new();
  for promotion in promotions {
    if promotion.validate().is_err() {
      continue;
    }
    for rule in promotion.rules.iter().filter(|r| promotion.rule_is_live(r, now)) {
      for item in &rule.items {
        let candidate = SaleItem {
          price:       rule.sale_price(item.price_1),
          description: rule.badge(),
          group_code:  promotion.group_code.clone(),
          rule_seq_no: rule.seq_no,
        };
        let replace = match out.get(&item.item_no) {
          None => true,
          Some(current) => match (candidate.price, current.price) {
            (Some(new), Some(old)) => new < old,
            (Some(_), None) => true,
            _ => false,
          },
        };
        if replace {
          out.insert(item.item_no.clone(), candidate);
        }
      }
    }
  }
  out
}

#[cfg(test)]
mod tests {
  use super::*;

  fn group(begin: Option<NaiveDate>, end: Option<NaiveDate>) -> PromotionGroupRow {
    PromotionGroupRow {
      group_code: "SUMMER".into(),
      descr:      "Summer sale".into(),
      enabled:    true,
      begin_date: begin,
      begin_time: 0,
      end_date:   end,
      end_time:   0,
      last_maint: Utc::now(),
    }
  }

  fn rule(seq: i64, bogo: bool) -> PromotionRuleRow {
    PromotionRuleRow {
      group_code:      "SUMMER".into(),
      rule_seq_no:     seq,
      descr:           format!("Rule {seq}"),
      enabled:         true,
      customer_filter: None,
      item_filter:     None,
      is_bogo:         bogo,
      bogo_buy_qty:    1,
      bogo_get_qty:    1,
      badge_suffix:    None,
      audience:        "R".into(),
    }
  }

  fn brk(seq: i64, method: &str, amount: f64) -> PriceBreakRow {
    PriceBreakRow {
      group_code:  "SUMMER".into(),
      rule_seq_no: seq,
      min_qty:     1.0,
      method:      method.into(),
      amount,
    }
  }

  fn item(seq: i64, item_no: &str, price: f64) -> RuleItemRow {
    RuleItemRow {
      group_code:  "SUMMER".into(),
      rule_seq_no: seq,
      item_no:     item_no.into(),
      price_1:     price,
    }
  }

  fn date(y: i32, m: u32, d: u32) -> NaiveDate { NaiveDate::from_ymd_opt(y, m, d).unwrap() }

  #[test]
  fn zero_times_expand_to_whole_days() {
    let promo = Promotion::from_rows(
      &group(Some(date(2026, 6, 1)), Some(date(2026, 6, 30))),
      &[],
      &[],
      &[],
    )
    .unwrap();
    assert_eq!(promo.starts.unwrap().to_string(), "2026-06-01 00:00:00");
    assert_eq!(promo.ends.unwrap().to_string(), "2026-06-30 23:59:59");
  }

  #[test]
  fn begin_after_end_is_rejected() {
    let promo = Promotion::from_rows(
      &group(Some(date(2026, 7, 1)), Some(date(2026, 6, 1))),
      &[rule(1, false)],
      &[brk(1, "D", 25.0)],
      &[],
    )
    .unwrap();
    assert!(promo.validate().is_err());
  }

  #[test]
  fn badges() {
    let promo = Promotion::from_rows(
      &group(None, None),
      &[rule(1, false), rule(2, false), rule(3, false), rule(4, true)],
      &[brk(1, "D", 25.0), brk(2, "A", 5.0), brk(3, "F", 0.0)],
      &[],
    )
    .unwrap();
    let badges: Vec<String> = promo.rules.iter().map(Rule::badge).collect();
    assert_eq!(badges, vec!["25% OFF", "$5 OFF", "FREE", "BUY 1 GET 1 FREE"]);
  }

  #[test]
  fn bogo_suffix_is_used() {
    let mut r = rule(1, true);
    r.badge_suffix = Some("HALF OFF".into());
    let promo = Promotion::from_rows(&group(None, None), &[r], &[], &[]).unwrap();
    assert_eq!(promo.rules[0].badge(), "BUY 1 GET 1 HALF OFF");
  }

  #[test]
  fn sale_prices_by_method() {
    let promo = Promotion::from_rows(
      &group(None, None),
      &[rule(1, false), rule(2, false), rule(3, false)],
      &[brk(1, "D", 25.0), brk(2, "A", 5.0), brk(3, "F", 12.5)],
      &[],
    )
    .unwrap();
    assert_eq!(promo.rules[0].sale_price(40.0), Some(30.0));
    assert_eq!(promo.rules[1].sale_price(4.0), Some(0.0));
    assert_eq!(promo.rules[2].sale_price(40.0), Some(12.5));
  }

  #[test]
  fn union_covers_only_live_rules_and_keeps_lowest_price() {
    let mut disabled = rule(3, false);
    disabled.enabled = false;
    let promo = Promotion::from_rows(
      &group(None, None),
      &[rule(1, false), rule(2, false), disabled],
      &[brk(1, "D", 10.0), brk(2, "D", 50.0), brk(3, "D", 90.0)],
      &[item(1, "A", 100.0), item(2, "A", 100.0), item(1, "B", 10.0), item(3, "C", 10.0)],
    )
    .unwrap();
    let now = Local::now().naive_local();
    let union = sale_union([&promo], now);
    assert_eq!(union.len(), 2);
    assert_eq!(union["A"].price, Some(50.0));
    assert_eq!(union["A"].rule_seq_no, 2);
    assert!(!union.contains_key("C"));
  }

  #[test]
  fn expired_promotion_puts_nothing_on_sale() {
    let promo = Promotion::from_rows(
      &group(Some(date(2020, 1, 1)), Some(date(2020, 1, 31))),
      &[rule(1, false)],
      &[brk(1, "D", 10.0)],
      &[item(1, "A", 10.0)],
    )
    .unwrap();
    assert!(sale_union([&promo], Local::now().naive_local()).is_empty());
  }

  #[test]
  fn basic_discount_only_for_percent_and_amount() {
    let promo = Promotion::from_rows(
      &group(None, None),
      &[rule(1, false), rule(2, false)],
      &[brk(1, "D", 25.0), brk(2, "F", 9.99)],
      &[],
    )
    .unwrap();
    let d = promo.rules[0].basic_discount(&promo, vec!["v1".into()]).unwrap();
    assert_eq!(d.value, DiscountValue::Percentage(0.25));
    assert!(promo.rules[1].basic_discount(&promo, vec![]).is_none());
  }
}
