//! Customers, their subscription state and loyalty balance.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{
  Error, Result,
  model::{fingerprint, metafield::CustomerField},
  pos::{AddressRow, CustomerRow, ShipToRow},
  sanitize::{canonical_phone, e164, non_empty, normalize_email},
  storefront::{AddressInput, CustomerInput, MarketingState},
};

/// An email address or mobile number with its own subscription flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContactPoint {
  pub value:      String,
  pub subscribed: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Customer {
  pub cust_no:            String,
  pub first_name:         Option<String>,
  pub last_name:          Option<String>,
  /// At most two, normalized.
  pub emails:             Vec<ContactPoint>,
  /// At most two, canonical `NNN-NNN-NNNN`.
  pub phones:             Vec<ContactPoint>,
  /// Never negative; see [`Customer::clamped`].
  pub loyalty_points:     i64,
  /// The POS balance was negative and has been reset to zero.
  pub clamped:            bool,
  pub category:           String,
  pub birth_month:        Option<u32>,
  pub spouse_birth_month: Option<u32>,
  pub wholesale_tier:     Option<String>,
  /// Primary address first, then ship-to addresses by sequence.
  pub addresses:          Vec<AddressRow>,
  /// Contact values that failed validation and were dropped.
  pub rejected:           Vec<String>,
  pub shop_id:            Option<String>,
  pub last_maint:         DateTime<Utc>,
}

/// How to converge the storefront store-credit balance on the POS balance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LoyaltyAdjustment {
  Converged,
  Credit(f64),
  Debit(f64),
}

impl Customer {
  pub fn from_rows(row: &CustomerRow, ship_tos: &[ShipToRow]) -> Result<Self> {
    let cust_no = row.cust_no.trim().to_string();
    if cust_no.is_empty() {
      return Err(Error::missing("customer", "", "cust_no"));
    }

    let mut rejected = Vec::new();
    let mut emails = Vec::new();
    for (raw, subscribed) in [
      (&row.email_1, row.email_1_subscribed),
      (&row.email_2, row.email_2_subscribed),
    ] {
      let Some(raw) = non_empty(raw.as_deref()) else { continue };
      match normalize_email(&raw) {
        Some(value) if !emails.iter().any(|e: &ContactPoint| e.value == value) => {
          emails.push(ContactPoint { value, subscribed })
        }
        Some(_) => {}
        None => rejected.push(raw),
      }
    }

    let mut phones = Vec::new();
    for (raw, subscribed) in [
      (&row.mobile_1, row.sms_1_subscribed),
      (&row.mobile_2, row.sms_2_subscribed),
    ] {
      let Some(raw) = non_empty(raw.as_deref()) else { continue };
      match canonical_phone(&raw) {
        Some(value) if !phones.iter().any(|p: &ContactPoint| p.value == value) => {
          phones.push(ContactPoint { value, subscribed })
        }
        Some(_) => {}
        None => rejected.push(raw),
      }
    }

    let mut seqs: Vec<&ShipToRow> = ship_tos.iter().filter(|s| s.cust_no == row.cust_no).collect();
    seqs.sort_by_key(|s| s.ship_seq);
    let mut addresses = Vec::new();
    if row.address.is_usable() {
      addresses.push(row.address.clone());
    }
    addresses.extend(
      seqs
        .into_iter()
        .map(|s| s.address.clone())
        .filter(|a| a.is_usable() && !addresses_contains(&row.address, a)),
    );

    Ok(Self {
      cust_no,
      first_name: non_empty(row.first_name.as_deref()),
      last_name: non_empty(row.last_name.as_deref()),
      emails,
      phones,
      loyalty_points: row.loyalty_points.max(0),
      clamped: row.loyalty_points < 0,
      category: row.category.trim().to_uppercase(),
      birth_month: row.birth_month,
      spouse_birth_month: row.spouse_birth_month,
      wholesale_tier: non_empty(row.wholesale_tier.as_deref()),
      addresses,
      rejected,
      shop_id: None,
      last_maint: row.last_maint,
    })
  }

  pub fn primary_email(&self) -> Option<&str> { self.emails.first().map(|e| e.value.as_str()) }

  pub fn primary_phone(&self) -> Option<&str> { self.phones.first().map(|p| p.value.as_str()) }

  pub fn is_wholesale(&self) -> bool { self.category == "WHOLESALE" }

  /// A customer with neither email nor phone is only synced when it has an
  /// address. A name is needed only when there is neither email nor address.
  pub fn validate(&self) -> Result<()> {
    if self.emails.is_empty() && self.phones.is_empty() && self.addresses.is_empty() {
      return Err(Error::invalid("customer", &self.cust_no, "no email, phone, or address"));
    }
    if self.first_name.is_none()
      && self.last_name.is_none()
      && self.emails.is_empty()
      && self.addresses.is_empty()
    {
      return Err(Error::missing("customer", &self.cust_no, "name"));
    }
    for month in [self.birth_month, self.spouse_birth_month].into_iter().flatten() {
      if !(1..=12).contains(&month) {
        return Err(Error::invalid("customer", &self.cust_no, format!("birth month {month}")));
      }
    }
    Ok(())
  }

  pub fn payload(&self) -> CustomerInput {
    let mut tags = vec![self.category.clone()];
    if let Some(tier) = &self.wholesale_tier {
      tags.push(format!("tier-{tier}"));
    }
    CustomerInput {
      first_name: self.first_name.clone(),
      last_name: self.last_name.clone(),
      email: self.primary_email().map(str::to_string),
      phone: self.primary_phone().and_then(e164),
      email_marketing: MarketingState::from_flag(self.emails.first().is_some_and(|e| e.subscribed)),
      sms_marketing: MarketingState::from_flag(self.phones.first().is_some_and(|p| p.subscribed)),
      tags,
      addresses: self.addresses.iter().map(address_input).collect(),
    }
  }

  pub fn metafields(&self) -> Vec<(CustomerField, Option<String>)> {
    CustomerField::all()
      .map(|field| {
        let value = match field {
          CustomerField::CustomerNumber => Some(self.cust_no.clone()),
          CustomerField::LoyaltyPoints => Some(self.loyalty_points.to_string()),
          CustomerField::Category => Some(self.category.clone()),
          CustomerField::BirthMonth => self.birth_month.map(|m| m.to_string()),
          CustomerField::SpouseBirthMonth => self.spouse_birth_month.map(|m| m.to_string()),
          CustomerField::WholesalePriceTier => self.wholesale_tier.clone(),
        };
        (field, value)
      })
      .collect()
  }

  pub fn fingerprint(&self) -> Result<String> {
    let metafields: BTreeMap<CustomerField, Option<String>> = self.metafields().into_iter().collect();
    fingerprint(&(self.payload(), metafields))
  }

  /// Email then E.164 phone, the order in which an unmapped customer is
  /// looked up on the storefront before creating it.
  pub fn adoption_keys(&self) -> (Option<String>, Option<String>) {
    (self.primary_email().map(str::to_string), self.primary_phone().and_then(e164))
  }

  /// Store credit is 1:1 with points; the target is never negative.
  pub fn loyalty_adjustment(&self, remote_balance: f64) -> LoyaltyAdjustment {
    let target = self.loyalty_points.max(0) as f64;
    let delta = ((target - remote_balance) * 100.0).round() / 100.0;
    if delta > 0.0 {
      LoyaltyAdjustment::Credit(delta)
    } else if delta < 0.0 {
      LoyaltyAdjustment::Debit(-delta)
    } else {
      LoyaltyAdjustment::Converged
    }
  }
}

fn addresses_contains(primary: &AddressRow, other: &AddressRow) -> bool {
  let norm = |a: &AddressRow| {
    (
      a.address_1.as_deref().unwrap_or("").trim().to_lowercase(),
      a.zip.as_deref().unwrap_or("").trim().to_string(),
    )
  };
  primary.is_usable() && norm(primary) == norm(other)
}

fn address_input(a: &AddressRow) -> AddressInput {
  AddressInput {
    first_name: non_empty(a.first_name.as_deref()),
    last_name:  non_empty(a.last_name.as_deref()),
    company:    non_empty(a.company.as_deref()),
    address1:   non_empty(a.address_1.as_deref()),
    address2:   non_empty(a.address_2.as_deref()),
    city:       non_empty(a.city.as_deref()),
    province:   non_empty(a.state.as_deref()),
    zip:        non_empty(a.zip.as_deref()),
    country:    non_empty(a.country.as_deref()).or_else(|| Some("US".into())),
    phone:      a.phone.as_deref().and_then(e164),
  }
}
