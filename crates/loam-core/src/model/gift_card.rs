//! Gift certificates.

use chrono::{DateTime, Utc};

use crate::{
  Error, Result,
  model::cents,
  pos::GiftCardRow,
  storefront::{GiftCardInput, money},
};

const MIN_CODE: usize = 4;
const MAX_CODE: usize = 20;

#[derive(Debug, Clone, PartialEq)]
pub struct GiftCertificate {
  pub code:        String,
  pub balance:     f64,
  pub orig_amount: f64,
  pub web_enabled: bool,
  pub last_maint:  DateTime<Utc>,
}

/// How the storefront card must change to match the POS.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GiftCardAction {
  Create,
  Adjust(f64),
  Deactivate,
  Unchanged,
}

impl GiftCertificate {
  pub fn from_row(row: &GiftCardRow) -> Self {
    Self {
      code:        row.gfc_no.trim().to_uppercase(),
      balance:     cents(row.balance.max(0.0)),
      orig_amount: cents(row.orig_amount),
      web_enabled: row.web_enabled,
      last_maint:  row.last_maint,
    }
  }

  pub fn validate(&self) -> Result<()> {
    let len = self.code.chars().count();
    if !(MIN_CODE..=MAX_CODE).contains(&len) {
      return Err(Error::invalid(
        "gift certificate",
        &self.code,
        format!("code must be {MIN_CODE}-{MAX_CODE} characters"),
      ));
    }
    if !self.code.chars().all(|c| c.is_ascii_alphanumeric()) {
      return Err(Error::invalid("gift certificate", &self.code, "code must be alphanumeric"));
    }
    Ok(())
  }

  /// Cards are only published while they carry a balance.
  pub fn is_live(&self) -> bool { self.web_enabled && self.balance > 0.0 }

  pub fn payload(&self) -> GiftCardInput {
    GiftCardInput {
      code:          self.code.clone(),
      initial_value: money(self.balance),
      note:          format!("POS gift certificate {}", self.code),
    }
  }

  /// `mapped_balance` is the balance last converged on the storefront, or
  /// `None` when the card is not mapped.
  pub fn action(&self, mapped_balance: Option<f64>) -> GiftCardAction {
    match (mapped_balance, self.is_live()) {
      (None, true) => GiftCardAction::Create,
      (None, false) => GiftCardAction::Unchanged,
      (Some(_), false) => GiftCardAction::Deactivate,
      (Some(old), true) => {
        let delta = cents(self.balance - old);
        if delta == 0.0 { GiftCardAction::Unchanged } else { GiftCardAction::Adjust(delta) }
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn card(code: &str, balance: f64) -> GiftCertificate {
    GiftCertificate::from_row(&GiftCardRow {
      gfc_no:      code.into(),
      balance,
      orig_amount: 50.0,
      issued:      None,
      web_enabled: true,
      last_maint:  Utc::now(),
    })
  }

  #[test]
  fn actions() {
    assert_eq!(card("GC1234", 50.0).action(None), GiftCardAction::Create);
    assert_eq!(card("GC1234", 30.0).action(Some(50.0)), GiftCardAction::Adjust(-20.0));
    assert_eq!(card("GC1234", 0.0).action(Some(50.0)), GiftCardAction::Deactivate);
    assert_eq!(card("GC1234", 0.0).action(None), GiftCardAction::Unchanged);
    assert_eq!(card("GC1234", 50.0).action(Some(50.0)), GiftCardAction::Unchanged);
  }

  #[test]
  fn codes_are_checked() {
    card("gc1234", 1.0).validate().unwrap();
    assert!(card("GC", 1.0).validate().is_err());
    assert!(card("GC-12345", 1.0).validate().is_err());
  }
}
