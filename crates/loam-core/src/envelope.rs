//! The status envelope returned by every data-access helper.
//!
//! `code` is `200` when a statement touched rows (or a query returned rows),
//! `201` when it succeeded without touching any, and the driver's own error
//! code otherwise.

use serde::Serialize;
use serde_json::Value;

use crate::{Error, Result};

/// Succeeded with at least one row affected or returned.
pub const OK: i32 = 200;
/// Succeeded with zero rows affected or returned.
pub const OK_EMPTY: i32 = 201;
/// Failure that did not come with a driver code.
pub const INTERNAL: i32 = 500;

/// What a statement produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Affected {
  Count(u64),
  /// Result rows; JSON objects when mapped, positional arrays otherwise.
  Rows(Vec<Value>),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Envelope {
  pub code:     i32,
  pub affected: Affected,
  pub message:  String,
}

impl Envelope {
  pub fn from_count(count: u64) -> Self {
    Self {
      code:     if count > 0 { OK } else { OK_EMPTY },
      affected: Affected::Count(count),
      message:  format!("{count} row(s) affected"),
    }
  }

  pub fn from_rows(rows: Vec<Value>) -> Self {
    Self {
      code:     if rows.is_empty() { OK_EMPTY } else { OK },
      message:  format!("{} row(s) returned", rows.len()),
      affected: Affected::Rows(rows),
    }
  }

  pub fn failure(code: i32, message: impl Into<String>) -> Self {
    Self { code, affected: Affected::Count(0), message: message.into() }
  }

  pub fn is_ok(&self) -> bool { self.code == OK || self.code == OK_EMPTY }

  /// Rows affected, or rows returned for a query.
  pub fn count(&self) -> u64 {
    match &self.affected {
      Affected::Count(n) => *n,
      Affected::Rows(rows) => rows.len() as u64,
    }
  }

  pub fn rows(&self) -> &[Value] {
    match &self.affected {
      Affected::Rows(rows) => rows,
      Affected::Count(_) => &[],
    }
  }

  /// Fold a non-success envelope into a [`Error::Persistence`].
  pub fn into_result(self, origin: &str) -> Result<u64> {
    if self.is_ok() {
      Ok(self.count())
    } else {
      Err(Error::Persistence {
        origin:  origin.to_string(),
        code:    self.code,
        message: self.message,
      })
    }
  }

  /// Combine two envelopes from a composite operation: the first failure wins,
  /// otherwise counts add up.
  pub fn merge(self, other: Envelope) -> Envelope {
    if !self.is_ok() {
      return self;
    }
    if !other.is_ok() {
      return other;
    }
    Envelope::from_count(self.count() + other.count())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn zero_rows_is_201() {
    let env = Envelope::from_count(0);
    assert_eq!(env.code, OK_EMPTY);
    assert!(env.is_ok());
  }

  #[test]
  fn failure_becomes_persistence_error() {
    let err = Envelope::failure(2067, "UNIQUE constraint failed")
      .into_result("insert_image")
      .unwrap_err();
    assert!(matches!(err, Error::Persistence { code: 2067, .. }));
  }

  #[test]
  fn merge_keeps_first_failure() {
    let merged = Envelope::from_count(2)
      .merge(Envelope::failure(5, "busy"))
      .merge(Envelope::from_count(1));
    assert_eq!(merged.code, 5);
  }
}
