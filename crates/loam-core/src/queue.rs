//! The durable work queue and the lead-form message carried on it.

use std::{future::Future, time::Duration};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::sanitize::{canonical_phone, normalize_email, strip_control};

// ─── Broker ──────────────────────────────────────────────────────────────────

/// A message handed to a consumer. It stays invisible to other consumers
/// until it is acked, nacked, or its lease runs out.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
  pub tag:         i64,
  pub message_id:  String,
  pub body:        String,
  /// The message was delivered before and not acknowledged.
  pub redelivered: bool,
}

/// A durable queue with manual acknowledgement.
pub trait Broker: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  /// Create the queue if it does not exist. Idempotent.
  fn declare(&self, queue: &str) -> impl Future<Output = Result<(), Self::Error>> + Send;

  /// Append a message; returns its id.
  fn publish(
    &self,
    queue: &str,
    body: &str,
    persistent: bool,
  ) -> impl Future<Output = Result<String, Self::Error>> + Send;

  /// Lease the oldest visible message, if any.
  fn receive(
    &self,
    queue: &str,
    lease: Duration,
  ) -> impl Future<Output = Result<Option<Delivery>, Self::Error>> + Send;

  fn ack(&self, tag: i64) -> impl Future<Output = Result<(), Self::Error>> + Send;

  /// Release a delivery for redelivery.
  fn nack(&self, tag: i64) -> impl Future<Output = Result<(), Self::Error>> + Send;
}

// ─── Lead form ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadSource {
  Public,
  Admin,
}

fn default_source() -> LeadSource { LeadSource::Public }

/// A design-service lead submitted through the website or by staff.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeadForm {
  pub first_name:    String,
  pub last_name:     String,
  pub email:         String,
  pub phone:         String,
  #[serde(default)]
  pub interested_in: Vec<String>,
  #[serde(default)]
  pub timeline:      String,
  #[serde(default)]
  pub street:        String,
  #[serde(default)]
  pub city:          String,
  #[serde(default)]
  pub state:         String,
  #[serde(default)]
  pub zip_code:      String,
  #[serde(default)]
  pub comments:      String,
  #[serde(default = "default_source")]
  pub source:        LeadSource,
  #[serde(default)]
  pub submitted_at:  Option<DateTime<Utc>>,
}

/// The first field of a lead form that failed validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {reason}")]
pub struct FieldError {
  pub field:  &'static str,
  pub reason: &'static str,
}

const MAX_FIELD: usize = 200;
const MAX_COMMENTS: usize = 2000;

impl LeadForm {
  /// Strip control characters and canonicalize contact fields in place.
  /// Comments keep their line breaks.
  pub fn sanitize(&mut self) {
    for field in [
      &mut self.first_name,
      &mut self.last_name,
      &mut self.email,
      &mut self.phone,
      &mut self.timeline,
      &mut self.street,
      &mut self.city,
      &mut self.state,
      &mut self.zip_code,
    ] {
      *field = strip_control(field).trim().to_string();
    }
    self.comments = self
      .comments
      .chars()
      .filter(|c| *c == '\n' || !matches!(*c as u32, 1..=31))
      .collect::<String>()
      .trim()
      .to_string();
    self.interested_in = self
      .interested_in
      .iter()
      .map(|s| strip_control(s).trim().to_string())
      .filter(|s| !s.is_empty())
      .collect();
    if let Some(email) = normalize_email(&self.email) {
      self.email = email;
    }
    if let Some(phone) = canonical_phone(&self.phone) {
      self.phone = phone;
    }
    self.state = self.state.to_uppercase();
  }

  /// Check fields in form order and report the first violation.
  pub fn validate(&self) -> Result<(), FieldError> {
    let fail = |field, reason| Err(FieldError { field, reason });
    let required = [
      ("first_name", &self.first_name),
      ("last_name", &self.last_name),
    ];
    for (field, value) in required {
      if value.trim().is_empty() {
        return fail(field, "is required");
      }
      if value.chars().count() > MAX_FIELD {
        return fail(field, "is too long");
      }
    }
    if normalize_email(&self.email).is_none() {
      return fail("email", "is not a valid email address");
    }
    if canonical_phone(&self.phone).is_none() {
      return fail("phone", "is not a valid phone number");
    }
    for (field, value) in [
      ("timeline", &self.timeline),
      ("street", &self.street),
      ("city", &self.city),
      ("state", &self.state),
    ] {
      if value.chars().count() > MAX_FIELD {
        return fail(field, "is too long");
      }
    }
    if !self.zip_code.is_empty()
      && !(self.zip_code.len() == 5 || self.zip_code.len() == 10)
    {
      return fail("zip_code", "is not a valid ZIP code");
    }
    if self.comments.chars().count() > MAX_COMMENTS {
      return fail("comments", "is too long");
    }
    Ok(())
  }

  pub fn full_name(&self) -> String { format!("{} {}", self.first_name, self.last_name) }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn jane() -> LeadForm {
    serde_json::from_value(serde_json::json!({
      "first_name": "Jane", "last_name": "Doe", "email": "j@d.com", "phone": "828-123-4567",
      "interested_in": ["Delivery & Placement Service"], "timeline": "1-3 months",
      "street": "1 Main", "city": "Valdese", "state": "NC", "zip_code": "28690",
      "comments": "test"
    }))
    .unwrap()
  }

  #[test]
  fn reference_lead_is_valid() {
    let lead = jane();
    assert_eq!(lead.source, LeadSource::Public);
    lead.validate().unwrap();
  }

  #[test]
  fn first_violation_is_reported() {
    let mut lead = jane();
    lead.email = "nope".into();
    lead.phone = "12".into();
    assert_eq!(lead.validate().unwrap_err().field, "email");
  }

  #[test]
  fn sanitize_strips_controls_and_canonicalizes() {
    let mut lead = jane();
    lead.first_name = "Ja\u{7}ne ".into();
    lead.phone = "(828) 123 4567".into();
    lead.comments = "line one\nline\ttwo".into();
    lead.sanitize();
    assert_eq!(lead.first_name, "Jane");
    assert_eq!(lead.phone, "828-123-4567");
    assert_eq!(lead.comments, "line one\nlinetwo");
  }
}
