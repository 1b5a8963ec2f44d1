//! Storefront webhook registrations.

use std::collections::BTreeSet;

use crate::{
  Error, Result,
  storefront::WebhookSubscription,
};

pub const FORMAT: &str = "json";

/// Topics the intake service knows how to handle.
pub const KNOWN_TOPICS: [&str; 5] = [
  "orders/create",
  "customers/update",
  "customers/delete",
  "products/delete",
  "draft_orders/delete",
];

/// The storefront's subscriptions reconciled against the configured topics.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WebhookPlan {
  pub create: Vec<WebhookSubscription>,
  /// Remote ids of subscriptions to remove.
  pub delete: Vec<String>,
  /// Subscriptions that already match.
  pub keep:   Vec<WebhookSubscription>,
}

pub fn validate_topics(topics: &[String], destination: &str) -> Result<()> {
  if !destination.starts_with("https://") {
    return Err(Error::invalid("webhook", destination, "destination must be https"));
  }
  for topic in topics {
    if !KNOWN_TOPICS.contains(&topic.as_str()) {
      return Err(Error::invalid("webhook", topic, "unsupported topic"));
    }
  }
  Ok(())
}

/// Existing subscriptions for our destination with a wanted topic are kept
/// (duplicates removed); any other subscription pointing at our destination
/// is stale.
pub fn plan(topics: &[String], destination: &str, existing: &[WebhookSubscription]) -> WebhookPlan {
  let wanted: BTreeSet<&str> = topics.iter().map(String::as_str).collect();
  let mut covered = BTreeSet::new();
  let mut out = WebhookPlan::default();

  for sub in existing.iter().filter(|s| s.destination == destination) {
    let Some(id) = sub.id.clone() else { continue };
    if wanted.contains(sub.topic.as_str()) && covered.insert(sub.topic.clone()) {
      out.keep.push(sub.clone());
    } else {
      out.delete.push(id);
    }
  }

  for topic in wanted {
    if !covered.contains(topic) {
      out.create.push(WebhookSubscription {
        id:          None,
        topic:       topic.to_string(),
        destination: destination.to_string(),
        format:      FORMAT.to_string(),
      });
    }
  }
  out
}

#[cfg(test)]
mod tests {
  use super::*;

  const DEST: &str = "https://hooks.example.com/webhooks/storefront";

  fn sub(id: &str, topic: &str, dest: &str) -> WebhookSubscription {
    WebhookSubscription {
      id:          Some(id.into()),
      topic:       topic.into(),
      destination: dest.into(),
      format:      FORMAT.into(),
    }
  }

  #[test]
  fn plan_creates_missing_and_deletes_stale() {
    let topics = vec!["orders/create".to_string(), "customers/delete".to_string()];
    let existing = vec![
      sub("1", "orders/create", DEST),
      sub("2", "orders/create", DEST),
      sub("3", "products/delete", DEST),
      sub("4", "products/delete", "https://elsewhere.example.com"),
    ];
    let plan = plan(&topics, DEST, &existing);
    assert_eq!(plan.keep.len(), 1);
    assert_eq!(plan.delete, vec!["2".to_string(), "3".to_string()]);
    assert_eq!(plan.create.len(), 1);
    assert_eq!(plan.create[0].topic, "customers/delete");
  }

  #[test]
  fn unknown_topic_is_invalid() {
    assert!(validate_topics(&["carts/create".to_string()], DEST).is_err());
    assert!(validate_topics(&["orders/create".to_string()], "http://x").is_err());
    validate_topics(&["orders/create".to_string()], DEST).unwrap();
  }
}
