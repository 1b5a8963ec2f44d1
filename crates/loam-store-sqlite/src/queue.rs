//! A durable, manually acknowledged work queue on SQLite.
//!
//! A received message is leased: it becomes invisible until `visible_at`,
//! which `ack` never reaches (the row is gone) and `nack` resets to now. A
//! consumer that dies mid-message therefore sees it again once the lease
//! runs out, flagged as redelivered.

use std::{path::Path, sync::Arc, time::Duration};

use chrono::Utc;
use loam_core::{
  log::ErrorHandler,
  queue::{Broker, Delivery},
};
use rusqlite::{OptionalExtension, params};

use crate::{Dal, Error, Result, encode::encode_dt, schema::QUEUE_SCHEMA};

#[derive(Clone)]
pub struct SqliteQueue {
  dal: Dal,
}

impl SqliteQueue {
  pub async fn open(path: impl AsRef<Path>, errors: Arc<ErrorHandler>) -> Result<Self> {
    Ok(Self { dal: Dal::open(path, QUEUE_SCHEMA, errors).await? })
  }

  pub async fn open_in_memory(errors: Arc<ErrorHandler>) -> Result<Self> {
    Ok(Self { dal: Dal::open_in_memory(QUEUE_SCHEMA, errors).await? })
  }

  /// Messages in `queue`, leased or not.
  pub async fn depth(&self, queue: &str) -> Result<i64> {
    let queue = queue.to_string();
    self
      .dal
      .read("queue.depth", move |conn| {
        conn.query_row("SELECT COUNT(*) FROM messages WHERE queue = ?1", params![queue], |r| r.get(0))
      })
      .await
  }
}

impl Broker for SqliteQueue {
  type Error = Error;

  async fn declare(&self, queue: &str) -> Result<()> {
    let queue = queue.to_string();
    let now = encode_dt(Utc::now());
    self
      .dal
      .read("queue.declare", move |conn| {
        conn.execute("INSERT OR IGNORE INTO queues (name, created) VALUES (?1, ?2)", params![queue, now])
      })
      .await?;
    Ok(())
  }

  async fn publish(&self, queue: &str, body: &str, persistent: bool) -> Result<String> {
    let (queue, body) = (queue.to_string(), body.to_string());
    let queue_name = queue.clone();
    let message_id = uuid::Uuid::new_v4().to_string();
    let now = encode_dt(Utc::now());
    let id = message_id.clone();
    let inserted = self
      .dal
      .read("queue.publish", move |conn| {
        conn.execute(
          "INSERT INTO messages (message_id, queue, body, persistent, deliveries, visible_at, published_at)
           SELECT ?1, name, ?3, ?4, 0, ?5, ?5 FROM queues WHERE name = ?2",
          params![id, queue, body, persistent, now],
        )
      })
      .await?;
    if inserted == 0 {
      return Err(Error::UnknownQueue(queue_name));
    }
    Ok(message_id)
  }

  async fn receive(&self, queue: &str, lease: Duration) -> Result<Option<Delivery>> {
    let queue = queue.to_string();
    let now = Utc::now();
    let until = chrono::Duration::from_std(lease)
      .ok()
      .and_then(|d| now.checked_add_signed(d))
      .unwrap_or(now + chrono::Duration::days(365));
    let (now, until) = (encode_dt(now), encode_dt(until));
    self
      .dal
      .read("queue.receive", move |conn| {
        let tx = conn.transaction()?;
        let next = tx
          .query_row(
            "SELECT tag, message_id, body, deliveries FROM messages
             WHERE queue = ?1 AND visible_at <= ?2
             ORDER BY tag LIMIT 1",
            params![queue, now],
            |r| {
              Ok((r.get::<_, i64>(0)?, r.get::<_, String>(1)?, r.get::<_, String>(2)?, r.get::<_, i64>(3)?))
            },
          )
          .optional()?;
        let Some((tag, message_id, body, deliveries)) = next else {
          return Ok(None);
        };
        tx.execute(
          "UPDATE messages SET visible_at = ?2, deliveries = deliveries + 1 WHERE tag = ?1",
          params![tag, until],
        )?;
        tx.commit()?;
        Ok(Some(Delivery { tag, message_id, body, redelivered: deliveries > 0 }))
      })
      .await
  }

  async fn ack(&self, tag: i64) -> Result<()> {
    self
      .dal
      .read("queue.ack", move |conn| conn.execute("DELETE FROM messages WHERE tag = ?1", params![tag]))
      .await?;
    Ok(())
  }

  async fn nack(&self, tag: i64) -> Result<()> {
    let now = encode_dt(Utc::now());
    self
      .dal
      .read("queue.nack", move |conn| {
        conn.execute("UPDATE messages SET visible_at = ?2 WHERE tag = ?1", params![tag, now])
      })
      .await?;
    Ok(())
  }
}
