//! Intake bookkeeping kept in the middleware store: SMS history, newsletter
//! subscriptions, back-in-stock requests, design-lead progress and QR scans.

use chrono::{DateTime, Utc};
use loam_core::envelope::Envelope;
use rusqlite::{OptionalExtension, params, params_from_iter, types::Value};
use serde::Serialize;

use crate::{MiddlewareDb, Result, encode::{dt_at, encode_dt}};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmsDirection {
  Inbound,
  Outbound,
}

impl SmsDirection {
  fn as_str(self) -> &'static str {
    match self {
      Self::Inbound => "inbound",
      Self::Outbound => "outbound",
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SmsRecord {
  pub direction:   String,
  pub phone:       String,
  pub body:        String,
  pub provider_id: Option<String>,
  pub at:          DateTime<Utc>,
}

/// A pending back-in-stock request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StockRequest {
  pub id:      i64,
  pub item_no: String,
  pub email:   Option<String>,
  pub phone:   Option<String>,
  pub created: DateTime<Utc>,
}

impl MiddlewareDb {
  // ─── SMS ───────────────────────────────────────────────────────────────────

  pub async fn record_sms(
    &self,
    direction: SmsDirection,
    phone: &str,
    body: &str,
    provider_id: Option<&str>,
  ) -> Envelope {
    let (phone, body) = (phone.to_string(), body.to_string());
    let provider_id = provider_id.map(str::to_string);
    let now = encode_dt(Utc::now());
    self
      .dal
      .write("records.record_sms", move |conn| {
        conn.execute(
          "INSERT INTO sms_history (direction, phone, body, provider_id, at)
           VALUES (?1, ?2, ?3, ?4, ?5)",
          params![direction.as_str(), phone, body, provider_id, now],
        )
      })
      .await
  }

  pub async fn sms_history(&self, phone: &str) -> Result<Vec<SmsRecord>> {
    let phone = phone.to_string();
    self
      .dal
      .read("records.sms_history", move |conn| {
        let mut stmt = conn.prepare(
          "SELECT direction, phone, body, provider_id, at FROM sms_history
           WHERE phone = ?1 ORDER BY id",
        )?;
        stmt
          .query_map(params![phone], |row| {
            Ok(SmsRecord {
              direction:   row.get(0)?,
              phone:       row.get(1)?,
              body:        row.get(2)?,
              provider_id: row.get(3)?,
              at:          dt_at(row, 4)?,
            })
          })?
          .collect()
      })
      .await
  }

  /// Record a delivery-status or opt-out event reported by the provider.
  pub async fn record_sms_event(
    &self,
    phone: Option<&str>,
    event: &str,
    provider_id: Option<&str>,
    detail: Option<&str>,
  ) -> Envelope {
    let phone = phone.map(str::to_string);
    let event = event.to_string();
    let provider_id = provider_id.map(str::to_string);
    let detail = detail.map(str::to_string);
    let now = encode_dt(Utc::now());
    self
      .dal
      .write("records.record_sms_event", move |conn| {
        conn.execute(
          "INSERT INTO sms_events (phone, event, provider_id, detail, at)
           VALUES (?1, ?2, ?3, ?4, ?5)",
          params![phone, event, provider_id, detail, now],
        )
      })
      .await
  }

  pub async fn sms_events(&self, event: &str) -> Result<i64> {
    let event = event.to_string();
    self
      .dal
      .read("records.sms_events", move |conn| {
        conn.query_row("SELECT COUNT(*) FROM sms_events WHERE event = ?1", params![event], |r| {
          r.get(0)
        })
      })
      .await
  }

  // ─── Newsletter ────────────────────────────────────────────────────────────

  /// `None` when the address has never signed up.
  pub async fn newsletter_status(&self, email: &str) -> Result<Option<bool>> {
    let email = email.to_string();
    self
      .dal
      .read("records.newsletter_status", move |conn| {
        conn
          .query_row("SELECT subscribed FROM newsletter WHERE email = ?1", params![email], |r| {
            r.get(0)
          })
          .optional()
      })
      .await
  }

  /// Set the subscription state of an address and append the matching
  /// event. Rows that already hold the requested state are left alone and
  /// no event is recorded.
  pub async fn set_newsletter(&self, email: &str, subscribed: bool) -> Envelope {
    let email = email.to_string();
    let now = encode_dt(Utc::now());
    self
      .dal
      .write("records.set_newsletter", move |conn| {
        let tx = conn.transaction()?;
        let current: Option<bool> = tx
          .query_row("SELECT subscribed FROM newsletter WHERE email = ?1", params![email], |r| {
            r.get(0)
          })
          .optional()?;
        if current == Some(subscribed) {
          return Ok(0);
        }
        let n = tx.execute(
          "INSERT INTO newsletter (email, subscribed, created, updated) VALUES (?1, ?2, ?3, ?3)
           ON CONFLICT(email) DO UPDATE SET subscribed = excluded.subscribed, updated = excluded.updated",
          params![email, subscribed, now],
        )?;
        let event = if subscribed { "subscribe" } else { "unsubscribe" };
        tx.execute(
          "INSERT INTO subscription_events (email, event, at) VALUES (?1, ?2, ?3)",
          params![email, event, now],
        )?;
        tx.commit()?;
        Ok(n)
      })
      .await
  }

  pub async fn subscription_events(&self, email: &str) -> Result<Vec<String>> {
    let email = email.to_string();
    self
      .dal
      .read("records.subscription_events", move |conn| {
        let mut stmt =
          conn.prepare("SELECT event FROM subscription_events WHERE email = ?1 ORDER BY id")?;
        stmt.query_map(params![email], |r| r.get(0))?.collect()
      })
      .await
  }

  // ─── Back in stock ─────────────────────────────────────────────────────────

  pub async fn stock_request_exists(
    &self,
    item_no: &str,
    email: Option<&str>,
    phone: Option<&str>,
  ) -> Result<bool> {
    let item_no = item_no.to_string();
    let email = email.map(str::to_string);
    let phone = phone.map(str::to_string);
    self
      .dal
      .read("records.stock_request_exists", move |conn| {
        conn.query_row(
          "SELECT EXISTS (SELECT 1 FROM stock_notify
             WHERE item_no = ?1 AND ((?2 IS NOT NULL AND email = ?2) OR (?3 IS NOT NULL AND phone = ?3)))",
          params![item_no, email, phone],
          |r| r.get(0),
        )
      })
      .await
  }

  pub async fn add_stock_request(
    &self,
    item_no: &str,
    email: Option<&str>,
    phone: Option<&str>,
  ) -> Envelope {
    let item_no = item_no.to_string();
    let email = email.map(str::to_string);
    let phone = phone.map(str::to_string);
    let now = encode_dt(Utc::now());
    self
      .dal
      .write("records.add_stock_request", move |conn| {
        conn.execute(
          "INSERT INTO stock_notify (item_no, email, phone, created) VALUES (?1, ?2, ?3, ?4)",
          params![item_no, email, phone, now],
        )
      })
      .await
  }

  pub async fn stock_requests(&self, item_nos: Vec<String>) -> Result<Vec<StockRequest>> {
    let (sql, params) = crate::QueryBuilder::select("stock_notify", &[
      "id", "item_no", "email", "phone", "created",
    ])
    .is_in("item_no", item_nos)
    .order_by("id")
    .build();
    self
      .dal
      .read("records.stock_requests", move |conn| {
        let mut stmt = conn.prepare(&sql)?;
        stmt
          .query_map(params_from_iter(params.iter()), |row| {
            Ok(StockRequest {
              id:      row.get(0)?,
              item_no: row.get(1)?,
              email:   row.get(2)?,
              phone:   row.get(3)?,
              created: dt_at(row, 4)?,
            })
          })?
          .collect()
      })
      .await
  }

  pub async fn delete_stock_requests(&self, ids: Vec<i64>) -> Envelope {
    self
      .dal
      .write("records.delete_stock_requests", move |conn| {
        if ids.is_empty() {
          return Ok(0);
        }
        let sql = format!("DELETE FROM stock_notify WHERE id IN ({})", vec!["?"; ids.len()].join(", "));
        let values: Vec<Value> = ids.iter().map(|id| Value::Integer(*id)).collect();
        conn.execute(&sql, params_from_iter(values.iter()))
      })
      .await
  }

  // ─── Design leads ──────────────────────────────────────────────────────────

  /// Completed-step bitmask of a lead message, creating its row on first
  /// sight.
  pub async fn lead_steps(&self, message_id: &str, name: &str, email: &str, phone: &str) -> Result<u32> {
    let (message_id, name, email, phone) =
      (message_id.to_string(), name.to_string(), email.to_string(), phone.to_string());
    let now = encode_dt(Utc::now());
    self
      .dal
      .read("records.lead_steps", move |conn| {
        conn.execute(
          "INSERT OR IGNORE INTO design_leads (message_id, name, email, phone, steps, created, updated)
           VALUES (?1, ?2, ?3, ?4, 0, ?5, ?5)",
          params![message_id, name, email, phone, now],
        )?;
        conn.query_row(
          "SELECT steps FROM design_leads WHERE message_id = ?1",
          params![message_id],
          |r| r.get(0),
        )
      })
      .await
  }

  pub async fn mark_lead_step(&self, message_id: &str, step: u32) -> Envelope {
    let message_id = message_id.to_string();
    let now = encode_dt(Utc::now());
    self
      .dal
      .write("records.mark_lead_step", move |conn| {
        conn.execute(
          "UPDATE design_leads SET steps = steps | ?2, updated = ?3 WHERE message_id = ?1",
          params![message_id, step, now],
        )
      })
      .await
  }

  // ─── QR codes ──────────────────────────────────────────────────────────────

  pub async fn put_qr_code(&self, qr_id: &str, target: &str) -> Envelope {
    let (qr_id, target) = (qr_id.to_string(), target.to_string());
    let now = encode_dt(Utc::now());
    self
      .dal
      .write("records.put_qr_code", move |conn| {
        conn.execute(
          "INSERT INTO qr_codes (qr_id, target, visits, created) VALUES (?1, ?2, 0, ?3)
           ON CONFLICT(qr_id) DO UPDATE SET target = excluded.target",
          params![qr_id, target, now],
        )
      })
      .await
  }

  /// The redirect target and visit count of a QR code.
  pub async fn qr_code(&self, qr_id: &str) -> Result<Option<(String, i64)>> {
    let qr_id = qr_id.to_string();
    self
      .dal
      .read("records.qr_code", move |conn| {
        conn
          .query_row("SELECT target, visits FROM qr_codes WHERE qr_id = ?1", params![qr_id], |r| {
            Ok((r.get(0)?, r.get(1)?))
          })
          .optional()
      })
      .await
  }

  /// Count one scan. Unknown codes are not recorded.
  pub async fn record_qr_visit(
    &self,
    qr_id: &str,
    remote_ip: Option<&str>,
    user_agent: Option<&str>,
  ) -> Envelope {
    let qr_id = qr_id.to_string();
    let remote_ip = remote_ip.map(str::to_string);
    let user_agent = user_agent.map(str::to_string);
    let now = encode_dt(Utc::now());
    self
      .dal
      .write("records.record_qr_visit", move |conn| {
        let tx = conn.transaction()?;
        let n = tx.execute("UPDATE qr_codes SET visits = visits + 1 WHERE qr_id = ?1", params![qr_id])?;
        if n > 0 {
          tx.execute(
            "INSERT INTO qr_activity (qr_id, remote_ip, user_agent, at) VALUES (?1, ?2, ?3, ?4)",
            params![qr_id, remote_ip, user_agent, now],
          )?;
        }
        tx.commit()?;
        Ok(n)
      })
      .await
  }
}
