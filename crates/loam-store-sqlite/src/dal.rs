//! The access layer shared by every store: a raw `query` primitive that
//! answers with an [`Envelope`], typed read/write runners used by the
//! per-entity helpers, and a small query builder.
//!
//! Every failure is logged through the owning subsystem's [`ErrorHandler`]
//! with its origin before it is handed back. A busy or locked database is
//! retried exactly once after [`BUSY_RETRY_DELAY`].

use std::{path::Path, sync::Arc, time::Duration};

use loam_core::{
  envelope::{self, Envelope},
  log::{ErrorHandler, ErrorKind},
  sanitize::sql_escape,
};
use rusqlite::{ErrorCode, params_from_iter, types::Value};
use tokio_rusqlite::Connection;

use crate::{Error, Result, encode::value_to_json};

pub const BUSY_RETRY_DELAY: Duration = Duration::from_secs(1);

// ─── Driver codes ────────────────────────────────────────────────────────────

fn sqlite_failure(err: &tokio_rusqlite::Error) -> Option<&rusqlite::ffi::Error> {
  match err {
    tokio_rusqlite::Error::Rusqlite(rusqlite::Error::SqliteFailure(e, _)) => Some(e),
    _ => None,
  }
}

/// The driver's extended result code, or [`envelope::INTERNAL`].
pub fn driver_code(err: &tokio_rusqlite::Error) -> i32 {
  sqlite_failure(err).map(|e| e.extended_code).unwrap_or(envelope::INTERNAL)
}

/// SQLite's equivalent of a deadlock: another connection holds the lock.
pub fn is_busy(err: &tokio_rusqlite::Error) -> bool {
  sqlite_failure(err)
    .is_some_and(|e| matches!(e.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked))
}

// ─── Dal ─────────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct Dal {
  conn:   Connection,
  errors: Arc<ErrorHandler>,
}

impl Dal {
  pub async fn open(
    path: impl AsRef<Path>,
    schema: &'static str,
    errors: Arc<ErrorHandler>,
  ) -> Result<Self> {
    let conn = Connection::open(path).await?;
    let dal = Self { conn, errors };
    dal.init_schema(schema).await?;
    Ok(dal)
  }

  pub async fn open_in_memory(schema: &'static str, errors: Arc<ErrorHandler>) -> Result<Self> {
    let conn = Connection::open_in_memory().await?;
    let dal = Self { conn, errors };
    dal.init_schema(schema).await?;
    Ok(dal)
  }

  async fn init_schema(&self, schema: &'static str) -> Result<()> {
    self
      .conn
      .call(move |conn| {
        conn.execute_batch(schema)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  pub fn errors(&self) -> &Arc<ErrorHandler> { &self.errors }

  /// Run one statement. Statements that produce a result set answer with
  /// their rows (JSON objects keyed by column name when `mapped`, positional
  /// arrays otherwise); all others answer with the affected row count.
  pub async fn query(&self, sql: impl Into<String>, params: Vec<Value>, mapped: bool) -> Envelope {
    let sql = sql.into();
    let result = self
      .run("query", move |conn| {
        let mut stmt = conn.prepare(&sql)?;
        if stmt.column_count() == 0 {
          let count = stmt.execute(params_from_iter(params.iter()))?;
          return Ok(Envelope::from_count(count as u64));
        }
        let names: Vec<String> = stmt.column_names().into_iter().map(str::to_string).collect();
        let mut rows = stmt.query(params_from_iter(params.iter()))?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
          let values = (0..names.len())
            .map(|i| row.get_ref(i).map(value_to_json))
            .collect::<rusqlite::Result<Vec<_>>>()?;
          out.push(if mapped {
            serde_json::Value::Object(names.iter().cloned().zip(values).collect())
          } else {
            serde_json::Value::Array(values)
          });
        }
        Ok(Envelope::from_rows(out))
      })
      .await;
    result.unwrap_or_else(|(code, message)| Envelope::failure(code, message))
  }

  /// Run a mutation and report the affected row count.
  pub async fn write<F>(&self, origin: &str, f: F) -> Envelope
  where
    F: FnOnce(&mut rusqlite::Connection) -> rusqlite::Result<usize> + Clone + Send + 'static,
  {
    match self.run(origin, f).await {
      Ok(count) => Envelope::from_count(count as u64),
      Err((code, message)) => Envelope::failure(code, message),
    }
  }

  /// Run a typed read.
  pub async fn read<T, F>(&self, origin: &str, f: F) -> Result<T>
  where
    T: Send + 'static,
    F: FnOnce(&mut rusqlite::Connection) -> rusqlite::Result<T> + Clone + Send + 'static,
  {
    self.run(origin, f).await.map_err(|(code, message)| Error::Persistence {
      origin: origin.to_string(),
      code,
      message,
    })
  }

  async fn run<T, F>(&self, origin: &str, f: F) -> std::result::Result<T, (i32, String)>
  where
    T: Send + 'static,
    F: FnOnce(&mut rusqlite::Connection) -> rusqlite::Result<T> + Clone + Send + 'static,
  {
    let first = f.clone();
    let outcome = match self.conn.call(move |conn| Ok(first(conn)?)).await {
      Err(err) if is_busy(&err) => {
        self.errors.warn(origin, "database busy, retrying once");
        tokio::time::sleep(BUSY_RETRY_DELAY).await;
        self.conn.call(move |conn| Ok(f(conn)?)).await
      }
      other => other,
    };
    outcome.map_err(|err| {
      self.errors.add_error_from(ErrorKind::LocalPersistence, origin, &err);
      (driver_code(&err), err.to_string())
    })
  }
}

// ─── QueryBuilder ────────────────────────────────────────────────────────────

/// Assembles a `SELECT` with bound parameters. Identifiers are interpolated
/// and pass through [`sql_escape`]; values are always bound.
#[derive(Debug, Clone)]
pub struct QueryBuilder {
  table:   String,
  columns: Vec<String>,
  clauses: Vec<String>,
  params:  Vec<Value>,
  order:   Vec<String>,
}

impl QueryBuilder {
  pub fn select<S: AsRef<str>>(table: &str, columns: &[S]) -> Self {
    Self {
      table:   sql_escape(table),
      columns: columns.iter().map(|c| sql_escape(c.as_ref())).collect(),
      clauses: Vec::new(),
      params:  Vec::new(),
      order:   Vec::new(),
    }
  }

  pub fn eq(mut self, column: &str, value: impl Into<Value>) -> Self {
    self.clauses.push(format!("{} = ?", sql_escape(column)));
    self.params.push(value.into());
    self
  }

  /// `column IN (..)`; an empty set matches nothing.
  pub fn is_in<V: Into<Value>>(mut self, column: &str, values: impl IntoIterator<Item = V>) -> Self {
    let clause = self.in_list(column, values);
    self.clauses.push(clause);
    self
  }

  /// Rows maintained after `since`, plus the rows whose key (in any of
  /// `key_columns`) is listed in `retry`. Change selection uses this so that
  /// failed entities come back even after the cursor has moved on.
  pub fn changed_since(
    mut self,
    maint_column: &str,
    since: impl Into<Value>,
    key_columns: &[&str],
    retry: &[String],
  ) -> Self {
    self.params.push(since.into());
    let mut parts = vec![format!("{} > ?", sql_escape(maint_column))];
    if !retry.is_empty() {
      for column in key_columns {
        let clause = self.in_list(column, retry.iter().cloned());
        parts.push(clause);
      }
    }
    self.clauses.push(format!("({})", parts.join(" OR ")));
    self
  }

  pub fn raw(mut self, clause: &str) -> Self {
    self.clauses.push(format!("({clause})"));
    self
  }

  pub fn order_by(mut self, column: &str) -> Self {
    self.order.push(sql_escape(column));
    self
  }

  fn in_list<V: Into<Value>>(&mut self, column: &str, values: impl IntoIterator<Item = V>) -> String {
    let before = self.params.len();
    self.params.extend(values.into_iter().map(Into::into));
    let n = self.params.len() - before;
    if n == 0 {
      return "0".to_string();
    }
    format!("{} IN ({})", sql_escape(column), vec!["?"; n].join(", "))
  }

  pub fn build(self) -> (String, Vec<Value>) {
    let mut sql = format!("SELECT {} FROM {}", self.columns.join(", "), self.table);
    if !self.clauses.is_empty() {
      sql.push_str(" WHERE ");
      sql.push_str(&self.clauses.join(" AND "));
    }
    if !self.order.is_empty() {
      sql.push_str(" ORDER BY ");
      sql.push_str(&self.order.join(", "));
    }
    (sql, self.params)
  }
}
