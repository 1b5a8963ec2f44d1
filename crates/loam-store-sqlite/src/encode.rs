//! Conversions between domain values and the plain-text representations
//! stored in SQLite columns.
//!
//! Timestamps are RFC 3339 UTC strings with a fixed microsecond precision so
//! that lexical comparison in SQL (`last_maint > ?`) matches chronological
//! order. Calendar dates are `YYYY-MM-DD`. Ordered string sets are stored
//! comma-separated.

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rusqlite::{
  Row,
  types::{Type, ValueRef},
};

pub fn conversion(idx: usize, err: impl std::error::Error + Send + Sync + 'static) -> rusqlite::Error {
  rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

// ─── DateTime<Utc> ───────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String { dt.to_rfc3339_opts(SecondsFormat::Micros, true) }

pub fn dt_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
  let raw: String = row.get(idx)?;
  DateTime::parse_from_rfc3339(&raw)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| conversion(idx, e))
}

// ─── NaiveDate ───────────────────────────────────────────────────────────────

pub fn encode_date(date: NaiveDate) -> String { date.format("%Y-%m-%d").to_string() }

pub fn date_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<NaiveDate>> {
  let raw: Option<String> = row.get(idx)?;
  raw
    .filter(|s| !s.trim().is_empty())
    .map(|s| NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").map_err(|e| conversion(idx, e)))
    .transpose()
}

// ─── Lists ───────────────────────────────────────────────────────────────────

pub fn encode_csv(values: &[String]) -> String { values.join(",") }

pub fn csv_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Vec<String>> {
  let raw: Option<String> = row.get(idx)?;
  Ok(
    raw
      .unwrap_or_default()
      .split(',')
      .map(str::trim)
      .filter(|s| !s.is_empty())
      .map(str::to_string)
      .collect(),
  )
}

// ─── Raw values ──────────────────────────────────────────────────────────────

/// A column value as JSON, for the untyped query primitive.
pub fn value_to_json(value: ValueRef<'_>) -> serde_json::Value {
  match value {
    ValueRef::Null => serde_json::Value::Null,
    ValueRef::Integer(i) => i.into(),
    ValueRef::Real(f) => serde_json::Number::from_f64(f)
      .map(serde_json::Value::Number)
      .unwrap_or(serde_json::Value::Null),
    ValueRef::Text(t) => String::from_utf8_lossy(t).into_owned().into(),
    ValueRef::Blob(b) => b.iter().map(|byte| format!("{byte:02x}")).collect::<String>().into(),
  }
}

#[cfg(test)]
mod tests {
  use chrono::TimeZone;

  use super::*;

  #[test]
  fn timestamps_sort_lexically() {
    let early = Utc.with_ymd_and_hms(2026, 5, 1, 9, 0, 0).unwrap();
    let late = Utc.with_ymd_and_hms(2026, 5, 1, 10, 0, 0).unwrap() + chrono::Duration::milliseconds(5);
    let (a, b) = (encode_dt(early), encode_dt(late));
    assert!(a < b);
    assert_eq!(DateTime::parse_from_rfc3339(&b).unwrap(), late);
    assert!(a.ends_with('Z'));
  }
}
