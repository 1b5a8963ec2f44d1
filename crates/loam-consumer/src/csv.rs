//! The append-only CSV log of every lead received.

use std::path::Path;

use loam_core::queue::{LeadForm, LeadSource};
use tokio::{fs, io::AsyncWriteExt as _};

use crate::{Error, Result};

pub const HEADER: [&str; 13] = [
  "submitted_at",
  "source",
  "first_name",
  "last_name",
  "email",
  "phone",
  "interested_in",
  "timeline",
  "street",
  "city",
  "state",
  "zip_code",
  "comments",
];

/// Quote a field when it needs it. Leading formula characters are defused
/// for spreadsheet imports.
fn field(value: &str) -> String {
  let value = if value.starts_with(['=', '+', '-', '@']) { format!("'{value}") } else { value.to_string() };
  if value.contains([',', '"', '\n', '\r']) {
    format!("\"{}\"", value.replace('"', "\"\""))
  } else {
    value
  }
}

fn line(fields: impl IntoIterator<Item = String>) -> String {
  let mut out = fields.into_iter().map(|f| field(&f)).collect::<Vec<_>>().join(",");
  out.push('\n');
  out
}

pub fn row(lead: &LeadForm) -> Vec<String> {
  let source = match lead.source {
    LeadSource::Public => "public",
    LeadSource::Admin => "admin",
  };
  vec![
    lead.submitted_at.map(|t| t.to_rfc3339()).unwrap_or_default(),
    source.to_string(),
    lead.first_name.clone(),
    lead.last_name.clone(),
    lead.email.clone(),
    lead.phone.clone(),
    lead.interested_in.join("; "),
    lead.timeline.clone(),
    lead.street.clone(),
    lead.city.clone(),
    lead.state.clone(),
    lead.zip_code.clone(),
    lead.comments.clone(),
  ]
}

/// Append `lead`, writing the header first when the file is new.
pub async fn append(path: &Path, lead: &LeadForm) -> Result<()> {
  let fail = |source| Error::Csv { path: path.display().to_string(), source };
  if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
    fs::create_dir_all(parent).await.map_err(fail)?;
  }
  let fresh = !fs::try_exists(path).await.map_err(fail)?;
  let mut text = String::new();
  if fresh {
    text.push_str(&line(HEADER.iter().map(|h| h.to_string())));
  }
  text.push_str(&line(row(lead)));

  let mut file = fs::OpenOptions::new().create(true).append(true).open(path).await.map_err(fail)?;
  file.write_all(text.as_bytes()).await.map_err(fail)?;
  file.flush().await.map_err(fail)
}
