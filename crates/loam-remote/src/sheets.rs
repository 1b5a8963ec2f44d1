use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use loam_core::{notify::SpreadsheetSink, remote::Result};
use reqwest::Client;
use serde_json::Value;

use crate::{RateLimiter, http};

const SERVICE: &str = "sheets";

/// Appends lead rows to a spreadsheet through a webhook-style endpoint that
/// takes one JSON object per row.
pub struct SheetsClient {
  client:   Client,
  limiter:  Arc<RateLimiter>,
  endpoint: String,
}

impl SheetsClient {
  pub fn new(endpoint: impl Into<String>, limiter: Arc<RateLimiter>) -> crate::Result<Self> {
    Ok(Self {
      client: Client::builder().timeout(Duration::from_secs(30)).build()?,
      limiter,
      endpoint: endpoint.into(),
    })
  }
}

#[async_trait]
impl SpreadsheetSink for SheetsClient {
  async fn append_row(&self, row: &Value) -> Result<()> {
    http::send(&self.limiter, SERVICE, || self.client.post(&self.endpoint).json(row)).await?;
    Ok(())
  }
}
