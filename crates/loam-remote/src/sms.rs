//! Outbound SMS through the Twilio messages API.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use loam_core::{
  config::{Secret, SmsConfig},
  notify::SmsSender,
  remote::{RemoteError, Result},
  sanitize::e164,
};
use reqwest::Client;
use serde::Deserialize;

use crate::{Error, RateLimiter, http};

const SERVICE: &str = "sms";

#[derive(Deserialize)]
struct Sent {
  sid: String,
}

pub struct TwilioSms {
  client:      Client,
  limiter:     Arc<RateLimiter>,
  url:         String,
  account_sid: String,
  auth_token:  Secret,
  from:        String,
  test_mode:   bool,
}

impl TwilioSms {
  pub fn new(cfg: &SmsConfig, limiter: Arc<RateLimiter>, test_mode: bool) -> crate::Result<Self> {
    let from = e164(&cfg.from_number).ok_or_else(|| Error::Config {
      what:   "sms from_number",
      reason: format!("{:?} is not a phone number", cfg.from_number),
    })?;
    Ok(Self {
      client: Client::builder().timeout(Duration::from_secs(30)).build()?,
      limiter,
      url: format!(
        "{}/2010-04-01/Accounts/{}/Messages.json",
        cfg.base_url.trim_end_matches('/'),
        cfg.account_sid
      ),
      account_sid: cfg.account_sid.clone(),
      auth_token: cfg.auth_token.clone(),
      from,
      test_mode,
    })
  }
}

#[async_trait]
impl SmsSender for TwilioSms {
  async fn send_sms(&self, to: &str, body: &str) -> Result<String> {
    let to = e164(to).ok_or_else(|| RemoteError::validation(SERVICE, format!("bad number {to:?}")))?;
    if self.test_mode {
      tracing::info!(%to, chars = body.chars().count(), "test mode: sms not sent");
      return Ok(format!("test-{}", uuid::Uuid::new_v4()));
    }
    let form = [("To", to.as_str()), ("From", self.from.as_str()), ("Body", body)];
    let response = http::send(&self.limiter, SERVICE, || {
      self
        .client
        .post(&self.url)
        .basic_auth(&self.account_sid, Some(self.auth_token.expose()))
        .form(&form)
    })
    .await?;
    let sent: Sent = http::json(SERVICE, response).await?;
    tracing::debug!(%to, sid = %sent.sid, "sms sent");
    Ok(sent.sid)
  }
}
