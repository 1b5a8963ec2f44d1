//! Transactional email through an HTTP mail API.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use loam_core::{
  config::{EmailConfig, Secret},
  notify::{EmailMessage, Mailer},
  remote::{RemoteError, Result},
  sanitize::normalize_email,
};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::{RateLimiter, http};

const SERVICE: &str = "email";

#[derive(Serialize)]
struct Address<'a> {
  email: &'a str,
  #[serde(skip_serializing_if = "Option::is_none")]
  name:  Option<&'a str>,
}

#[derive(Serialize)]
struct Outgoing<'a> {
  from:        Address<'a>,
  to:          [Address<'a>; 1],
  #[serde(skip_serializing_if = "Option::is_none")]
  reply_to:    Option<Address<'a>>,
  subject:     &'a str,
  html:        &'a str,
}

#[derive(Deserialize)]
struct Accepted {
  #[serde(default, alias = "messageId", alias = "message_id")]
  id: Option<String>,
}

pub struct HttpMailer {
  client:    Client,
  limiter:   Arc<RateLimiter>,
  url:       String,
  api_key:   Secret,
  from:      String,
  from_name: String,
  test_mode: bool,
}

impl HttpMailer {
  pub fn new(cfg: &EmailConfig, limiter: Arc<RateLimiter>, test_mode: bool) -> crate::Result<Self> {
    Ok(Self {
      client: Client::builder().timeout(Duration::from_secs(30)).build()?,
      limiter,
      url: cfg.api_url.clone(),
      api_key: cfg.api_key.clone(),
      from: cfg.from_address.clone(),
      from_name: cfg.from_name.clone(),
      test_mode,
    })
  }
}

#[async_trait]
impl Mailer for HttpMailer {
  async fn send_email(&self, message: &EmailMessage) -> Result<String> {
    let to = normalize_email(&message.to)
      .ok_or_else(|| RemoteError::validation(SERVICE, format!("bad address {:?}", message.to)))?;
    if self.test_mode {
      tracing::info!(%to, subject = %message.subject, "test mode: email not sent");
      return Ok(format!("test-{}", uuid::Uuid::new_v4()));
    }
    let outgoing = Outgoing {
      from:     Address { email: &self.from, name: Some(&self.from_name) },
      to:       [Address { email: &to, name: message.to_name.as_deref() }],
      reply_to: message.reply_to.as_deref().map(|email| Address { email, name: None }),
      subject:  &message.subject,
      html:     &message.html,
    };
    let response = http::send(&self.limiter, SERVICE, || {
      self.client.post(&self.url).bearer_auth(self.api_key.expose()).json(&outgoing)
    })
    .await?;
    let text = response.text().await.unwrap_or_default();
    let id = serde_json::from_str::<Accepted>(&text).ok().and_then(|a| a.id);
    Ok(id.unwrap_or_else(|| format!("accepted-{}", uuid::Uuid::new_v4())))
  }
}
