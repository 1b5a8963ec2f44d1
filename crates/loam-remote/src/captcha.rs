//! reCAPTCHA token verification.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use loam_core::{config::Secret, notify::CaptchaVerifier, remote::Result};
use reqwest::Client;
use serde::Deserialize;

use crate::{RateLimiter, http};

const SERVICE: &str = "captcha";

#[derive(Deserialize)]
struct Verdict {
  success:     bool,
  #[serde(default, rename = "error-codes")]
  error_codes: Vec<String>,
}

pub struct Recaptcha {
  client:  Client,
  limiter: Arc<RateLimiter>,
  url:     String,
  secret:  Secret,
}

impl Recaptcha {
  pub fn new(url: impl Into<String>, secret: Secret, limiter: Arc<RateLimiter>) -> crate::Result<Self> {
    Ok(Self {
      client: Client::builder().timeout(Duration::from_secs(10)).build()?,
      limiter,
      url: url.into(),
      secret,
    })
  }
}

#[async_trait]
impl CaptchaVerifier for Recaptcha {
  async fn verify(&self, token: &str, remote_ip: Option<&str>) -> Result<bool> {
    if token.trim().is_empty() {
      return Ok(false);
    }
    let mut form = vec![("secret", self.secret.expose()), ("response", token)];
    if let Some(ip) = remote_ip {
      form.push(("remoteip", ip));
    }
    let response =
      http::send(&self.limiter, SERVICE, || self.client.post(&self.url).form(&form)).await?;
    let verdict: Verdict = http::json(SERVICE, response).await?;
    if !verdict.success {
      tracing::debug!(codes = ?verdict.error_codes, "captcha rejected");
    }
    Ok(verdict.success)
  }
}
