//! Product photos staged on a WebDAV share so the storefront can pull them
//! from a public URL.

use std::{path::Path, sync::Arc, time::Duration};

use async_trait::async_trait;
use loam_core::{
  config::{Secret, StorageConfig},
  notify::MediaStorage,
  remote::{RemoteError, Result},
};
use reqwest::Client;

use crate::{RateLimiter, http};

const SERVICE: &str = "storage";

pub struct WebDavStorage {
  client:     Client,
  limiter:    Arc<RateLimiter>,
  dav_url:    String,
  username:   String,
  password:   Secret,
  public_url: String,
}

impl WebDavStorage {
  pub fn new(cfg: &StorageConfig, limiter: Arc<RateLimiter>) -> crate::Result<Self> {
    Ok(Self {
      client: Client::builder().timeout(Duration::from_secs(120)).build()?,
      limiter,
      dav_url: cfg.webdav_url.trim_end_matches('/').to_string(),
      username: cfg.username.clone(),
      password: cfg.password.clone(),
      public_url: cfg.public_url.trim_end_matches('/').to_string(),
    })
  }

  fn target(&self, name: &str) -> String { format!("{}/{}", self.dav_url, name.trim_start_matches('/')) }

  pub fn public_url(&self, name: &str) -> String {
    format!("{}/{}", self.public_url, name.trim_start_matches('/'))
  }
}

#[async_trait]
impl MediaStorage for WebDavStorage {
  async fn upload(&self, local: &Path, name: &str) -> Result<String> {
    let bytes = tokio::fs::read(local).await.map_err(|e| RemoteError::Transport {
      service: SERVICE,
      message: format!("{}: {e}", local.display()),
    })?;
    let target = self.target(name);
    http::send(&self.limiter, SERVICE, || {
      self
        .client
        .put(&target)
        .basic_auth(&self.username, Some(self.password.expose()))
        .body(bytes.clone())
    })
    .await?;
    tracing::debug!(name, size = bytes.len(), "uploaded media");
    Ok(self.public_url(name))
  }

  async fn delete(&self, name: &str) -> Result<()> {
    let target = self.target(name);
    let outcome = http::send(&self.limiter, SERVICE, || {
      self.client.delete(&target).basic_auth(&self.username, Some(self.password.expose()))
    })
    .await;
    match outcome {
      Ok(_) | Err(RemoteError::NotFound { .. }) => Ok(()),
      Err(err) => Err(err),
    }
  }
}
