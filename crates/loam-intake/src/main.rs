//! loam-intake server binary.
//!
//! Reads the JSON configuration (default `loam.json`, or `--config`), opens
//! the stores and the lead queue, and serves the intake routes over HTTP.

use std::{net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};

use anyhow::Context as _;
use clap::Parser;
use loam_core::{
  config::Config,
  log::{self, Handlers},
  queue::Broker as _,
};
use loam_intake::{AppState, Settings, limit};
use loam_remote::{HttpMailer, RateLimiter, Recaptcha};
use loam_store_sqlite::{MiddlewareDb, PosDb, SqliteQueue};
use tokio::net::TcpListener;

#[derive(Parser)]
#[command(author, version, about = "Loam HTTP intake and webhooks")]
struct Cli {
  /// Path to the JSON configuration file.
  #[arg(short, long, default_value = "loam.json", env = "LOAM_CONFIG")]
  config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  let cli = Cli::parse();
  let cfg = Config::load(&cli.config)
    .with_context(|| format!("failed to load {}", cli.config.display()))?;
  log::init(&cfg.paths.logs, cfg.features.verbose_logging).context("failed to initialise logging")?;

  let handlers = Handlers::new();
  let pos = PosDb::open(&cfg.pos.path, handlers.webhook.clone())
    .await
    .context("failed to open POS store")?;
  let middleware = MiddlewareDb::open(&cfg.middleware.path, handlers.webhook.clone())
    .await
    .context("failed to open middleware store")?;
  let queue = SqliteQueue::open(&cfg.queue.path, handlers.leads.clone())
    .await
    .context("failed to open lead queue")?;
  queue.declare(&cfg.queue.name).await.context("failed to declare lead queue")?;

  let limiter = Arc::new(RateLimiter::new());
  let captcha = Recaptcha::new(&cfg.intake.captcha_url, cfg.intake.captcha_secret.clone(), limiter.clone())
    .context("captcha client")?;
  let mailer = HttpMailer::new(&cfg.email, limiter, cfg.features.test_mode).context("mail client")?;

  let state = AppState {
    pos,
    middleware,
    queue: Arc::new(queue),
    captcha: Arc::new(captcha),
    mailer: Arc::new(mailer),
    handlers,
    settings: Arc::new(Settings::from_config(&cfg)),
    limiter: Arc::new(limit::RateLimiter::new()),
  };

  {
    let limiter = state.limiter.clone();
    tokio::spawn(async move {
      let mut tick = tokio::time::interval(Duration::from_secs(300));
      loop {
        tick.tick().await;
        limiter.sweep();
      }
    });
  }

  let app = loam_intake::router(state);
  let address = format!("{}:{}", cfg.intake.host, cfg.intake.port);
  tracing::info!(queue = %cfg.queue.name, "listening on http://{address}");
  let listener = TcpListener::bind(&address)
    .await
    .with_context(|| format!("failed to bind {address}"))?;

  axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
    .with_graceful_shutdown(async {
      let _ = tokio::signal::ctrl_c().await;
      tracing::info!("interrupt received; draining connections");
    })
    .await
    .context("server error")?;
  Ok(())
}
