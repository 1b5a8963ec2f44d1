//! loam-sync binary.
//!
//! Reads the JSON configuration (default `loam.json`, or `--config`), opens
//! the POS and middleware stores, and runs outbound sync cycles on the
//! configured interval until interrupted. `--once` runs a single cycle.

use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::Context as _;
use clap::Parser;
use loam_core::{
  config::Config,
  log::{self, Handlers},
};
use loam_remote::{HttpMailer, HttpStorefront, RateLimiter, TwilioSms, WebDavStorage};
use loam_store_sqlite::{MiddlewareDb, PosDb};
use loam_sync::{Dispatcher, Engine, Kind, Settings, SyncContext};
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(author, version, about = "Loam outbound sync")]
struct Cli {
  /// Path to the JSON configuration file.
  #[arg(short, long, default_value = "loam.json", env = "LOAM_CONFIG")]
  config: PathBuf,

  /// Run one cycle and exit.
  #[arg(long)]
  once: bool,

  /// Only sync this entity kind (e.g. `products`, `gift_cards`).
  #[arg(long)]
  only: Option<Kind>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  let cli = Cli::parse();
  let cfg = Config::load(&cli.config)
    .with_context(|| format!("failed to load {}", cli.config.display()))?;
  log::init(&cfg.paths.logs, cfg.features.verbose_logging).context("failed to initialise logging")?;

  let handlers = Handlers::new();
  let pos = PosDb::open(&cfg.pos.path, handlers.sync.clone())
    .await
    .context("failed to open POS store")?;
  let middleware = MiddlewareDb::open(&cfg.middleware.path, handlers.sync.clone())
    .await
    .context("failed to open middleware store")?;

  let limiter = Arc::new(RateLimiter::new());
  let test_mode = cfg.features.test_mode;
  let storefront = HttpStorefront::new(&cfg.storefront, limiter.clone()).context("storefront client")?;
  let storage = WebDavStorage::new(&cfg.storage, limiter.clone()).context("storage client")?;
  let mailer = HttpMailer::new(&cfg.email, limiter.clone(), test_mode).context("mail client")?;
  let sms = TwilioSms::new(&cfg.sms, limiter, test_mode).context("sms client")?;

  let ctx = SyncContext {
    pos,
    middleware,
    storefront,
    storage: Arc::new(storage),
    mailer: Arc::new(mailer),
    sms: Arc::new(sms),
    errors: handlers.sync.clone(),
    settings: Settings::from_config(&cfg),
  };

  let cancel = CancellationToken::new();
  {
    let cancel = cancel.clone();
    tokio::spawn(async move {
      if tokio::signal::ctrl_c().await.is_ok() {
        tracing::info!("interrupt received; finishing in-flight work");
        cancel.cancel();
      }
    });
  }

  let engine = Engine::new(ctx, Dispatcher::new(cfg.sync.concurrency, cancel));
  tracing::info!(
    shop = %cfg.storefront.shop,
    interval_secs = cfg.sync.interval_secs,
    test_mode,
    "loam-sync starting"
  );

  if cli.once {
    let report = engine.run_cycle(cli.only).await;
    tracing::info!(errors = report.errors, aborted = ?report.aborted, "cycle complete");
    if !report.aborted.is_empty() {
      anyhow::bail!("{} kinds could not run", report.aborted.len());
    }
  } else {
    engine.run(Duration::from_secs(cfg.sync.interval_secs.max(1)), cli.only).await;
  }
  Ok(())
}
