//! loam-consumer binary.
//!
//! Reads the JSON configuration (default `loam.json`, or `--config`), opens
//! the stores and the lead queue, and processes leads until interrupted.

use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::Context as _;
use clap::Parser;
use loam_consumer::{Consumer, ConsumerSettings, LeadProcessor, Settings};
use loam_core::{
  config::Config,
  log::{self, Handlers},
  notify::SpreadsheetSink,
  queue::Broker as _,
};
use loam_remote::{HttpMailer, RateLimiter, SheetsClient, SpoolPrinter, TwilioSms};
use loam_store_sqlite::{MiddlewareDb, PosDb, SqliteQueue};
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(author, version, about = "Loam design-lead consumer")]
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
  let pos = PosDb::open(&cfg.pos.path, handlers.leads.clone())
    .await
    .context("failed to open POS store")?;
  let middleware = MiddlewareDb::open(&cfg.middleware.path, handlers.leads.clone())
    .await
    .context("failed to open middleware store")?;
  let queue = SqliteQueue::open(&cfg.queue.path, handlers.leads.clone())
    .await
    .context("failed to open lead queue")?;
  queue.declare(&cfg.queue.name).await.context("lead queue unreachable")?;

  let limiter = Arc::new(RateLimiter::new());
  let test_mode = cfg.features.test_mode;
  let sms = TwilioSms::new(&cfg.sms, limiter.clone(), test_mode).context("sms client")?;
  let mailer = HttpMailer::new(&cfg.email, limiter.clone(), test_mode).context("mail client")?;
  let sheets: Option<Arc<dyn SpreadsheetSink>> = match &cfg.sheets.endpoint {
    Some(endpoint) => Some(Arc::new(SheetsClient::new(endpoint, limiter).context("sheets client")?)),
    None => None,
  };

  let processor = LeadProcessor {
    pos,
    middleware,
    sms: Arc::new(sms),
    mailer: Arc::new(mailer),
    printer: Arc::new(SpoolPrinter::new(&cfg.paths.print_spool)),
    sheets,
    errors: handlers.leads.clone(),
    settings: Settings::from_config(&cfg),
  };

  let cancel = CancellationToken::new();
  {
    let cancel = cancel.clone();
    tokio::spawn(async move {
      if tokio::signal::ctrl_c().await.is_ok() {
        tracing::info!("interrupt received; releasing in-flight leads");
        cancel.cancel();
      }
    });
  }

  let settings = ConsumerSettings {
    queue_name:    cfg.queue.name.clone(),
    lease:         Duration::from_secs(cfg.queue.lease_secs.max(1)),
    poll_interval: Duration::from_secs(1),
    retry_pause:   Duration::from_secs(5),
  };
  tracing::info!(queue = %settings.queue_name, test_mode, "loam-consumer starting");
  Consumer::new(Arc::new(queue), Arc::new(processor), handlers.leads.clone(), settings, cancel)
    .run()
    .await;
  Ok(())
}
