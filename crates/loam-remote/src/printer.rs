use std::path::PathBuf;

use async_trait::async_trait;
use chrono::Utc;
use loam_core::notify::DocumentPrinter;

/// Drops rendered documents into a spool directory watched by the print
/// station.
pub struct SpoolPrinter {
  spool: PathBuf,
}

impl SpoolPrinter {
  pub fn new(spool: impl Into<PathBuf>) -> Self { Self { spool: spool.into() } }
}

#[async_trait]
impl DocumentPrinter for SpoolPrinter {
  async fn print(&self, name: &str, document: &str) -> loam_core::Result<PathBuf> {
    tokio::fs::create_dir_all(&self.spool).await?;
    let safe: String = name
      .chars()
      .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
      .collect();
    let path = self.spool.join(format!("{}-{safe}.html", Utc::now().format("%Y%m%d%H%M%S%6f")));
    tokio::fs::write(&path, document).await?;
    tracing::info!(path = %path.display(), "document spooled");
    Ok(path)
  }
}
