//! Rewrite a campaign store in the current schema.

use anyhow::{Context, Result};
use geocast_client::{CampaignStore, JsonFileStore};
use std::path::Path;
use tracing::info;

/// Run the migrate command.
pub async fn run(path: &Path) -> Result<()> {
    if !tokio::fs::try_exists(path).await.unwrap_or(false) {
        anyhow::bail!("Store {} does not exist", path.display());
    }

    info!("Opening store {}", path.display());
    let store = JsonFileStore::open(path)
        .await
        .with_context(|| format!("Failed to load store {}", path.display()))?;
    let doc = store.load().await?;

    println!("Store {} is at version {}", path.display(), doc.version);
    println!("  Campaigns:       {}", doc.campaigns.len());
    println!("  Pending reports: {}", doc.pending_reports.len());
    println!("  Messages:        {}", doc.messages.len());
    Ok(())
}
