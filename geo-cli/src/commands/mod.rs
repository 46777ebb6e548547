//! CLI command implementations.

pub mod inspect;
pub mod migrate;
pub mod simulate;
pub mod window;

use anyhow::{Context, Result};
use serde_json::Value;
use std::path::Path;
use tracing::debug;

/// Read a JSON push payload.
pub async fn read_payload(path: &Path) -> Result<Value> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    debug!("Read {} bytes from {}", content.len(), path.display());
    serde_json::from_str(&content).with_context(|| format!("{} is not JSON", path.display()))
}
