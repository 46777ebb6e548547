//! JSON file store.
//!
//! The whole document is rewritten on every change: serialized to a
//! sibling temp file, then renamed over the store file. Legacy documents
//! are migrated on open and written back in the current layout.

use super::{CampaignStore, StoreError};
use async_trait::async_trait;
use geocast_core::{load_document, GeoCampaignMessage, MessageRecord, PendingReport, StoreDocument};
use geocast_types::SdkMessageId;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

/// Store backed by a single JSON file.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    doc: Mutex<StoreDocument>,
}

impl JsonFileStore {
    /// Open the store at `path`, creating an empty document if the file
    /// does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, is not JSON, or has an
    /// unsupported version.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();

        let doc = match tokio::fs::read_to_string(&path).await {
            Ok(content) => {
                let raw: Value = serde_json::from_str(&content)?;
                let migrated = raw.get("version").is_none();
                let doc = load_document(raw)?;
                if migrated {
                    tracing::info!(
                        "Migrated legacy store {} ({} campaigns kept)",
                        path.display(),
                        doc.campaigns.len()
                    );
                    write_document(&path, &doc).await?;
                }
                doc
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("No store at {}, starting empty", path.display());
                StoreDocument::default()
            }
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            path,
            doc: Mutex::new(doc),
        })
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn write<T>(
        &self,
        edit: impl FnOnce(&mut StoreDocument) -> T + Send,
    ) -> Result<T, StoreError> {
        let mut doc = self.doc.lock().await;
        let mut next = doc.clone();
        let out = edit(&mut next);
        write_document(&self.path, &next).await?;
        *doc = next;
        Ok(out)
    }
}

async fn write_document(path: &Path, doc: &StoreDocument) -> Result<(), StoreError> {
    let bytes = serde_json::to_vec_pretty(doc)?;
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

#[async_trait]
impl CampaignStore for JsonFileStore {
    async fn load(&self) -> Result<StoreDocument, StoreError> {
        Ok(self.doc.lock().await.clone())
    }

    async fn save_campaign(&self, campaign: &GeoCampaignMessage) -> Result<(), StoreError> {
        self.write(|doc| super::upsert_campaign(doc, campaign)).await
    }

    async fn remove_campaign(&self, message_id: &str) -> Result<(), StoreError> {
        self.write(|doc| super::delete_campaign(doc, message_id)).await
    }

    async fn add_pending_reports(&self, reports: &[PendingReport]) -> Result<(), StoreError> {
        self.write(|doc| super::append_pending(doc, reports)).await
    }

    async fn remove_pending_reports(&self, ids: &[SdkMessageId]) -> Result<(), StoreError> {
        self.write(|doc| super::delete_pending(doc, ids)).await
    }

    async fn save_message(&self, record: &MessageRecord) -> Result<(), StoreError> {
        self.write(|doc| super::upsert_message(doc, record)).await
    }

    async fn rename_message(&self, from: &str, to: &str) -> Result<bool, StoreError> {
        self.write(|doc| super::rename(doc, from, to)).await
    }

    async fn remove_messages(&self, ids: &[String]) -> Result<(), StoreError> {
        self.write(|doc| super::delete_messages(doc, ids)).await
    }
}
