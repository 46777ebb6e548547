//! In-memory store for tests and ephemeral sessions.

use super::{CampaignStore, StoreError};
use async_trait::async_trait;
use geocast_core::{GeoCampaignMessage, MessageRecord, PendingReport, StoreDocument};
use geocast_types::SdkMessageId;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// In-memory store.
///
/// Clones share the same document, so a test can keep a handle and inspect
/// what the service persisted, or hand the same document to a restarted
/// service.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryStoreInner>>,
}

#[derive(Debug, Default)]
struct MemoryStoreInner {
    doc: StoreDocument,
    fail_next_write: Option<String>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the current document.
    pub fn document(&self) -> StoreDocument {
        self.lock().doc.clone()
    }

    /// Cause the next write to fail with the given reason.
    pub fn fail_next_write(&self, reason: &str) {
        let mut inner = self.lock();
        inner.fail_next_write = Some(reason.to_string());
    }

    fn lock(&self) -> MutexGuard<'_, MemoryStoreInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn write<T>(&self, edit: impl FnOnce(&mut StoreDocument) -> T) -> Result<T, StoreError> {
        let mut inner = self.lock();
        if let Some(reason) = inner.fail_next_write.take() {
            return Err(StoreError::WriteRejected(reason));
        }
        Ok(edit(&mut inner.doc))
    }
}

impl Clone for MemoryStore {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

#[async_trait]
impl CampaignStore for MemoryStore {
    async fn load(&self) -> Result<StoreDocument, StoreError> {
        Ok(self.document())
    }

    async fn save_campaign(&self, campaign: &GeoCampaignMessage) -> Result<(), StoreError> {
        self.write(|doc| super::upsert_campaign(doc, campaign))
    }

    async fn remove_campaign(&self, message_id: &str) -> Result<(), StoreError> {
        self.write(|doc| super::delete_campaign(doc, message_id))
    }

    async fn add_pending_reports(&self, reports: &[PendingReport]) -> Result<(), StoreError> {
        self.write(|doc| super::append_pending(doc, reports))
    }

    async fn remove_pending_reports(&self, ids: &[SdkMessageId]) -> Result<(), StoreError> {
        self.write(|doc| super::delete_pending(doc, ids))
    }

    async fn save_message(&self, record: &MessageRecord) -> Result<(), StoreError> {
        self.write(|doc| super::upsert_message(doc, record))
    }

    async fn rename_message(&self, from: &str, to: &str) -> Result<bool, StoreError> {
        self.write(|doc| super::rename(doc, from, to))
    }

    async fn remove_messages(&self, ids: &[String]) -> Result<(), StoreError> {
        self.write(|doc| super::delete_messages(doc, ids))
    }
}
