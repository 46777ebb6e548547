//! Campaign persistence.
//!
//! The store keeps one [`StoreDocument`]: campaigns with their event
//! counters, reports not yet confirmed, and message records. Every change
//! is written through before the service acts on it, so a restart resumes
//! where the process stopped.

mod file;
mod memory;

pub use file::JsonFileStore;
pub use memory::MemoryStore;

use async_trait::async_trait;
use geocast_core::{GeoCampaignMessage, MessageRecord, PendingReport, StoreDocument};
use geocast_types::{GeoError, SdkMessageId};
use thiserror::Error;

/// Store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Reading or writing the backing file failed.
    #[error("storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// The document could not be (de)serialized.
    #[error("store document is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// The document has an unsupported layout.
    #[error("unsupported store document: {0}")]
    Schema(#[from] GeoError),

    /// Writing was refused (used by test stores).
    #[error("write rejected: {0}")]
    WriteRejected(String),
}

/// Persistence for campaigns, pending reports and message records.
#[async_trait]
pub trait CampaignStore: Send + Sync {
    /// Load the whole document.
    async fn load(&self) -> Result<StoreDocument, StoreError>;

    /// Insert or replace the campaign with the same message id.
    async fn save_campaign(&self, campaign: &GeoCampaignMessage) -> Result<(), StoreError>;

    /// Remove the campaign with `message_id`. Missing campaigns are ignored.
    async fn remove_campaign(&self, message_id: &str) -> Result<(), StoreError>;

    /// Append reports awaiting submission.
    async fn add_pending_reports(&self, reports: &[PendingReport]) -> Result<(), StoreError>;

    /// Remove confirmed reports.
    async fn remove_pending_reports(&self, ids: &[SdkMessageId]) -> Result<(), StoreError>;

    /// Insert or replace the message record with the same id.
    async fn save_message(&self, record: &MessageRecord) -> Result<(), StoreError>;

    /// Change a record's id. Returns false if no record had id `from`.
    async fn rename_message(&self, from: &str, to: &str) -> Result<bool, StoreError>;

    /// Remove message records. Missing ids are ignored.
    async fn remove_messages(&self, ids: &[String]) -> Result<(), StoreError>;
}

// Document edits shared by the store implementations.

fn upsert_campaign(doc: &mut StoreDocument, campaign: &GeoCampaignMessage) {
    let record = campaign.to_record();
    match doc
        .campaigns
        .iter_mut()
        .find(|c| c.message_id() == Some(campaign.message_id()))
    {
        Some(existing) => *existing = record,
        None => doc.campaigns.push(record),
    }
}

fn delete_campaign(doc: &mut StoreDocument, message_id: &str) {
    doc.campaigns.retain(|c| c.message_id() != Some(message_id));
}

fn append_pending(doc: &mut StoreDocument, reports: &[PendingReport]) {
    for report in reports {
        if !doc
            .pending_reports
            .iter()
            .any(|r| r.provisional_message_id == report.provisional_message_id)
        {
            doc.pending_reports.push(report.clone());
        }
    }
}

fn delete_pending(doc: &mut StoreDocument, ids: &[SdkMessageId]) {
    doc.pending_reports
        .retain(|r| !ids.contains(&r.provisional_message_id));
}

fn upsert_message(doc: &mut StoreDocument, record: &MessageRecord) {
    match doc
        .messages
        .iter_mut()
        .find(|m| m.message_id == record.message_id)
    {
        Some(existing) => *existing = record.clone(),
        None => doc.messages.push(record.clone()),
    }
}

fn rename(doc: &mut StoreDocument, from: &str, to: &str) -> bool {
    if from != to && doc.messages.iter().any(|m| m.message_id == to) {
        // The confirmed id is already stored; drop the provisional copy.
        let before = doc.messages.len();
        doc.messages.retain(|m| m.message_id != from);
        return doc.messages.len() != before;
    }
    match doc.messages.iter_mut().find(|m| m.message_id == from) {
        Some(record) => {
            record.message_id = to.to_string();
            true
        }
        None => false,
    }
}

fn delete_messages(doc: &mut StoreDocument, ids: &[String]) {
    doc.messages.retain(|m| !ids.contains(&m.message_id));
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use geocast_core::SeenStatus;
    use geocast_types::EventType;
    use serde_json::json;

    pub(super) fn campaign(message_id: &str) -> GeoCampaignMessage {
        GeoCampaignMessage::from_payload(&json!({
            "messageId": message_id,
            "aps": { "content-available": 1 },
            "internalData": {
                "campaignId": format!("c-{message_id}"),
                "messageType": "geo",
                "silent": { "title": "Hello", "body": "World" },
                "geo": [
                    { "id": "a1", "latitude": 45.0, "longitude": 15.0, "radiusInMeters": 150.0, "title": "Area" }
                ]
            }
        }))
        .unwrap()
    }

    pub(super) fn report(campaign_id: &str) -> PendingReport {
        PendingReport::new(
            campaign_id,
            "a1",
            EventType::Entry,
            "m1",
            Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
        )
    }

    // ===========================================
    // Document Edit Tests
    // ===========================================

    #[test]
    fn upsert_replaces_campaign_with_same_message_id() {
        let mut doc = StoreDocument::default();
        let mut c = campaign("m1");
        upsert_campaign(&mut doc, &c);
        c.set_campaign_state(geocast_core::CampaignState::Suspended);
        upsert_campaign(&mut doc, &c);
        upsert_campaign(&mut doc, &campaign("m2"));

        assert_eq!(doc.campaigns.len(), 2);
        assert_eq!(
            doc.campaigns[0].campaign_state,
            geocast_core::CampaignState::Suspended
        );

        delete_campaign(&mut doc, "m1");
        assert_eq!(doc.campaigns.len(), 1);
        assert_eq!(doc.campaigns[0].message_id(), Some("m2"));
    }

    #[test]
    fn pending_reports_are_not_duplicated() {
        let mut doc = StoreDocument::default();
        let r = report("c1");
        append_pending(&mut doc, &[r.clone()]);
        append_pending(&mut doc, &[r.clone(), report("c2")]);
        assert_eq!(doc.pending_reports.len(), 2);

        delete_pending(&mut doc, &[r.provisional_message_id]);
        assert_eq!(doc.pending_reports.len(), 1);
        assert_eq!(doc.pending_reports[0].campaign_id, "c2");
    }

    #[test]
    fn rename_keeps_seen_status() {
        let mut doc = StoreDocument::default();
        let c = campaign("m1");
        let id = SdkMessageId::new();
        let mut record = MessageRecord::virtual_for(&c, id, Utc::now());
        record.mark_seen(Utc::now());
        upsert_message(&mut doc, &record);

        assert!(rename(&mut doc, &id.to_string(), "server-1"));
        assert!(!rename(&mut doc, &id.to_string(), "server-1"));
        assert_eq!(doc.messages[0].message_id, "server-1");
        assert_eq!(doc.messages[0].seen_status, SeenStatus::SeenNotSent);
    }

    #[test]
    fn rename_onto_existing_id_drops_provisional_copy() {
        let mut doc = StoreDocument::default();
        let c = campaign("m1");
        let id = SdkMessageId::new();
        let mut confirmed = MessageRecord::virtual_for(&c, id, Utc::now());
        confirmed.message_id = "server-1".to_string();
        upsert_message(&mut doc, &confirmed);
        upsert_message(&mut doc, &MessageRecord::virtual_for(&c, id, Utc::now()));

        assert!(rename(&mut doc, &id.to_string(), "server-1"));
        assert_eq!(doc.messages.len(), 1);
        assert_eq!(doc.messages[0].message_id, "server-1");

        delete_messages(&mut doc, &["server-1".to_string()]);
        assert!(doc.messages.is_empty());
    }
}
