//! Offline report reconciliation.
//!
//! Fired events are buffered as [`PendingReport`]s under a provisional id.
//! The [`OfflineReportReconciler`] turns a batch into a request, submits it,
//! and applies the server's answer to the stored message records: confirmed
//! ids replace provisional ones, and virtual messages of suspended or
//! finished campaigns are discarded.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use geocast_core::{GeoCampaignMessage, IdRewrite, MessageRecord, PendingReport};
use geocast_types::{
    GeoEventReportRequest, GeoEventReportResponse, SdkMessageId, SeenStatusRequest, NO_REGISTRATION,
};

use crate::api::{ApiError, ReportingApi};
use crate::config::ReportingConfig;
use crate::store::{CampaignStore, StoreError};

/// Builds, submits and applies geo event reports.
#[derive(Clone)]
pub struct OfflineReportReconciler {
    api: Arc<dyn ReportingApi>,
    platform_type: String,
    registration_id: Option<String>,
}

impl std::fmt::Debug for OfflineReportReconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OfflineReportReconciler")
            .field("platform_type", &self.platform_type)
            .field("registration_id", &self.registration_id)
            .finish_non_exhaustive()
    }
}

impl OfflineReportReconciler {
    /// Create a reconciler submitting through `api`.
    pub fn new(api: Arc<dyn ReportingApi>, config: &ReportingConfig) -> Self {
        Self {
            api,
            platform_type: config.platform_type.clone(),
            registration_id: config.push_registration_id.clone(),
        }
    }

    /// Request body for `batch`.
    ///
    /// `campaigns` is keyed by campaign message id. Each referenced campaign
    /// message is included once; campaigns no longer stored are reported
    /// without one.
    pub fn build_request(
        &self,
        batch: &[PendingReport],
        campaigns: &BTreeMap<String, GeoCampaignMessage>,
        now: DateTime<Utc>,
    ) -> GeoEventReportRequest {
        let mut included = BTreeSet::new();
        let messages = batch
            .iter()
            .filter(|r| included.insert(r.campaign_message_id.as_str()))
            .filter_map(|r| campaigns.get(&r.campaign_message_id))
            .map(GeoCampaignMessage::geo_event_report_format)
            .collect();

        GeoEventReportRequest {
            platform_type: self.platform_type.clone(),
            device_application_instance_id: self
                .registration_id
                .clone()
                .unwrap_or_else(|| NO_REGISTRATION.to_string()),
            reports: batch.iter().map(|r| r.to_report(now)).collect(),
            messages,
        }
    }

    /// Submit a report batch.
    pub async fn submit(
        &self,
        request: &GeoEventReportRequest,
    ) -> Result<GeoEventReportResponse, ApiError> {
        tracing::debug!("Submitting {} geo event reports", request.reports.len());
        self.api.report_geo_events(request).await
    }

    /// Seen request for every record that is due.
    pub fn build_seen_request<'a>(
        records: impl IntoIterator<Item = &'a MessageRecord>,
        now: DateTime<Utc>,
    ) -> SeenStatusRequest {
        SeenStatusRequest {
            messages: records
                .into_iter()
                .filter_map(|r| r.seen_entry(now))
                .collect(),
        }
    }

    /// Submit a seen request.
    pub async fn submit_seen(&self, request: &SeenStatusRequest) -> Result<(), ApiError> {
        tracing::debug!("Submitting seen status for {} messages", request.messages.len());
        self.api.send_seen(request).await
    }

    /// Replace provisional ids with confirmed ones, in the store first and
    /// then in `records`.
    ///
    /// Rewrites whose provisional record no longer exists are skipped, so a
    /// plan can be applied again after a partial failure. Returns the
    /// rewrites that changed something.
    pub async fn apply_rewrites(
        &self,
        store: &dyn CampaignStore,
        rewrites: &[IdRewrite],
        records: &mut BTreeMap<String, MessageRecord>,
    ) -> Result<Vec<IdRewrite>, StoreError> {
        let mut applied = Vec::new();
        for rewrite in rewrites {
            let from = rewrite.provisional.to_string();
            if !records.contains_key(&from) {
                continue;
            }
            store.rename_message(&from, &rewrite.confirmed).await?;
            if let Some(mut record) = records.remove(&from) {
                record.message_id = rewrite.confirmed.clone();
                records.entry(record.message_id.clone()).or_insert(record);
            }
            applied.push(rewrite.clone());
        }
        Ok(applied)
    }

    /// Drop the virtual messages created for `discards`.
    ///
    /// Returns the ids removed.
    pub async fn apply_discards(
        &self,
        store: &dyn CampaignStore,
        discards: &[SdkMessageId],
        records: &mut BTreeMap<String, MessageRecord>,
    ) -> Result<Vec<String>, StoreError> {
        let ids: Vec<String> = discards
            .iter()
            .map(SdkMessageId::to_string)
            .filter(|id| records.contains_key(id))
            .collect();
        if ids.is_empty() {
            return Ok(ids);
        }
        store.remove_messages(&ids).await?;
        for id in &ids {
            records.remove(id);
        }
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::MockReportingApi;
    use crate::store::MemoryStore;
    use chrono::{Duration, TimeZone};
    use geocast_core::{ReconcilePlan, SeenStatus};
    use geocast_types::EventType;
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn campaign(message_id: &str) -> GeoCampaignMessage {
        GeoCampaignMessage::from_payload(&json!({
            "messageId": message_id,
            "internalData": {
                "campaignId": format!("c-{message_id}"),
                "messageType": "geo",
                "silent": { "title": "Sale", "body": "Half price today" },
                "geo": [
                    { "id": "a1", "latitude": 45.0, "longitude": 15.0, "radiusInMeters": 150.0, "title": "A" },
                    { "id": "b1", "latitude": 45.1, "longitude": 15.1, "radiusInMeters": 150.0, "title": "B" }
                ]
            }
        }))
        .unwrap()
    }

    fn reconciler(api: &MockReportingApi, registration: Option<&str>) -> OfflineReportReconciler {
        let config = ReportingConfig {
            push_registration_id: registration.map(str::to_string),
            ..ReportingConfig::default()
        };
        OfflineReportReconciler::new(Arc::new(api.clone()), &config)
    }

    fn campaigns(ids: &[&str]) -> BTreeMap<String, GeoCampaignMessage> {
        ids.iter().map(|id| (id.to_string(), campaign(id))).collect()
    }

    // ===========================================
    // Request Building Tests
    // ===========================================

    #[test]
    fn request_lists_each_campaign_message_once() {
        let api = MockReportingApi::new();
        let r = reconciler(&api, Some("reg-1"));
        let earlier = now() - Duration::seconds(30);
        let batch = vec![
            PendingReport::new("c-m1", "a1", EventType::Entry, "m1", earlier),
            PendingReport::new("c-m1", "b1", EventType::Exit, "m1", now()),
        ];

        let request = r.build_request(&batch, &campaigns(&["m1"]), now());

        assert_eq!(request.platform_type, "APNS");
        assert_eq!(request.device_application_instance_id, "reg-1");
        assert_eq!(request.reports.len(), 2);
        assert_eq!(request.reports[0].timestamp_delta, 30_000);
        assert_eq!(request.reports[1].event, EventType::Exit);
        assert_eq!(request.messages.len(), 1);
        assert_eq!(request.messages[0].message_id, "m1");
        assert!(request.messages[0].silent);
    }

    #[test]
    fn missing_registration_is_reported_as_placeholder() {
        let api = MockReportingApi::new();
        let r = reconciler(&api, None);
        let batch = vec![PendingReport::new("c-gone", "a1", EventType::Entry, "gone", now())];

        let request = r.build_request(&batch, &campaigns(&[]), now());
        assert_eq!(request.device_application_instance_id, NO_REGISTRATION);
        assert_eq!(request.reports.len(), 1);
        assert!(request.messages.is_empty());
    }

    #[test]
    fn seen_request_skips_provisional_and_unseen() {
        let c = campaign("m1");
        let mut provisional = MessageRecord::virtual_for(&c, SdkMessageId::new(), now());
        provisional.mark_seen(now());
        let mut confirmed = MessageRecord::virtual_for(&c, SdkMessageId::new(), now());
        confirmed.message_id = "server-1".to_string();
        confirmed.mark_seen(now() - Duration::seconds(5));
        let unseen = MessageRecord::for_campaign(&c, now());

        let request =
            OfflineReportReconciler::build_seen_request([&provisional, &confirmed, &unseen], now());
        assert_eq!(request.messages.len(), 1);
        assert_eq!(request.messages[0].message_id, "server-1");
        assert_eq!(request.messages[0].timestamp_delta, 5_000);
    }

    // ===========================================
    // Apply Tests
    // ===========================================

    #[tokio::test]
    async fn rewrites_rename_records_and_keep_seen_status() {
        let api = MockReportingApi::new();
        let r = reconciler(&api, None);
        let store = MemoryStore::new();
        let c = campaign("m1");

        let report = PendingReport::new("c-m1", "a1", EventType::Entry, "m1", now());
        let mut record = MessageRecord::virtual_for(&c, report.provisional_message_id, now());
        record.mark_seen(now());
        store.save_message(&record).await.unwrap();
        let mut records = BTreeMap::from([(record.message_id.clone(), record)]);

        let request = r.build_request(&[report.clone()], &campaigns(&["m1"]), now());
        let response = r.submit(&request).await.unwrap();
        let plan = ReconcilePlan::from_response(&[report], &response);

        let applied = r.apply_rewrites(&store, &plan.rewrites, &mut records).await.unwrap();
        assert_eq!(applied.len(), 1);
        assert_eq!(records["server-1"].seen_status, SeenStatus::SeenNotSent);
        assert!(records["server-1"].needs_seen_report());
        assert_eq!(store.document().messages[0].message_id, "server-1");

        // Applying the same plan again changes nothing.
        let again = r.apply_rewrites(&store, &plan.rewrites, &mut records).await.unwrap();
        assert!(again.is_empty());
        assert_eq!(records.len(), 1);
    }

    #[tokio::test]
    async fn failed_rename_leaves_records_untouched() {
        let api = MockReportingApi::new();
        let r = reconciler(&api, None);
        let store = MemoryStore::new();
        let c = campaign("m1");
        let id = SdkMessageId::new();
        let record = MessageRecord::virtual_for(&c, id, now());
        store.save_message(&record).await.unwrap();
        let mut records = BTreeMap::from([(record.message_id.clone(), record)]);

        store.fail_next_write("disk full");
        let rewrite = IdRewrite {
            provisional: id,
            confirmed: "server-9".to_string(),
        };
        assert!(r.apply_rewrites(&store, &[rewrite], &mut records).await.is_err());
        assert!(records.contains_key(&id.to_string()));
        assert_eq!(store.document().messages[0].message_id, id.to_string());
    }

    #[tokio::test]
    async fn discards_remove_virtual_messages() {
        let api = MockReportingApi::new();
        let r = reconciler(&api, None);
        let store = MemoryStore::new();
        let c = campaign("m1");
        let id = SdkMessageId::new();
        let record = MessageRecord::virtual_for(&c, id, now());
        store.save_message(&record).await.unwrap();
        let mut records = BTreeMap::from([(record.message_id.clone(), record)]);

        let removed = r
            .apply_discards(&store, &[id, SdkMessageId::new()], &mut records)
            .await
            .unwrap();
        assert_eq!(removed, vec![id.to_string()]);
        assert!(records.is_empty());
        assert!(store.document().messages.is_empty());
    }
}
