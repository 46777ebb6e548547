//! Geo campaign messages.
//!
//! A [`GeoCampaignMessage`] is built once from an inbound push payload and
//! then only mutated when an event fires (region counters) or when the
//! server changes its [`CampaignState`].

use chrono::{DateTime, NaiveDateTime, Utc};
use geocast_types::{
    distant_future, parse_date, reference_date, EventType, GeoError, GeoMessageReport,
    GeoPushPayload, SilentData, GEO_MESSAGE_TYPE,
};
use serde_json::Value;
use std::collections::HashSet;

use crate::schema::CampaignRecord;
use crate::{CampaignState, DeliveryTimeWindow, Region, ValidityPeriod};

/// A geofencing campaign: regions, validity period and delivery window.
#[derive(Debug, Clone)]
pub struct GeoCampaignMessage {
    message_id: String,
    campaign_id: String,
    validity: ValidityPeriod,
    regions: Vec<Region>,
    delivery_window: Option<DeliveryTimeWindow>,
    campaign_state: CampaignState,
    content: SilentData,
    payload: Value,
}

impl GeoCampaignMessage {
    /// Build from a push payload.
    ///
    /// Returns `None` when the payload is not a well-formed geo campaign; the
    /// caller should handle it as a regular message.
    pub fn from_payload(payload: &Value) -> Option<Self> {
        match Self::try_from_payload(payload) {
            Ok(message) => Some(message),
            Err(e) => {
                tracing::debug!("Not a geo campaign: {}", e);
                None
            }
        }
    }

    /// Build from a push payload, reporting why it was rejected.
    pub fn try_from_payload(payload: &Value) -> Result<Self, GeoError> {
        let parsed: GeoPushPayload = serde_json::from_value(payload.clone())?;
        let data = parsed
            .internal_data
            .ok_or_else(|| GeoError::InvalidPayload("missing internalData".into()))?;

        if let Some(kind) = data.message_type.as_deref() {
            if kind != GEO_MESSAGE_TYPE {
                return Err(GeoError::InvalidPayload(format!("message type {kind}")));
            }
        }

        let records = data
            .geo
            .as_ref()
            .filter(|geo| !geo.is_empty())
            .ok_or_else(|| GeoError::InvalidPayload("no regions".into()))?;

        let mut seen = HashSet::new();
        let mut regions = Vec::with_capacity(records.len());
        for record in records {
            if seen.insert(record.id.as_str()) {
                regions.push(Region::from_record(record, data.event.as_deref())?);
            }
        }

        let start = match data.start_time.as_deref() {
            Some(s) => parse_date(s)?,
            None => reference_date(),
        };
        let expiry = match data.expiry_time.as_deref() {
            Some(s) => parse_date(s)?,
            None => distant_future(),
        };

        let delivery_window = data
            .delivery_time
            .as_ref()
            .map(DeliveryTimeWindow::from_record)
            .transpose()?;

        Ok(Self {
            campaign_id: data.campaign_id.unwrap_or_else(|| parsed.message_id.clone()),
            message_id: parsed.message_id,
            validity: ValidityPeriod { start, expiry },
            regions,
            delivery_window,
            campaign_state: CampaignState::Active,
            content: data.silent.unwrap_or_default(),
            payload: payload.clone(),
        })
    }

    /// Restore a stored campaign, keeping its counters and state.
    pub fn from_record(record: &CampaignRecord) -> Result<Self, GeoError> {
        let mut message = Self::try_from_payload(&record.payload)?;
        for stored in &record.regions {
            if let Some(region) = message
                .regions
                .iter_mut()
                .find(|r| r.identifier() == stored.id)
            {
                *region = Region::from_record(stored, None)?;
            }
        }
        message.campaign_state = record.campaign_state;
        Ok(message)
    }

    /// Stored form with the current counters and state.
    pub fn to_record(&self) -> CampaignRecord {
        CampaignRecord {
            payload: self.payload.clone(),
            regions: self.regions.iter().map(Region::to_record).collect(),
            campaign_state: self.campaign_state,
        }
    }

    /// Server message id of the campaign push.
    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    /// Campaign id.
    pub fn campaign_id(&self) -> &str {
        &self.campaign_id
    }

    /// Start of the validity period (inclusive).
    pub fn start_date(&self) -> DateTime<Utc> {
        self.validity.start
    }

    /// End of the validity period (exclusive).
    pub fn expiry_date(&self) -> DateTime<Utc> {
        self.validity.expiry
    }

    /// Validity period.
    pub fn validity(&self) -> &ValidityPeriod {
        &self.validity
    }

    /// Regions, unique by identifier.
    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    /// Region with the given area id.
    pub fn region(&self, area_id: &str) -> Option<&Region> {
        self.regions.iter().find(|r| r.identifier() == area_id)
    }

    /// Delivery window, if any.
    pub fn delivery_window(&self) -> Option<&DeliveryTimeWindow> {
        self.delivery_window.as_ref()
    }

    /// Current campaign state.
    pub fn campaign_state(&self) -> CampaignState {
        self.campaign_state
    }

    /// Apply a state decided by the campaign state machine.
    pub fn set_campaign_state(&mut self, state: CampaignState) {
        self.campaign_state = state;
    }

    /// Notification content.
    pub fn content(&self) -> &SilentData {
        &self.content
    }

    /// The push payload this campaign was built from.
    pub fn payload(&self) -> &Value {
        &self.payload
    }

    /// The `internalData` section of the payload.
    pub fn internal_data(&self) -> Value {
        self.payload
            .get("internalData")
            .cloned()
            .unwrap_or(Value::Null)
    }

    /// Whether the campaign references `area_id`.
    pub fn references_area(&self, area_id: &str) -> bool {
        self.region(area_id).is_some()
    }

    /// Whether any region is live for `event_type`.
    pub fn is_live(&self, event_type: EventType, now: DateTime<Utc>) -> bool {
        self.regions
            .iter()
            .any(|r| r.is_live(event_type, &self.validity, now))
    }

    /// Whether the region `area_id` is live for `event_type`.
    pub fn is_live_in_region(&self, area_id: &str, event_type: EventType, now: DateTime<Utc>) -> bool {
        self.region(area_id)
            .is_some_and(|r| r.is_live(event_type, &self.validity, now))
    }

    /// Delivery window gate. Exits are never gated.
    pub fn is_now_appropriate_time_for(&self, event_type: EventType, local_now: NaiveDateTime) -> bool {
        match event_type {
            EventType::Exit => true,
            EventType::Entry => self
                .delivery_window
                .as_ref()
                .map_or(true, |w| w.is_appropriate_at(local_now)),
        }
    }

    /// Record an occurrence of `event_type` in `area_id`.
    ///
    /// Returns false when the campaign has no such region or event.
    pub fn trigger_event(&mut self, area_id: &str, event_type: EventType, now: DateTime<Utc>) -> bool {
        self.regions
            .iter_mut()
            .find(|r| r.identifier() == area_id)
            .is_some_and(|r| r.trigger_event(event_type, now))
    }

    /// Whether the validity period has ended.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.validity.expiry
    }

    /// Message representation sent alongside event reports.
    pub fn geo_event_report_format(&self) -> GeoMessageReport {
        GeoMessageReport {
            message_id: self.message_id.clone(),
            title: self.content.title.clone(),
            body: self.content.body.clone(),
            alert: self.content.body.clone(),
            silent: true,
            sound: self.content.sound.clone(),
            badge: None,
            vibrate: None,
            internal_data: self.internal_data(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate, TimeZone};
    use serde_json::json;

    const ZAGREB_ID: &str = "6713245DA3638FDECFE448C550AD7681";
    const PULA_ID: &str = "A277A2A0D0612AFB652E9D2D80E02BF2";

    fn zagreb_region() -> Value {
        json!({
            "id": ZAGREB_ID,
            "latitude": 45.80869126677998,
            "longitude": 15.97206115722656,
            "radiusInMeters": 9492.0,
            "title": "Zagreb"
        })
    }

    fn pula_region() -> Value {
        json!({
            "id": PULA_ID,
            "latitude": 44.86803631018752,
            "longitude": 13.84586334228516,
            "radiusInMeters": 5257.0,
            "title": "Pula"
        })
    }

    fn payload_with(internal: Value) -> Value {
        let mut data = json!({
            "campaignId": "campaign 1",
            "startTime": "2016-08-05T12:20:16+03:00",
            "expiryTime": "2016-08-06T12:20:16+03:00",
            "silent": { "title": "zagreb title", "body": "zagreb body", "sound": "default" },
            "geo": [zagreb_region(), pula_region()],
            "messageType": "geo"
        });
        if let (Some(base), Some(extra)) = (data.as_object_mut(), internal.as_object()) {
            for (k, v) in extra {
                base.insert(k.clone(), v.clone());
            }
        }
        json!({ "messageId": "m1", "aps": { "content-available": 1 }, "internalData": data })
    }

    fn inside() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2016, 8, 5, 12, 0, 0).unwrap()
    }

    fn sunday(hour: u32, minute: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2016, 10, 9)
            .unwrap()
            .and_hms_opt(hour, minute, 0)
            .unwrap()
    }

    // ===========================================
    // Payload Parsing Tests
    // ===========================================

    #[test]
    fn parses_campaign_payload() {
        let message = GeoCampaignMessage::from_payload(&payload_with(json!({}))).unwrap();
        assert_eq!(message.message_id(), "m1");
        assert_eq!(message.campaign_id(), "campaign 1");
        assert_eq!(message.regions().len(), 2);
        assert_eq!(
            message.start_date(),
            Utc.with_ymd_and_hms(2016, 8, 5, 9, 20, 16).unwrap()
        );
        assert_eq!(
            message.expiry_date(),
            Utc.with_ymd_and_hms(2016, 8, 6, 9, 20, 16).unwrap()
        );
        assert_eq!(message.campaign_state(), CampaignState::Active);
        assert_eq!(message.content().body.as_deref(), Some("zagreb body"));
    }

    #[test]
    fn malformed_event_only_drops_that_event() {
        let payload = payload_with(json!({
            "event": [
                { "type": "entry", "limit": -1 },
                { "type": "exit", "limit": 2, "timeoutInMinutes": 5 }
            ]
        }));

        let message = GeoCampaignMessage::from_payload(&payload).unwrap();
        let region = message.region(ZAGREB_ID).unwrap();
        assert_eq!(region.events().len(), 1);
        assert_eq!(region.events()[0].event_type(), EventType::Exit);
        assert_eq!(region.events()[0].limit(), 2);
    }

    #[test]
    fn missing_start_defaults_to_reference_date() {
        let mut payload = payload_with(json!({}));
        payload["internalData"]
            .as_object_mut()
            .unwrap()
            .remove("startTime");

        let message = GeoCampaignMessage::from_payload(&payload).unwrap();
        assert_eq!(message.start_date(), reference_date());
        assert!(message.is_live(EventType::Entry, inside()));
    }

    #[test]
    fn missing_expiry_defaults_to_distant_future() {
        let mut payload = payload_with(json!({}));
        payload["internalData"]
            .as_object_mut()
            .unwrap()
            .remove("expiryTime");

        let message = GeoCampaignMessage::from_payload(&payload).unwrap();
        assert_eq!(message.expiry_date(), distant_future());
    }

    #[test]
    fn missing_campaign_id_falls_back_to_message_id() {
        let mut payload = payload_with(json!({}));
        payload["internalData"]
            .as_object_mut()
            .unwrap()
            .remove("campaignId");

        let message = GeoCampaignMessage::from_payload(&payload).unwrap();
        assert_eq!(message.campaign_id(), "m1");
    }

    #[test]
    fn rejects_malformed_payloads() {
        let bad = [
            json!({ "messageId": "m1" }),
            payload_with(json!({ "geo": [] })),
            payload_with(json!({ "startTime": "not a date" })),
            payload_with(json!({ "messageType": "chat" })),
            payload_with(json!({ "geo": [{ "id": "r", "latitude": 1.0, "longitude": 1.0, "radiusInMeters": 0.0, "title": "t" }] })),
            payload_with(json!({ "geo": [{ "id": "r", "longitude": 1.0, "radiusInMeters": 10.0, "title": "t" }] })),
            payload_with(json!({ "deliveryTime": { "timeInterval": "noon" } })),
        ];
        for payload in bad {
            assert!(GeoCampaignMessage::from_payload(&payload).is_none(), "{payload}");
        }
    }

    #[test]
    fn duplicate_region_ids_keep_first() {
        let message = GeoCampaignMessage::from_payload(&payload_with(json!({
            "geo": [zagreb_region(), zagreb_region(), pula_region()]
        })))
        .unwrap();
        assert_eq!(message.regions().len(), 2);
    }

    #[test]
    fn campaign_events_reach_every_region() {
        let message = GeoCampaignMessage::from_payload(&payload_with(json!({
            "event": [
                { "type": "entry", "limit": 2, "timeoutInMinutes": 1 },
                { "type": "exit", "limit": 0 }
            ]
        })))
        .unwrap();
        for region in message.regions() {
            assert_eq!(region.events().len(), 2);
        }
    }

    // ===========================================
    // Liveness Tests
    // ===========================================

    #[test]
    fn default_events_entry_live_exit_not() {
        let message = GeoCampaignMessage::from_payload(&payload_with(json!({}))).unwrap();
        assert!(message.is_live(EventType::Entry, inside()));
        assert!(!message.is_live(EventType::Exit, inside()));
    }

    #[test]
    fn not_live_outside_validity_period() {
        let message = GeoCampaignMessage::from_payload(&payload_with(json!({}))).unwrap();
        assert!(!message.is_live(EventType::Entry, inside() - Duration::days(2)));
        assert!(!message.is_live(EventType::Entry, message.expiry_date()));
        assert!(message.is_expired(message.expiry_date()));
    }

    #[test]
    fn triggered_entry_consumes_single_region() {
        let mut message = GeoCampaignMessage::from_payload(&payload_with(json!({}))).unwrap();
        assert!(message.trigger_event(ZAGREB_ID, EventType::Entry, inside()));

        assert!(!message.is_live_in_region(ZAGREB_ID, EventType::Entry, inside()));
        assert!(message.is_live_in_region(PULA_ID, EventType::Entry, inside()));
    }

    #[test]
    fn cooldown_restores_liveness() {
        let mut message = GeoCampaignMessage::from_payload(&payload_with(json!({
            "event": [{ "type": "entry", "limit": 2, "timeoutInMinutes": 1 }]
        })))
        .unwrap();
        message.trigger_event(PULA_ID, EventType::Entry, inside());

        assert!(!message.is_live_in_region(PULA_ID, EventType::Entry, inside()));
        assert!(message.is_live_in_region(PULA_ID, EventType::Entry, inside() + Duration::minutes(1)));
    }

    #[test]
    fn unknown_region_is_not_live() {
        let mut message = GeoCampaignMessage::from_payload(&payload_with(json!({}))).unwrap();
        assert!(!message.is_live_in_region("nowhere", EventType::Entry, inside()));
        assert!(!message.trigger_event("nowhere", EventType::Entry, inside()));
    }

    // ===========================================
    // Delivery Window Tests
    // ===========================================

    #[test]
    fn no_window_is_always_appropriate() {
        let message = GeoCampaignMessage::from_payload(&payload_with(json!({}))).unwrap();
        assert!(message.is_now_appropriate_time_for(EventType::Entry, sunday(12, 20)));
        assert!(message.is_now_appropriate_time_for(EventType::Exit, sunday(12, 20)));
    }

    #[test]
    fn window_gates_entry_but_not_exit() {
        let message = GeoCampaignMessage::from_payload(&payload_with(json!({
            "deliveryTime": { "days": "1", "timeInterval": "0000/0100" }
        })))
        .unwrap();
        assert!(!message.is_now_appropriate_time_for(EventType::Entry, sunday(12, 20)));
        assert!(message.is_now_appropriate_time_for(EventType::Exit, sunday(12, 20)));
    }

    #[test]
    fn window_allows_matching_day_and_time() {
        let message = GeoCampaignMessage::from_payload(&payload_with(json!({
            "deliveryTime": { "days": "4,7", "timeInterval": "1200/1230" }
        })))
        .unwrap();
        assert!(message.is_now_appropriate_time_for(EventType::Entry, sunday(12, 20)));
    }

    // ===========================================
    // Record / Report Format Tests
    // ===========================================

    #[test]
    fn record_roundtrip_keeps_counters_and_state() {
        let mut message = GeoCampaignMessage::from_payload(&payload_with(json!({}))).unwrap();
        message.trigger_event(ZAGREB_ID, EventType::Entry, inside());
        message.set_campaign_state(CampaignState::Suspended);

        let restored = GeoCampaignMessage::from_record(&message.to_record()).unwrap();
        assert_eq!(restored.campaign_state(), CampaignState::Suspended);
        assert_eq!(
            restored.region(ZAGREB_ID).unwrap().events()[0].occurrence_count(),
            1
        );
        assert!(!restored.is_live_in_region(ZAGREB_ID, EventType::Entry, inside()));
    }

    #[test]
    fn report_format_is_silent_without_title() {
        let mut payload = payload_with(json!({}));
        payload["internalData"]["silent"]
            .as_object_mut()
            .unwrap()
            .remove("title");
        let message = GeoCampaignMessage::from_payload(&payload).unwrap();

        let report = message.geo_event_report_format();
        assert_eq!(report.message_id, "m1");
        assert_eq!(report.body.as_deref(), Some("zagreb body"));
        assert_eq!(report.alert.as_deref(), Some("zagreb body"));
        assert!(report.silent);
        assert!(report.title.is_none());
        assert_eq!(report.internal_data["campaignId"], "campaign 1");
    }
}
