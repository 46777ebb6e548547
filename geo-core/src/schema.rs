//! Persisted store schema and migration from the legacy layout.
//!
//! Current documents carry `"version": 2`. Documents written by older
//! releases have no version and keep one flat record per campaign, with
//! dates on each region and expiry possibly only in milliseconds. Loading
//! always goes through [`load_document`], which migrates legacy documents.

use chrono::{DateTime, Utc};
use geocast_types::{
    distant_future, format_date, parse_date, reference_date, GeoError, RegionRecord, GEO_MESSAGE_TYPE,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::{CampaignState, MessageRecord, PendingReport};

/// Version written by this release.
pub const STORE_VERSION: u32 = 2;

/// Legacy `origin` value of campaigns created manually on the device.
const LEGACY_ORIGIN_MANUAL: u8 = 1;

/// A stored campaign: its push payload plus mutable state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignRecord {
    /// Push payload the campaign was built from.
    pub payload: Value,
    /// Regions with their event counters.
    pub regions: Vec<RegionRecord>,
    /// Server-driven state.
    #[serde(default)]
    pub campaign_state: CampaignState,
}

impl CampaignRecord {
    /// Message id of the stored payload.
    pub fn message_id(&self) -> Option<&str> {
        self.payload.get("messageId").and_then(Value::as_str)
    }
}

/// The whole persisted state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreDocument {
    /// Schema version.
    pub version: u32,
    /// Stored campaigns.
    #[serde(default)]
    pub campaigns: Vec<CampaignRecord>,
    /// Reports not yet confirmed by the server.
    #[serde(default)]
    pub pending_reports: Vec<PendingReport>,
    /// Message records.
    #[serde(default)]
    pub messages: Vec<MessageRecord>,
}

impl Default for StoreDocument {
    fn default() -> Self {
        Self {
            version: STORE_VERSION,
            campaigns: Vec::new(),
            pending_reports: Vec::new(),
            messages: Vec::new(),
        }
    }
}

/// Unversioned document written by older releases.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct LegacyDocument {
    /// Stored campaigns.
    #[serde(default)]
    pub campaigns: Vec<LegacyCampaign>,
}

/// A campaign in the legacy layout.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyCampaign {
    /// Message id, also used as campaign id.
    pub id: String,
    /// Notification title.
    #[serde(default)]
    pub title: Option<String>,
    /// Notification body.
    #[serde(default)]
    pub message: Option<String>,
    /// When the campaign was received.
    #[serde(default)]
    pub received_date: Option<String>,
    /// Regions with their own dates.
    #[serde(default)]
    pub regions: Vec<RegionRecord>,
    /// 0 for pushed campaigns, 1 for manual ones.
    #[serde(default)]
    pub origin: u8,
}

/// A document tagged with the schema it was written in.
#[derive(Debug, Clone, PartialEq)]
pub enum StoredSchema {
    /// Unversioned.
    Legacy(LegacyDocument),
    /// `version == 2`.
    Current(StoreDocument),
}

impl StoredSchema {
    /// Identify the schema of a raw document.
    pub fn detect(value: Value) -> Result<Self, GeoError> {
        match value.get("version").map(Value::as_u64) {
            None => Ok(Self::Legacy(serde_json::from_value(value)?)),
            Some(Some(v)) if v == u64::from(STORE_VERSION) => {
                Ok(Self::Current(serde_json::from_value(value)?))
            }
            Some(v) => Err(GeoError::InvalidPayload(format!(
                "unsupported store version {}",
                v.map_or_else(|| "?".to_string(), |v| v.to_string())
            ))),
        }
    }
}

/// Bring any supported schema to the current one.
pub fn migrate(schema: StoredSchema) -> StoreDocument {
    match schema {
        StoredSchema::Current(document) => document,
        StoredSchema::Legacy(legacy) => StoreDocument {
            campaigns: legacy
                .campaigns
                .iter()
                .filter_map(|campaign| match migrate_campaign(campaign) {
                    Ok(record) => record,
                    Err(e) => {
                        tracing::debug!("Dropping legacy campaign {}: {}", campaign.id, e);
                        None
                    }
                })
                .collect(),
            ..StoreDocument::default()
        },
    }
}

/// Detect and migrate a raw document.
pub fn load_document(value: Value) -> Result<StoreDocument, GeoError> {
    StoredSchema::detect(value).map(migrate)
}

fn migrate_campaign(campaign: &LegacyCampaign) -> Result<Option<CampaignRecord>, GeoError> {
    if campaign.origin == LEGACY_ORIGIN_MANUAL || campaign.regions.is_empty() {
        return Ok(None);
    }

    let mut start: Option<DateTime<Utc>> = None;
    let mut expiry: Option<DateTime<Utc>> = None;
    let mut regions = Vec::with_capacity(campaign.regions.len());
    for region in &campaign.regions {
        let (region_start, region_expiry) = legacy_region_dates(region)?;
        start = Some(start.map_or(region_start, |s| s.min(region_start)));
        expiry = Some(expiry.map_or(region_expiry, |e| e.max(region_expiry)));
        regions.push(RegionRecord {
            start_time: None,
            expiry_time: None,
            expiry: None,
            ..region.clone()
        });
    }
    let start = start.unwrap_or_else(reference_date);
    let expiry = expiry.unwrap_or_else(distant_future);

    let geo: Vec<Value> = regions
        .iter()
        .map(|r| {
            json!({
                "id": r.id,
                "latitude": r.latitude,
                "longitude": r.longitude,
                "radiusInMeters": r.radius_in_meters,
                "title": r.title,
            })
        })
        .collect();

    let payload = json!({
        "messageId": campaign.id,
        "internalData": {
            "campaignId": campaign.id,
            "startTime": format_date(&start),
            "expiryTime": format_date(&expiry),
            "silent": { "title": campaign.title, "body": campaign.message },
            "geo": geo,
            "messageType": GEO_MESSAGE_TYPE,
        }
    });

    Ok(Some(CampaignRecord {
        payload,
        regions,
        campaign_state: CampaignState::Active,
    }))
}

/// Region dates, preferring ISO strings over the millisecond expiry.
///
/// A region without any expiry, or with a non-positive millisecond
/// expiry, is invalid and takes its campaign down with it.
fn legacy_region_dates(region: &RegionRecord) -> Result<(DateTime<Utc>, DateTime<Utc>), GeoError> {
    let start = match region.start_time.as_deref() {
        Some(s) => parse_date(s)?,
        None => reference_date(),
    };
    let expiry = match (region.expiry_time.as_deref(), region.expiry) {
        (Some(s), _) => parse_date(s)?,
        (None, Some(ms)) if ms > 0.0 => DateTime::from_timestamp_millis(ms as i64)
            .ok_or_else(|| GeoError::InvalidDate(ms.to_string()))?,
        (None, Some(ms)) => return Err(GeoError::InvalidDate(ms.to_string())),
        (None, None) => {
            return Err(GeoError::InvalidPayload(format!(
                "region {} has no expiry",
                region.id
            )))
        }
    };
    Ok((start, expiry))
}
