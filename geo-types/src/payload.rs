//! Inbound push payload and flat persisted records.
//!
//! The same record types serve the push payload (`internalData.geo`,
//! `internalData.event`) and the local store, which adds occurrence
//! counters (`rate`, `lastOccur`) and, for documents written by older
//! releases, per-region dates including the millisecond `expiry` field.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::GeoError;

/// `internalData.messageType` value marking a geo campaign.
pub const GEO_MESSAGE_TYPE: &str = "geo";

/// 4001-01-01T00:00:00Z as Unix seconds.
const DISTANT_FUTURE_SECS: i64 = 64_092_211_200;

/// Expiry used when a payload carries none.
pub fn distant_future() -> DateTime<Utc> {
    DateTime::from_timestamp(DISTANT_FUTURE_SECS, 0).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// 2001-01-01T00:00:00Z as Unix seconds.
const REFERENCE_DATE_SECS: i64 = 978_307_200;

/// Start date used when a payload carries none.
pub fn reference_date() -> DateTime<Utc> {
    DateTime::from_timestamp(REFERENCE_DATE_SECS, 0).unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Parse an ISO-8601 timestamp with second precision.
///
/// Accepts both `+03:00` and `+0300` offset forms.
pub fn parse_date(s: &str) -> Result<DateTime<Utc>, GeoError> {
    DateTime::parse_from_rfc3339(s)
        .or_else(|_| DateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%z"))
        .map(|d| d.with_timezone(&Utc))
        .map_err(|_| GeoError::InvalidDate(s.to_string()))
}

/// Format a timestamp the way the wire expects it.
pub fn format_date(date: &DateTime<Utc>) -> String {
    date.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// A push notification payload that may carry a geo campaign.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeoPushPayload {
    /// Message identifier assigned by the server.
    pub message_id: String,
    /// Platform notification dictionary, opaque here.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub aps: Value,
    /// Campaign data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub internal_data: Option<InternalData>,
}

/// The `internalData` section of a push payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InternalData {
    /// Campaign identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub campaign_id: Option<String>,
    /// Campaign start (ISO-8601).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<String>,
    /// Campaign expiry (ISO-8601).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry_time: Option<String>,
    /// Notification content shown when an entry event fires.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub silent: Option<SilentData>,
    /// Region definitions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geo: Option<Vec<RegionRecord>>,
    /// Event definitions shared by every region of the campaign.
    #[serde(
        default,
        deserialize_with = "skip_invalid_events",
        skip_serializing_if = "Option::is_none"
    )]
    pub event: Option<Vec<EventRecord>>,
    /// Allowed delivery days and hours for entry notifications.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivery_time: Option<DeliveryTimeRecord>,
    /// Message type discriminator.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_type: Option<String>,
}

/// Notification content of a geo campaign.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SilentData {
    /// Notification title.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Notification body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    /// Notification sound name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sound: Option<String>,
}

/// Flat representation of a region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegionRecord {
    /// Geo area identifier.
    pub id: String,
    /// Centre latitude in degrees.
    pub latitude: f64,
    /// Centre longitude in degrees.
    pub longitude: f64,
    /// Radius in meters.
    pub radius_in_meters: f64,
    /// Display title.
    pub title: String,
    /// Per-region events with counters (persisted form only).
    #[serde(
        default,
        deserialize_with = "skip_invalid_events",
        skip_serializing_if = "Option::is_none"
    )]
    pub event: Option<Vec<EventRecord>>,
    /// Legacy per-region start (ISO-8601).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<String>,
    /// Legacy per-region expiry (ISO-8601).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry_time: Option<String>,
    /// Legacy per-region expiry in milliseconds since the Unix epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry: Option<f64>,
}

/// Flat representation of a region event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRecord {
    /// `"entry"` or `"exit"`.
    #[serde(rename = "type")]
    pub event_type: String,
    /// Maximum occurrences, 0 for unlimited.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    /// Cooldown between occurrences.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_in_minutes: Option<u32>,
    /// Occurrences so far.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate: Option<u32>,
    /// Last occurrence.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_occur: Option<DateTime<Utc>>,
}

/// Decode an event list, dropping entries that do not decode on their own.
fn skip_invalid_events<'de, D>(deserializer: D) -> Result<Option<Vec<EventRecord>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<Vec<Value>> = Option::deserialize(deserializer)?;
    Ok(raw.map(|events| {
        events
            .into_iter()
            .filter_map(|event| serde_json::from_value(event).ok())
            .collect()
    }))
}

/// Delivery window as sent by the server.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryTimeRecord {
    /// Comma separated ISO weekday numbers, 1 = Monday.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub days: Option<String>,
    /// `HHMM/HHMM` local time interval.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_interval: Option<String>,
}
