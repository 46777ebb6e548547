//! Reporting endpoint bodies.
//!
//! A report batch carries one entry per fired event and, alongside, the
//! full representation of every campaign message referenced by the batch
//! so the server can materialise the matching virtual messages.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::{EventType, SdkMessageId};

/// Registration id reported when the device has no push registration yet.
pub const NO_REGISTRATION: &str = "n/a";

/// Geo event report request body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeoEventReportRequest {
    /// Platform identifier, e.g. `APNS`.
    pub platform_type: String,
    /// Push registration id, or [`NO_REGISTRATION`].
    pub device_application_instance_id: String,
    /// One entry per fired event.
    pub reports: Vec<GeoEventReport>,
    /// Campaign messages referenced by `reports`, deduplicated.
    pub messages: Vec<GeoMessageReport>,
}

/// A single fired event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeoEventReport {
    /// Campaign identifier.
    pub campaign_id: String,
    /// Region identifier.
    pub geo_area_id: String,
    /// Event direction.
    pub event: EventType,
    /// Message id of the campaign push.
    pub message_id: String,
    /// Device-generated id for this event's message.
    pub sdk_message_id: SdkMessageId,
    /// Milliseconds between the event and the submission.
    pub timestamp_delta: i64,
}

/// Campaign message as the reporting endpoint expects it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeoMessageReport {
    /// Message id of the campaign push.
    pub message_id: String,
    /// Notification title.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Notification body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    /// Alert text, mirrors the body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alert: Option<String>,
    /// Geo campaign pushes are always silent.
    pub silent: bool,
    /// Notification sound.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sound: Option<String>,
    /// Badge number.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub badge: Option<i64>,
    /// Vibration flag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vibrate: Option<bool>,
    /// The original `internalData` section.
    pub internal_data: Value,
}

/// Geo event report response body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeoEventReportResponse {
    /// Campaigns the server has finished.
    #[serde(default)]
    pub finished_campaign_ids: Vec<String>,
    /// Campaigns the server has paused.
    #[serde(default)]
    pub suspended_campaign_ids: Vec<String>,
    /// Device-generated message id to server message id.
    #[serde(default, rename = "messageIds")]
    pub message_ids: BTreeMap<String, String>,
}

/// Seen status request body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeenStatusRequest {
    /// Messages marked as seen.
    pub messages: Vec<SeenEntry>,
}

/// One seen message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeenEntry {
    /// Confirmed message id.
    pub message_id: String,
    /// Milliseconds between seen and submission.
    pub timestamp_delta: i64,
}
