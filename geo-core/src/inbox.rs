//! Locally visible message records.
//!
//! Geo campaign pushes are stored as silent records. Every fired entry event
//! adds a virtual message whose id is provisional until the reporting
//! endpoint maps it to a server id. Seen status for a provisional id is kept
//! locally and only reported once the id is confirmed.

use chrono::{DateTime, Utc};
use geocast_types::{is_sdk_generated, SdkMessageId, SeenEntry};
use serde::{Deserialize, Serialize};

use crate::GeoCampaignMessage;

/// Seen status of a message record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SeenStatus {
    /// Not opened by the user.
    #[default]
    NotSeen,
    /// Opened, not yet reported.
    SeenNotSent,
    /// Opened and reported.
    SeenSent,
}

/// Origin of a message record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageKind {
    /// A regular, user-visible message (virtual geo messages included).
    Default,
    /// A silent geo campaign push.
    Geo,
}

/// A message as the application sees it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRecord {
    /// Server id, or a provisional UUID for unconfirmed virtual messages.
    pub message_id: String,
    /// Campaign id for geo pushes, `None` for virtual messages.
    pub campaign_id: Option<String>,
    /// Record origin.
    pub kind: MessageKind,
    /// Whether the message is silent.
    pub is_silent: bool,
    /// Notification title.
    pub title: Option<String>,
    /// Notification body.
    pub body: Option<String>,
    /// Notification sound.
    pub sound: Option<String>,
    /// When the record was created.
    pub created_at: DateTime<Utc>,
    /// Seen status.
    pub seen_status: SeenStatus,
    /// When the user first saw the message.
    pub seen_date: Option<DateTime<Utc>>,
    /// Whether the message was reported as delivered.
    pub report_sent: bool,
}

impl MessageRecord {
    /// Silent record for a received geo campaign push.
    pub fn for_campaign(campaign: &GeoCampaignMessage, now: DateTime<Utc>) -> Self {
        Self {
            message_id: campaign.message_id().to_string(),
            campaign_id: Some(campaign.campaign_id().to_string()),
            kind: MessageKind::Geo,
            is_silent: true,
            title: campaign.content().title.clone(),
            body: campaign.content().body.clone(),
            sound: campaign.content().sound.clone(),
            created_at: now,
            seen_status: SeenStatus::NotSeen,
            seen_date: None,
            report_sent: false,
        }
    }

    /// Virtual message shown for a fired entry event.
    pub fn virtual_for(
        campaign: &GeoCampaignMessage,
        provisional_id: SdkMessageId,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            message_id: provisional_id.to_string(),
            campaign_id: None,
            kind: MessageKind::Default,
            is_silent: false,
            title: campaign.content().title.clone(),
            body: campaign.content().body.clone(),
            sound: campaign.content().sound.clone(),
            created_at: now,
            seen_status: SeenStatus::NotSeen,
            seen_date: None,
            report_sent: true,
        }
    }

    /// Whether the id is still device-generated.
    pub fn is_provisional(&self) -> bool {
        is_sdk_generated(&self.message_id)
    }

    /// Mark as seen at `now`. Returns false if it was already seen.
    pub fn mark_seen(&mut self, now: DateTime<Utc>) -> bool {
        if self.seen_status != SeenStatus::NotSeen {
            return false;
        }
        self.seen_status = SeenStatus::SeenNotSent;
        self.seen_date = Some(now);
        true
    }

    /// Whether a seen report should be sent now.
    pub fn needs_seen_report(&self) -> bool {
        self.seen_status == SeenStatus::SeenNotSent && !self.is_provisional()
    }

    /// Seen request entry, if one is due.
    pub fn seen_entry(&self, now: DateTime<Utc>) -> Option<SeenEntry> {
        if !self.needs_seen_report() {
            return None;
        }
        let seen_at = self.seen_date.unwrap_or(now);
        Some(SeenEntry {
            message_id: self.message_id.clone(),
            timestamp_delta: (now - seen_at).num_milliseconds().max(0),
        })
    }

    /// The seen report was accepted.
    pub fn confirm_seen(&mut self) {
        if self.seen_status == SeenStatus::SeenNotSent {
            self.seen_status = SeenStatus::SeenSent;
        }
    }
}
