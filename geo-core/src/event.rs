//! Region event occurrence accounting.
//!
//! A [`RegionEvent`] counts how often one event type fired inside one region
//! and when it last fired. Validity is re-derived on every call from the
//! limit, the cooldown and the caller-supplied `now`; nothing is cached.

use chrono::{DateTime, Duration, Utc};
use geocast_types::{EventRecord, EventType};

/// Occurrence tracking for one event type within one region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionEvent {
    event_type: EventType,
    limit: u32,
    timeout_minutes: u32,
    occurrence_count: u32,
    last_occurrence: Option<DateTime<Utc>>,
}

impl RegionEvent {
    /// Create an event that has never occurred.
    ///
    /// A `limit` of 0 means unlimited.
    pub fn new(event_type: EventType, limit: u32, timeout_minutes: u32) -> Self {
        Self {
            event_type,
            limit,
            timeout_minutes,
            occurrence_count: 0,
            last_occurrence: None,
        }
    }

    /// The event used when a campaign defines none: one entry, no cooldown.
    pub fn default_entry() -> Self {
        Self::new(EventType::Entry, 1, 0)
    }

    /// Event direction.
    pub fn event_type(&self) -> EventType {
        self.event_type
    }

    /// Maximum occurrences (0 = unlimited).
    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Cooldown after each occurrence.
    pub fn timeout_minutes(&self) -> u32 {
        self.timeout_minutes
    }

    /// Number of times the event fired.
    pub fn occurrence_count(&self) -> u32 {
        self.occurrence_count
    }

    /// When the event last fired.
    pub fn last_occurrence(&self) -> Option<DateTime<Utc>> {
        self.last_occurrence
    }

    /// Whether the event may fire at `now`.
    ///
    /// The limit is a lifetime cap: once reached, no amount of elapsed time
    /// makes the event valid again.
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        let under_limit = self.limit == 0 || self.occurrence_count < self.limit;
        let cooled_down = match self.last_occurrence {
            None => true,
            Some(last) => last
                .checked_add_signed(Duration::minutes(i64::from(self.timeout_minutes)))
                .is_some_and(|ready_at| now >= ready_at),
        };
        under_limit && cooled_down
    }

    /// Record one occurrence at `now`.
    pub fn occur(&mut self, now: DateTime<Utc>) {
        self.occurrence_count = self.occurrence_count.saturating_add(1);
        self.last_occurrence = Some(now);
    }

    /// Build from a flat record. Unknown types and missing limits yield `None`.
    pub fn from_record(record: &EventRecord) -> Option<Self> {
        let event_type = EventType::parse(&record.event_type)?;
        let limit = record.limit?;
        Some(Self {
            event_type,
            limit,
            timeout_minutes: record.timeout_in_minutes.unwrap_or(0),
            occurrence_count: record.rate.unwrap_or(0),
            last_occurrence: record.last_occur,
        })
    }

    /// Flat record including counters.
    pub fn to_record(&self) -> EventRecord {
        EventRecord {
            event_type: self.event_type.as_str().to_string(),
            limit: Some(self.limit),
            timeout_in_minutes: Some(self.timeout_minutes),
            rate: Some(self.occurrence_count),
            last_occur: self.last_occurrence,
        }
    }
}
