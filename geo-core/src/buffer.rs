//! Pending report buffer for geocast.
//!
//! This module provides a queue for unreported geo events with:
//! - FIFO ordering by creation time
//! - In-flight tracking (reports submitted but not yet confirmed)
//! - Max size limits to prevent unbounded memory growth
//!
//! The buffer is used by geocast-client to batch report submissions.
//! Reports are enqueued when an event fires, dequeued in batches for
//! submission, and remain "in flight" until the server confirms receipt.
//! A failed submission puts the whole batch back, in its original order.

use chrono::{DateTime, Utc};
use geocast_types::{EventType, GeoEventReport, SdkMessageId};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use thiserror::Error;

/// Error type for buffer operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BufferError {
    /// Buffer is at capacity.
    #[error("report buffer full (capacity: {capacity})")]
    Full {
        /// Current buffer capacity.
        capacity: usize,
    },
}

/// A fired event waiting for server confirmation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingReport {
    /// Device-generated id for the event's message.
    pub provisional_message_id: SdkMessageId,
    /// Campaign the event belongs to.
    pub campaign_id: String,
    /// Region the event happened in.
    pub geo_area_id: String,
    /// Event direction.
    pub event_type: EventType,
    /// Message id of the campaign push.
    pub campaign_message_id: String,
    /// When the event fired.
    pub timestamp: DateTime<Utc>,
}

impl PendingReport {
    /// Create a report with a fresh provisional id.
    pub fn new(
        campaign_id: impl Into<String>,
        geo_area_id: impl Into<String>,
        event_type: EventType,
        campaign_message_id: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            provisional_message_id: SdkMessageId::new(),
            campaign_id: campaign_id.into(),
            geo_area_id: geo_area_id.into(),
            event_type,
            campaign_message_id: campaign_message_id.into(),
            timestamp,
        }
    }

    /// Wire form, with the delay measured up to `now`.
    pub fn to_report(&self, now: DateTime<Utc>) -> GeoEventReport {
        GeoEventReport {
            campaign_id: self.campaign_id.clone(),
            geo_area_id: self.geo_area_id.clone(),
            event: self.event_type,
            message_id: self.campaign_message_id.clone(),
            sdk_message_id: self.provisional_message_id,
            timestamp_delta: (now - self.timestamp).num_milliseconds().max(0),
        }
    }
}

/// Report buffer with in-flight tracking.
///
/// Reports flow through the buffer in this order:
/// 1. `enqueue()` - add to the queue
/// 2. `dequeue_batch()` - remove from queue, move to in-flight
/// 3. `ack()` - remove from in-flight (receipt confirmed)
///
/// If submission fails, call `nack()` to move the batch back to the front.
#[derive(Debug)]
pub struct ReportBuffer {
    /// Maximum number of reports (queued + in flight).
    max_size: usize,
    /// Reports waiting to be submitted.
    queue: VecDeque<PendingReport>,
    /// Reports submitted but not yet confirmed.
    in_flight: HashMap<SdkMessageId, PendingReport>,
}

impl ReportBuffer {
    /// Create a new buffer with the given maximum size.
    pub fn new(max_size: usize) -> Self {
        Self {
            max_size,
            queue: VecDeque::new(),
            in_flight: HashMap::new(),
        }
    }

    /// Create a buffer holding previously persisted reports, oldest first.
    ///
    /// Restored reports are never rejected for capacity.
    pub fn restore(max_size: usize, mut reports: Vec<PendingReport>) -> Self {
        reports.sort_by_key(|r| r.timestamp);
        Self {
            max_size,
            queue: reports.into(),
            in_flight: HashMap::new(),
        }
    }

    /// Fail if one more report would exceed `max_size`.
    pub fn check_capacity(&self) -> Result<(), BufferError> {
        if self.total_count() >= self.max_size {
            return Err(BufferError::Full {
                capacity: self.max_size,
            });
        }
        Ok(())
    }

    /// Add a report to the queue.
    ///
    /// Returns an error if the buffer is full (queued + in flight >= max_size).
    pub fn enqueue(&mut self, report: PendingReport) -> Result<(), BufferError> {
        self.check_capacity()?;
        self.queue.push_back(report);
        Ok(())
    }

    /// Remove up to `max` reports from the front of the queue.
    ///
    /// The reports move to the in-flight set until acknowledged.
    pub fn dequeue_batch(&mut self, max: usize) -> Vec<PendingReport> {
        let count = max.min(self.queue.len());
        let batch: Vec<PendingReport> = self.queue.drain(..count).collect();
        for report in &batch {
            self.in_flight
                .insert(report.provisional_message_id, report.clone());
        }
        batch
    }

    /// Confirm receipt of the given reports.
    pub fn ack(&mut self, ids: &[SdkMessageId]) {
        for id in ids {
            self.in_flight.remove(id);
        }
    }

    /// Negative acknowledge - move reports back to the front of the queue.
    ///
    /// Their relative order is restored by creation time.
    pub fn nack(&mut self, ids: &[SdkMessageId]) {
        let mut returned: Vec<PendingReport> =
            ids.iter().filter_map(|id| self.in_flight.remove(id)).collect();
        returned.sort_by_key(|r| r.timestamp);
        for report in returned.into_iter().rev() {
            self.queue.push_front(report);
        }
    }

    #[cfg(test)]
    fn is_in_flight(&self, id: &SdkMessageId) -> bool {
        self.in_flight.contains_key(id)
    }

    /// Ids of every report in the buffer, queued or in flight.
    pub fn all_ids(&self) -> Vec<SdkMessageId> {
        self.queue
            .iter()
            .map(|r| r.provisional_message_id)
            .chain(self.in_flight.keys().copied())
            .collect()
    }

    /// Number of reports in the queue (not including in flight).
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Check if the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    #[cfg(test)]
    fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    /// Total number of reports (queued + in flight).
    pub fn total_count(&self) -> usize {
        self.queue.len() + self.in_flight.len()
    }
}
