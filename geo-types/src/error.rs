//! Error types for geocast wire data.

use thiserror::Error;

/// Errors raised while decoding geocast wire data.
#[derive(Debug, Error)]
pub enum GeoError {
    /// JSON (de)serialization failed
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Timestamp is not ISO-8601
    #[error("invalid date: {0}")]
    InvalidDate(String),

    /// Weekday list is not a comma separated list of 1..=7
    #[error("invalid weekday list: {0}")]
    InvalidDays(String),

    /// Time interval is not `HHMM/HHMM`
    #[error("invalid time interval: {0}")]
    InvalidTimeInterval(String),

    /// Payload is structurally valid JSON but not a usable campaign
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
}
