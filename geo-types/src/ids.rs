//! Identity types for geocast.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A message identifier generated on the device.
///
/// UUID v4 format. Used as the provisional id of a virtual message and as
/// the per-report id sent to the reporting endpoint, until the server maps
/// it to a confirmed message id.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SdkMessageId(uuid::Uuid);

impl SdkMessageId {
    /// Create a new random SdkMessageId.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// Parse from the string form. Returns `None` for non-UUID strings.
    pub fn parse(s: &str) -> Option<Self> {
        uuid::Uuid::parse_str(s).ok().map(Self)
    }

    /// Get the inner UUID.
    pub fn as_uuid(&self) -> &uuid::Uuid {
        &self.0
    }
}

impl Default for SdkMessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SdkMessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for SdkMessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SdkMessageId({})", self.0)
    }
}

/// Check whether a message id was generated on the device.
///
/// Server-issued ids are never UUIDs, so any UUID-shaped id is provisional.
pub fn is_sdk_generated(message_id: &str) -> bool {
    SdkMessageId::parse(message_id).is_some()
}
