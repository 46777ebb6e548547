//! # geocast-types
//!
//! Wire format types for the geocast geofencing campaign engine.
//!
//! This crate provides the foundational types used across all geocast crates:
//! - [`SdkMessageId`] - locally generated (provisional) message identifiers
//! - [`EventType`] - region entry/exit discriminator
//! - [`GeoPushPayload`], [`RegionRecord`], [`EventRecord`] - inbound payload
//!   and flat persisted records
//! - [`GeoEventReportRequest`], [`GeoEventReportResponse`] - reporting endpoint
//!   bodies
//! - [`GeoError`] - Error types

#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
mod event_type;
mod ids;
mod payload;
mod report;

pub use error::GeoError;
pub use event_type::EventType;
pub use ids::{is_sdk_generated, SdkMessageId};
pub use payload::{
    distant_future, format_date, parse_date, reference_date, DeliveryTimeRecord, EventRecord,
    GeoPushPayload, InternalData, RegionRecord, SilentData, GEO_MESSAGE_TYPE,
};
pub use report::{
    GeoEventReport, GeoEventReportRequest, GeoEventReportResponse, GeoMessageReport, SeenEntry,
    SeenStatusRequest, NO_REGISTRATION,
};
