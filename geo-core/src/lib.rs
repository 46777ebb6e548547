//! # geocast-core
//!
//! Pure geofencing campaign logic (no I/O, instant tests).
//!
//! This crate decides whether a region entry/exit should fire a campaign
//! event, keeps the occurrence counters, evaluates delivery windows, drives
//! the server-controlled campaign state machine and plans the
//! reconciliation of provisional message ids.
//!
//! ## Design Philosophy
//!
//! All modules in this crate are **pure** - they take input and produce output
//! without side effects. The clock is never read: every time-dependent call
//! takes `now`. The actual I/O (reporting, persistence, platform region
//! monitoring) is performed by `geocast-client`, which interprets the
//! actions and plans produced here.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod buffer;
pub mod campaign;
pub mod event;
pub mod inbox;
pub mod message;
pub mod monitor;
pub mod reconcile;
pub mod region;
pub mod schema;
pub mod window;

pub use buffer::{BufferError, PendingReport, ReportBuffer};
pub use campaign::{CampaignAction, CampaignEvent, CampaignState};
pub use event::RegionEvent;
pub use inbox::{MessageKind, MessageRecord, SeenStatus};
pub use message::GeoCampaignMessage;
pub use monitor::{MonitorAction, MonitoredArea, RegionMonitor, DEFAULT_REGION_LIMIT};
pub use reconcile::{IdRewrite, ReconcilePlan};
pub use region::{Coordinate, Region, ValidityPeriod, MIN_RADIUS_METERS};
pub use schema::{
    load_document, migrate, CampaignRecord, LegacyCampaign, LegacyDocument, StoreDocument,
    StoredSchema, STORE_VERSION,
};
pub use window::{DeliveryTimeWindow, TimeInterval};
