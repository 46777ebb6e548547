//! # geocast-client
//!
//! Runtime for geofenced push campaigns.
//!
//! Applications hand geo campaign pushes to a [`GeofencingService`], forward
//! the platform's region callbacks to it, and receive [`GeoEvent`]s for the
//! notifications to show. Fired events are reported to the campaign backend;
//! reports made while offline are kept and reconciled on the next sync.
//!
//! ## Features
//!
//! - **Single worker**: every state change is ordered through one queue
//! - **Offline reconciliation**: provisional message ids are replaced once confirmed
//! - **Pluggable seams**: reporting endpoint, location monitor and store are traits with mocks
//! - **Pure decisions**: liveness, windows and state transitions live in geocast-core
//!
//! ## Example
//!
//! ```ignore
//! use geocast_client::{GeoConfig, GeofencingService, JsonFileStore, ServiceDeps};
//!
//! let config = GeoConfig::from_file("geocast.toml".as_ref())?;
//! let store = JsonFileStore::open(&config.storage.path).await?;
//! let deps = ServiceDeps::new(api, location, Arc::new(store));
//! let service = GeofencingService::start(config, deps).await?;
//!
//! service.add_message(payload).await?;
//! let outcomes = service.region_event(EventType::Entry, "area-1").await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod api;
mod cleanup;
pub mod config;
pub mod location;
pub mod reconciler;
pub mod service;
pub mod store;

pub use api::{ApiError, MockReportingApi, ReportingApi};
pub use config::{
    CleanupConfig, ConfigError, DeliveryConfig, GeoConfig, MonitoringConfig, ReportingConfig,
    StorageConfig,
};
pub use location::{CapabilityStatus, LocationMonitor, MockLocationMonitor};
pub use reconciler::OfflineReportReconciler;
pub use service::{
    Clock, EventOutcome, GeoEvent, GeofencingService, ReportStatus, ServiceDeps, ServiceError,
    ServiceSnapshot, SyncSummary,
};
pub use store::{CampaignStore, JsonFileStore, MemoryStore, StoreError};
