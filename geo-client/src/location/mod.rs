//! Platform region monitoring abstraction.
//!
//! The host platform registers circular regions and reports entry and exit
//! through [`crate::GeofencingService::region_event`]. This trait is the
//! outbound half: which regions to watch and where the device is.

mod mock;

pub use mock::MockLocationMonitor;

use geocast_core::{Coordinate, MonitoredArea};

/// Location permission state reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapabilityStatus {
    /// The user has not been asked yet.
    NotDetermined,
    /// Background location is granted.
    Authorized,
    /// The user refused location access.
    Denied,
    /// The device cannot monitor regions.
    NotAvailable,
}

/// Outbound interface to the platform's region monitoring.
pub trait LocationMonitor: Send + Sync {
    /// Current permission state.
    fn authorization_status(&self) -> CapabilityStatus;

    /// Minimum movement in meters before the platform delivers a new
    /// location update.
    fn set_distance_filter(&self, meters: f64);

    /// Start watching `area`. Registering an id twice replaces it.
    fn start_monitoring(&self, area: &MonitoredArea);

    /// Stop watching the area with the given id.
    fn stop_monitoring(&self, area_id: &str);

    /// Last known device location, if any.
    fn current_location(&self) -> Option<Coordinate>;
}
