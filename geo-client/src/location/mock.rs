//! Mock location monitor for testing.

use super::{CapabilityStatus, LocationMonitor};
use geocast_core::{Coordinate, MonitoredArea};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

/// Mock location monitor for testing.
///
/// Tracks the registered areas and counts registration calls.
#[derive(Debug)]
pub struct MockLocationMonitor {
    inner: Arc<Mutex<MockLocationMonitorInner>>,
}

#[derive(Debug)]
struct MockLocationMonitorInner {
    status: CapabilityStatus,
    location: Option<Coordinate>,
    distance_filter: Option<f64>,
    monitored: BTreeMap<String, MonitoredArea>,
    start_calls: usize,
    stop_calls: usize,
}

impl Default for MockLocationMonitor {
    fn default() -> Self {
        Self::with_status(CapabilityStatus::Authorized)
    }
}

impl MockLocationMonitor {
    /// Create an authorized mock monitor without a location fix.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a mock monitor with the given permission state.
    pub fn with_status(status: CapabilityStatus) -> Self {
        Self {
            inner: Arc::new(Mutex::new(MockLocationMonitorInner {
                status,
                location: None,
                distance_filter: None,
                monitored: BTreeMap::new(),
                start_calls: 0,
                stop_calls: 0,
            })),
        }
    }

    /// Change the permission state.
    pub fn set_status(&self, status: CapabilityStatus) {
        let mut inner = self.inner.lock().unwrap();
        inner.status = status;
    }

    /// Set the reported device location.
    pub fn set_location(&self, location: Option<Coordinate>) {
        let mut inner = self.inner.lock().unwrap();
        inner.location = location;
    }

    /// Distance filter set by the service, if any.
    pub fn distance_filter(&self) -> Option<f64> {
        self.inner.lock().unwrap().distance_filter
    }

    /// Ids of the currently registered areas, sorted.
    pub fn monitored_ids(&self) -> Vec<String> {
        let inner = self.inner.lock().unwrap();
        inner.monitored.keys().cloned().collect()
    }

    /// The registered area with the given id.
    pub fn monitored_area(&self, area_id: &str) -> Option<MonitoredArea> {
        let inner = self.inner.lock().unwrap();
        inner.monitored.get(area_id).cloned()
    }

    /// Number of `start_monitoring` calls so far.
    pub fn start_calls(&self) -> usize {
        self.inner.lock().unwrap().start_calls
    }

    /// Number of `stop_monitoring` calls so far.
    pub fn stop_calls(&self) -> usize {
        self.inner.lock().unwrap().stop_calls
    }
}

impl Clone for MockLocationMonitor {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl LocationMonitor for MockLocationMonitor {
    fn authorization_status(&self) -> CapabilityStatus {
        self.inner.lock().unwrap().status
    }

    fn set_distance_filter(&self, meters: f64) {
        self.inner.lock().unwrap().distance_filter = Some(meters);
    }

    fn start_monitoring(&self, area: &MonitoredArea) {
        let mut inner = self.inner.lock().unwrap();
        inner.start_calls += 1;
        inner.monitored.insert(area.id.clone(), area.clone());
    }

    fn stop_monitoring(&self, area_id: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.stop_calls += 1;
        inner.monitored.remove(area_id);
    }

    fn current_location(&self) -> Option<Coordinate> {
        self.inner.lock().unwrap().location
    }
}
