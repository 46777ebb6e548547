//! Geofenced regions.
//!
//! A [`Region`] is a circle plus the events tracked inside it. Regions are
//! owned by their campaign message; the campaign's validity period is passed
//! in when liveness is evaluated rather than referenced from the region.

use chrono::{DateTime, Utc};
use geocast_types::{EventRecord, EventType, GeoError, RegionRecord};
use serde_json::{Map, Value};
use std::hash::{Hash, Hasher};

use crate::RegionEvent;

/// Smallest radius a region is monitored with.
pub const MIN_RADIUS_METERS: f64 = 100.0;

/// Mean Earth radius used for distance calculations.
const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// A point on the globe in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coordinate {
    /// Latitude in degrees.
    pub latitude: f64,
    /// Longitude in degrees.
    pub longitude: f64,
}

impl Coordinate {
    /// Create a coordinate.
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Great-circle distance in meters (haversine).
    pub fn distance_to(&self, other: &Coordinate) -> f64 {
        let lat1 = self.latitude.to_radians();
        let lat2 = other.latitude.to_radians();
        let d_lat = (other.latitude - self.latitude).to_radians();
        let d_lon = (other.longitude - self.longitude).to_radians();

        let a = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_METERS * a.sqrt().atan2((1.0 - a).sqrt())
    }
}

/// Campaign validity period: `start` inclusive, `expiry` exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidityPeriod {
    /// First instant the campaign is live.
    pub start: DateTime<Utc>,
    /// First instant the campaign is no longer live.
    pub expiry: DateTime<Utc>,
}

impl ValidityPeriod {
    /// Whether `now` falls inside the period.
    pub fn contains(&self, now: DateTime<Utc>) -> bool {
        self.start <= now && now < self.expiry
    }
}

/// A circular geofence with entry/exit event tracking.
///
/// Equality and hashing use the identifier only.
#[derive(Debug, Clone)]
pub struct Region {
    identifier: String,
    center: Coordinate,
    radius: f64,
    title: String,
    events: Vec<RegionEvent>,
}

impl Region {
    /// Create a region with the default events.
    ///
    /// Returns `None` for a non-positive radius. Radii below
    /// [`MIN_RADIUS_METERS`] are raised to it.
    pub fn new(
        identifier: impl Into<String>,
        center: Coordinate,
        radius: f64,
        title: impl Into<String>,
    ) -> Option<Self> {
        if radius.is_nan() || radius <= 0.0 {
            return None;
        }
        Some(Self {
            identifier: identifier.into(),
            center,
            radius: radius.max(MIN_RADIUS_METERS),
            title: title.into(),
            events: vec![RegionEvent::default_entry()],
        })
    }

    /// Replace the tracked events.
    pub fn with_events(mut self, events: Vec<RegionEvent>) -> Self {
        self.events = events;
        self
    }

    /// Stable, campaign-scoped identifier (the geo area id).
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Centre of the circle.
    pub fn center(&self) -> Coordinate {
        self.center
    }

    /// Radius in meters, already clamped.
    pub fn radius(&self) -> f64 {
        self.radius
    }

    /// Display title.
    pub fn title(&self) -> &str {
        &self.title
    }

    /// Tracked events, in definition order.
    pub fn events(&self) -> &[RegionEvent] {
        &self.events
    }

    /// First event of the given type.
    pub fn event(&self, event_type: EventType) -> Option<&RegionEvent> {
        self.events.iter().find(|e| e.event_type() == event_type)
    }

    /// Whether an event of `event_type` may fire here at `now`.
    ///
    /// False when no event of that type exists.
    pub fn is_live(&self, event_type: EventType, validity: &ValidityPeriod, now: DateTime<Utc>) -> bool {
        validity.contains(now)
            && self
                .events
                .iter()
                .any(|e| e.event_type() == event_type && e.is_valid(now))
    }

    /// Record an occurrence of `event_type`.
    ///
    /// Prefers the first currently valid event of that type, falling back to
    /// the first of that type. Returns false when the region tracks no such
    /// event.
    pub fn trigger_event(&mut self, event_type: EventType, now: DateTime<Utc>) -> bool {
        let index = self
            .events
            .iter()
            .position(|e| e.event_type() == event_type && e.is_valid(now))
            .or_else(|| self.events.iter().position(|e| e.event_type() == event_type));

        match index {
            Some(i) => {
                self.events[i].occur(now);
                true
            }
            None => false,
        }
    }

    /// Build from a flat record.
    ///
    /// Events come from the record itself when present (persisted form),
    /// otherwise from the campaign-level definitions, otherwise the default.
    pub fn from_record(
        record: &RegionRecord,
        campaign_events: Option<&[EventRecord]>,
    ) -> Result<Self, GeoError> {
        let region = Self::new(
            record.id.clone(),
            Coordinate::new(record.latitude, record.longitude),
            record.radius_in_meters,
            record.title.clone(),
        )
        .ok_or_else(|| {
            GeoError::InvalidPayload(format!(
                "region {} has non-positive radius {}",
                record.id, record.radius_in_meters
            ))
        })?;

        let definitions = record.event.as_deref().or(campaign_events);
        Ok(match definitions {
            Some(defs) => region.with_events(defs.iter().filter_map(RegionEvent::from_record).collect()),
            None => region,
        })
    }

    /// Flat record including event counters.
    pub fn to_record(&self) -> RegionRecord {
        RegionRecord {
            id: self.identifier.clone(),
            latitude: self.center.latitude,
            longitude: self.center.longitude,
            radius_in_meters: self.radius,
            title: self.title.clone(),
            event: Some(self.events.iter().map(RegionEvent::to_record).collect()),
            start_time: None,
            expiry_time: None,
            expiry: None,
        }
    }

    /// Flat key-value representation.
    pub fn to_dict(&self) -> Map<String, Value> {
        match serde_json::to_value(self.to_record()) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }

    /// Rebuild from [`Region::to_dict`] output. Malformed input yields `None`.
    pub fn from_dict(dict: &Map<String, Value>) -> Option<Self> {
        let record: RegionRecord = serde_json::from_value(Value::Object(dict.clone())).ok()?;
        Self::from_record(&record, None).ok()
    }
}

impl PartialEq for Region {
    fn eq(&self, other: &Self) -> bool {
        self.identifier == other.identifier
    }
}

impl Eq for Region {}

impl Hash for Region {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.identifier.hash(state);
    }
}
