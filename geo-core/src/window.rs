//! Delivery time windows for entry notifications.
//!
//! Days are ISO weekday numbers (1 = Monday, 7 = Sunday). The time interval
//! is `HHMM/HHMM` in local time, both ends inclusive at minute resolution;
//! an interval whose end is before its start wraps past midnight.

use chrono::{Datelike, NaiveDateTime, Timelike};
use geocast_types::{DeliveryTimeRecord, GeoError};
use std::collections::BTreeSet;

/// Local time-of-day interval, in minutes after midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeInterval {
    from: u32,
    to: u32,
}

impl TimeInterval {
    /// Parse `HHMM/HHMM`.
    pub fn parse(s: &str) -> Result<Self, GeoError> {
        let invalid = || GeoError::InvalidTimeInterval(s.to_string());
        let (from, to) = s.split_once('/').ok_or_else(invalid)?;
        Ok(Self {
            from: parse_hhmm(from).ok_or_else(invalid)?,
            to: parse_hhmm(to).ok_or_else(invalid)?,
        })
    }

    /// Whether the interval crosses midnight.
    pub fn wraps_midnight(&self) -> bool {
        self.from > self.to
    }

    /// Whether `minute_of_day` is inside the interval.
    pub fn contains(&self, minute_of_day: u32) -> bool {
        if self.wraps_midnight() {
            minute_of_day >= self.from || minute_of_day <= self.to
        } else {
            self.from <= minute_of_day && minute_of_day <= self.to
        }
    }
}

impl std::fmt::Display for TimeInterval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:02}{:02}/{:02}{:02}",
            self.from / 60,
            self.from % 60,
            self.to / 60,
            self.to % 60
        )
    }
}

fn parse_hhmm(s: &str) -> Option<u32> {
    if s.len() != 4 || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let hours: u32 = s[..2].parse().ok()?;
    let minutes: u32 = s[2..].parse().ok()?;
    (hours < 24 && minutes < 60).then_some(hours * 60 + minutes)
}

/// Allowed weekdays and hours for showing entry notifications.
///
/// An absent part does not constrain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryTimeWindow {
    days: Option<BTreeSet<u32>>,
    interval: Option<TimeInterval>,
}

impl DeliveryTimeWindow {
    /// Parse the wire strings. Empty strings count as absent.
    pub fn parse(days: Option<&str>, interval: Option<&str>) -> Result<Self, GeoError> {
        let days = match days.map(str::trim).filter(|d| !d.is_empty()) {
            None => None,
            Some(list) => Some(
                list.split(',')
                    .map(|token| {
                        token
                            .trim()
                            .parse::<u32>()
                            .ok()
                            .filter(|d| (1..=7).contains(d))
                            .ok_or_else(|| GeoError::InvalidDays(list.to_string()))
                    })
                    .collect::<Result<BTreeSet<_>, _>>()?,
            ),
        };
        let interval = match interval.map(str::trim).filter(|i| !i.is_empty()) {
            None => None,
            Some(i) => Some(TimeInterval::parse(i)?),
        };
        Ok(Self { days, interval })
    }

    /// Build from the payload record.
    pub fn from_record(record: &DeliveryTimeRecord) -> Result<Self, GeoError> {
        Self::parse(record.days.as_deref(), record.time_interval.as_deref())
    }

    /// Payload record form.
    pub fn to_record(&self) -> DeliveryTimeRecord {
        DeliveryTimeRecord {
            days: self.days.as_ref().map(|days| {
                days.iter()
                    .map(u32::to_string)
                    .collect::<Vec<_>>()
                    .join(",")
            }),
            time_interval: self.interval.map(|i| i.to_string()),
        }
    }

    /// Allowed ISO weekday numbers, if constrained.
    pub fn days(&self) -> Option<&BTreeSet<u32>> {
        self.days.as_ref()
    }

    /// Allowed time interval, if constrained.
    pub fn interval(&self) -> Option<TimeInterval> {
        self.interval
    }

    /// Whether `local_now` satisfies both the day and the time constraint.
    pub fn is_appropriate_at(&self, local_now: NaiveDateTime) -> bool {
        let day_ok = self
            .days
            .as_ref()
            .map_or(true, |days| days.contains(&local_now.weekday().number_from_monday()));
        let minute_of_day = local_now.hour() * 60 + local_now.minute();
        let time_ok = self.interval.map_or(true, |i| i.contains(minute_of_day));
        day_ok && time_ok
    }
}
