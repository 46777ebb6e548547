//! Platform region registration bookkeeping.
//!
//! Several campaigns may share a geo area. The platform only allows a small
//! number of monitored regions, so each area is registered once and
//! reference counted by the campaigns (by message id) that use it. When more
//! areas exist than the limit, the nearest ones win.

use std::collections::{BTreeMap, BTreeSet};

use crate::{Coordinate, GeoCampaignMessage};

/// Default number of regions the platform lets an app monitor.
pub const DEFAULT_REGION_LIMIT: usize = 20;

/// A circle registered with the platform.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitoredArea {
    /// Geo area id.
    pub id: String,
    /// Centre.
    pub center: Coordinate,
    /// Radius in meters.
    pub radius: f64,
}

/// Registration change for the platform monitor.
#[derive(Debug, Clone, PartialEq)]
pub enum MonitorAction {
    /// Start monitoring the area.
    Start(MonitoredArea),
    /// Stop monitoring the area with this id.
    Stop(String),
}

#[derive(Debug)]
struct AreaEntry {
    area: MonitoredArea,
    campaigns: BTreeSet<String>,
}

/// Deduplicating, limit-aware registration table.
#[derive(Debug)]
pub struct RegionMonitor {
    limit: usize,
    areas: BTreeMap<String, AreaEntry>,
    active: BTreeSet<String>,
}

impl RegionMonitor {
    /// Create an empty table.
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            areas: BTreeMap::new(),
            active: BTreeSet::new(),
        }
    }

    /// Reference every region of `campaign`.
    pub fn add_campaign(
        &mut self,
        campaign: &GeoCampaignMessage,
        location: Option<Coordinate>,
    ) -> Vec<MonitorAction> {
        for region in campaign.regions() {
            self.areas
                .entry(region.identifier().to_string())
                .or_insert_with(|| AreaEntry {
                    area: MonitoredArea {
                        id: region.identifier().to_string(),
                        center: region.center(),
                        radius: region.radius(),
                    },
                    campaigns: BTreeSet::new(),
                })
                .campaigns
                .insert(campaign.message_id().to_string());
        }
        self.refresh(location)
    }

    /// Drop every reference held by the campaign with `message_id`.
    ///
    /// Areas still referenced by another campaign stay registered.
    pub fn remove_campaign(
        &mut self,
        message_id: &str,
        location: Option<Coordinate>,
    ) -> Vec<MonitorAction> {
        self.areas.retain(|_, entry| {
            entry.campaigns.remove(message_id);
            !entry.campaigns.is_empty()
        });
        self.refresh(location)
    }

    /// Recompute the monitored set for `location` and return the changes.
    pub fn refresh(&mut self, location: Option<Coordinate>) -> Vec<MonitorAction> {
        let desired = self.desired(location);

        let mut actions: Vec<MonitorAction> = self
            .active
            .difference(&desired)
            .map(|id| MonitorAction::Stop(id.clone()))
            .collect();
        actions.extend(
            desired
                .difference(&self.active)
                .filter_map(|id| self.areas.get(id))
                .map(|entry| MonitorAction::Start(entry.area.clone())),
        );

        self.active = desired;
        actions
    }

    /// Stop everything.
    pub fn clear(&mut self) -> Vec<MonitorAction> {
        self.areas.clear();
        std::mem::take(&mut self.active)
            .into_iter()
            .map(MonitorAction::Stop)
            .collect()
    }

    #[cfg(test)]
    fn is_monitored(&self, area_id: &str) -> bool {
        self.active.contains(area_id)
    }

    /// Number of areas registered with the platform.
    pub fn monitored_count(&self) -> usize {
        self.active.len()
    }

    #[cfg(test)]
    fn known_count(&self) -> usize {
        self.areas.len()
    }

    fn desired(&self, location: Option<Coordinate>) -> BTreeSet<String> {
        if self.areas.len() <= self.limit {
            return self.areas.keys().cloned().collect();
        }
        let mut ranked: Vec<(&String, f64)> = self
            .areas
            .iter()
            .map(|(id, entry)| {
                let distance = location.map_or(0.0, |here| here.distance_to(&entry.area.center));
                (id, distance)
            })
            .collect();
        ranked.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(b.0)));
        ranked
            .into_iter()
            .take(self.limit)
            .map(|(id, _)| id.clone())
            .collect()
    }
}

impl Default for RegionMonitor {
    fn default() -> Self {
        Self::new(DEFAULT_REGION_LIMIT)
    }
}
