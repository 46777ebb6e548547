//! Campaign state machine.
//!
//! This module provides a pure, side-effect-free state machine for a geo
//! campaign's server-driven lifecycle. The reporting endpoint tells the
//! device which campaigns are suspended or finished; everything it reported
//! on and did not list is active.
//!
//! The actual I/O (unregistering regions, persisting, notifying the app) is
//! performed by geocast-client, which interprets the returned actions.

use geocast_types::GeoEventReportResponse;
use serde::{Deserialize, Serialize};

/// Server-driven campaign lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum CampaignState {
    /// Events are evaluated and reported.
    #[default]
    Active,
    /// Paused server-side. No events are evaluated.
    Suspended,
    /// Terminal. The campaign is kept only until the next cleanup sweep.
    Finished,
}

impl CampaignState {
    /// Process an event and return the new state plus actions to execute.
    ///
    /// This is a pure function. Finished is terminal.
    pub fn on_event(self, event: CampaignEvent) -> (Self, Vec<CampaignAction>) {
        match (self, event) {
            (Self::Active, CampaignEvent::ReportedActive) => (Self::Active, vec![]),
            (Self::Active, CampaignEvent::ReportedSuspended) => (
                Self::Suspended,
                vec![
                    CampaignAction::StopMonitoring,
                    CampaignAction::Persist,
                    CampaignAction::EmitStateChanged(Self::Suspended),
                ],
            ),
            (Self::Active | Self::Suspended, CampaignEvent::ReportedFinished) => (
                Self::Finished,
                vec![
                    CampaignAction::StopMonitoring,
                    CampaignAction::Persist,
                    CampaignAction::EmitStateChanged(Self::Finished),
                ],
            ),
            (Self::Suspended, CampaignEvent::ReportedActive) => (
                Self::Active,
                vec![
                    CampaignAction::ResumeMonitoring,
                    CampaignAction::Persist,
                    CampaignAction::EmitStateChanged(Self::Active),
                ],
            ),
            (Self::Suspended, CampaignEvent::ReportedSuspended) => (Self::Suspended, vec![]),
            (Self::Finished, _) => (Self::Finished, vec![]),
        }
    }

    /// Whether region events for this campaign are evaluated at all.
    pub fn accepts_events(&self) -> bool {
        matches!(self, Self::Active)
    }

    /// Whether the campaign may be removed by a cleanup sweep.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished)
    }
}

/// What the reporting endpoint said about one campaign.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CampaignEvent {
    /// Listed in neither the suspended nor the finished ids.
    ReportedActive,
    /// Listed in the suspended ids.
    ReportedSuspended,
    /// Listed in the finished ids.
    ReportedFinished,
}

impl CampaignEvent {
    /// Classify `campaign_id` against a response. Finished wins over suspended.
    pub fn from_response(campaign_id: &str, response: &GeoEventReportResponse) -> Self {
        if response.finished_campaign_ids.iter().any(|id| id == campaign_id) {
            Self::ReportedFinished
        } else if response.suspended_campaign_ids.iter().any(|id| id == campaign_id) {
            Self::ReportedSuspended
        } else {
            Self::ReportedActive
        }
    }
}

/// Side effects requested by a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CampaignAction {
    /// Release the campaign's region registrations.
    StopMonitoring,
    /// Register the campaign's regions again.
    ResumeMonitoring,
    /// Store the new state.
    Persist,
    /// Tell the application.
    EmitStateChanged(CampaignState),
}
