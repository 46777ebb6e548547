//! Report response reconciliation plan.
//!
//! Given a submitted batch and the server's answer, works out which
//! campaigns change state, which provisional message ids become server ids
//! and which virtual messages are dropped. Applying the plan is left to the
//! caller.

use geocast_types::{GeoEventReportResponse, SdkMessageId};
use std::collections::BTreeSet;

use crate::{CampaignEvent, PendingReport};

/// A provisional id confirmed by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdRewrite {
    /// Device-generated id.
    pub provisional: SdkMessageId,
    /// Server id.
    pub confirmed: String,
}

/// Everything a successful submission implies.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcilePlan {
    /// Campaign id and what the server said about it.
    pub transitions: Vec<(String, CampaignEvent)>,
    /// Virtual messages to rename.
    pub rewrites: Vec<IdRewrite>,
    /// Virtual messages of suspended or finished campaigns.
    pub discards: Vec<SdkMessageId>,
    /// Every report of the batch; all are confirmed.
    pub acknowledged: Vec<SdkMessageId>,
}

impl ReconcilePlan {
    /// Build the plan for `batch` answered by `response`.
    ///
    /// Campaigns reported in the batch and absent from both response lists
    /// become active; campaigns listed in the response transition even when
    /// they were not part of the batch.
    pub fn from_response(batch: &[PendingReport], response: &GeoEventReportResponse) -> Self {
        let campaigns: BTreeSet<&str> = batch
            .iter()
            .map(|r| r.campaign_id.as_str())
            .chain(response.suspended_campaign_ids.iter().map(String::as_str))
            .chain(response.finished_campaign_ids.iter().map(String::as_str))
            .collect();

        let transitions = campaigns
            .into_iter()
            .map(|id| (id.to_string(), CampaignEvent::from_response(id, response)))
            .collect();

        let mut rewrites = Vec::new();
        let mut discards = Vec::new();
        for report in batch {
            match CampaignEvent::from_response(&report.campaign_id, response) {
                CampaignEvent::ReportedActive => {
                    if let Some(confirmed) = response
                        .message_ids
                        .get(&report.provisional_message_id.to_string())
                    {
                        rewrites.push(IdRewrite {
                            provisional: report.provisional_message_id,
                            confirmed: confirmed.clone(),
                        });
                    }
                }
                _ => discards.push(report.provisional_message_id),
            }
        }

        Self {
            transitions,
            rewrites,
            discards,
            acknowledged: batch.iter().map(|r| r.provisional_message_id).collect(),
        }
    }
}
