//! Show a campaign payload.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use geocast_core::GeoCampaignMessage;
use geocast_types::EventType;
use std::path::Path;

/// Run the inspect command.
pub async fn run(path: &Path, at: DateTime<Utc>) -> Result<()> {
    let payload = super::read_payload(path).await?;
    let campaign = GeoCampaignMessage::try_from_payload(&payload)
        .with_context(|| format!("{} is not a geo campaign", path.display()))?;

    print!("{}", describe(&campaign, at));
    Ok(())
}

/// Human-readable summary of a campaign at `at`.
pub fn describe(campaign: &GeoCampaignMessage, at: DateTime<Utc>) -> String {
    let mut out = String::new();
    let mut line = |s: String| {
        out.push_str(&s);
        out.push('\n');
    };

    line(format!("Campaign: {}", campaign.campaign_id()));
    line(format!("  Message: {}", campaign.message_id()));
    line(format!("  Start:   {}", campaign.start_date().to_rfc3339()));
    line(format!("  Expiry:  {}", campaign.expiry_date().to_rfc3339()));
    line(format!("  State:   {:?}", campaign.campaign_state()));
    let window = match campaign.delivery_window() {
        None => "any time".to_string(),
        Some(w) => {
            let days = w.days().map_or_else(
                || "every day".to_string(),
                |d| {
                    d.iter()
                        .map(u32::to_string)
                        .collect::<Vec<_>>()
                        .join(",")
                },
            );
            let hours = w
                .interval()
                .map_or_else(|| "all day".to_string(), |i| i.to_string());
            format!("days {days}, hours {hours}")
        }
    };
    line(format!("  Window:  {window}"));
    line(String::new());

    line(format!("Regions ({}):", campaign.regions().len()));
    for region in campaign.regions() {
        let center = region.center();
        line(format!(
            "  [{}] {} ({:.5}, {:.5}) r={:.0}m",
            region.identifier(),
            region.title(),
            center.latitude,
            center.longitude,
            region.radius()
        ));
        for event in region.events() {
            let limit = match event.limit() {
                0 => "unlimited".to_string(),
                n => n.to_string(),
            };
            line(format!(
                "    {}: limit {}, timeout {} min, occurred {}",
                event.event_type(),
                limit,
                event.timeout_minutes(),
                event.occurrence_count()
            ));
        }
    }
    line(String::new());

    line(format!("Liveness at {}:", at.to_rfc3339()));
    for event_type in [EventType::Entry, EventType::Exit] {
        let live = if campaign.is_live(event_type, at) {
            "live"
        } else {
            "not live"
        };
        line(format!("  {event_type}: {live}"));
    }
    out
}
