//! Run a region event through the service with mock backends.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use geocast_client::{
    EventOutcome, GeoConfig, GeofencingService, MemoryStore, MockLocationMonitor,
    MockReportingApi, ReportStatus, ServiceDeps, ServiceSnapshot,
};
use geocast_types::EventType;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// What to simulate.
#[derive(Debug, Clone)]
pub struct Options {
    /// Geo area id.
    pub area: String,
    /// Event direction.
    pub event: EventType,
    /// Whether the reporting endpoint is unreachable.
    pub offline: bool,
    /// Simulated time.
    pub at: DateTime<Utc>,
}

/// Run the simulate command.
pub async fn run(path: &Path, config: GeoConfig, options: Options) -> Result<()> {
    let payload = super::read_payload(path).await?;
    let (outcomes, snapshot) = simulate(payload, config, &options).await?;
    print!("{}", render(&options, &outcomes, &snapshot));
    Ok(())
}

/// Add the payload, fire one event and collect the result.
pub async fn simulate(
    payload: serde_json::Value,
    mut config: GeoConfig,
    options: &Options,
) -> Result<(Vec<EventOutcome>, ServiceSnapshot)> {
    config.cleanup.enabled = false;
    info!(
        "Simulating {} of {} at {}{}",
        options.event,
        options.area,
        options.at.to_rfc3339(),
        if options.offline { " with the endpoint offline" } else { "" }
    );

    let api = MockReportingApi::new();
    api.set_reachable(!options.offline);
    let at = options.at;
    let deps = ServiceDeps::new(
        Arc::new(api),
        Arc::new(MockLocationMonitor::new()),
        Arc::new(MemoryStore::new()),
    )
    .with_clock(Arc::new(move || at));

    let service = GeofencingService::start(config, deps)
        .await
        .context("Failed to start geofencing service")?;

    let message_id = service.add_message(payload).await?;
    if message_id.is_none() {
        anyhow::bail!("Payload is not a geo campaign");
    }

    let outcomes = service.region_event(options.event, &options.area).await?;
    let snapshot = service.snapshot().await?;
    debug!(
        "{} of {} campaigns fired",
        outcomes.iter().filter(|o| o.fired).count(),
        outcomes.len()
    );
    service.stop().await;
    Ok((outcomes, snapshot))
}

fn render(options: &Options, outcomes: &[EventOutcome], snapshot: &ServiceSnapshot) -> String {
    let mut out = format!(
        "Simulated {} of {} at {}{}\n",
        options.event,
        options.area,
        options.at.to_rfc3339(),
        if options.offline { " (offline)" } else { "" }
    );

    if outcomes.is_empty() {
        out.push_str("  No campaign references this area\n");
    }
    for outcome in outcomes {
        let report = match &outcome.report {
            None => "not reported".to_string(),
            Some(ReportStatus::Delivered) => "delivered".to_string(),
            Some(ReportStatus::Pending) => "pending".to_string(),
            Some(ReportStatus::Rejected(reason)) => format!("rejected ({reason})"),
        };
        out.push_str(&format!(
            "  Campaign {}: {}, report {}, state {:?}\n",
            outcome.campaign_id,
            if outcome.fired { "fired" } else { "ignored" },
            report,
            outcome.state
        ));
    }

    out.push_str(&format!("Pending reports: {}\n", snapshot.pending_reports));
    out.push_str(&format!("Messages ({}):\n", snapshot.messages.len()));
    for record in &snapshot.messages {
        out.push_str(&format!(
            "  {} {:?} {:?}\n",
            record.message_id,
            record.kind,
            record.body.as_deref().unwrap_or("")
        ));
    }
    out
}
