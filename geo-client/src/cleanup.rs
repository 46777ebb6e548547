//! Background sweep task for expired and finished campaigns.
//!
//! The task only schedules; the sweep itself runs on the service worker so
//! it is ordered with every other state change.

use crate::config::CleanupConfig;
use crate::service::Command;
use std::time::Duration;
use tokio::sync::mpsc::WeakUnboundedSender;
use tokio::time::{interval_at, Instant};

/// Spawn a background sweep task.
///
/// The task ends when the service stops. Returns a handle that can be used
/// to abort it earlier.
pub(crate) fn spawn_sweep_task(
    commands: WeakUnboundedSender<Command>,
    config: CleanupConfig,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if !config.enabled {
            tracing::info!("Campaign sweep disabled");
            return;
        }

        let interval_secs = config.interval_secs.max(1);
        tracing::info!("Campaign sweep started (interval: {}s)", interval_secs);

        let period = Duration::from_secs(interval_secs);
        let mut timer = interval_at(Instant::now() + period, period);

        loop {
            timer.tick().await;

            let Some(commands) = commands.upgrade() else {
                break;
            };
            if commands.send(Command::Sweep).is_err() {
                break;
            }
        }
        tracing::debug!("Campaign sweep stopped");
    })
}
