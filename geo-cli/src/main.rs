//! # geocast
//!
//! CLI tool for inspecting and simulating geo campaigns.
//!
//! ## Commands
//!
//! - `inspect`: Show a campaign payload and its liveness
//! - `window`: Evaluate a delivery window at a local time
//! - `simulate`: Run a region event through the service with mock backends
//! - `migrate`: Rewrite a campaign store in the current schema
//!
//! ## Example
//!
//! ```bash
//! # Show what a push would do
//! geocast inspect campaign.json --at 2024-05-01T10:00:00Z
//!
//! # Is an overnight window open at 00:05?
//! geocast window --interval 2300/0100 --at 2024-05-02T00:05:00
//!
//! # Fire an entry while offline
//! geocast simulate campaign.json --area a1 --offline
//! ```

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use clap::{Parser, Subcommand};
use geocast_types::EventType;
use std::path::PathBuf;
use tracing::debug;
use tracing_subscriber::EnvFilter;

mod commands;

use commands::{inspect, migrate, simulate, window};

/// CLI tool for inspecting and simulating geo campaigns.
#[derive(Parser, Debug)]
#[command(name = "geocast")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show a campaign payload, its regions and liveness
    Inspect {
        /// Push payload (JSON)
        payload: PathBuf,

        /// Evaluate liveness at this time (RFC 3339, default now)
        #[arg(long, value_parser = parse_utc)]
        at: Option<DateTime<Utc>>,
    },

    /// Evaluate a delivery window
    Window {
        /// Comma-separated ISO weekdays (1 = Monday)
        #[arg(long)]
        days: Option<String>,

        /// Time interval as HHMM/HHMM
        #[arg(long)]
        interval: Option<String>,

        /// Local date and time, e.g. 2024-05-01T10:00:00
        #[arg(long, value_parser = parse_local)]
        at: NaiveDateTime,
    },

    /// Run a region event through the service with mock backends
    Simulate {
        /// Push payload (JSON)
        payload: PathBuf,

        /// Geo area id
        #[arg(long)]
        area: String,

        /// Event direction
        #[arg(long, default_value = "entry", value_parser = parse_event)]
        event: EventType,

        /// Simulate an unreachable reporting endpoint
        #[arg(long)]
        offline: bool,

        /// Simulated time (RFC 3339, default now)
        #[arg(long, value_parser = parse_utc)]
        at: Option<DateTime<Utc>>,

        /// Service configuration (TOML)
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Rewrite a campaign store in the current schema
    Migrate {
        /// Store file (JSON)
        store: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Inspect { payload, at } => {
            inspect::run(&payload, at.unwrap_or_else(Utc::now)).await?;
        }
        Commands::Window { days, interval, at } => {
            window::run(days.as_deref(), interval.as_deref(), at)?;
        }
        Commands::Simulate {
            payload,
            area,
            event,
            offline,
            at,
            config,
        } => {
            let config = match config {
                Some(path) => {
                    debug!("Loading config {}", path.display());
                    geocast_client::GeoConfig::from_file(&path)
                        .with_context(|| format!("Failed to load config {}", path.display()))?
                }
                None => geocast_client::GeoConfig::default(),
            };
            let options = simulate::Options {
                area,
                event,
                offline,
                at: at.unwrap_or_else(Utc::now),
            };
            simulate::run(&payload, config, options).await?;
        }
        Commands::Migrate { store } => {
            migrate::run(&store).await?;
        }
    }

    Ok(())
}

fn parse_utc(s: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| format!("expected an RFC 3339 timestamp: {e}"))
}

fn parse_local(s: &str) -> Result<NaiveDateTime, String> {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M"))
        .map_err(|e| format!("expected YYYY-MM-DDTHH:MM:SS: {e}"))
}

fn parse_event(s: &str) -> Result<EventType, String> {
    EventType::parse(s).ok_or_else(|| format!("unknown event '{s}' (expected entry or exit)"))
}
