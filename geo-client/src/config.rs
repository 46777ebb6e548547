//! Configuration loading for the geofencing service.
//!
//! Configuration is loaded from a TOML file (default: `geocast.toml`).
//! Every section and key is optional.

use serde::Deserialize;
use std::path::PathBuf;

/// Root configuration for the geofencing service.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GeoConfig {
    /// Reporting endpoint configuration.
    #[serde(default)]
    pub reporting: ReportingConfig,
    /// Region monitoring configuration.
    #[serde(default)]
    pub monitoring: MonitoringConfig,
    /// Delivery window evaluation.
    #[serde(default)]
    pub delivery: DeliveryConfig,
    /// Storage configuration.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Campaign sweep configuration.
    #[serde(default)]
    pub cleanup: CleanupConfig,
}

/// Reporting endpoint configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ReportingConfig {
    /// Push platform reported with every request (default: APNS).
    #[serde(default = "default_platform_type")]
    pub platform_type: String,
    /// Push registration id of this installation, if registered.
    pub push_registration_id: Option<String>,
    /// Maximum reports per request (default: 100).
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Maximum reports kept while offline (default: 1000).
    #[serde(default = "default_max_pending_reports")]
    pub max_pending_reports: usize,
}

/// Region monitoring configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MonitoringConfig {
    /// Maximum regions registered with the platform at once (default: 20).
    #[serde(default = "default_region_limit")]
    pub region_limit: usize,
    /// Movement in meters that triggers re-selection of the nearest regions
    /// (default: 200).
    #[serde(default = "default_refresh_threshold")]
    pub refresh_threshold_meters: f64,
    /// Distance filter handed to the platform location provider (default: 100).
    #[serde(default = "default_distance_filter")]
    pub distance_filter_meters: f64,
}

/// Delivery window evaluation.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeliveryConfig {
    /// Fixed UTC offset for delivery windows. The system time zone when unset.
    pub utc_offset_minutes: Option<i32>,
}

/// Storage configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Path to the JSON store file.
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

/// Campaign sweep configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct CleanupConfig {
    /// Sweep interval in seconds (default: 3600 = 1 hour).
    #[serde(default = "default_cleanup_interval")]
    pub interval_secs: u64,
    /// Enable the periodic sweep (default: true).
    #[serde(default = "default_cleanup_enabled")]
    pub enabled: bool,
}

// Default value functions
fn default_platform_type() -> String {
    "APNS".to_string()
}

fn default_batch_size() -> usize {
    100
}

fn default_max_pending_reports() -> usize {
    1000
}

fn default_region_limit() -> usize {
    geocast_core::DEFAULT_REGION_LIMIT
}

fn default_refresh_threshold() -> f64 {
    200.0
}

fn default_distance_filter() -> f64 {
    100.0
}

fn default_store_path() -> PathBuf {
    PathBuf::from("geocast-store.json")
}

fn default_cleanup_interval() -> u64 {
    3600 // 1 hour
}

fn default_cleanup_enabled() -> bool {
    true
}

impl Default for ReportingConfig {
    fn default() -> Self {
        Self {
            platform_type: default_platform_type(),
            push_registration_id: None,
            batch_size: default_batch_size(),
            max_pending_reports: default_max_pending_reports(),
        }
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            region_limit: default_region_limit(),
            refresh_threshold_meters: default_refresh_threshold(),
            distance_filter_meters: default_distance_filter(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_cleanup_interval(),
            enabled: default_cleanup_enabled(),
        }
    }
}

impl GeoConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
}
