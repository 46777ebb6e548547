//! Reporting endpoint abstraction.
//!
//! The geofencing service talks to two endpoints:
//! - `report_geo_events()` submits a batch of fired events and returns the
//!   campaign states and confirmed message ids
//! - `send_seen()` reports messages the user has opened
//!
//! The HTTP client lives with the host application; tests use
//! [`MockReportingApi`].

mod mock;

pub use mock::MockReportingApi;

use async_trait::async_trait;
use geocast_types::{GeoEventReportRequest, GeoEventReportResponse, SeenStatusRequest};
use thiserror::Error;

/// Reporting endpoint errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    /// The endpoint could not be reached.
    #[error("endpoint unreachable: {0}")]
    Unreachable(String),

    /// The endpoint answered with an error status.
    #[error("server error {status}: {message}")]
    Server {
        /// HTTP status code.
        status: u16,
        /// Error message from the response body.
        message: String,
    },

    /// The endpoint rejected the request content.
    #[error("request rejected: {0}")]
    Validation(String),

    /// The request or response could not be (de)serialized.
    #[error("serialization failed: {0}")]
    Serialization(String),
}

impl ApiError {
    /// Whether resubmitting the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unreachable(_) | Self::Server { .. })
    }
}

/// Client side of the reporting endpoints.
#[async_trait]
pub trait ReportingApi: Send + Sync {
    /// Submit a batch of geo event reports.
    async fn report_geo_events(
        &self,
        request: &GeoEventReportRequest,
    ) -> Result<GeoEventReportResponse, ApiError>;

    /// Report messages the user has seen.
    async fn send_seen(&self, request: &SeenStatusRequest) -> Result<(), ApiError>;
}
