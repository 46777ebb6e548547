//! Mock reporting endpoint for testing.
//!
//! Captures every request, confirms reported ids as `server-1`,
//! `server-2`, ... and can be switched offline or told to fail.

use super::{ApiError, ReportingApi};
use async_trait::async_trait;
use geocast_types::{GeoEventReportRequest, GeoEventReportResponse, SeenStatusRequest};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Mock reporting endpoint for testing.
#[derive(Debug)]
pub struct MockReportingApi {
    inner: Arc<Mutex<MockReportingApiInner>>,
}

#[derive(Debug)]
struct MockReportingApiInner {
    reachable: bool,
    assign_ids: bool,
    next_server_id: u64,
    latency: Option<Duration>,
    sent_reports: Vec<GeoEventReportRequest>,
    sent_seen: Vec<SeenStatusRequest>,
    response_queue: VecDeque<GeoEventReportResponse>,
    suspended: Vec<String>,
    finished: Vec<String>,
    fail_next_report: Option<ApiError>,
    fail_next_seen: Option<ApiError>,
}

impl Default for MockReportingApiInner {
    fn default() -> Self {
        Self {
            reachable: true,
            assign_ids: true,
            next_server_id: 1,
            latency: None,
            sent_reports: Vec::new(),
            sent_seen: Vec::new(),
            response_queue: VecDeque::new(),
            suspended: Vec::new(),
            finished: Vec::new(),
            fail_next_report: None,
            fail_next_seen: None,
        }
    }
}

impl Default for MockReportingApi {
    fn default() -> Self {
        Self {
            inner: Arc::new(Mutex::new(MockReportingApiInner::default())),
        }
    }
}

impl MockReportingApi {
    /// Create a new reachable mock endpoint.
    pub fn new() -> Self {
        Self::default()
    }

    /// Switch the endpoint on or off. While off every call fails with
    /// [`ApiError::Unreachable`].
    pub fn set_reachable(&self, reachable: bool) {
        let mut inner = self.inner.lock().unwrap();
        inner.reachable = reachable;
    }

    /// Whether reported ids are confirmed automatically (default: true).
    pub fn set_assign_ids(&self, assign: bool) {
        let mut inner = self.inner.lock().unwrap();
        inner.assign_ids = assign;
    }

    /// Delay every call by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        let mut inner = self.inner.lock().unwrap();
        inner.latency = Some(latency);
    }

    /// Queue a response to be returned by the next report call.
    pub fn queue_response(&self, response: GeoEventReportResponse) {
        let mut inner = self.inner.lock().unwrap();
        inner.response_queue.push_back(response);
    }

    /// List `campaign_id` as suspended in every following response.
    pub fn suspend_campaign(&self, campaign_id: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.finished.retain(|id| id != campaign_id);
        inner.suspended.push(campaign_id.to_string());
    }

    /// List `campaign_id` as finished in every following response.
    pub fn finish_campaign(&self, campaign_id: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.suspended.retain(|id| id != campaign_id);
        inner.finished.push(campaign_id.to_string());
    }

    /// Stop listing `campaign_id` as suspended or finished.
    pub fn resume_campaign(&self, campaign_id: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.suspended.retain(|id| id != campaign_id);
        inner.finished.retain(|id| id != campaign_id);
    }

    /// Cause the next report call to fail with the given error.
    pub fn fail_next_report(&self, error: ApiError) {
        let mut inner = self.inner.lock().unwrap();
        inner.fail_next_report = Some(error);
    }

    /// Cause the next seen call to fail with the given error.
    pub fn fail_next_seen(&self, error: ApiError) {
        let mut inner = self.inner.lock().unwrap();
        inner.fail_next_seen = Some(error);
    }

    /// Get all report requests that reached the endpoint.
    pub fn sent_reports(&self) -> Vec<GeoEventReportRequest> {
        let inner = self.inner.lock().unwrap();
        inner.sent_reports.clone()
    }

    /// Get all seen requests that reached the endpoint.
    pub fn sent_seen(&self) -> Vec<SeenStatusRequest> {
        let inner = self.inner.lock().unwrap();
        inner.sent_seen.clone()
    }

    fn latency(&self) -> Option<Duration> {
        self.inner.lock().unwrap().latency
    }
}

impl Clone for MockReportingApi {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

#[async_trait]
impl ReportingApi for MockReportingApi {
    async fn report_geo_events(
        &self,
        request: &GeoEventReportRequest,
    ) -> Result<GeoEventReportResponse, ApiError> {
        if let Some(latency) = self.latency() {
            tokio::time::sleep(latency).await;
        }

        let mut inner = self.inner.lock().unwrap();

        if !inner.reachable {
            return Err(ApiError::Unreachable("mock endpoint offline".to_string()));
        }

        // Check for forced failure
        if let Some(error) = inner.fail_next_report.take() {
            return Err(error);
        }

        inner.sent_reports.push(request.clone());

        let mut response = inner.response_queue.pop_front().unwrap_or_default();
        if inner.assign_ids {
            for report in &request.reports {
                let key = report.sdk_message_id.to_string();
                if !response.message_ids.contains_key(&key) {
                    let id = format!("server-{}", inner.next_server_id);
                    inner.next_server_id += 1;
                    response.message_ids.insert(key, id);
                }
            }
        }
        response.suspended_campaign_ids.extend(inner.suspended.iter().cloned());
        response.finished_campaign_ids.extend(inner.finished.iter().cloned());
        Ok(response)
    }

    async fn send_seen(&self, request: &SeenStatusRequest) -> Result<(), ApiError> {
        if let Some(latency) = self.latency() {
            tokio::time::sleep(latency).await;
        }

        let mut inner = self.inner.lock().unwrap();

        if !inner.reachable {
            return Err(ApiError::Unreachable("mock endpoint offline".to_string()));
        }

        if let Some(error) = inner.fail_next_seen.take() {
            return Err(error);
        }

        inner.sent_seen.push(request.clone());
        Ok(())
    }
}
