//! The geofencing service.
//!
//! [`GeofencingService`] is a handle to one worker task that owns every
//! campaign, message record, pending report and region registration.
//! Platform callbacks and application calls become commands on a single
//! queue and are processed in order, so liveness checks, counter updates
//! and persistence never race. Report and seen submissions run in spawned
//! tasks; their results re-enter the same queue before any state changes.
//!
//! Commands that arrive together are handled back to back before the
//! pending reports are flushed, so events fired in one burst share a batch.

use std::collections::{BTreeMap, HashSet};
use std::ops::ControlFlow;
use std::sync::Arc;

use chrono::{DateTime, FixedOffset, Local, NaiveDateTime, Utc};
use geocast_core::{
    BufferError, CampaignAction, CampaignEvent, CampaignState, Coordinate, GeoCampaignMessage,
    MessageRecord, MonitorAction, PendingReport, ReconcilePlan, RegionMonitor, ReportBuffer,
};
use geocast_types::{EventType, GeoEventReportResponse, SdkMessageId};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::api::{ApiError, ReportingApi};
use crate::cleanup::spawn_sweep_task;
use crate::config::GeoConfig;
use crate::location::{CapabilityStatus, LocationMonitor};
use crate::reconciler::OfflineReportReconciler;
use crate::store::{CampaignStore, StoreError};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Source of the current time.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Service errors.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Location permission is missing.
    #[error("location monitoring not authorized ({0:?})")]
    NotAuthorized(CapabilityStatus),

    /// The reporting endpoint failed.
    #[error("reporting failed: {0}")]
    Api(#[from] ApiError),

    /// Persistence failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// The pending report buffer is full.
    #[error("report buffer: {0}")]
    Buffer(#[from] BufferError),

    /// The server answered but its response could not be applied locally.
    #[error("failed to apply report response: {0}")]
    Reconcile(String),

    /// No stored campaign matches.
    #[error("unknown campaign: {0}")]
    UnknownCampaign(String),

    /// The service has been stopped.
    #[error("service stopped")]
    Stopped,
}

/// External collaborators of the service.
#[derive(Clone)]
pub struct ServiceDeps {
    /// Reporting endpoint client.
    pub api: Arc<dyn ReportingApi>,
    /// Platform region monitoring.
    pub location: Arc<dyn LocationMonitor>,
    /// Persistence.
    pub store: Arc<dyn CampaignStore>,
    /// Current time.
    pub clock: Clock,
}

impl ServiceDeps {
    /// Dependencies using the system clock.
    pub fn new(
        api: Arc<dyn ReportingApi>,
        location: Arc<dyn LocationMonitor>,
        store: Arc<dyn CampaignStore>,
    ) -> Self {
        Self {
            api,
            location,
            store,
            clock: Arc::new(Utc::now),
        }
    }

    /// Replace the clock.
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }
}

/// Notifications for the host application.
#[derive(Debug, Clone, PartialEq)]
pub enum GeoEvent {
    /// A geo campaign push was stored.
    MessageAdded {
        /// Campaign message id.
        message_id: String,
        /// Campaign id.
        campaign_id: String,
    },
    /// An entry event fired.
    RegionEntered {
        /// Campaign id.
        campaign_id: String,
        /// Region id.
        area_id: String,
    },
    /// An exit event fired.
    RegionExited {
        /// Campaign id.
        campaign_id: String,
        /// Region id.
        area_id: String,
    },
    /// Show this virtual message to the user.
    DeliverNotification(MessageRecord),
    /// The server changed a campaign's state.
    CampaignStateChanged {
        /// Campaign id.
        campaign_id: String,
        /// New state.
        state: CampaignState,
    },
    /// A virtual message received its server id.
    MessageIdConfirmed {
        /// Former provisional id.
        provisional: SdkMessageId,
        /// Server id.
        confirmed: String,
    },
}

/// What happened to the report of a fired event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportStatus {
    /// The server accepted the batch.
    Delivered,
    /// Submission failed; the report stays queued for the next sync.
    Pending,
    /// The server rejected the batch content; the report is dropped.
    Rejected(String),
}

/// Result of a region callback for one campaign.
#[derive(Debug, Clone, PartialEq)]
pub struct EventOutcome {
    /// Campaign message id.
    pub message_id: String,
    /// Campaign id.
    pub campaign_id: String,
    /// Whether the event fired.
    pub fired: bool,
    /// Provisional id of the report and virtual message, if fired.
    pub provisional_message_id: Option<SdkMessageId>,
    /// Campaign state after the report batch completed.
    pub state: CampaignState,
    /// Report status, if fired.
    pub report: Option<ReportStatus>,
}

/// Result of [`GeofencingService::sync`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncSummary {
    /// Reports confirmed during the sync.
    pub reported: usize,
    /// Reports still pending afterwards.
    pub pending: usize,
}

/// Point-in-time copy of the service state.
#[derive(Debug, Clone)]
pub struct ServiceSnapshot {
    /// Stored campaigns, by message id.
    pub campaigns: Vec<GeoCampaignMessage>,
    /// Message records, by id.
    pub messages: Vec<MessageRecord>,
    /// Reports not yet confirmed.
    pub pending_reports: usize,
    /// Areas registered with the platform.
    pub monitored_areas: usize,
}

pub(crate) enum Command {
    AddMessage {
        payload: Value,
        reply: oneshot::Sender<Result<Option<String>, ServiceError>>,
    },
    RegionEvent {
        event_type: EventType,
        area_id: String,
        reply: oneshot::Sender<Result<Vec<EventOutcome>, ServiceError>>,
    },
    Report {
        event_type: EventType,
        area_id: String,
        campaign_id: String,
        reply: oneshot::Sender<Result<CampaignState, ServiceError>>,
    },
    SetSeen {
        message_ids: Vec<String>,
        reply: oneshot::Sender<Result<(), ServiceError>>,
    },
    Sync {
        reply: oneshot::Sender<Result<SyncSummary, ServiceError>>,
    },
    LocationChanged {
        location: Coordinate,
    },
    Sweep,
    Snapshot {
        reply: oneshot::Sender<ServiceSnapshot>,
    },
    ReportCompleted {
        batch: Vec<PendingReport>,
        result: Result<GeoEventReportResponse, ApiError>,
    },
    SeenCompleted {
        ids: Vec<String>,
        result: Result<(), ApiError>,
    },
    Stop {
        reply: oneshot::Sender<()>,
    },
}

/// Handle to the geofencing worker.
///
/// Dropping the handle closes the queue; the worker finishes the commands
/// already queued and exits.
pub struct GeofencingService {
    commands: mpsc::UnboundedSender<Command>,
    events: broadcast::Sender<GeoEvent>,
    sweeper: JoinHandle<()>,
}

impl GeofencingService {
    /// Load persisted state, register monitoring and start the worker.
    ///
    /// # Errors
    ///
    /// Fails with [`ServiceError::NotAuthorized`] unless location access is
    /// authorized, or with [`ServiceError::Store`] if the store cannot be
    /// loaded.
    pub async fn start(config: GeoConfig, deps: ServiceDeps) -> Result<Self, ServiceError> {
        let status = deps.location.authorization_status();
        if status != CapabilityStatus::Authorized {
            warn!("Cannot start geofencing: location status {:?}", status);
            return Err(ServiceError::NotAuthorized(status));
        }
        deps.location
            .set_distance_filter(config.monitoring.distance_filter_meters);

        let document = deps.store.load().await?;

        let mut campaigns = BTreeMap::new();
        for record in &document.campaigns {
            match GeoCampaignMessage::from_record(record) {
                Ok(campaign) => {
                    campaigns.insert(campaign.message_id().to_string(), campaign);
                }
                Err(e) => warn!(
                    "Skipping stored campaign {}: {}",
                    record.message_id().unwrap_or("<no id>"),
                    e
                ),
            }
        }
        let records = document
            .messages
            .into_iter()
            .map(|r| (r.message_id.clone(), r))
            .collect();
        let buffer = ReportBuffer::restore(
            config.reporting.max_pending_reports,
            document.pending_reports,
        );

        let (commands, receiver) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let mut worker = Worker {
            reconciler: OfflineReportReconciler::new(deps.api, &config.reporting),
            monitor: RegionMonitor::new(config.monitoring.region_limit),
            config: config.clone(),
            store: deps.store,
            location: deps.location,
            clock: deps.clock,
            events: events.clone(),
            commands: commands.downgrade(),
            campaigns,
            records,
            buffer,
            last_refresh: None,
            report_task: None,
            seen_in_flight: None,
            report_waiters: Vec::new(),
            seen_waiters: Vec::new(),
            flush_requested: false,
            seen_requested: false,
        };
        worker.register_stored_campaigns();

        info!(
            "Geofencing service started ({} campaigns, {} pending reports, {} areas monitored)",
            worker.campaigns.len(),
            worker.buffer.total_count(),
            worker.monitor.monitored_count()
        );

        tokio::spawn(worker.run(receiver));
        let sweeper = spawn_sweep_task(commands.downgrade(), config.cleanup);

        Ok(Self {
            commands,
            events,
            sweeper,
        })
    }

    /// Store a push payload if it is a geo campaign.
    ///
    /// Returns the campaign message id, or `None` when the payload is not a
    /// geo campaign and should be handled as a regular message. A payload
    /// whose message id is already stored keeps the stored counters.
    pub async fn add_message(&self, payload: Value) -> Result<Option<String>, ServiceError> {
        self.request(|reply| Command::AddMessage { payload, reply })
            .await?
    }

    /// Platform callback: the device crossed `area_id`.
    ///
    /// Returns one outcome per campaign referencing the area. Completes
    /// once the reports of fired events have been submitted; submission
    /// failures are reported in the outcome, not as an error.
    pub async fn region_event(
        &self,
        event_type: EventType,
        area_id: &str,
    ) -> Result<Vec<EventOutcome>, ServiceError> {
        let area_id = area_id.to_string();
        self.request(|reply| Command::RegionEvent {
            event_type,
            area_id,
            reply,
        })
        .await?
    }

    /// Report an event for `campaign_id` in `area_id` without checking
    /// liveness or the delivery window.
    ///
    /// Returns the campaign state after the report batch completed.
    ///
    /// # Errors
    ///
    /// Fails with [`ServiceError::UnknownCampaign`] if no campaign with that
    /// id references the area, and with [`ServiceError::Api`] if the server
    /// rejected the batch.
    pub async fn report(
        &self,
        event_type: EventType,
        area_id: &str,
        campaign_id: &str,
    ) -> Result<CampaignState, ServiceError> {
        let area_id = area_id.to_string();
        let campaign_id = campaign_id.to_string();
        self.request(|reply| Command::Report {
            event_type,
            area_id,
            campaign_id,
            reply,
        })
        .await?
    }

    /// Mark messages as seen by the user.
    ///
    /// Seen status of confirmed messages is sent right away; provisional
    /// ids are held back until the server confirms them.
    pub async fn set_seen(&self, message_ids: &[String]) -> Result<(), ServiceError> {
        let message_ids = message_ids.to_vec();
        self.request(|reply| Command::SetSeen { message_ids, reply })
            .await?
    }

    /// Sweep expired and finished campaigns, submit every pending report and
    /// send deferred seen status.
    pub async fn sync(&self) -> Result<SyncSummary, ServiceError> {
        self.request(|reply| Command::Sync { reply }).await?
    }

    /// Platform callback: the device moved.
    pub fn location_changed(&self, location: Coordinate) -> Result<(), ServiceError> {
        self.commands
            .send(Command::LocationChanged { location })
            .map_err(|_| ServiceError::Stopped)
    }

    /// Copy of the current state.
    pub async fn snapshot(&self) -> Result<ServiceSnapshot, ServiceError> {
        self.request(|reply| Command::Snapshot { reply }).await
    }

    /// Subscribe to service notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<GeoEvent> {
        self.events.subscribe()
    }

    /// Stop the worker.
    ///
    /// In-flight submissions are cancelled and callers still waiting on
    /// them receive [`ServiceError::Stopped`]. Unconfirmed reports stay in
    /// the store. Every monitored area is unregistered.
    pub async fn stop(&self) {
        let (reply, done) = oneshot::channel();
        if self.commands.send(Command::Stop { reply }).is_ok() {
            let _ = done.await;
        }
        self.sweeper.abort();
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, ServiceError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .map_err(|_| ServiceError::Stopped)?;
        response.await.map_err(|_| ServiceError::Stopped)
    }
}

// ===========================================
// Worker
// ===========================================

/// Why a report batch did not complete.
#[derive(Debug, Clone)]
enum BatchFailure {
    Api(ApiError),
    Reconcile(String),
}

impl BatchFailure {
    /// Whether the batch goes back to the queue.
    fn is_retryable(&self) -> bool {
        match self {
            Self::Api(e) => e.is_retryable(),
            Self::Reconcile(_) => true,
        }
    }

    fn status(&self) -> ReportStatus {
        match self {
            Self::Api(ApiError::Validation(message) | ApiError::Serialization(message)) => {
                ReportStatus::Rejected(message.clone())
            }
            _ => ReportStatus::Pending,
        }
    }
}

impl From<BatchFailure> for ServiceError {
    fn from(failure: BatchFailure) -> Self {
        match failure {
            BatchFailure::Api(e) => Self::Api(e),
            BatchFailure::Reconcile(message) => Self::Reconcile(message),
        }
    }
}

/// A caller waiting for its reports to be submitted.
struct ReportWaiter {
    outstanding: HashSet<SdkMessageId>,
    delivered: usize,
    failure: Option<BatchFailure>,
    reply: WaiterReply,
}

enum WaiterReply {
    Event(
        Vec<EventOutcome>,
        oneshot::Sender<Result<Vec<EventOutcome>, ServiceError>>,
    ),
    Report {
        message_id: String,
        reply: oneshot::Sender<Result<CampaignState, ServiceError>>,
    },
    Sync(oneshot::Sender<Result<SyncSummary, ServiceError>>),
}

impl ReportWaiter {
    fn new(outstanding: HashSet<SdkMessageId>, reply: WaiterReply) -> Self {
        Self {
            outstanding,
            delivered: 0,
            failure: None,
            reply,
        }
    }
}

/// A caller waiting for a seen request.
enum SeenWaiter {
    SetSeen(oneshot::Sender<Result<(), ServiceError>>),
    Sync {
        summary: SyncSummary,
        failure: Option<BatchFailure>,
        reply: oneshot::Sender<Result<SyncSummary, ServiceError>>,
    },
}

impl SeenWaiter {
    fn resolve(self, result: Result<(), &ApiError>) {
        match self {
            Self::SetSeen(reply) => {
                let _ = reply.send(result.map_err(|e| ServiceError::Api(e.clone())));
            }
            Self::Sync {
                summary,
                failure,
                reply,
            } => {
                let outcome: Result<SyncSummary, ServiceError> = match (failure, result) {
                    (Some(failure), _) => Err(failure.into()),
                    (None, Err(e)) => Err(ServiceError::Api(e.clone())),
                    (None, Ok(())) => Ok(summary),
                };
                let _ = reply.send(outcome);
            }
        }
    }
}

struct SeenInFlight {
    handle: JoinHandle<()>,
    waiters: Vec<SeenWaiter>,
}

struct Worker {
    config: GeoConfig,
    store: Arc<dyn CampaignStore>,
    location: Arc<dyn LocationMonitor>,
    reconciler: OfflineReportReconciler,
    clock: Clock,
    events: broadcast::Sender<GeoEvent>,
    commands: mpsc::WeakUnboundedSender<Command>,
    campaigns: BTreeMap<String, GeoCampaignMessage>,
    records: BTreeMap<String, MessageRecord>,
    buffer: ReportBuffer,
    monitor: RegionMonitor,
    last_refresh: Option<Coordinate>,
    report_task: Option<JoinHandle<()>>,
    seen_in_flight: Option<SeenInFlight>,
    report_waiters: Vec<ReportWaiter>,
    seen_waiters: Vec<SeenWaiter>,
    flush_requested: bool,
    seen_requested: bool,
}

impl Worker {
    async fn run(mut self, mut receiver: mpsc::UnboundedReceiver<Command>) {
        while let Some(command) = receiver.recv().await {
            if self.handle(command).await.is_break() {
                return;
            }
            while let Ok(command) = receiver.try_recv() {
                if self.handle(command).await.is_break() {
                    return;
                }
            }
            if std::mem::take(&mut self.flush_requested) {
                self.flush_reports();
            }
        }
        debug!("Geofencing worker exiting: all handles dropped");
    }

    async fn handle(&mut self, command: Command) -> ControlFlow<()> {
        match command {
            Command::AddMessage { payload, reply } => {
                let _ = reply.send(self.add_message(payload).await);
            }
            Command::RegionEvent {
                event_type,
                area_id,
                reply,
            } => self.region_event(event_type, &area_id, reply).await,
            Command::Report {
                event_type,
                area_id,
                campaign_id,
                reply,
            } => self.report(event_type, &area_id, &campaign_id, reply).await,
            Command::SetSeen { message_ids, reply } => self.set_seen(message_ids, reply).await,
            Command::Sync { reply } => self.sync(reply).await,
            Command::LocationChanged { location } => self.location_changed(location),
            Command::Sweep => self.sweep().await,
            Command::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
            Command::ReportCompleted { batch, result } => {
                self.report_completed(batch, result).await
            }
            Command::SeenCompleted { ids, result } => self.seen_completed(ids, result).await,
            Command::Stop { reply } => {
                self.shutdown();
                let _ = reply.send(());
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    /// Wall-clock time used for delivery windows.
    fn local_time(&self, now: DateTime<Utc>) -> NaiveDateTime {
        match self
            .config
            .delivery
            .utc_offset_minutes
            .and_then(|minutes| FixedOffset::east_opt(minutes * 60))
        {
            Some(offset) => now.with_timezone(&offset).naive_local(),
            None => now.with_timezone(&Local).naive_local(),
        }
    }

    fn current_location(&self) -> Option<Coordinate> {
        self.last_refresh
            .or_else(|| self.location.current_location())
    }

    fn emit(&self, event: GeoEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn apply_monitor(&self, actions: Vec<MonitorAction>) {
        for action in actions {
            match action {
                MonitorAction::Start(area) => {
                    debug!("Monitoring area {} ({:.0} m)", area.id, area.radius);
                    self.location.start_monitoring(&area);
                }
                MonitorAction::Stop(id) => {
                    debug!("No longer monitoring area {}", id);
                    self.location.stop_monitoring(&id);
                }
            }
        }
    }

    fn register_stored_campaigns(&mut self) {
        let now = self.now();
        let location = self.current_location();
        let live: Vec<GeoCampaignMessage> = self
            .campaigns
            .values()
            .filter(|c| c.campaign_state().accepts_events() && !c.is_expired(now))
            .cloned()
            .collect();
        for campaign in &live {
            let actions = self.monitor.add_campaign(campaign, location);
            self.apply_monitor(actions);
        }
    }

    // ===========================================
    // Campaigns
    // ===========================================

    async fn add_message(&mut self, payload: Value) -> Result<Option<String>, ServiceError> {
        let Some(campaign) = GeoCampaignMessage::from_payload(&payload) else {
            return Ok(None);
        };
        let message_id = campaign.message_id().to_string();
        if self.campaigns.contains_key(&message_id) {
            debug!("Campaign message {} already stored", message_id);
            return Ok(Some(message_id));
        }

        let now = self.now();
        let record = MessageRecord::for_campaign(&campaign, now);
        self.store.save_campaign(&campaign).await?;
        self.store.save_message(&record).await?;

        if campaign.campaign_state().accepts_events() && !campaign.is_expired(now) {
            let location = self.current_location();
            let actions = self.monitor.add_campaign(&campaign, location);
            self.apply_monitor(actions);
        }

        info!(
            "Added campaign {} ({} regions)",
            campaign.campaign_id(),
            campaign.regions().len()
        );
        self.emit(GeoEvent::MessageAdded {
            message_id: message_id.clone(),
            campaign_id: campaign.campaign_id().to_string(),
        });
        self.records.insert(message_id.clone(), record);
        self.campaigns.insert(message_id.clone(), campaign);
        Ok(Some(message_id))
    }

    async fn sweep(&mut self) {
        let now = self.now();
        let doomed: Vec<String> = self
            .campaigns
            .values()
            .filter(|c| c.is_expired(now) || c.campaign_state().is_terminal())
            .map(|c| c.message_id().to_string())
            .collect();

        if doomed.is_empty() {
            debug!("Sweep: no expired campaigns");
            return;
        }

        for id in doomed {
            if let Err(e) = self.store.remove_campaign(&id).await {
                error!("Sweep: failed to remove campaign {}: {}", id, e);
                continue;
            }
            let location = self.current_location();
            let actions = self.monitor.remove_campaign(&id, location);
            self.apply_monitor(actions);
            self.campaigns.remove(&id);
            info!("Sweep: removed campaign message {}", id);
        }
    }

    fn location_changed(&mut self, location: Coordinate) {
        let threshold = self.config.monitoring.refresh_threshold_meters;
        if self
            .last_refresh
            .is_some_and(|last| last.distance_to(&location) <= threshold)
        {
            return;
        }
        self.last_refresh = Some(location);
        let actions = self.monitor.refresh(Some(location));
        if !actions.is_empty() {
            debug!("Location changed, {} monitoring changes", actions.len());
        }
        self.apply_monitor(actions);
    }

    fn snapshot(&self) -> ServiceSnapshot {
        ServiceSnapshot {
            campaigns: self.campaigns.values().cloned().collect(),
            messages: self.records.values().cloned().collect(),
            pending_reports: self.buffer.total_count(),
            monitored_areas: self.monitor.monitored_count(),
        }
    }

    fn shutdown(&mut self) {
        if let Some(task) = self.report_task.take() {
            task.abort();
        }
        if let Some(in_flight) = self.seen_in_flight.take() {
            in_flight.handle.abort();
        }
        self.report_waiters.clear();
        self.seen_waiters.clear();
        let actions = self.monitor.clear();
        self.apply_monitor(actions);
        info!(
            "Geofencing service stopped ({} reports pending)",
            self.buffer.total_count()
        );
    }

    // ===========================================
    // Region events
    // ===========================================

    async fn region_event(
        &mut self,
        event_type: EventType,
        area_id: &str,
        reply: oneshot::Sender<Result<Vec<EventOutcome>, ServiceError>>,
    ) {
        let now = self.now();
        let local_now = self.local_time(now);
        let ids: Vec<String> = self
            .campaigns
            .values()
            .filter(|c| c.references_area(area_id))
            .map(|c| c.message_id().to_string())
            .collect();
        if ids.is_empty() {
            debug!("No campaign references area {}", area_id);
        }

        let mut outcomes = Vec::with_capacity(ids.len());
        let mut outstanding = HashSet::new();
        for id in ids {
            let Some(campaign) = self.campaigns.get(&id) else {
                continue;
            };
            let mut outcome = EventOutcome {
                message_id: id.clone(),
                campaign_id: campaign.campaign_id().to_string(),
                fired: false,
                provisional_message_id: None,
                state: campaign.campaign_state(),
                report: None,
            };

            let eligible = campaign.campaign_state().accepts_events()
                && campaign.is_live_in_region(area_id, event_type, now)
                && campaign.is_now_appropriate_time_for(event_type, local_now);
            if !eligible {
                debug!(
                    "Ignoring {} of {} for campaign {}",
                    event_type, area_id, outcome.campaign_id
                );
                outcomes.push(outcome);
                continue;
            }

            match self.fire(&id, area_id, event_type, now).await {
                Ok(report_id) => {
                    outstanding.insert(report_id);
                    outcome.fired = true;
                    outcome.provisional_message_id = Some(report_id);
                }
                Err(e) => {
                    error!("Failed to record {} of {}: {}", event_type, area_id, e);
                    let _ = reply.send(Err(e));
                    return;
                }
            }
            outcomes.push(outcome);
        }

        if outstanding.is_empty() {
            let _ = reply.send(Ok(outcomes));
        } else {
            self.report_waiters.push(ReportWaiter::new(
                outstanding,
                WaiterReply::Event(outcomes, reply),
            ));
        }
    }

    async fn report(
        &mut self,
        event_type: EventType,
        area_id: &str,
        campaign_id: &str,
        reply: oneshot::Sender<Result<CampaignState, ServiceError>>,
    ) {
        let Some(message_id) = self
            .campaigns
            .values()
            .find(|c| c.campaign_id() == campaign_id && c.references_area(area_id))
            .map(|c| c.message_id().to_string())
        else {
            let _ = reply.send(Err(ServiceError::UnknownCampaign(campaign_id.to_string())));
            return;
        };

        let now = self.now();
        match self.fire(&message_id, area_id, event_type, now).await {
            Ok(report_id) => self.report_waiters.push(ReportWaiter::new(
                HashSet::from([report_id]),
                WaiterReply::Report { message_id, reply },
            )),
            Err(e) => {
                let _ = reply.send(Err(e));
            }
        }
    }

    /// Count the occurrence, queue its report and, for entries, create the
    /// virtual message.
    ///
    /// The counter and the report are persisted before either reaches the
    /// in-memory state, so a failed write leaves nothing behind.
    async fn fire(
        &mut self,
        message_id: &str,
        area_id: &str,
        event_type: EventType,
        now: DateTime<Utc>,
    ) -> Result<SdkMessageId, ServiceError> {
        let mut campaign = self
            .campaigns
            .get(message_id)
            .cloned()
            .ok_or_else(|| ServiceError::UnknownCampaign(message_id.to_string()))?;
        self.buffer.check_capacity()?;

        let report = PendingReport::new(
            campaign.campaign_id(),
            area_id,
            event_type,
            campaign.message_id(),
            now,
        );
        campaign.trigger_event(area_id, event_type, now);

        let report_id = report.provisional_message_id;
        let virtual_message = match event_type {
            EventType::Entry => Some(MessageRecord::virtual_for(&campaign, report_id, now)),
            EventType::Exit => None,
        };
        self.store
            .add_pending_reports(std::slice::from_ref(&report))
            .await?;
        if let Err(e) = self.store.save_campaign(&campaign).await {
            if let Err(undo) = self.store.remove_pending_reports(&[report_id]).await {
                error!("Failed to withdraw report {}: {}", report_id, undo);
            }
            return Err(e.into());
        }
        self.buffer.enqueue(report.clone())?;
        self.campaigns.insert(message_id.to_string(), campaign);

        info!(
            "Fired {} of {} for campaign {}",
            event_type, area_id, report.campaign_id
        );
        let area_id = area_id.to_string();
        match virtual_message {
            Some(record) => {
                self.store.save_message(&record).await?;
                self.records.insert(record.message_id.clone(), record.clone());
                self.emit(GeoEvent::RegionEntered {
                    campaign_id: report.campaign_id,
                    area_id,
                });
                self.emit(GeoEvent::DeliverNotification(record));
            }
            None => self.emit(GeoEvent::RegionExited {
                campaign_id: report.campaign_id,
                area_id,
            }),
        }

        self.flush_requested = true;
        Ok(report_id)
    }

    // ===========================================
    // Reporting
    // ===========================================

    async fn sync(&mut self, reply: oneshot::Sender<Result<SyncSummary, ServiceError>>) {
        self.sweep().await;

        let outstanding: HashSet<SdkMessageId> = self.buffer.all_ids().into_iter().collect();
        if outstanding.is_empty() {
            self.flush_seen(vec![SeenWaiter::Sync {
                summary: SyncSummary::default(),
                failure: None,
                reply,
            }]);
            return;
        }

        info!("Syncing {} pending reports", outstanding.len());
        self.report_waiters
            .push(ReportWaiter::new(outstanding, WaiterReply::Sync(reply)));
        self.flush_requested = true;
    }

    fn flush_reports(&mut self) {
        if self.report_task.is_some() || self.buffer.is_empty() {
            return;
        }

        let now = self.now();
        let batch = self
            .buffer
            .dequeue_batch(self.config.reporting.batch_size.max(1));
        let request = self.reconciler.build_request(&batch, &self.campaigns, now);
        info!("Reporting {} geo events", batch.len());

        let reconciler = self.reconciler.clone();
        let commands = self.commands.clone();
        self.report_task = Some(tokio::spawn(async move {
            let result = reconciler.submit(&request).await;
            if let Some(commands) = commands.upgrade() {
                let _ = commands.send(Command::ReportCompleted { batch, result });
            }
        }));
    }

    async fn report_completed(
        &mut self,
        batch: Vec<PendingReport>,
        result: Result<GeoEventReportResponse, ApiError>,
    ) {
        self.report_task = None;
        let ids: Vec<SdkMessageId> = batch.iter().map(|r| r.provisional_message_id).collect();

        let failure = match result {
            Ok(response) => match self.reconcile(&batch, &response).await {
                Ok(()) => None,
                Err(e) => {
                    error!("Failed to apply report response: {}", e);
                    Some(BatchFailure::Reconcile(e.to_string()))
                }
            },
            Err(e) => {
                warn!("Reporting {} geo events failed: {}", ids.len(), e);
                Some(BatchFailure::Api(e))
            }
        };

        match &failure {
            None => {
                self.buffer.ack(&ids);
                info!("Reported {} geo events", ids.len());
            }
            Some(failure) if failure.is_retryable() => self.buffer.nack(&ids),
            Some(_) => {
                warn!("Dropping {} rejected geo event reports", ids.len());
                self.buffer.ack(&ids);
                if let Err(e) = self.store.remove_pending_reports(&ids).await {
                    error!("Failed to remove rejected reports: {}", e);
                }
            }
        }

        // A failed batch ends every wait; the remaining reports are not
        // retried until the next trigger.
        for mut waiter in std::mem::take(&mut self.report_waiters) {
            let matched = ids
                .iter()
                .filter(|id| waiter.outstanding.remove(*id))
                .count();
            match &failure {
                None => {
                    waiter.delivered += matched;
                    if waiter.outstanding.is_empty() {
                        self.finish_waiter(waiter);
                    } else {
                        self.report_waiters.push(waiter);
                    }
                }
                Some(failure) => {
                    waiter.failure = Some(failure.clone());
                    self.finish_waiter(waiter);
                }
            }
        }

        if failure.is_none() && !self.buffer.is_empty() {
            self.flush_requested = true;
        }
    }

    fn finish_waiter(&mut self, waiter: ReportWaiter) {
        let status = waiter
            .failure
            .as_ref()
            .map_or(ReportStatus::Delivered, BatchFailure::status);
        match waiter.reply {
            WaiterReply::Event(mut outcomes, reply) => {
                for outcome in outcomes.iter_mut().filter(|o| o.fired) {
                    if let Some(campaign) = self.campaigns.get(&outcome.message_id) {
                        outcome.state = campaign.campaign_state();
                    }
                    outcome.report = Some(status.clone());
                }
                let _ = reply.send(Ok(outcomes));
            }
            WaiterReply::Report { message_id, reply } => {
                let result: Result<CampaignState, ServiceError> = match waiter.failure {
                    Some(failure) if !failure.is_retryable() => Err(failure.into()),
                    _ => Ok(self
                        .campaigns
                        .get(&message_id)
                        .map_or(CampaignState::Finished, GeoCampaignMessage::campaign_state)),
                };
                let _ = reply.send(result);
            }
            WaiterReply::Sync(reply) => {
                let summary = SyncSummary {
                    reported: waiter.delivered,
                    pending: self.buffer.total_count(),
                };
                self.flush_seen(vec![SeenWaiter::Sync {
                    summary,
                    failure: waiter.failure,
                    reply,
                }]);
            }
        }
    }

    /// Apply a successful response: campaign transitions, discarded and
    /// confirmed virtual messages, removal of the confirmed reports.
    async fn reconcile(
        &mut self,
        batch: &[PendingReport],
        response: &GeoEventReportResponse,
    ) -> Result<(), StoreError> {
        let plan = ReconcilePlan::from_response(batch, response);

        for (campaign_id, event) in &plan.transitions {
            self.apply_transition(campaign_id, *event).await?;
        }

        let discarded = self
            .reconciler
            .apply_discards(self.store.as_ref(), &plan.discards, &mut self.records)
            .await?;
        if !discarded.is_empty() {
            debug!("Discarded {} virtual messages", discarded.len());
        }

        let confirmed = self
            .reconciler
            .apply_rewrites(self.store.as_ref(), &plan.rewrites, &mut self.records)
            .await?;

        self.store.remove_pending_reports(&plan.acknowledged).await?;

        let replay = confirmed.iter().any(|rewrite| {
            self.records
                .get(&rewrite.confirmed)
                .is_some_and(MessageRecord::needs_seen_report)
        });
        for rewrite in confirmed {
            self.emit(GeoEvent::MessageIdConfirmed {
                provisional: rewrite.provisional,
                confirmed: rewrite.confirmed,
            });
        }
        if replay {
            debug!("Replaying deferred seen status");
            self.flush_seen(Vec::new());
        }
        Ok(())
    }

    async fn apply_transition(
        &mut self,
        campaign_id: &str,
        event: CampaignEvent,
    ) -> Result<(), StoreError> {
        let ids: Vec<String> = self
            .campaigns
            .values()
            .filter(|c| c.campaign_id() == campaign_id)
            .map(|c| c.message_id().to_string())
            .collect();

        for id in ids {
            let Some(campaign) = self.campaigns.get_mut(&id) else {
                continue;
            };
            let (state, actions) = campaign.campaign_state().on_event(event);
            campaign.set_campaign_state(state);
            let campaign = campaign.clone();

            for action in actions {
                match action {
                    CampaignAction::StopMonitoring => {
                        let location = self.current_location();
                        let changes = self.monitor.remove_campaign(&id, location);
                        self.apply_monitor(changes);
                    }
                    CampaignAction::ResumeMonitoring => {
                        if !campaign.is_expired(self.now()) {
                            let location = self.current_location();
                            let changes = self.monitor.add_campaign(&campaign, location);
                            self.apply_monitor(changes);
                        }
                    }
                    CampaignAction::Persist => self.store.save_campaign(&campaign).await?,
                    CampaignAction::EmitStateChanged(state) => {
                        info!("Campaign {} is now {:?}", campaign_id, state);
                        self.emit(GeoEvent::CampaignStateChanged {
                            campaign_id: campaign_id.to_string(),
                            state,
                        });
                    }
                }
            }
        }
        Ok(())
    }

    // ===========================================
    // Seen status
    // ===========================================

    async fn set_seen(
        &mut self,
        message_ids: Vec<String>,
        reply: oneshot::Sender<Result<(), ServiceError>>,
    ) {
        let now = self.now();
        for id in &message_ids {
            let Some(record) = self.records.get_mut(id) else {
                debug!("Ignoring seen status for unknown message {}", id);
                continue;
            };
            if !record.mark_seen(now) {
                continue;
            }
            if let Err(e) = self.store.save_message(record).await {
                let _ = reply.send(Err(e.into()));
                return;
            }
            if record.is_provisional() {
                debug!("Deferring seen status of provisional message {}", id);
            }
        }
        self.flush_seen(vec![SeenWaiter::SetSeen(reply)]);
    }

    /// Send seen status for every record that is due. At most one request
    /// is in flight; waiters arriving meanwhile are served by the next one.
    fn flush_seen(&mut self, waiters: Vec<SeenWaiter>) {
        self.seen_waiters.extend(waiters);
        if self.seen_in_flight.is_some() {
            self.seen_requested = true;
            return;
        }
        self.seen_requested = false;

        let request = OfflineReportReconciler::build_seen_request(self.records.values(), self.now());
        let waiters = std::mem::take(&mut self.seen_waiters);
        if request.messages.is_empty() {
            for waiter in waiters {
                waiter.resolve(Ok(()));
            }
            return;
        }

        let ids: Vec<String> = request
            .messages
            .iter()
            .map(|m| m.message_id.clone())
            .collect();
        debug!("Sending seen status for {} messages", ids.len());

        let reconciler = self.reconciler.clone();
        let commands = self.commands.clone();
        let handle = tokio::spawn(async move {
            let result = reconciler.submit_seen(&request).await;
            if let Some(commands) = commands.upgrade() {
                let _ = commands.send(Command::SeenCompleted { ids, result });
            }
        });
        self.seen_in_flight = Some(SeenInFlight { handle, waiters });
    }

    async fn seen_completed(&mut self, ids: Vec<String>, result: Result<(), ApiError>) {
        let waiters = self
            .seen_in_flight
            .take()
            .map(|in_flight| in_flight.waiters)
            .unwrap_or_default();

        match &result {
            Ok(()) => {
                for id in &ids {
                    let Some(record) = self.records.get_mut(id) else {
                        continue;
                    };
                    record.confirm_seen();
                    if let Err(e) = self.store.save_message(record).await {
                        error!("Failed to persist seen status of {}: {}", id, e);
                    }
                }
                info!("Reported seen status for {} messages", ids.len());
            }
            Err(e) => warn!("Seen status report failed: {}", e),
        }

        for waiter in waiters {
            waiter.resolve(result.as_ref().copied());
        }

        if self.seen_requested || !self.seen_waiters.is_empty() {
            self.flush_seen(Vec::new());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::MockReportingApi;
    use crate::config::CleanupConfig;
    use crate::location::MockLocationMonitor;
    use crate::store::MemoryStore;
    use chrono::{Duration, TimeZone};
    use serde_json::json;
    use std::sync::Mutex;

    struct Harness {
        api: MockReportingApi,
        location: MockLocationMonitor,
        store: MemoryStore,
        now: Arc<Mutex<DateTime<Utc>>>,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                api: MockReportingApi::new(),
                location: MockLocationMonitor::new(),
                store: MemoryStore::new(),
                now: Arc::new(Mutex::new(Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap())),
            }
        }

        fn config() -> GeoConfig {
            let mut config = GeoConfig::default();
            config.delivery.utc_offset_minutes = Some(0);
            config.cleanup.enabled = false;
            config
        }

        fn deps(&self) -> ServiceDeps {
            let now = Arc::clone(&self.now);
            ServiceDeps::new(
                Arc::new(self.api.clone()),
                Arc::new(self.location.clone()),
                Arc::new(self.store.clone()),
            )
            .with_clock(Arc::new(move || *now.lock().unwrap()))
        }

        async fn start(&self) -> GeofencingService {
            self.start_with(Self::config()).await
        }

        async fn start_with(&self, config: GeoConfig) -> GeofencingService {
            GeofencingService::start(config, self.deps()).await.unwrap()
        }

        fn advance(&self, by: Duration) {
            *self.now.lock().unwrap() += by;
        }
    }

    fn campaign(message_id: &str, extra: Value) -> Value {
        let mut data = json!({
            "campaignId": format!("c-{message_id}"),
            "messageType": "geo",
            "silent": { "title": "Sale", "body": "Half price today" },
            "geo": [
                { "id": "a1", "latitude": 45.0, "longitude": 15.0, "radiusInMeters": 150.0, "title": "A" }
            ]
        });
        if let (Some(base), Some(extra)) = (data.as_object_mut(), extra.as_object()) {
            for (k, v) in extra {
                base.insert(k.clone(), v.clone());
            }
        }
        json!({ "messageId": message_id, "aps": { "content-available": 1 }, "internalData": data })
    }

    fn entry_and_exit() -> Value {
        json!({ "event": [
            { "type": "entry", "limit": 0, "timeoutInMinutes": 0 },
            { "type": "exit", "limit": 0, "timeoutInMinutes": 0 }
        ]})
    }

    fn drain(events: &mut broadcast::Receiver<GeoEvent>) -> Vec<GeoEvent> {
        let mut out = Vec::new();
        while let Ok(event) = events.try_recv() {
            out.push(event);
        }
        out
    }

    // ===========================================
    // Start and Monitoring Tests
    // ===========================================

    #[tokio::test]
    async fn start_requires_authorization() {
        let h = Harness::new();
        h.location.set_status(CapabilityStatus::Denied);

        let result = GeofencingService::start(Harness::config(), h.deps()).await;
        assert!(matches!(
            result,
            Err(ServiceError::NotAuthorized(CapabilityStatus::Denied))
        ));
    }

    #[tokio::test]
    async fn start_applies_distance_filter() {
        let h = Harness::new();
        let _service = h.start().await;
        assert_eq!(h.location.distance_filter(), Some(100.0));

        let h = Harness::new();
        let mut config = Harness::config();
        config.monitoring.distance_filter_meters = 25.0;
        let _service = h.start_with(config).await;
        assert_eq!(h.location.distance_filter(), Some(25.0));
    }

    #[tokio::test]
    async fn non_geo_payload_is_not_stored() {
        let h = Harness::new();
        let service = h.start().await;

        let added = service
            .add_message(json!({ "messageId": "plain", "aps": { "alert": "Hi" } }))
            .await
            .unwrap();
        assert_eq!(added, None);
        assert!(h.store.document().campaigns.is_empty());
    }

    #[tokio::test]
    async fn shared_region_is_registered_once() {
        let h = Harness::new();
        let service = h.start().await;

        service.add_message(campaign("m1", json!({}))).await.unwrap();
        service.add_message(campaign("m2", json!({}))).await.unwrap();
        assert_eq!(h.location.monitored_ids(), vec!["a1".to_string()]);
        assert_eq!(h.location.start_calls(), 1);

        // Finishing one campaign keeps the area for the other.
        h.api.finish_campaign("c-m1");
        let state = service.report(EventType::Entry, "a1", "c-m1").await.unwrap();
        assert_eq!(state, CampaignState::Finished);
        assert_eq!(h.location.monitored_ids(), vec!["a1".to_string()]);
        assert_eq!(h.location.stop_calls(), 0);

        service.sync().await.unwrap();
        let snapshot = service.snapshot().await.unwrap();
        assert_eq!(snapshot.campaigns.len(), 1);
        assert_eq!(snapshot.campaigns[0].message_id(), "m2");
        assert_eq!(h.store.document().campaigns.len(), 1);
    }

    #[tokio::test]
    async fn location_change_monitors_nearest_regions() {
        let h = Harness::new();
        let mut config = Harness::config();
        config.monitoring.region_limit = 1;
        let service = h.start_with(config).await;

        service
            .add_message(campaign(
                "m1",
                json!({ "geo": [
                    { "id": "a1", "latitude": 45.0, "longitude": 15.0, "radiusInMeters": 150.0, "title": "A" },
                    { "id": "b1", "latitude": 46.0, "longitude": 16.0, "radiusInMeters": 150.0, "title": "B" }
                ]}),
            ))
            .await
            .unwrap();
        assert_eq!(h.location.monitored_ids(), vec!["a1".to_string()]);

        service.location_changed(Coordinate::new(46.001, 16.001)).unwrap();
        let snapshot = service.snapshot().await.unwrap();
        assert_eq!(snapshot.monitored_areas, 1);
        assert_eq!(h.location.monitored_ids(), vec!["b1".to_string()]);
    }

    // ===========================================
    // Region Event Tests
    // ===========================================

    #[tokio::test]
    async fn entry_fires_virtual_message_and_reports_it() {
        let h = Harness::new();
        let service = h.start().await;
        service.add_message(campaign("m1", json!({}))).await.unwrap();
        let mut events = service.subscribe();

        let outcomes = service.region_event(EventType::Entry, "a1").await.unwrap();
        assert_eq!(outcomes.len(), 1);
        let outcome = &outcomes[0];
        assert!(outcome.fired);
        assert_eq!(outcome.report, Some(ReportStatus::Delivered));
        assert_eq!(outcome.state, CampaignState::Active);
        let provisional = outcome.provisional_message_id.unwrap();

        let sent = h.api.sent_reports();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].reports[0].sdk_message_id, provisional);
        assert_eq!(sent[0].messages[0].message_id, "m1");

        let events = drain(&mut events);
        assert!(matches!(&events[0], GeoEvent::RegionEntered { area_id, .. } if area_id == "a1"));
        assert!(matches!(&events[1], GeoEvent::DeliverNotification(r) if r.message_id == provisional.to_string()));
        assert!(events.contains(&GeoEvent::MessageIdConfirmed {
            provisional,
            confirmed: "server-1".to_string(),
        }));

        let doc = h.store.document();
        assert!(doc.pending_reports.is_empty());
        assert!(doc.messages.iter().any(|m| m.message_id == "server-1"));
    }

    #[tokio::test]
    async fn concurrent_events_share_one_batch() {
        let h = Harness::new();
        let service = h.start().await;
        let mut extra = entry_and_exit();
        extra["geo"] = json!([
            { "id": "a1", "latitude": 45.0, "longitude": 15.0, "radiusInMeters": 150.0, "title": "A" },
            { "id": "b1", "latitude": 45.1, "longitude": 15.1, "radiusInMeters": 150.0, "title": "B" }
        ]);
        service.add_message(campaign("m1", extra)).await.unwrap();

        let (entry, exit) = tokio::join!(
            service.region_event(EventType::Entry, "a1"),
            service.region_event(EventType::Exit, "b1"),
        );
        let entry = entry.unwrap().remove(0);
        let exit = exit.unwrap().remove(0);
        assert!(entry.fired && exit.fired);
        assert_ne!(entry.provisional_message_id, exit.provisional_message_id);

        let sent = h.api.sent_reports();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].reports.len(), 2);
        assert!(sent[0].reports.iter().all(|r| r.campaign_id == "c-m1"));
        assert_eq!(sent[0].messages.len(), 1);
    }

    #[tokio::test]
    async fn exhausted_event_is_ignored() {
        let h = Harness::new();
        let service = h.start().await;
        service.add_message(campaign("m1", json!({}))).await.unwrap();

        assert!(service.region_event(EventType::Entry, "a1").await.unwrap()[0].fired);
        let second = service.region_event(EventType::Entry, "a1").await.unwrap();
        assert!(!second[0].fired);
        assert_eq!(second[0].report, None);

        // No exit event is defined.
        assert!(!service.region_event(EventType::Exit, "a1").await.unwrap()[0].fired);
        assert!(service.region_event(EventType::Entry, "zz").await.unwrap().is_empty());
        assert_eq!(h.api.sent_reports().len(), 1);
    }

    #[tokio::test]
    async fn delivery_window_gates_entry_only() {
        let h = Harness::new();
        let service = h.start().await;
        let mut extra = entry_and_exit();
        extra["deliveryTime"] = json!({ "timeInterval": "2300/0100" });
        service.add_message(campaign("m1", extra)).await.unwrap();

        assert!(!service.region_event(EventType::Entry, "a1").await.unwrap()[0].fired);
        assert!(service.region_event(EventType::Exit, "a1").await.unwrap()[0].fired);

        h.advance(Duration::hours(14));
        assert!(service.region_event(EventType::Entry, "a1").await.unwrap()[0].fired);
    }

    // ===========================================
    // Reporting Tests
    // ===========================================

    #[tokio::test]
    async fn offline_entry_is_reported_on_sync_and_seen_replayed() {
        let h = Harness::new();
        let service = h.start().await;
        service.add_message(campaign("m1", json!({}))).await.unwrap();

        h.api.set_reachable(false);
        let outcomes = service.region_event(EventType::Entry, "a1").await.unwrap();
        assert_eq!(outcomes[0].report, Some(ReportStatus::Pending));
        let provisional = outcomes[0].provisional_message_id.unwrap().to_string();

        // Seen status of a provisional id stays local.
        service.set_seen(&[provisional.clone()]).await.unwrap();
        assert!(h.api.sent_seen().is_empty());
        assert_eq!(h.store.document().pending_reports.len(), 1);

        h.api.set_reachable(true);
        let summary = service.sync().await.unwrap();
        assert_eq!(summary, SyncSummary { reported: 1, pending: 0 });

        let seen = h.api.sent_seen();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].messages[0].message_id, "server-1");

        let snapshot = service.snapshot().await.unwrap();
        assert_eq!(snapshot.pending_reports, 0);
        assert!(snapshot.messages.iter().all(|m| m.message_id != provisional));
    }

    #[tokio::test]
    async fn suspended_campaign_discards_virtual_message() {
        let h = Harness::new();
        let service = h.start().await;
        service.add_message(campaign("m1", entry_and_exit())).await.unwrap();
        let mut events = service.subscribe();

        h.api.suspend_campaign("c-m1");
        let outcomes = service.region_event(EventType::Entry, "a1").await.unwrap();
        assert_eq!(outcomes[0].state, CampaignState::Suspended);
        assert_eq!(outcomes[0].report, Some(ReportStatus::Delivered));
        assert!(h.location.monitored_ids().is_empty());
        assert!(drain(&mut events).contains(&GeoEvent::CampaignStateChanged {
            campaign_id: "c-m1".to_string(),
            state: CampaignState::Suspended,
        }));

        let snapshot = service.snapshot().await.unwrap();
        assert_eq!(snapshot.messages.len(), 1);
        assert_eq!(snapshot.messages[0].message_id, "m1");

        // Suspended campaigns ignore region events.
        assert!(!service.region_event(EventType::Exit, "a1").await.unwrap()[0].fired);

        // A direct report learns the campaign is active again.
        h.api.resume_campaign("c-m1");
        let state = service.report(EventType::Exit, "a1", "c-m1").await.unwrap();
        assert_eq!(state, CampaignState::Active);
        assert_eq!(h.location.monitored_ids(), vec!["a1".to_string()]);
    }

    #[tokio::test]
    async fn report_for_unknown_campaign_fails() {
        let h = Harness::new();
        let service = h.start().await;
        service.add_message(campaign("m1", json!({}))).await.unwrap();

        let err = service
            .report(EventType::Entry, "b1", "c-m1")
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::UnknownCampaign(id) if id == "c-m1"));
    }

    #[tokio::test]
    async fn failed_report_stays_pending() {
        let h = Harness::new();
        let service = h.start().await;
        service.add_message(campaign("m1", json!({}))).await.unwrap();

        h.api.set_reachable(false);
        service.region_event(EventType::Entry, "a1").await.unwrap();

        let err = service.sync().await.unwrap_err();
        assert!(matches!(err, ServiceError::Api(ApiError::Unreachable(_))));
        assert_eq!(service.snapshot().await.unwrap().pending_reports, 1);
        assert_eq!(h.store.document().pending_reports.len(), 1);
    }

    #[tokio::test]
    async fn validation_error_is_surfaced() {
        let h = Harness::new();
        let service = h.start().await;
        service.add_message(campaign("m1", entry_and_exit())).await.unwrap();

        h.api.fail_next_report(ApiError::Validation("unknown area".to_string()));
        let outcomes = service.region_event(EventType::Entry, "a1").await.unwrap();
        assert_eq!(
            outcomes[0].report,
            Some(ReportStatus::Rejected("unknown area".to_string()))
        );

        h.api.fail_next_report(ApiError::Validation("unknown area".to_string()));
        let err = service
            .report(EventType::Exit, "a1", "c-m1")
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Api(ApiError::Validation(_))));
        assert_eq!(service.snapshot().await.unwrap().pending_reports, 0);
        assert!(h.store.document().pending_reports.is_empty());
    }

    #[tokio::test]
    async fn rejected_report_is_not_resent() {
        let h = Harness::new();
        let service = h.start().await;
        service.add_message(campaign("m1", entry_and_exit())).await.unwrap();

        h.api.set_reachable(false);
        service.region_event(EventType::Entry, "a1").await.unwrap();
        h.api.set_reachable(true);

        h.api.fail_next_report(ApiError::Validation("unknown area".to_string()));
        let err = service.sync().await.unwrap_err();
        assert!(matches!(err, ServiceError::Api(ApiError::Validation(_))));
        assert_eq!(service.snapshot().await.unwrap().pending_reports, 0);

        for _ in 0..3 {
            assert_eq!(service.sync().await.unwrap(), SyncSummary::default());
        }
        assert!(h.api.sent_reports().is_empty());
        assert!(h.store.document().pending_reports.is_empty());

        // Later events still go through.
        service.region_event(EventType::Exit, "a1").await.unwrap();
        let sent = h.api.sent_reports();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].reports.len(), 1);
        assert_eq!(sent[0].reports[0].event, EventType::Exit);
    }

    #[tokio::test]
    async fn failed_write_does_not_count_the_event() {
        let h = Harness::new();
        let service = h.start().await;
        service.add_message(campaign("m1", json!({}))).await.unwrap();

        h.store.fail_next_write("disk full");
        let err = service.report(EventType::Entry, "a1", "c-m1").await.unwrap_err();
        assert!(matches!(err, ServiceError::Store(_)));

        let snapshot = service.snapshot().await.unwrap();
        assert_eq!(snapshot.pending_reports, 0);
        assert!(snapshot.messages.is_empty());
        let region = snapshot.campaigns[0].region("a1").unwrap();
        assert_eq!(region.event(EventType::Entry).unwrap().occurrence_count(), 0);
        assert!(h.store.document().pending_reports.is_empty());
        assert!(h.api.sent_reports().is_empty());

        // The event is still available once the store recovers.
        let state = service.report(EventType::Entry, "a1", "c-m1").await.unwrap();
        assert_eq!(state, CampaignState::Active);
        assert_eq!(h.api.sent_reports().len(), 1);
    }

    #[tokio::test]
    async fn seen_status_of_confirmed_message_is_sent() {
        let h = Harness::new();
        let service = h.start().await;
        service.add_message(campaign("m1", json!({}))).await.unwrap();
        service.region_event(EventType::Entry, "a1").await.unwrap();

        service.set_seen(&["server-1".to_string()]).await.unwrap();
        let seen = h.api.sent_seen();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].messages[0].message_id, "server-1");

        // Already reported.
        service.set_seen(&["server-1".to_string()]).await.unwrap();
        assert_eq!(h.api.sent_seen().len(), 1);
    }

    // ===========================================
    // Lifecycle Tests
    // ===========================================

    #[tokio::test]
    async fn counters_survive_restart() {
        let h = Harness::new();
        let service = h.start().await;
        service.add_message(campaign("m1", json!({}))).await.unwrap();
        assert!(service.region_event(EventType::Entry, "a1").await.unwrap()[0].fired);
        service.stop().await;

        let restarted = h.start().await;
        let snapshot = restarted.snapshot().await.unwrap();
        assert_eq!(snapshot.campaigns.len(), 1);
        assert_eq!(snapshot.monitored_areas, 1);
        assert!(!restarted.region_event(EventType::Entry, "a1").await.unwrap()[0].fired);
    }

    #[tokio::test]
    async fn stop_cancels_in_flight_report() {
        let h = Harness::new();
        let service = h.start().await;
        service.add_message(campaign("m1", json!({}))).await.unwrap();
        h.api.set_latency(std::time::Duration::from_secs(60));

        let (outcome, ()) = tokio::join!(service.region_event(EventType::Entry, "a1"), async {
            tokio::task::yield_now().await;
            service.stop().await;
        });
        assert!(matches!(outcome, Err(ServiceError::Stopped)));
        assert_eq!(h.store.document().pending_reports.len(), 1);
        assert!(h.location.monitored_ids().is_empty());
        assert!(matches!(service.snapshot().await, Err(ServiceError::Stopped)));
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_task_removes_expired_campaigns() {
        let h = Harness::new();
        let mut config = Harness::config();
        config.cleanup = CleanupConfig {
            interval_secs: 60,
            enabled: true,
        };
        let service = h.start_with(config).await;
        service
            .add_message(campaign(
                "m1",
                json!({ "expiryTime": "2024-05-01T11:00:00Z" }),
            ))
            .await
            .unwrap();
        assert_eq!(h.location.monitored_ids().len(), 1);

        h.advance(Duration::hours(2));
        tokio::time::sleep(std::time::Duration::from_secs(61)).await;

        let snapshot = service.snapshot().await.unwrap();
        assert!(snapshot.campaigns.is_empty());
        assert!(h.location.monitored_ids().is_empty());
        assert!(h.store.document().campaigns.is_empty());
    }
}
