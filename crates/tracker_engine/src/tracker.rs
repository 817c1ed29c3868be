use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use engine_logging::{engine_debug, engine_info, engine_warn};
use futures_util::future::join_all;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracker_core::{
    update, Effect, JobId, JobRequest, Msg, ProgressItem, ProgressPatch, Timestamp, TrackerConfig,
    TrackerError, TrackerState, TrackerViewModel, Verification,
};

use crate::subscription::{spawn_poller, Inbound};
use crate::{ApiError, JobApi, KeyValueCache, ProgressStore, TrackerEvent, UpdateSender};

/// Source of "now" in milliseconds since the Unix epoch.
pub type Clock = Arc<dyn Fn() -> Timestamp + Send + Sync>;

pub fn system_clock() -> Clock {
    Arc::new(|| u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or(0))
}

const EVENT_CAPACITY: usize = 64;

#[derive(Clone)]
pub struct EngineSettings {
    pub tracker: TrackerConfig,
    /// How often a subscribed job's status is polled.
    pub poll_interval: Duration,
    /// Consecutive poll failures before the job is reported failed.
    pub max_poll_failures: u32,
    pub clock: Clock,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            tracker: TrackerConfig::default(),
            poll_interval: Duration::from_secs(2),
            max_poll_failures: 3,
            clock: system_clock(),
        }
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Tracker(#[from] TrackerError),
    #[error(transparent)]
    Api(#[from] ApiError),
}

/// Session-scoped progress tracker: owns the tracked set and executes the
/// effects produced by [`tracker_core::update`].
///
/// Built once per session and shared by handle. The state lock is never held
/// across an await, so operations on different jobs interleave freely.
pub struct ProgressTracker {
    me: Weak<Self>,
    state: Mutex<TrackerState>,
    api: Arc<dyn JobApi>,
    store: ProgressStore,
    updates: UpdateSender,
    settings: EngineSettings,
    subscriptions: Mutex<HashMap<JobId, JoinHandle<()>>>,
    events: broadcast::Sender<TrackerEvent>,
}

impl ProgressTracker {
    /// Must be called from within a Tokio runtime; spawns the update pump.
    pub fn new(
        api: Arc<dyn JobApi>,
        cache: Arc<dyn KeyValueCache>,
        settings: EngineSettings,
    ) -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let tracker = Arc::new_cyclic(|me| Self {
            me: me.clone(),
            state: Mutex::new(TrackerState::with_config(settings.tracker)),
            api,
            store: ProgressStore::new(cache),
            updates: UpdateSender::new(tx, settings.clock.clone()),
            settings,
            subscriptions: Mutex::new(HashMap::new()),
            events,
        });
        tokio::spawn(pump(Arc::downgrade(&tracker), rx));
        tracker
    }

    pub fn now(&self) -> Timestamp {
        (self.settings.clock)()
    }

    pub fn events(&self) -> broadcast::Receiver<TrackerEvent> {
        self.events.subscribe()
    }

    /// Second input channel, for updates pushed rather than polled.
    pub fn push_sender(&self) -> UpdateSender {
        self.updates.clone()
    }

    pub fn view(&self) -> TrackerViewModel {
        self.lock_state().view()
    }

    pub fn consume_dirty(&self) -> bool {
        self.lock_state().consume_dirty()
    }

    pub fn get(&self, job_id: &str) -> Option<ProgressItem> {
        self.lock_state().get(job_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock_state().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock_state().is_empty()
    }

    pub fn is_subscribed(&self, job_id: &str) -> bool {
        self.lock_subscriptions()
            .get(job_id)
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Validates and issues `request`, then tracks the returned job.
    pub async fn start(&self, request: JobRequest) -> Result<JobId, EngineError> {
        request.validate().map_err(TrackerError::from)?;
        let job_id = self.api.initiate(&request).await?;
        engine_info!(job: &job_id, "Started {:?} job", request.kind());
        let item = ProgressItem::for_request(job_id.clone(), &request, self.now());
        self.start_tracking(item).await;
        Ok(job_id)
    }

    pub async fn start_tracking(&self, item: ProgressItem) {
        self.apply(Msg::StartTracking { item }).await;
    }

    pub async fn observe_update(&self, job_id: impl Into<JobId>, patch: ProgressPatch) {
        self.apply(Msg::Update {
            job_id: job_id.into(),
            patch,
        })
        .await;
    }

    pub async fn complete(&self, job_id: impl Into<JobId>) {
        let at = self.now();
        self.apply(Msg::Completed {
            job_id: job_id.into(),
            at,
        })
        .await;
    }

    pub async fn fail(&self, job_id: impl Into<JobId>, error: impl Into<String>) {
        let at = self.now();
        self.apply(Msg::Failed {
            job_id: job_id.into(),
            error: error.into(),
            at,
        })
        .await;
    }

    pub async fn cancel(&self, job_id: impl Into<JobId>) {
        let at = self.now();
        self.apply(Msg::Cancelled {
            job_id: job_id.into(),
            at,
        })
        .await;
    }

    pub async fn dismiss(&self, job_id: impl Into<JobId>) {
        let at = self.now();
        self.apply(Msg::Dismiss {
            job_id: job_id.into(),
            at,
        })
        .await;
    }

    /// Restores jobs persisted by a previous session, keeping only those the
    /// server still knows. Returns the number of tracked jobs afterwards.
    pub async fn reconcile_on_startup(&self) -> usize {
        let entries = self.store.load_entries();
        let now = self.now();
        self.apply(Msg::Restore { entries, now }).await;
        self.len()
    }

    /// Re-issues a job from its stored request and tracks the new id.
    pub async fn retry(&self, job_id: &str) -> Result<JobId, EngineError> {
        let request = self.lock_state().retry_request(job_id)?;
        self.apply(Msg::RetryRequested {
            job_id: job_id.to_string(),
        })
        .await;
        let new_id = self.api.initiate(&request).await?;
        let at = self.now();
        self.apply(Msg::RetryStarted {
            previous: job_id.to_string(),
            new_id: new_id.clone(),
            at,
        })
        .await;
        Ok(new_id)
    }

    /// Requests cancellation and marks the job cancelled without waiting for
    /// the server to confirm.
    pub async fn stop(&self, job_id: &str) -> Result<(), TrackerError> {
        if !self.lock_state().contains(job_id) {
            return Err(TrackerError::UnknownJob(job_id.to_string()));
        }
        let at = self.now();
        self.apply(Msg::StopRequested {
            job_id: job_id.to_string(),
            at,
        })
        .await;
        Ok(())
    }

    /// Runs the staleness sweep.
    pub async fn tick(&self) {
        let now = self.now();
        self.apply(Msg::Tick { now }).await;
    }

    /// Stops every live subscription. Tracked state and persisted snapshots stay.
    pub fn shutdown(&self) {
        for (_, handle) in self.lock_subscriptions().drain() {
            handle.abort();
        }
    }

    async fn apply(&self, msg: Msg) {
        let effects = self.dispatch(msg);
        self.run_effects(effects).await;
    }

    fn dispatch(&self, msg: Msg) -> Vec<Effect> {
        let mut guard = self.lock_state();
        let state = std::mem::take(&mut *guard);
        let (state, effects) = update(state, msg);
        *guard = state;
        effects
    }

    async fn run_effects(&self, effects: Vec<Effect>) {
        let mut queue: VecDeque<Effect> = effects.into();
        while let Some(effect) = queue.pop_front() {
            match effect {
                Effect::PersistItem { item } => self.store.persist_item(&item),
                Effect::ForgetJobs { job_ids } => self.store.forget(&job_ids),
                Effect::VerifyJobs { job_ids } => {
                    let results = self.verify(job_ids).await;
                    let at = self.now();
                    queue.extend(self.dispatch(Msg::Verified { results, at }));
                }
                Effect::Subscribe { job_id } => self.subscribe(job_id),
                Effect::Unsubscribe { job_id } => self.unsubscribe(&job_id),
                Effect::CancelJob { job_id } => {
                    if let Err(err) = self.api.cancel(&job_id).await {
                        engine_warn!(job: &job_id, "Cancel request failed: {}", err);
                    }
                }
                Effect::RefreshArtifacts => self.refresh_artifacts().await,
                Effect::ScheduleRemoval { job_id, after } => self.schedule_removal(job_id, after),
                Effect::StatusChanged { job_id, status } => {
                    self.emit(TrackerEvent::StatusChanged { job_id, status });
                }
                Effect::SurfaceVisibility(visible) => {
                    self.emit(TrackerEvent::SurfaceVisibility(visible));
                }
            }
        }
    }

    async fn verify(&self, job_ids: Vec<JobId>) -> Vec<(JobId, Verification)> {
        let checks = job_ids.into_iter().map(|job_id| async move {
            let verification = match self.api.status(&job_id).await {
                Ok(Some(report)) => Verification::Alive(report.into_patch(self.now())),
                Ok(None) => Verification::Gone,
                Err(err) => {
                    engine_warn!(job: &job_id, "Could not verify, assuming it is gone: {}", err);
                    Verification::Gone
                }
            };
            (job_id, verification)
        });
        join_all(checks).await
    }

    fn subscribe(&self, job_id: JobId) {
        let mut subscriptions = self.lock_subscriptions();
        if subscriptions
            .get(&job_id)
            .is_some_and(|handle| !handle.is_finished())
        {
            return;
        }
        engine_debug!(job: &job_id, "Subscribing");
        let handle = spawn_poller(
            self.api.clone(),
            job_id.clone(),
            self.updates.clone(),
            self.settings.poll_interval,
            self.settings.max_poll_failures,
        );
        subscriptions.insert(job_id, handle);
    }

    fn unsubscribe(&self, job_id: &str) {
        if let Some(handle) = self.lock_subscriptions().remove(job_id) {
            handle.abort();
        }
    }

    fn schedule_removal(&self, job_id: JobId, after: Duration) {
        let me = self.me.clone();
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            if let Some(tracker) = me.upgrade() {
                tracker.apply(Msg::GraceElapsed { job_id }).await;
            }
        });
    }

    async fn refresh_artifacts(&self) {
        match self.api.list_artifacts().await {
            Ok(list) => {
                engine_debug!("Refreshed knowledge items: {}", list.items.len());
                self.emit(TrackerEvent::ArtifactsRefreshed(list));
            }
            Err(err) => {
                engine_warn!("Failed to refresh knowledge items: {}", err);
                self.emit(TrackerEvent::ArtifactsRefreshFailed(err.to_string()));
            }
        }
    }

    fn emit(&self, event: TrackerEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn lock_state(&self) -> MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_subscriptions(&self) -> MutexGuard<'_, HashMap<JobId, JoinHandle<()>>> {
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for ProgressTracker {
    fn drop(&mut self) {
        let subscriptions = self
            .subscriptions
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        for (_, handle) in subscriptions.drain() {
            handle.abort();
        }
    }
}

/// Feeds pushed and polled updates into the tracker, one at a time.
async fn pump(tracker: Weak<ProgressTracker>, mut rx: mpsc::UnboundedReceiver<Inbound>) {
    while let Some(inbound) = rx.recv().await {
        let Some(tracker) = tracker.upgrade() else {
            break;
        };
        match inbound {
            Inbound::Update { job_id, patch } => tracker.observe_update(job_id, patch).await,
            Inbound::Failed { job_id, error } => {
                let at = tracker.now();
                tracker
                    .apply(Msg::SubscriptionFailed { job_id, error, at })
                    .await;
            }
        }
    }
}
