use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use tokio::sync::broadcast;
use tracker_core::{
    CrawlRequest, JobId, JobRequest, ProgressItem, ProgressPatch, ProgressStatus, TrackerConfig,
    TrackerError,
};
use tracker_engine::{
    ApiError, ApiErrorKind, ArtifactList, CacheError, Clock, EngineError, EngineSettings,
    FileCache, JobApi, KeyValueCache, MemoryCache, ProgressStore, ProgressTracker, StatusReport,
    TrackerEvent, ACTIVE_IDS_KEY,
};

const MINUTE: u64 = 60_000;

fn init_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(engine_logging::initialize_for_tests);
}

type StatusResult = Result<Option<StatusReport>, ApiError>;

#[derive(Default)]
struct FakeApi {
    next_ids: Mutex<VecDeque<JobId>>,
    statuses: Mutex<HashMap<JobId, VecDeque<StatusResult>>>,
    initiated: Mutex<Vec<JobRequest>>,
    cancelled: Mutex<Vec<JobId>>,
    status_calls: AtomicUsize,
    refreshes: AtomicUsize,
}

impl FakeApi {
    fn with_ids(ids: &[&str]) -> Self {
        let api = Self::default();
        api.next_ids
            .lock()
            .unwrap()
            .extend(ids.iter().map(|id| id.to_string()));
        api
    }

    /// Responses are served in order; the last one repeats.
    fn script(&self, job_id: &str, responses: Vec<StatusResult>) {
        self.statuses
            .lock()
            .unwrap()
            .insert(job_id.to_string(), responses.into());
    }

    fn initiated(&self) -> usize {
        self.initiated.lock().unwrap().len()
    }
}

#[async_trait]
impl JobApi for FakeApi {
    async fn initiate(&self, request: &JobRequest) -> Result<JobId, ApiError> {
        self.initiated.lock().unwrap().push(request.clone());
        self.next_ids
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| ApiError::new(ApiErrorKind::HttpStatus(500), "server error"))
    }

    async fn status(&self, job_id: &str) -> StatusResult {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        let mut statuses = self.statuses.lock().unwrap();
        match statuses.get_mut(job_id) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap(),
            Some(queue) => queue.front().cloned().unwrap_or(Ok(None)),
            None => Ok(None),
        }
    }

    async fn cancel(&self, job_id: &str) -> Result<(), ApiError> {
        self.cancelled.lock().unwrap().push(job_id.to_string());
        Ok(())
    }

    async fn list_artifacts(&self) -> Result<ArtifactList, ApiError> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        Ok(ArtifactList::default())
    }
}

/// Counts rewrites of the active-id list.
#[derive(Default)]
struct CountingCache {
    inner: MemoryCache,
    list_writes: AtomicUsize,
}

impl KeyValueCache for CountingCache {
    fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        self.inner.get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), CacheError> {
        if key == ACTIVE_IDS_KEY {
            self.list_writes.fetch_add(1, Ordering::SeqCst);
        }
        self.inner.set(key, value)
    }

    fn remove(&self, key: &str) -> Result<(), CacheError> {
        self.inner.remove(key)
    }

    fn keys(&self) -> Result<Vec<String>, CacheError> {
        self.inner.keys()
    }
}

#[derive(Clone)]
struct ManualClock(Arc<AtomicU64>);

impl ManualClock {
    fn at(now: u64) -> Self {
        Self(Arc::new(AtomicU64::new(now)))
    }

    fn set(&self, now: u64) {
        self.0.store(now, Ordering::SeqCst);
    }

    fn clock(&self) -> Clock {
        let now = self.0.clone();
        Arc::new(move || now.load(Ordering::SeqCst))
    }
}

fn settings(clock: &ManualClock) -> EngineSettings {
    EngineSettings {
        tracker: TrackerConfig::default(),
        // Long enough that no poll happens unless a test asks for it.
        poll_interval: Duration::from_secs(3_600),
        max_poll_failures: 3,
        clock: clock.clock(),
    }
}

fn polling_settings(clock: &ManualClock, max_failures: u32) -> EngineSettings {
    EngineSettings {
        poll_interval: Duration::from_secs(1),
        max_poll_failures: max_failures,
        ..settings(clock)
    }
}

fn report(status: &str, percentage: f64) -> StatusReport {
    StatusReport {
        status: Some(status.into()),
        percentage: Some(percentage),
        ..StatusReport::default()
    }
}

fn crawl(url: &str) -> JobRequest {
    JobRequest::Crawl(CrawlRequest::new(url))
}

fn drain(events: &mut broadcast::Receiver<TrackerEvent>) -> Vec<TrackerEvent> {
    let mut drained = Vec::new();
    while let Ok(event) = events.try_recv() {
        drained.push(event);
    }
    drained
}

fn statuses(events: &[TrackerEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|event| match event {
            TrackerEvent::StatusChanged { status, .. } => Some(status.to_string()),
            _ => None,
        })
        .collect()
}

/// Lets the update pump and spawned timers catch up.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

#[tokio::test(start_paused = true)]
async fn tracked_job_runs_to_completion_and_refreshes_once() {
    init_logging();
    let clock = ManualClock::at(1_000);
    let api = Arc::new(FakeApi::default());
    let cache = Arc::new(MemoryCache::new());
    let store = ProgressStore::new(cache.clone());
    let tracker = ProgressTracker::new(api.clone(), cache, settings(&clock));
    let mut events = tracker.events();

    tracker
        .start_tracking(ProgressItem::new("job-1", 1_000))
        .await;
    assert_eq!(store.active_ids(), vec!["job-1"]);
    assert!(tracker.is_subscribed("job-1"));

    clock.set(2_000);
    tracker
        .observe_update(
            "job-1",
            ProgressPatch::at(2_000)
                .with_status("crawling")
                .with_percentage(40.0),
        )
        .await;
    assert_eq!(store.load_snapshot("job-1").unwrap().percentage, 40.0);

    tracker.complete("job-1").await;
    tracker.complete("job-1").await;

    assert!(tracker.is_empty());
    assert!(store.active_ids().is_empty());
    assert_eq!(store.load_snapshot("job-1"), None);
    assert!(!tracker.is_subscribed("job-1"));
    assert_eq!(api.refreshes.load(Ordering::SeqCst), 1);

    let events = drain(&mut events);
    assert_eq!(statuses(&events), vec!["starting", "crawling", "completed"]);
    assert!(events.contains(&TrackerEvent::SurfaceVisibility(true)));
    assert_eq!(
        events
            .iter()
            .filter(|event| matches!(event, TrackerEvent::ArtifactsRefreshed(_)))
            .count(),
        1
    );
}

#[tokio::test(start_paused = true)]
async fn failed_job_stays_visible_for_grace_period() {
    init_logging();
    let clock = ManualClock::at(1_000);
    let cache = Arc::new(MemoryCache::new());
    let store = ProgressStore::new(cache.clone());
    let tracker = ProgressTracker::new(Arc::new(FakeApi::default()), cache, settings(&clock));

    tracker
        .start_tracking(ProgressItem::new("job-1", 1_000))
        .await;
    tracker.fail("job-1", "crawler crashed").await;

    let item = tracker.get("job-1").expect("still visible");
    assert_eq!(item.status, ProgressStatus::Failed);
    assert_eq!(item.error.as_deref(), Some("crawler crashed"));
    assert!(store.active_ids().is_empty());

    tokio::time::sleep(Duration::from_secs(4)).await;
    assert!(tracker.get("job-1").is_some());

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(tracker.get("job-1").is_none());
}

#[tokio::test(start_paused = true)]
async fn cancelled_job_leaves_after_shorter_grace() {
    init_logging();
    let clock = ManualClock::at(1_000);
    let tracker = ProgressTracker::new(
        Arc::new(FakeApi::default()),
        Arc::new(MemoryCache::new()),
        settings(&clock),
    );

    tracker
        .start_tracking(ProgressItem::new("job-1", 1_000))
        .await;
    tracker.cancel("job-1").await;
    assert_eq!(
        tracker.get("job-1").map(|item| item.status),
        Some(ProgressStatus::Cancelled)
    );

    tokio::time::sleep(Duration::from_millis(2_100)).await;
    assert!(tracker.is_empty());
}

#[tokio::test(start_paused = true)]
async fn stop_cancels_on_server_and_marks_cancelled() {
    init_logging();
    let clock = ManualClock::at(1_000);
    let api = Arc::new(FakeApi::with_ids(&["job-1"]));
    let cache = Arc::new(MemoryCache::new());
    let store = ProgressStore::new(cache.clone());
    let tracker = ProgressTracker::new(api.clone(), cache, settings(&clock));

    let job_id = tracker
        .start(crawl("https://docs.example.com"))
        .await
        .expect("start ok");
    tracker.stop(&job_id).await.expect("stop ok");

    assert_eq!(*api.cancelled.lock().unwrap(), vec!["job-1"]);
    assert_eq!(
        tracker.get("job-1").map(|item| item.status),
        Some(ProgressStatus::Cancelled)
    );
    assert!(store.active_ids().is_empty());

    let err = tracker.stop("job-404").await.expect_err("unknown job");
    assert_eq!(err, TrackerError::UnknownJob("job-404".to_string()));
}

#[tokio::test(start_paused = true)]
async fn invalid_request_is_refused_before_the_api() {
    init_logging();
    let clock = ManualClock::at(1_000);
    let api = Arc::new(FakeApi::with_ids(&["job-1"]));
    let tracker = ProgressTracker::new(api.clone(), Arc::new(MemoryCache::new()), settings(&clock));

    let err = tracker
        .start(crawl("not a url"))
        .await
        .expect_err("invalid url");
    assert!(matches!(
        err,
        EngineError::Tracker(TrackerError::Validation(_))
    ));
    assert_eq!(api.initiated(), 0);
    assert!(tracker.is_empty());
}

#[tokio::test(start_paused = true)]
async fn failed_initiation_tracks_nothing() {
    init_logging();
    let clock = ManualClock::at(1_000);
    let api = Arc::new(FakeApi::default());
    let tracker = ProgressTracker::new(api.clone(), Arc::new(MemoryCache::new()), settings(&clock));

    let err = tracker
        .start(crawl("https://docs.example.com"))
        .await
        .expect_err("server refused");
    assert!(matches!(err, EngineError::Api(_)));
    assert!(tracker.is_empty());
}

#[tokio::test(start_paused = true)]
async fn retry_reissues_the_stored_request() {
    init_logging();
    let clock = ManualClock::at(1_000);
    let api = Arc::new(FakeApi::with_ids(&["job-1", "job-2"]));
    let cache = Arc::new(MemoryCache::new());
    let store = ProgressStore::new(cache.clone());
    let tracker = ProgressTracker::new(api.clone(), cache, settings(&clock));

    tracker
        .start(crawl("https://docs.example.com"))
        .await
        .expect("start ok");
    tracker.fail("job-1", "timeout").await;

    clock.set(3_000);
    let new_id = tracker.retry("job-1").await.expect("retry ok");
    assert_eq!(new_id, "job-2");
    assert!(tracker.get("job-1").is_none());

    let item = tracker.get("job-2").expect("tracked");
    assert_eq!(item.status, ProgressStatus::Starting);
    assert_eq!(item.source.as_deref(), Some("https://docs.example.com"));
    assert!(item.request.is_some());
    assert_eq!(store.active_ids(), vec!["job-2"]);
    assert_eq!(api.initiated(), 2);

    // The old id is retired; late news about it is ignored.
    tracker
        .observe_update("job-1", ProgressPatch::at(4_000).with_status("crawling"))
        .await;
    assert!(tracker.get("job-1").is_none());
}

#[tokio::test(start_paused = true)]
async fn retry_without_stored_request_is_refused() {
    init_logging();
    let clock = ManualClock::at(1_000);
    let api = Arc::new(FakeApi::with_ids(&["job-2"]));
    let tracker = ProgressTracker::new(api.clone(), Arc::new(MemoryCache::new()), settings(&clock));

    tracker
        .start_tracking(ProgressItem::new("job-1", 1_000))
        .await;
    tracker.fail("job-1", "boom").await;

    let err = tracker.retry("job-1").await.expect_err("nothing to retry");
    assert!(matches!(
        err,
        EngineError::Tracker(TrackerError::MissingRetryRequest(_))
    ));
    assert_eq!(api.initiated(), 0);
    assert!(tracker.get("job-1").is_some());
}

fn persist(store: &ProgressStore, id: &str, started_at: u64, status: ProgressStatus) {
    let mut item = ProgressItem::new(id, started_at);
    item.status = status;
    store.persist_item(&item);
}

#[tokio::test(start_paused = true)]
async fn reconcile_keeps_only_recent_live_jobs() {
    init_logging();
    let now = 20 * MINUTE;
    let clock = ManualClock::at(now);
    let cache = Arc::new(CountingCache::default());
    let store = ProgressStore::new(cache.clone());
    persist(&store, "A", now - MINUTE, ProgressStatus::Completed);
    persist(&store, "B", now - 10 * MINUTE, ProgressStatus::running("crawling"));
    persist(&store, "C", now - MINUTE, ProgressStatus::running("crawling"));
    cache.list_writes.store(0, Ordering::SeqCst);

    let api = Arc::new(FakeApi::default());
    api.script("C", vec![Ok(Some(report("crawling", 55.0)))]);
    let tracker = ProgressTracker::new(api.clone(), cache.clone(), settings(&clock));
    let mut events = tracker.events();

    assert_eq!(tracker.reconcile_on_startup().await, 1);

    assert_eq!(store.active_ids(), vec!["C"]);
    assert_eq!(store.load_snapshot("A"), None);
    assert_eq!(store.load_snapshot("B"), None);
    assert!(store.load_snapshot("C").is_some());
    assert_eq!(cache.list_writes.load(Ordering::SeqCst), 1);
    // Only the candidate is checked with the server.
    assert_eq!(api.status_calls.load(Ordering::SeqCst), 1);

    let item = tracker.get("C").expect("restored");
    assert_eq!(item.status, ProgressStatus::Reconnecting);
    assert_eq!(item.percentage, 55.0);
    assert!(tracker.is_subscribed("C"));

    let events = drain(&mut events);
    assert_eq!(statuses(&events), vec!["reconnecting"]);
    assert_eq!(
        events.last(),
        Some(&TrackerEvent::SurfaceVisibility(true))
    );
}

#[tokio::test(start_paused = true)]
async fn reconcile_drops_jobs_the_server_no_longer_knows() {
    init_logging();
    let now = 20 * MINUTE;
    let clock = ManualClock::at(now);
    let cache = Arc::new(MemoryCache::new());
    let store = ProgressStore::new(cache.clone());
    persist(&store, "gone", now - MINUTE, ProgressStatus::running("crawling"));
    persist(&store, "broken", now - MINUTE, ProgressStatus::running("crawling"));

    let api = Arc::new(FakeApi::default());
    api.script(
        "broken",
        vec![Err(ApiError::new(ApiErrorKind::Network, "connection refused"))],
    );
    let tracker = ProgressTracker::new(api, cache, settings(&clock));
    let mut events = tracker.events();

    assert_eq!(tracker.reconcile_on_startup().await, 0);
    assert!(store.active_ids().is_empty());
    assert_eq!(store.load_snapshot("gone"), None);
    assert_eq!(
        drain(&mut events),
        vec![TrackerEvent::SurfaceVisibility(false)]
    );
}

#[tokio::test(start_paused = true)]
async fn job_finished_while_away_refreshes_artifacts() {
    init_logging();
    let now = 20 * MINUTE;
    let clock = ManualClock::at(now);
    let cache = Arc::new(MemoryCache::new());
    let store = ProgressStore::new(cache.clone());
    persist(&store, "done", now - MINUTE, ProgressStatus::running("crawling"));

    let api = Arc::new(FakeApi::default());
    api.script("done", vec![Ok(Some(report("completed", 100.0)))]);
    let tracker = ProgressTracker::new(api.clone(), cache, settings(&clock));

    assert_eq!(tracker.reconcile_on_startup().await, 0);
    assert!(store.active_ids().is_empty());
    assert_eq!(api.refreshes.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn progress_survives_a_reload_through_the_file_cache() {
    init_logging();
    let dir = tempfile::tempdir().expect("tempdir");
    let clock = ManualClock::at(10 * MINUTE);

    let first = ProgressTracker::new(
        Arc::new(FakeApi::default()),
        Arc::new(FileCache::new(dir.path())),
        settings(&clock),
    );
    first
        .start_tracking(ProgressItem::new("job-1", 10 * MINUTE))
        .await;
    drop(first);

    clock.set(12 * MINUTE);
    let api = Arc::new(FakeApi::default());
    api.script("job-1", vec![Ok(Some(report("processing", 70.0)))]);
    let second = ProgressTracker::new(
        api,
        Arc::new(FileCache::new(dir.path())),
        settings(&clock),
    );

    assert_eq!(second.reconcile_on_startup().await, 1);
    let item = second.get("job-1").expect("restored");
    assert_eq!(item.status, ProgressStatus::Reconnecting);
    assert_eq!(item.percentage, 70.0);
}

#[tokio::test(start_paused = true)]
async fn polled_updates_drive_the_job_to_completion() {
    init_logging();
    let clock = ManualClock::at(1_000);
    let api = Arc::new(FakeApi::default());
    api.script(
        "job-1",
        vec![
            Ok(Some(report("crawling", 50.0))),
            Ok(Some(report("completed", 100.0))),
        ],
    );
    let tracker = ProgressTracker::new(
        api.clone(),
        Arc::new(MemoryCache::new()),
        polling_settings(&clock, 3),
    );

    tracker
        .start_tracking(ProgressItem::new("job-1", 1_000))
        .await;
    tokio::time::sleep(Duration::from_millis(1_500)).await;
    let item = tracker.get("job-1").expect("running");
    assert_eq!(item.status, ProgressStatus::running("crawling"));
    assert_eq!(item.percentage, 50.0);

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(tracker.is_empty());
    assert!(!tracker.is_subscribed("job-1"));
    assert_eq!(api.refreshes.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn broken_subscription_fails_the_job() {
    init_logging();
    let clock = ManualClock::at(1_000);
    let api = Arc::new(FakeApi::default());
    api.script(
        "job-1",
        vec![Err(ApiError::new(ApiErrorKind::Network, "connection reset"))],
    );
    let tracker = ProgressTracker::new(
        api,
        Arc::new(MemoryCache::new()),
        polling_settings(&clock, 2),
    );

    tracker
        .start_tracking(ProgressItem::new("job-1", 1_000))
        .await;
    tokio::time::sleep(Duration::from_millis(2_500)).await;

    let item = tracker.get("job-1").expect("visible during grace");
    assert_eq!(item.status, ProgressStatus::Failed);
    assert!(item
        .error
        .as_deref()
        .is_some_and(|error| error.contains("connection reset")));

    tokio::time::sleep(Duration::from_secs(6)).await;
    assert!(tracker.is_empty());
}

#[tokio::test(start_paused = true)]
async fn pushed_updates_share_the_tracker_queue() {
    init_logging();
    let clock = ManualClock::at(1_000);
    let cache = Arc::new(MemoryCache::new());
    let store = ProgressStore::new(cache.clone());
    let tracker = ProgressTracker::new(Arc::new(FakeApi::default()), cache, settings(&clock));
    let sender = tracker.push_sender();

    tracker
        .start_tracking(ProgressItem::new("job-1", 1_000))
        .await;
    assert!(sender.push("job-1", report("crawling", 30.0)));
    // Nobody announced job-9; it is adopted.
    assert!(sender.push("job-9", report("processing", 10.0)));
    settle().await;

    assert_eq!(tracker.get("job-1").map(|item| item.percentage), Some(30.0));
    assert!(tracker.get("job-9").is_some());
    assert!(tracker.is_subscribed("job-9"));
    assert_eq!(store.active_ids(), vec!["job-1", "job-9"]);

    assert!(sender.push_error("job-1", "socket closed"));
    settle().await;
    assert_eq!(
        tracker.get("job-1").map(|item| item.status),
        Some(ProgressStatus::Failed)
    );
}

#[tokio::test(start_paused = true)]
async fn tick_marks_idle_jobs_stale() {
    init_logging();
    let clock = ManualClock::at(1_000);
    let tracker = ProgressTracker::new(
        Arc::new(FakeApi::default()),
        Arc::new(MemoryCache::new()),
        settings(&clock),
    );
    tracker
        .start_tracking(ProgressItem::new("job-1", 1_000))
        .await;

    clock.set(1_000 + 4 * MINUTE);
    tracker.tick().await;
    assert_eq!(
        tracker.get("job-1").map(|item| item.status),
        Some(ProgressStatus::Starting)
    );

    clock.set(1_000 + 6 * MINUTE);
    tracker.tick().await;
    assert_eq!(
        tracker.get("job-1").map(|item| item.status),
        Some(ProgressStatus::Stale)
    );
}

#[tokio::test(start_paused = true)]
async fn dismiss_forgets_the_job() {
    init_logging();
    let clock = ManualClock::at(1_000);
    let cache = Arc::new(MemoryCache::new());
    let store = ProgressStore::new(cache.clone());
    let tracker = ProgressTracker::new(Arc::new(FakeApi::default()), cache, settings(&clock));

    tracker
        .start_tracking(ProgressItem::new("job-1", 1_000))
        .await;
    assert!(tracker.consume_dirty());
    tracker.dismiss("job-1").await;

    assert!(tracker.is_empty());
    assert!(!tracker.is_subscribed("job-1"));
    assert!(store.active_ids().is_empty());
    assert!(tracker.consume_dirty());
    assert!(!tracker.consume_dirty());
}

#[tokio::test(start_paused = true)]
async fn dropping_the_tracker_stops_polling() {
    init_logging();
    let clock = ManualClock::at(1_000);
    let api = Arc::new(FakeApi::default());
    let tracker = ProgressTracker::new(
        api.clone(),
        Arc::new(MemoryCache::new()),
        polling_settings(&clock, 3),
    );
    tracker
        .start_tracking(ProgressItem::new("job-1", 1_000))
        .await;
    drop(tracker);

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(api.status_calls.load(Ordering::SeqCst), 0);
}
