use std::sync::Arc;
use std::time::Duration;

use engine_logging::{engine_debug, engine_warn};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracker_core::{JobId, ProgressPatch};

use crate::{Clock, JobApi, StatusReport};

/// Everything the tracker receives from outside, in arrival order.
#[derive(Debug)]
pub(crate) enum Inbound {
    Update { job_id: JobId, patch: ProgressPatch },
    Failed { job_id: JobId, error: String },
}

/// Input channel for status pushed by the server (websocket, SSE, another tab).
///
/// Pushed and polled updates share one queue, so both reach the tracker in
/// the order they were received.
#[derive(Clone)]
pub struct UpdateSender {
    tx: mpsc::UnboundedSender<Inbound>,
    clock: Clock,
}

impl UpdateSender {
    pub(crate) fn new(tx: mpsc::UnboundedSender<Inbound>, clock: Clock) -> Self {
        Self { tx, clock }
    }

    /// Queues a server report stamped with the current time. Returns `false`
    /// once the tracker is gone.
    pub fn push(&self, job_id: impl Into<JobId>, report: StatusReport) -> bool {
        let patch = report.into_patch((self.clock)());
        self.push_patch(job_id, patch)
    }

    pub fn push_patch(&self, job_id: impl Into<JobId>, patch: ProgressPatch) -> bool {
        self.tx
            .send(Inbound::Update {
                job_id: job_id.into(),
                patch,
            })
            .is_ok()
    }

    /// Reports a broken live feed for one job.
    pub fn push_error(&self, job_id: impl Into<JobId>, error: impl Into<String>) -> bool {
        self.tx
            .send(Inbound::Failed {
                job_id: job_id.into(),
                error: error.into(),
            })
            .is_ok()
    }
}

/// Polls the status endpoint for one job until it reports a terminal status,
/// the feed breaks, or the task is aborted.
pub(crate) fn spawn_poller(
    api: Arc<dyn JobApi>,
    job_id: JobId,
    sender: UpdateSender,
    interval: Duration,
    max_failures: u32,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        // Give the server one interval to register a freshly started job.
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut failures = 0u32;
        loop {
            ticker.tick().await;
            let error = match api.status(&job_id).await {
                Ok(Some(report)) => {
                    failures = 0;
                    let terminal = report.is_terminal();
                    if !sender.push(job_id.clone(), report) || terminal {
                        break;
                    }
                    continue;
                }
                Ok(None) => "job no longer exists on the server".to_string(),
                Err(err) => err.to_string(),
            };
            failures += 1;
            engine_warn!(
                job: &job_id,
                "Polling failed ({}/{}): {}",
                failures,
                max_failures,
                error
            );
            if failures >= max_failures {
                sender.push_error(job_id.clone(), error);
                break;
            }
        }
        engine_debug!(job: &job_id, "Stopped polling");
    })
}
