use crate::{JobId, ProgressItem, ProgressPatch, Timestamp};

#[derive(Debug, Clone, PartialEq)]
pub enum Msg {
    /// A job was just issued locally; start tracking it as `starting`.
    StartTracking { item: ProgressItem },
    /// Status observation for a job, pushed or polled.
    Update { job_id: JobId, patch: ProgressPatch },
    /// Job finished successfully.
    Completed { job_id: JobId, at: Timestamp },
    /// Job failed; stays visible for the failure grace period.
    Failed {
        job_id: JobId,
        error: String,
        at: Timestamp,
    },
    /// Job was cancelled; stays visible for the cancellation grace period.
    Cancelled { job_id: JobId, at: Timestamp },
    /// A grace-period timer for a terminal item fired.
    GraceElapsed { job_id: JobId },
    /// User closed the progress card.
    Dismiss { job_id: JobId, at: Timestamp },
    /// Persisted state read at startup: every active id and its snapshot, if
    /// one could be read and parsed.
    Restore {
        entries: Vec<(JobId, Option<ProgressItem>)>,
        now: Timestamp,
    },
    /// Server answers for the jobs queued by `Restore`.
    Verified {
        results: Vec<(JobId, Verification)>,
        at: Timestamp,
    },
    /// A retry is about to be issued; the old id must not be resumed on reload.
    RetryRequested { job_id: JobId },
    /// A retry was issued and the initiation API returned `new_id`.
    RetryStarted {
        previous: JobId,
        new_id: JobId,
        at: Timestamp,
    },
    /// User asked to stop a running job.
    StopRequested { job_id: JobId, at: Timestamp },
    /// The live subscription for a job broke.
    SubscriptionFailed {
        job_id: JobId,
        error: String,
        at: Timestamp,
    },
    /// Periodic timer; drives the staleness sweep.
    Tick { now: Timestamp },
}

/// Server-side answer for a restored job.
#[derive(Debug, Clone, PartialEq)]
pub enum Verification {
    /// The job still exists; the patch is its current status.
    Alive(ProgressPatch),
    /// Not found, or the status call failed.
    Gone,
}
