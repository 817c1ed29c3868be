use std::time::Duration;

use crate::{JobId, ProgressItem, ProgressStatus};

#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Write the snapshot and make sure the id is in the persisted active list.
    PersistItem { item: ProgressItem },
    /// Drop ids from the persisted active list (one rewrite) and delete their snapshots.
    ForgetJobs { job_ids: Vec<JobId> },
    /// Ask the job-status API whether these restored jobs still exist.
    VerifyJobs { job_ids: Vec<JobId> },
    /// Start delivering live updates for a job.
    Subscribe { job_id: JobId },
    /// Stop delivering live updates for a job.
    Unsubscribe { job_id: JobId },
    /// Request cancellation from the job-control API.
    CancelJob { job_id: JobId },
    /// Reload the consuming knowledge-item list.
    RefreshArtifacts,
    /// Fire `Msg::GraceElapsed` for `job_id` after `after`.
    ScheduleRemoval { job_id: JobId, after: Duration },
    /// Status of a tracked job changed; drives notifications.
    StatusChanged {
        job_id: JobId,
        status: ProgressStatus,
    },
    /// Show or hide the progress surface.
    SurfaceVisibility(bool),
}
