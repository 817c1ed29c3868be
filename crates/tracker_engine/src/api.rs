use tracker_core::{JobId, JobRequest};

use crate::{ApiError, ArtifactList, StatusReport};

/// Remote knowledge-base API the tracker depends on.
#[async_trait::async_trait]
pub trait JobApi: Send + Sync {
    /// Starts a crawl or upload and returns its progress id.
    async fn initiate(&self, request: &JobRequest) -> Result<JobId, ApiError>;

    /// Current status of a job; `Ok(None)` when the server does not know it.
    async fn status(&self, job_id: &str) -> Result<Option<StatusReport>, ApiError>;

    /// Best-effort cancellation request.
    async fn cancel(&self, job_id: &str) -> Result<(), ApiError>;

    async fn list_artifacts(&self) -> Result<ArtifactList, ApiError>;
}
