use crate::{JobId, JobKind, ProgressItem, ProgressStatus};

#[derive(Debug, Clone, PartialEq, Default)]
pub struct TrackerViewModel {
    pub surface_visible: bool,
    pub active_count: usize,
    pub cards: Vec<ProgressCardView>,
    pub dirty: bool,
}

/// Everything a progress card needs to render one job.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressCardView {
    pub job_id: JobId,
    pub kind: Option<JobKind>,
    pub source: Option<String>,
    pub status: ProgressStatus,
    pub percentage: f64,
    pub message: Option<String>,
    pub last_log: Option<String>,
    pub error: Option<String>,
    pub pages: Option<(u32, u32)>,
    pub can_stop: bool,
    pub can_retry: bool,
}

impl ProgressCardView {
    pub(crate) fn from_item(item: &ProgressItem) -> Self {
        let retryable = matches!(
            item.status,
            ProgressStatus::Failed | ProgressStatus::Cancelled | ProgressStatus::Stale
        );
        Self {
            job_id: item.progress_id.clone(),
            kind: item.kind,
            source: item.source.clone(),
            status: item.status.clone(),
            percentage: item.percentage,
            message: item.message.clone(),
            last_log: item.logs.last().cloned(),
            error: item.error.clone(),
            pages: item.processed_pages.zip(item.total_pages),
            can_stop: !item.is_terminal(),
            can_retry: retryable && item.request.is_some(),
        }
    }
}
