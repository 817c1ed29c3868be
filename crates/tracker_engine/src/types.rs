use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracker_core::{JobId, ProgressPatch, ProgressStatus, Timestamp};

/// Point-in-time job status as the progress endpoint reports it.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    #[serde(default, alias = "progress_id")]
    pub progress_id: Option<JobId>,
    #[serde(default)]
    pub status: Option<ProgressStatus>,
    #[serde(default, alias = "progress")]
    pub percentage: Option<f64>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub log: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default, alias = "current_url")]
    pub current_url: Option<String>,
    #[serde(default, alias = "processed_pages")]
    pub processed_pages: Option<u32>,
    #[serde(default, alias = "total_pages")]
    pub total_pages: Option<u32>,
}

impl StatusReport {
    pub fn is_terminal(&self) -> bool {
        self.status.as_ref().is_some_and(ProgressStatus::is_terminal)
    }

    /// Stamps the report with the time it was received.
    pub fn into_patch(self, observed_at: Timestamp) -> ProgressPatch {
        ProgressPatch {
            status: self.status,
            percentage: self.percentage,
            message: self.message,
            log: self.log,
            error: self.error,
            current_url: self.current_url,
            processed_pages: self.processed_pages,
            total_pages: self.total_pages,
            observed_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnowledgeItem {
    #[serde(alias = "id")]
    pub source_id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub knowledge_type: Option<String>,
}

/// The consuming view's list, reloaded once per completed job.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ArtifactList {
    #[serde(default)]
    pub items: Vec<KnowledgeItem>,
    #[serde(default)]
    pub total: usize,
}

/// Notifications for the UI layer.
#[derive(Debug, Clone, PartialEq)]
pub enum TrackerEvent {
    StatusChanged {
        job_id: JobId,
        status: ProgressStatus,
    },
    SurfaceVisibility(bool),
    ArtifactsRefreshed(ArtifactList),
    ArtifactsRefreshFailed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct ApiError {
    pub kind: ApiErrorKind,
    pub message: String,
}

impl ApiError {
    pub fn new(kind: ApiErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiErrorKind {
    InvalidRequest,
    HttpStatus(u16),
    Timeout,
    Network,
    InvalidResponse,
}

impl fmt::Display for ApiErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiErrorKind::InvalidRequest => write!(f, "invalid request"),
            ApiErrorKind::HttpStatus(code) => write!(f, "http status {code}"),
            ApiErrorKind::Timeout => write!(f, "timeout"),
            ApiErrorKind::Network => write!(f, "network error"),
            ApiErrorKind::InvalidResponse => write!(f, "invalid response"),
        }
    }
}
