use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle status of a tracked job.
///
/// Serialized as the lowercase wire string. Anything the tracker does not
/// know about is a job-specific running phase (`crawling`, `storing`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ProgressStatus {
    Starting,
    Reconnecting,
    Stale,
    Cancelled,
    Failed,
    Completed,
    Running(String),
}

impl ProgressStatus {
    pub fn running(phase: impl Into<String>) -> Self {
        Self::from(phase.into())
    }

    /// `completed`, `failed` and `cancelled` accept no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Starting => "starting",
            Self::Reconnecting => "reconnecting",
            Self::Stale => "stale",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
            Self::Completed => "completed",
            Self::Running(phase) => phase,
        }
    }
}

impl From<String> for ProgressStatus {
    fn from(raw: String) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "starting" | "initializing" => Self::Starting,
            "reconnecting" => Self::Reconnecting,
            "stale" => Self::Stale,
            "cancelled" | "canceled" => Self::Cancelled,
            "failed" | "error" => Self::Failed,
            "completed" | "complete" => Self::Completed,
            "" => Self::Running("running".to_string()),
            phase => Self::Running(phase.to_string()),
        }
    }
}

impl From<&str> for ProgressStatus {
    fn from(raw: &str) -> Self {
        Self::from(raw.to_string())
    }
}

impl From<ProgressStatus> for String {
    fn from(status: ProgressStatus) -> Self {
        status.as_str().to_string()
    }
}

impl fmt::Display for ProgressStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
