use serde::{Deserialize, Serialize};

use crate::{JobId, JobKind, JobRequest, MergeRejected, ProgressStatus, Timestamp};

/// One tracked long-running job (crawl or upload).
///
/// This is also the persisted snapshot format, hence the camelCase names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressItem {
    pub progress_id: JobId,
    #[serde(default)]
    pub kind: Option<JobKind>,
    pub status: ProgressStatus,
    pub started_at: Timestamp,
    pub last_updated: Timestamp,
    #[serde(default)]
    pub percentage: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub logs: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed_pages: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_pages: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<JobRequest>,
}

impl ProgressItem {
    pub fn new(progress_id: impl Into<JobId>, now: Timestamp) -> Self {
        Self {
            progress_id: progress_id.into(),
            kind: None,
            status: ProgressStatus::Starting,
            started_at: now,
            last_updated: now,
            percentage: 0.0,
            message: None,
            logs: Vec::new(),
            error: None,
            source: None,
            current_url: None,
            processed_pages: None,
            total_pages: None,
            request: None,
        }
    }

    /// A fresh item for a job just issued with `request`; keeps the request for retry.
    pub fn for_request(progress_id: impl Into<JobId>, request: &JobRequest, now: Timestamp) -> Self {
        Self {
            kind: Some(request.kind()),
            source: Some(request.source()),
            request: Some(request.clone()),
            ..Self::new(progress_id, now)
        }
    }

    /// Item built from an update for a job nobody has announced yet.
    pub(crate) fn from_patch(progress_id: JobId, patch: &ProgressPatch) -> Self {
        let mut item = Self::new(progress_id, patch.observed_at);
        item.status = patch
            .status
            .clone()
            .unwrap_or_else(|| ProgressStatus::running("running"));
        item.percentage = patch
            .percentage
            .filter(|p| p.is_finite())
            .map(clamp_percentage)
            .unwrap_or(0.0);
        item.message = patch.message.clone();
        item.logs.extend(patch.log.clone());
        item.current_url = patch.current_url.clone();
        item.source = patch.current_url.clone();
        item.processed_pages = patch.processed_pages;
        item.total_pages = patch.total_pages;
        item
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn age(&self, now: Timestamp) -> u64 {
        now.saturating_sub(self.started_at)
    }

    pub fn idle_for(&self, now: Timestamp) -> u64 {
        now.saturating_sub(self.last_updated)
    }

    /// Merges an observed update, enforcing the timestamp guard and the
    /// allowed status transitions. A rejected patch leaves `self` untouched.
    pub fn merge(&mut self, patch: &ProgressPatch) -> Result<MergeOutcome, MergeRejected> {
        if patch.observed_at < self.last_updated {
            return Err(MergeRejected::OutOfOrder {
                observed_at: patch.observed_at,
                last_updated: self.last_updated,
            });
        }
        if self.status.is_terminal() {
            if patch.status.as_ref() == Some(&self.status) {
                return Ok(MergeOutcome::Unchanged);
            }
            return Err(MergeRejected::Terminal(self.status.clone()));
        }
        if let Some(next) = &patch.status {
            check_transition(&self.status, next)?;
        }

        let previous = self.status.clone();
        match &patch.status {
            Some(next) => self.status = next.clone(),
            None if self.status == ProgressStatus::Stale => {
                self.status = ProgressStatus::running("running");
            }
            None => {}
        }
        if let Some(percentage) = patch.percentage.filter(|p| p.is_finite()) {
            self.percentage = self.percentage.max(clamp_percentage(percentage));
        }
        if let Some(message) = &patch.message {
            self.message = Some(message.clone());
        }
        if let Some(line) = &patch.log {
            if self.logs.last() != Some(line) {
                self.logs.push(line.clone());
            }
        }
        if self.status == ProgressStatus::Failed {
            self.error = patch.error.clone().or_else(|| self.error.take());
        }
        if patch.current_url.is_some() {
            self.current_url = patch.current_url.clone();
        }
        if patch.processed_pages.is_some() {
            self.processed_pages = patch.processed_pages;
        }
        if patch.total_pages.is_some() {
            self.total_pages = patch.total_pages;
        }
        self.last_updated = patch.observed_at;

        if previous == self.status {
            Ok(MergeOutcome::Updated)
        } else {
            Ok(MergeOutcome::StatusChanged { from: previous })
        }
    }
}

fn check_transition(from: &ProgressStatus, to: &ProgressStatus) -> Result<(), MergeRejected> {
    let allowed = match (from, to) {
        // Set by reconciliation and by the staleness sweep only.
        (_, ProgressStatus::Reconnecting | ProgressStatus::Stale) => false,
        (ProgressStatus::Running(_), ProgressStatus::Starting) => false,
        _ => true,
    };
    if allowed {
        Ok(())
    } else {
        Err(MergeRejected::Transition {
            from: from.clone(),
            to: to.clone(),
        })
    }
}

fn clamp_percentage(value: f64) -> f64 {
    value.clamp(0.0, 100.0)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    Updated,
    StatusChanged { from: ProgressStatus },
    /// Repeated terminal status; nothing to do.
    Unchanged,
}

/// A status observation for one job, pushed or polled.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressPatch {
    #[serde(default)]
    pub status: Option<ProgressStatus>,
    #[serde(default)]
    pub percentage: Option<f64>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub log: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub current_url: Option<String>,
    #[serde(default)]
    pub processed_pages: Option<u32>,
    #[serde(default)]
    pub total_pages: Option<u32>,
    /// When the observation was made; the ordering key for the stale-update guard.
    pub observed_at: Timestamp,
}

impl ProgressPatch {
    pub fn at(observed_at: Timestamp) -> Self {
        Self {
            observed_at,
            ..Self::default()
        }
    }

    pub fn with_status(mut self, status: impl Into<ProgressStatus>) -> Self {
        self.status = Some(status.into());
        self
    }

    pub fn with_percentage(mut self, percentage: f64) -> Self {
        self.percentage = Some(percentage);
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_log(mut self, line: impl Into<String>) -> Self {
        self.log = Some(line.into());
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}
