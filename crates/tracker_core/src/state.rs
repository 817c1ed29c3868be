use std::collections::BTreeMap;

use crate::config::millis;
use crate::view_model::{ProgressCardView, TrackerViewModel};
use crate::{JobId, JobRequest, ProgressItem, Timestamp, TrackerConfig, TrackerError};

/// Authoritative in-memory set of tracked jobs, keyed by job id.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TrackerState {
    config: TrackerConfig,
    items: BTreeMap<JobId, ProgressItem>,
    /// Snapshots restored at startup that wait for the server's verdict.
    pending: BTreeMap<JobId, ProgressItem>,
    /// Recently removed ids and when they were removed.
    retired: BTreeMap<JobId, Timestamp>,
    surface_visible: bool,
    dirty: bool,
}

impl TrackerState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: TrackerConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn get(&self, job_id: &str) -> Option<&ProgressItem> {
        self.items.get(job_id)
    }

    pub fn contains(&self, job_id: &str) -> bool {
        self.items.contains_key(job_id)
    }

    pub fn items(&self) -> impl Iterator<Item = &ProgressItem> {
        self.items.values()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn is_verifying(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn surface_visible(&self) -> bool {
        self.surface_visible
    }

    /// Request parameters to re-issue `job_id` with.
    pub fn retry_request(&self, job_id: &str) -> Result<JobRequest, TrackerError> {
        let item = self
            .items
            .get(job_id)
            .ok_or_else(|| TrackerError::UnknownJob(job_id.to_string()))?;
        item.request
            .clone()
            .ok_or_else(|| TrackerError::MissingRetryRequest(job_id.to_string()))
    }

    pub fn view(&self) -> TrackerViewModel {
        TrackerViewModel {
            surface_visible: self.surface_visible,
            active_count: self.items.values().filter(|item| !item.is_terminal()).count(),
            cards: self.items.values().map(ProgressCardView::from_item).collect(),
            dirty: self.dirty,
        }
    }

    /// Returns whether anything changed since the last call and clears the flag.
    pub fn consume_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }

    pub(crate) fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub(crate) fn item_mut(&mut self, job_id: &str) -> Option<&mut ProgressItem> {
        self.items.get_mut(job_id)
    }

    pub(crate) fn insert(&mut self, item: ProgressItem) {
        self.retired.remove(&item.progress_id);
        self.items.insert(item.progress_id.clone(), item);
        self.dirty = true;
    }

    pub(crate) fn remove(&mut self, job_id: &str, at: Timestamp) -> Option<ProgressItem> {
        self.pending.remove(job_id);
        self.retired.insert(job_id.to_string(), at);
        let removed = self.items.remove(job_id);
        if removed.is_some() {
            self.dirty = true;
        }
        removed
    }

    pub(crate) fn is_retired(&self, job_id: &str) -> bool {
        self.retired.contains_key(job_id)
    }

    pub(crate) fn queue_verification(&mut self, item: ProgressItem) {
        self.pending.insert(item.progress_id.clone(), item);
    }

    pub(crate) fn take_pending(&mut self, job_id: &str) -> Option<ProgressItem> {
        self.pending.remove(job_id)
    }

    pub(crate) fn show_surface(&mut self, visible: bool) -> bool {
        let changed = self.surface_visible != visible;
        self.surface_visible = visible;
        if changed {
            self.dirty = true;
        }
        changed
    }

    pub(crate) fn items_mut(&mut self) -> impl Iterator<Item = &mut ProgressItem> {
        self.items.values_mut()
    }

    pub(crate) fn prune_retired(&mut self, now: Timestamp) {
        let keep_for = millis(self.config.stale_after);
        self.retired
            .retain(|_, removed_at| now.saturating_sub(*removed_at) <= keep_for);
    }
}
