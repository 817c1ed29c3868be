use std::sync::Arc;

use engine_logging::{engine_debug, engine_warn};
use tracker_core::{JobId, ProgressItem};

use crate::KeyValueCache;

/// Key holding the JSON array of job ids that may still be running.
pub const ACTIVE_IDS_KEY: &str = "active_progress_ids";
/// Prefix of the per-job snapshot keys.
pub const SNAPSHOT_PREFIX: &str = "progress_snapshot:";

/// Persisted progress layout on top of a [`KeyValueCache`].
///
/// The active-id list and the snapshots live under different keys and are
/// never updated together; readers must not assume they agree. Every failure
/// is logged and absorbed so tracking keeps working in memory.
#[derive(Clone)]
pub struct ProgressStore {
    cache: Arc<dyn KeyValueCache>,
}

impl ProgressStore {
    pub fn new(cache: Arc<dyn KeyValueCache>) -> Self {
        Self { cache }
    }

    pub fn snapshot_key(job_id: &str) -> String {
        format!("{SNAPSHOT_PREFIX}{job_id}")
    }

    /// Ids in the persisted active list, in order, without duplicates.
    pub fn active_ids(&self) -> Vec<JobId> {
        let raw = match self.cache.get(ACTIVE_IDS_KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => return Vec::new(),
            Err(err) => {
                engine_warn!("Failed to read active progress ids: {}", err);
                return Vec::new();
            }
        };
        match serde_json::from_str::<Vec<JobId>>(&raw) {
            Ok(ids) => dedupe(ids),
            Err(err) => {
                engine_warn!("Ignoring unparsable active progress ids: {}", err);
                Vec::new()
            }
        }
    }

    /// The stored snapshot for `job_id`; `None` if missing or unparsable.
    pub fn load_snapshot(&self, job_id: &str) -> Option<ProgressItem> {
        let raw = match self.cache.get(&Self::snapshot_key(job_id)) {
            Ok(raw) => raw?,
            Err(err) => {
                engine_warn!(job: job_id, "Failed to read snapshot: {}", err);
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(item) => Some(item),
            Err(err) => {
                engine_warn!(job: job_id, "Unparsable snapshot: {}", err);
                None
            }
        }
    }

    /// Every active id paired with its snapshot, for startup reconciliation.
    pub fn load_entries(&self) -> Vec<(JobId, Option<ProgressItem>)> {
        self.active_ids()
            .into_iter()
            .map(|job_id| {
                let snapshot = self.load_snapshot(&job_id);
                (job_id, snapshot)
            })
            .collect()
    }

    /// Writes the snapshot and adds the id to the active list if missing.
    pub fn persist_item(&self, item: &ProgressItem) {
        let job_id = &item.progress_id;
        match serde_json::to_string(item) {
            Ok(json) => {
                if let Err(err) = self.cache.set(&Self::snapshot_key(job_id), &json) {
                    engine_warn!(job: job_id, "Failed to persist snapshot: {}", err);
                }
            }
            Err(err) => {
                engine_warn!(job: job_id, "Failed to serialize snapshot: {}", err);
            }
        }

        let mut ids = self.active_ids();
        if !ids.contains(job_id) {
            ids.push(job_id.clone());
            self.write_ids(&ids);
        }
    }

    /// Removes all `job_ids` from the active list in a single rewrite, then
    /// deletes their snapshots.
    pub fn forget(&self, job_ids: &[JobId]) {
        if job_ids.is_empty() {
            return;
        }
        // Also rewrites a corrupt or duplicated list into a clean one.
        let remaining: Vec<JobId> = self
            .active_ids()
            .into_iter()
            .filter(|id| !job_ids.contains(id))
            .collect();
        self.write_ids(&remaining);
        for job_id in job_ids {
            if let Err(err) = self.cache.remove(&Self::snapshot_key(job_id)) {
                engine_warn!(job: job_id, "Failed to delete snapshot: {}", err);
            }
        }
        engine_debug!("Forgot {} persisted jobs", job_ids.len());
    }

    fn write_ids(&self, ids: &[JobId]) {
        let json = match serde_json::to_string(ids) {
            Ok(json) => json,
            Err(err) => {
                engine_warn!("Failed to serialize active progress ids: {}", err);
                return;
            }
        };
        if let Err(err) = self.cache.set(ACTIVE_IDS_KEY, &json) {
            engine_warn!("Failed to write active progress ids: {}", err);
        }
    }
}

fn dedupe(ids: Vec<JobId>) -> Vec<JobId> {
    let mut unique: Vec<JobId> = Vec::with_capacity(ids.len());
    for id in ids {
        if !unique.contains(&id) {
            unique.push(id);
        }
    }
    unique
}
