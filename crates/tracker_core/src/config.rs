use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Timing knobs for the tracker lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Active items with no update for this long are marked `stale`.
    pub stale_after: Duration,
    /// Persisted snapshots older than this are dropped on startup without
    /// asking the server.
    pub restore_max_age: Duration,
    /// How long a failed item stays visible before it is removed.
    pub failed_grace: Duration,
    /// How long a cancelled item stays visible before it is removed.
    pub cancelled_grace: Duration,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            stale_after: Duration::from_secs(5 * 60),
            restore_max_age: Duration::from_secs(5 * 60),
            failed_grace: Duration::from_secs(5),
            cancelled_grace: Duration::from_secs(2),
        }
    }
}

pub(crate) fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
