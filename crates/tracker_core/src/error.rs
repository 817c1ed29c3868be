use thiserror::Error;

use crate::{JobId, ProgressStatus};

/// Errors reported to callers of tracker operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TrackerError {
    #[error("job {0} is not tracked")]
    UnknownJob(JobId),
    #[error("job {0} has no stored request parameters to retry with")]
    MissingRetryRequest(JobId),
    #[error("invalid job request: {0}")]
    Validation(#[from] ValidationError),
}

/// A job request that cannot be sent to the initiation API.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("crawl url is empty")]
    EmptyUrl,
    #[error("crawl url {url:?} is invalid: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("crawl url scheme {0:?} is not supported")]
    UnsupportedScheme(String),
    #[error("crawl depth must be at least 1")]
    ZeroDepth,
    #[error("upload path is empty")]
    EmptyPath,
}

/// Why a patch was not merged into a progress item.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MergeRejected {
    #[error("patch observed at {observed_at} is older than last update {last_updated}")]
    OutOfOrder { observed_at: u64, last_updated: u64 },
    #[error("item is already {0}")]
    Terminal(ProgressStatus),
    #[error("transition {from} -> {to} is not allowed")]
    Transition {
        from: ProgressStatus,
        to: ProgressStatus,
    },
}
