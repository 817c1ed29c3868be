//! Progress tracker core: pure state machine and view-model helpers.
mod config;
mod effect;
mod error;
mod item;
mod msg;
mod request;
mod state;
mod status;
mod update;
mod view_model;

pub use config::TrackerConfig;
pub use effect::Effect;
pub use error::{MergeRejected, TrackerError, ValidationError};
pub use item::{MergeOutcome, ProgressItem, ProgressPatch};
pub use msg::{Msg, Verification};
pub use request::{CrawlRequest, JobKind, JobRequest, UploadRequest};
pub use state::TrackerState;
pub use status::ProgressStatus;
pub use update::update;
pub use view_model::{ProgressCardView, TrackerViewModel};

/// Opaque job identifier assigned by the job-initiation API.
pub type JobId = String;

/// Milliseconds since the Unix epoch.
pub type Timestamp = u64;
