//! Progress tracker engine: collaborators, persistence and effect execution.
mod api;
mod cache;
mod filename;
mod http;
mod persist;
mod store;
mod subscription;
mod tracker;
mod types;

pub use api::JobApi;
pub use cache::{CacheError, FileCache, KeyValueCache, MemoryCache};
pub use filename::cache_filename;
pub use http::{ApiSettings, ReqwestJobApi};
pub use persist::{ensure_cache_dir, CacheDir, PersistError};
pub use store::{ProgressStore, ACTIVE_IDS_KEY, SNAPSHOT_PREFIX};
pub use subscription::UpdateSender;
pub use tracker::{system_clock, Clock, EngineError, EngineSettings, ProgressTracker};
pub use types::{ApiError, ApiErrorKind, ArtifactList, KnowledgeItem, StatusReport, TrackerEvent};
