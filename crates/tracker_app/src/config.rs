use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use engine_logging::engine_info;
use serde::{Deserialize, Serialize};
use tracker_core::TrackerConfig;
use tracker_engine::{system_clock, ApiSettings, EngineSettings};

use crate::cli::Cli;

const DEFAULT_CONFIG_FILE: &str = "kbprogress.ron";

/// Settings read from the optional RON file; CLI flags win over it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub api: ApiSettings,
    pub cache_dir: PathBuf,
    pub tracker: TrackerConfig,
    pub poll_interval: Duration,
    pub max_poll_failures: u32,
    /// How often the staleness sweep runs while watching.
    pub tick_interval: Duration,
    pub knowledge_type: String,
    pub max_depth: u32,
}

impl Default for AppConfig {
    fn default() -> Self {
        let engine = EngineSettings::default();
        Self {
            api: ApiSettings::default(),
            cache_dir: PathBuf::from(".kbprogress"),
            tracker: engine.tracker,
            poll_interval: engine.poll_interval,
            max_poll_failures: engine.max_poll_failures,
            tick_interval: Duration::from_secs(30),
            knowledge_type: "technical".to_string(),
            max_depth: 2,
        }
    }
}

impl AppConfig {
    /// Reads `explicit`, or `./kbprogress.ron` when it exists, or falls back
    /// to defaults. A missing explicit file is an error.
    pub fn load(explicit: Option<&Path>) -> anyhow::Result<Self> {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => {
                let path = PathBuf::from(DEFAULT_CONFIG_FILE);
                if !path.exists() {
                    return Ok(Self::default());
                }
                path
            }
        };
        let content = fs::read_to_string(&path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config = ron::from_str(&content)
            .with_context(|| format!("parsing config {}", path.display()))?;
        engine_info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    pub fn apply_overrides(&mut self, cli: &Cli) {
        if let Some(base_url) = &cli.base_url {
            self.api.base_url = base_url.clone();
        }
        if let Some(cache_dir) = &cli.cache_dir {
            self.cache_dir = cache_dir.clone();
        }
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            tracker: self.tracker,
            poll_interval: self.poll_interval,
            max_poll_failures: self.max_poll_failures,
            clock: system_clock(),
        }
    }
}
