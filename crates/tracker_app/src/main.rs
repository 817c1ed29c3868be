mod cli;
mod config;
mod logging;
mod render;
mod watch;

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use engine_logging::engine_info;
use tracker_core::{CrawlRequest, JobRequest, UploadRequest};
use tracker_engine::{ensure_cache_dir, FileCache, ProgressStore, ProgressTracker, ReqwestJobApi};

use crate::cli::{Cli, Command};
use crate::config::AppConfig;
use crate::watch::watch;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::initialize(cli.log, cli.verbose);

    let mut config = AppConfig::load(cli.config.as_deref())?;
    config.apply_overrides(&cli);
    engine_info!("Using API at {}", config.api.base_url);

    run(cli.command, &config).await
}

async fn run(command: Command, config: &AppConfig) -> anyhow::Result<()> {
    ensure_cache_dir(&config.cache_dir)
        .with_context(|| format!("preparing cache dir {}", config.cache_dir.display()))?;
    let cache = Arc::new(FileCache::new(&config.cache_dir));

    match command {
        Command::Crawl {
            url,
            depth,
            knowledge_type,
            tags,
        } => {
            let request = JobRequest::Crawl(CrawlRequest {
                url,
                knowledge_type: knowledge_type.unwrap_or_else(|| config.knowledge_type.clone()),
                tags,
                max_depth: depth.unwrap_or(config.max_depth),
            });
            start_and_watch(config, cache, request).await
        }
        Command::Upload {
            path,
            knowledge_type,
            tags,
        } => {
            let request = JobRequest::Upload(UploadRequest {
                path,
                knowledge_type: knowledge_type.unwrap_or_else(|| config.knowledge_type.clone()),
                tags,
            });
            start_and_watch(config, cache, request).await
        }
        Command::Resume => {
            let tracker = build_tracker(config, cache)?;
            if tracker.reconcile_on_startup().await == 0 {
                println!("No running jobs to resume.");
                return Ok(());
            }
            watch(&tracker, config.tick_interval).await
        }
        Command::Stop { id } => {
            let tracker = build_tracker(config, cache)?;
            tracker.reconcile_on_startup().await;
            tracker
                .stop(&id)
                .await
                .with_context(|| format!("stopping {id}"))?;
            println!("Stop requested for {id}.");
            watch(&tracker, config.tick_interval).await
        }
        Command::Dismiss { id } => {
            let tracker = build_tracker(config, cache)?;
            tracker.dismiss(id.clone()).await;
            println!("Forgot {id}.");
            Ok(())
        }
        Command::List => {
            let entries = ProgressStore::new(cache).load_entries();
            if entries.is_empty() {
                println!("No persisted jobs.");
            }
            for (job_id, snapshot) in &entries {
                println!("{}", render::snapshot_line(job_id, snapshot.as_ref()));
            }
            Ok(())
        }
    }
}

fn build_tracker(config: &AppConfig, cache: Arc<FileCache>) -> anyhow::Result<Arc<ProgressTracker>> {
    let api = ReqwestJobApi::new(config.api.clone()).context("building HTTP client")?;
    Ok(ProgressTracker::new(
        Arc::new(api),
        cache,
        config.engine_settings(),
    ))
}

async fn start_and_watch(
    config: &AppConfig,
    cache: Arc<FileCache>,
    request: JobRequest,
) -> anyhow::Result<()> {
    let tracker = build_tracker(config, cache)?;
    // Pick up anything an earlier session left behind, then add the new job.
    tracker.reconcile_on_startup().await;
    let job_id = tracker
        .start(request)
        .await
        .context("starting job")?;
    println!("Started {job_id}.");
    watch(&tracker, config.tick_interval).await
}
