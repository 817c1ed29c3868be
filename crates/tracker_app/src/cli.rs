use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::logging::LogDestination;

/// Track knowledge-base crawl and upload jobs from the terminal.
#[derive(Debug, Parser)]
#[command(name = "kbprogress", version)]
pub struct Cli {
    /// RON configuration file. Defaults to ./kbprogress.ron when present.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
    /// Knowledge-base API base URL.
    #[arg(long, global = true)]
    pub base_url: Option<String>,
    /// Directory holding persisted progress.
    #[arg(long, global = true)]
    pub cache_dir: Option<PathBuf>,
    #[arg(long, value_enum, default_value_t = LogDestination::File, global = true)]
    pub log: LogDestination,
    #[arg(short, long, global = true)]
    pub verbose: bool,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start crawling a URL and watch it.
    Crawl {
        url: String,
        #[arg(long)]
        depth: Option<u32>,
        #[arg(long = "type")]
        knowledge_type: Option<String>,
        #[arg(long = "tag")]
        tags: Vec<String>,
    },
    /// Upload a document and watch its processing.
    Upload {
        path: PathBuf,
        #[arg(long = "type")]
        knowledge_type: Option<String>,
        #[arg(long = "tag")]
        tags: Vec<String>,
    },
    /// Reattach to jobs left running by a previous session.
    Resume,
    /// Ask the server to stop a job.
    Stop { id: String },
    /// Forget a job locally without contacting the server.
    Dismiss { id: String },
    /// Show persisted jobs without contacting the server.
    List,
}
