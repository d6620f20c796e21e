//! One-shot task commands.
//!
//! These run a single task in the foreground, print its result to stdout and
//! exit non-zero on failure. Handy for debugging a request outside the queue.

use anyhow::Result;
use clap::Args;
use std::path::{Path, PathBuf};

use crate::config::WorkerConfig;
use crate::tasks::TaskDispatcher;

/// Fetch a repository reference into a source archive.
#[derive(Args, Debug)]
pub struct FetchAppSourceCommand {
    /// Repository URL
    pub url: String,

    /// Branch, tag or commit to fetch
    #[arg(value_name = "REF")]
    pub reference: String,

    /// Also copy the archive to this path beneath the shared cache
    #[arg(long)]
    pub copy_cache_to: Option<String>,
}

impl FetchAppSourceCommand {
    /// Fetch and print the archive path.
    pub async fn execute(self, config_path: Option<&Path>) -> Result<()> {
        let config = WorkerConfig::load_validated(config_path).await?;
        let dispatcher = TaskDispatcher::new(config);

        let archive = dispatcher
            .fetch_app_source(&self.url, &self.reference, self.copy_cache_to.as_deref())
            .await?;
        println!("{}", archive.display());
        Ok(())
    }
}

/// Resolve and prefetch the Go modules of a source archive.
#[derive(Args, Debug)]
pub struct FetchGomodSourceCommand {
    /// Archive produced by `fetch-app-source`
    pub archive_path: PathBuf,

    /// Stage the downloaded modules beneath this path in the shared cache
    #[arg(long)]
    pub copy_cache_to: Option<String>,
}

impl FetchGomodSourceCommand {
    /// Resolve and print the dependency list as JSON.
    pub async fn execute(self, config_path: Option<&Path>) -> Result<()> {
        let config = WorkerConfig::load_validated(config_path).await?;
        let dispatcher = TaskDispatcher::new(config);

        let manifest = dispatcher
            .fetch_gomod_source(&self.archive_path, self.copy_cache_to.as_deref())
            .await?;
        println!("{}", serde_json::to_string_pretty(&manifest)?);
        Ok(())
    }
}
