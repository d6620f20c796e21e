//! Command-line interface for the worker.
//!
//! # Commands
//!
//! - `run` - consume task messages from stdin and write reports to stdout
//! - `fetch-app-source` - run a single source fetch
//! - `fetch-gomod-source` - resolve the Go modules of one archive
//! - `validate-config` - load and validate the worker configuration
//!
//! # Global Options
//!
//! - `--verbose` / `-v` - debug logging
//! - `--quiet` / `-q` - errors only
//! - `--config` / `-c` - path to the worker config file
//!
//! Logs go to stderr; stdout carries task results only. `RUST_LOG`, when set,
//! overrides the level chosen by the flags.
//!
//! ```bash
//! cachito-worker --config /etc/cachito/worker.toml run < messages.jsonl
//! cachito-worker fetch-app-source https://github.com/org/app.git 4f1d2c --copy-cache-to org/app.tar.gz
//! ```

mod fetch;
mod run;
mod validate;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

pub use fetch::{FetchAppSourceCommand, FetchGomodSourceCommand};
pub use run::RunCommand;
pub use validate::{OutputFormat, ValidateConfigCommand};

/// Root command and global options.
#[derive(Parser, Debug)]
#[command(
    name = "cachito-worker",
    about = "Fetch application sources and prefetch their dependencies into a shared cache",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug logging
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Only log errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Path to the worker config file
    ///
    /// Defaults to `$CACHITO_WORKER_CONFIG`, then `config.toml` in the
    /// platform configuration directory.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Consume JSON task messages from stdin until it closes
    Run(RunCommand),

    /// Fetch a repository reference into a source archive
    FetchAppSource(FetchAppSourceCommand),

    /// Resolve and prefetch the Go modules of a source archive
    FetchGomodSource(FetchGomodSourceCommand),

    /// Load and validate the worker configuration
    ValidateConfig(ValidateConfigCommand),
}

impl Cli {
    /// Initialize logging and run the selected command.
    pub async fn execute(self) -> Result<()> {
        self.init_logging();
        let config = self.config.as_deref();

        match self.command {
            Commands::Run(cmd) => cmd.execute(config).await,
            Commands::FetchAppSource(cmd) => cmd.execute(config).await,
            Commands::FetchGomodSource(cmd) => cmd.execute(config).await,
            Commands::ValidateConfig(cmd) => cmd.execute(config).await,
        }
    }

    /// Log filter implied by the verbosity flags.
    #[must_use]
    pub fn log_filter(&self) -> &'static str {
        if self.verbose {
            "debug"
        } else if self.quiet {
            "error"
        } else {
            "info"
        }
    }

    fn init_logging(&self) {
        let filter = match std::env::var("RUST_LOG") {
            Ok(value) if !value.is_empty() => EnvFilter::new(value),
            _ => EnvFilter::new(self.log_filter()),
        };

        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .try_init();
    }
}
