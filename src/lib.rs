//! cachito-worker - source and dependency prefetch worker
//!
//! The worker executes two kinds of tasks on behalf of a build service:
//!
//! - **`fetch_app_source`**: clone a repository at a reference, pack the
//!   tree into a deterministic archive under the sources directory and
//!   optionally mirror it into the shared cache
//! - **`fetch_gomod_source`**: extract such an archive into scratch space,
//!   let the Go toolchain resolve and download its modules, report the
//!   dependency list and optionally stage the downloads into the shared cache
//!
//! Every artifact is written to a temporary file next to its destination and
//! renamed into place, so concurrent readers see either nothing or a complete
//! file. Fetch timeouts are the only failures reported as retryable.
//!
//! # Modules
//!
//! ## Tasks and runtime
//! - [`worker`] - JSON-lines message loop with bounded concurrency
//! - [`tasks`] - task dispatch, lifecycle states and reports
//! - [`cli`] - command-line entry points
//!
//! ## Components
//! - [`source`] - git fetcher and archive format
//! - [`resolver`] - archive extraction and package manager integration
//! - [`cache`] - atomic staging into the shared cache
//! - [`git`] - system git wrapper and URL parsing
//!
//! ## Supporting modules
//! - [`config`] - worker configuration loading and validation
//! - [`core`] - error taxonomy and classification
//! - [`constants`] - shared defaults
//! - [`utils`] - filesystem, path and platform helpers
//!
//! # Example
//!
//! ```rust,no_run
//! use cachito_worker::config::WorkerConfig;
//! use cachito_worker::tasks::TaskDispatcher;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = WorkerConfig::load_validated(None).await?;
//! let dispatcher = TaskDispatcher::new(config);
//!
//! let archive = dispatcher
//!     .fetch_app_source("https://github.com/org/app.git", "4f1d2c7", Some("org/app/4f1d2c7.tar.gz"))
//!     .await?;
//! let dependencies = dispatcher.fetch_gomod_source(&archive, Some("org/app/deps")).await?;
//! println!("{} dependencies", dependencies.len());
//! # Ok(())
//! # }
//! ```

// Tasks and runtime
pub mod cli;
pub mod tasks;
pub mod worker;

// Components
pub mod cache;
pub mod git;
pub mod resolver;
pub mod source;

// Supporting modules
pub mod config;
pub mod constants;
pub mod core;
pub mod utils;

// test_utils module is available for both unit tests and integration tests
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
