//! Test utilities for the worker
//!
//! Helpers shared by unit tests and the integration suite:
//! - [`WorkerFixture`] for isolated worker directories and configs
//! - [`TestGit`] for throwaway upstream repositories
//! - stand-in `go` executables for resolver tests
//!
//! # Example
//!
//! ```rust,no_run
//! use cachito_worker::test_utils::{TestGit, WorkerFixture};
//!
//! let fixture = WorkerFixture::new().unwrap();
//! let (repo, commit) =
//!     TestGit::create_repo(&fixture.root().join("upstream"), &[("go.mod", "module x\n")]).unwrap();
//! ```

pub mod fixtures;
pub mod git_helper;

#[cfg(unix)]
pub use fixtures::write_fake_go;
pub use fixtures::{GO_LIST_OUTPUT, GO_MOD, WorkerFixture};
pub use git_helper::TestGit;

use std::sync::Once;
use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Global flag to ensure logging is only initialized once in tests
static INIT_LOGGING: Once = Once::new();

/// Initialize logging for tests.
///
/// Only the first call has an effect. Uses `level` if given, otherwise
/// `RUST_LOG`; with neither, logging stays off.
///
/// ```bash
/// RUST_LOG=git=debug,cachito_worker=debug cargo test
/// ```
pub fn init_test_logging(level: Option<Level>) {
    INIT_LOGGING.call_once(|| {
        let filter = if let Some(level) = level {
            EnvFilter::new(level.to_string())
        } else if std::env::var("RUST_LOG").is_ok() {
            EnvFilter::from_default_env()
        } else {
            return;
        };

        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .with_thread_ids(false)
            .try_init();
    });
}
