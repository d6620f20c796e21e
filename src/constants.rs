//! Global constants used throughout the worker.
//!
//! Timeout durations, default paths and other values shared by more than one
//! module live here so magic numbers stay discoverable.

use std::time::Duration;

/// Default deadline for the network phase of a source fetch (5 minutes).
///
/// Exceeding it surfaces as a retryable timeout instead of a hung worker.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(300);

/// Timeout for local git operations such as `checkout` and `rev-parse` (60 seconds).
pub const GIT_LOCAL_TIMEOUT: Duration = Duration::from_secs(60);

/// Default Go module proxy used to build re-fetchable source locations.
pub const DEFAULT_GOPROXY: &str = "https://proxy.golang.org";

/// Directory name every fetched tree is nested under inside an archive.
pub const ARCHIVE_PREFIX: &str = "app";

/// File extension of source archives.
pub const ARCHIVE_EXTENSION: &str = "tar.gz";

/// Environment variable overriding the worker config path.
pub const CONFIG_PATH_ENV: &str = "CACHITO_WORKER_CONFIG";

/// Minimum number of concurrently running tasks regardless of CPU count.
pub const MIN_PARALLELISM: usize = 2;

/// Multiplier applied to CPU core count for default parallelism.
///
/// Tasks are dominated by network and subprocess waits, so running more than
/// one per core keeps the worker busy.
pub const PARALLELISM_CORE_MULTIPLIER: usize = 2;

/// Default CPU core count when detection fails.
pub const FALLBACK_CORE_COUNT: usize = 4;

/// Default number of concurrently running tasks.
pub fn default_max_parallel() -> usize {
    let cores = std::thread::available_parallelism().map_or(FALLBACK_CORE_COUNT, usize::from);
    (cores * PARALLELISM_CORE_MULTIPLIER).max(MIN_PARALLELISM)
}
