//! Platform-specific helpers
//!
//! Locating external binaries, expanding user-supplied paths and picking the
//! default on-disk locations for the worker.

use anyhow::{Context, Result};
use std::path::PathBuf;

/// Checks if the current platform is Windows.
#[must_use]
pub const fn is_windows() -> bool {
    cfg!(windows)
}

/// Returns the platform-appropriate git binary name.
#[must_use]
pub const fn get_git_command() -> &'static str {
    if is_windows() {
        "git.exe"
    } else {
        "git"
    }
}

/// Resolves a configured path with tilde expansion and environment variable substitution.
///
/// `~/cache` expands to the user's home directory and `$VAR` / `${VAR}` are
/// substituted from the environment. Unknown variables are an error rather
/// than being silently left in the path.
///
/// # Examples
///
/// ```rust,no_run
/// use cachito_worker::utils::platform::resolve_path;
///
/// # fn example() -> anyhow::Result<()> {
/// let shared = resolve_path("~/cachito/shared")?;
/// let scratch = resolve_path("${TMPDIR}/cachito")?;
/// # Ok(())
/// # }
/// ```
pub fn resolve_path(path: &str) -> Result<PathBuf> {
    let expanded = shellexpand::full(path)
        .with_context(|| format!("Failed to expand path: {path}"))?;
    Ok(PathBuf::from(expanded.as_ref()))
}

/// Checks whether an executable can be found on PATH (or at the given path).
#[must_use]
pub fn command_exists(cmd: &str) -> bool {
    which::which(cmd).is_ok()
}

/// Returns the default directory for worker-owned data (`{data_dir}/cachito-worker`).
///
/// Used as the base of the default `sources_dir` and `scratch_dir`.
pub fn get_data_dir() -> Result<PathBuf> {
    dirs::data_local_dir()
        .map(|dir| dir.join("cachito-worker"))
        .context("Unable to determine the local data directory")
}

/// Returns the default worker config path (`{config_dir}/cachito-worker/config.toml`).
pub fn get_config_path() -> Result<PathBuf> {
    dirs::config_dir()
        .map(|dir| dir.join("cachito-worker").join("config.toml"))
        .context("Unable to determine the configuration directory")
}
