//! Type-safe Git command builder for consistent command execution
//!
//! Every git invocation the worker makes goes through [`GitCommand`], so
//! timeouts, prompt suppression, process cleanup and error classification are
//! handled in one place.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;

use crate::constants::GIT_LOCAL_TIMEOUT;
use crate::core::CachitoError;
use crate::utils::platform::get_git_command;

/// Fluent builder for a single git invocation.
///
/// Defaults:
/// - binary from [`get_git_command`]
/// - timeout of [`GIT_LOCAL_TIMEOUT`]
/// - `GIT_TERMINAL_PROMPT=0`, so credential prompts fail instead of blocking
/// - stdin closed, stdout/stderr captured
///
/// The child is spawned with `kill_on_drop`, so a timed-out or cancelled
/// command never outlives its future.
///
/// # Examples
///
/// ```rust,no_run
/// use cachito_worker::git::command_builder::GitCommand;
///
/// # async fn example() -> anyhow::Result<()> {
/// let head = GitCommand::rev_parse_commit("HEAD")
///     .current_dir("/tmp/checkout")
///     .execute_stdout()
///     .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct GitCommand {
    /// Git executable
    binary: String,

    /// Arguments passed to git (e.g. `["clone", url, path]`)
    args: Vec<String>,

    /// Repository directory, passed as `-C <dir>`
    current_dir: Option<PathBuf>,

    /// Extra environment for the git process
    env_vars: Vec<(String, String)>,

    /// Deadline for the command (None = no deadline)
    timeout_duration: Option<Duration>,

    /// Identifier included in log lines to correlate concurrent commands
    context: Option<String>,
}

impl Default for GitCommand {
    fn default() -> Self {
        Self {
            binary: get_git_command().to_string(),
            args: Vec::new(),
            current_dir: None,
            env_vars: vec![("GIT_TERMINAL_PROMPT".to_string(), "0".to_string())],
            timeout_duration: Some(GIT_LOCAL_TIMEOUT),
            context: None,
        }
    }
}

impl GitCommand {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a specific git executable instead of the one on `PATH`.
    pub fn binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    /// Run the command against the repository at `dir` (`git -C <dir>`).
    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.current_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Adds a single argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Adds multiple arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Adds an environment variable for this invocation only.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env_vars.push((key.into(), value.into()));
        self
    }

    /// Set a custom timeout for the command (None for no timeout).
    ///
    /// Network commands run inside an outer deadline owned by the fetcher and
    /// pass `None` here.
    pub const fn with_timeout(mut self, duration: Option<Duration>) -> Self {
        self.timeout_duration = duration;
        self
    }

    /// Set a context for logging (e.g. the request URL).
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// The git subcommand, used to name the operation in errors and logs.
    fn operation(&self) -> String {
        self.args.first().cloned().unwrap_or_else(|| "unknown".to_string())
    }

    fn full_args(&self) -> Vec<String> {
        let mut full_args = Vec::with_capacity(self.args.len() + 2);
        if let Some(ref dir) = self.current_dir {
            full_args.push("-C".to_string());
            full_args.push(dir.display().to_string());
        }
        full_args.extend(self.args.iter().cloned());
        full_args
    }

    /// Execute the command and return its output.
    ///
    /// # Errors
    ///
    /// - [`CachitoError::GitNotFound`] if the binary cannot be spawned
    /// - [`CachitoError::GitTimeout`] if the deadline expires (the child is killed)
    /// - [`CachitoError::GitCommand`] on a non-zero exit, carrying git's stderr
    pub async fn execute(self) -> Result<GitCommandOutput> {
        let start = std::time::Instant::now();
        let operation = self.operation();
        let full_args = self.full_args();
        let ctx = self.context.as_deref().unwrap_or("-");

        let mut cmd = Command::new(&self.binary);
        cmd.args(&full_args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in &self.env_vars {
            cmd.env(key, value);
        }

        tracing::debug!(target: "git", "({}) Executing command: {} {}", ctx, self.binary, full_args.join(" "));

        let output_future = cmd.output();
        let result = match self.timeout_duration {
            Some(duration) => match timeout(duration, output_future).await {
                Ok(result) => result,
                Err(_) => {
                    tracing::warn!(
                        target: "git",
                        "({}) Command timed out after {} seconds: git {}",
                        ctx,
                        duration.as_secs(),
                        full_args.join(" ")
                    );
                    return Err(CachitoError::GitTimeout {
                        operation,
                        timeout: duration,
                    }
                    .into());
                }
            },
            None => output_future.await,
        };

        let output = match result {
            Ok(output) => output,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(CachitoError::GitNotFound.into());
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to execute git {operation}"));
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        if !output.status.success() {
            tracing::debug!(
                target: "git",
                "({}) git {} failed with exit code {:?}: {}",
                ctx,
                operation,
                output.status.code(),
                stderr.trim()
            );
            return Err(CachitoError::GitCommand {
                operation,
                stderr: if stderr.trim().is_empty() { stdout } else { stderr },
            }
            .into());
        }

        if !stdout.is_empty() {
            tracing::trace!(target: "git", "({}) {}", ctx, stdout.trim());
        }

        let elapsed = start.elapsed();
        if elapsed.as_secs() > 1 {
            tracing::info!(target: "git::perf", "({}) Git {} took {:.2}s", ctx, operation, elapsed.as_secs_f64());
        } else if elapsed.as_millis() > 100 {
            tracing::debug!(target: "git::perf", "({}) Git {} took {}ms", ctx, operation, elapsed.as_millis());
        }

        Ok(GitCommandOutput {
            stdout,
            stderr,
        })
    }

    /// Execute the command and return only stdout as a trimmed string.
    pub async fn execute_stdout(self) -> Result<String> {
        let output = self.execute().await?;
        Ok(output.stdout.trim().to_string())
    }

    /// Execute the command and check for success.
    pub async fn execute_success(self) -> Result<()> {
        self.execute().await?;
        Ok(())
    }
}

/// Output from a Git command
#[derive(Debug)]
pub struct GitCommandOutput {
    /// Standard output from the Git command
    pub stdout: String,
    /// Standard error output from the Git command
    pub stderr: String,
}

// Convenience builders for the operations the fetcher performs

impl GitCommand {
    /// `git clone --no-checkout --quiet -- <url> <target>`
    ///
    /// `--` keeps a URL starting with `-` from being read as an option.
    pub fn clone_no_checkout(url: &str, target: impl AsRef<Path>) -> Self {
        Self::new().args([
            "clone".to_string(),
            "--no-checkout".to_string(),
            "--quiet".to_string(),
            "--".to_string(),
            url.to_string(),
            target.as_ref().display().to_string(),
        ])
    }

    /// `git rev-parse --verify --quiet <rev>^{commit}`
    pub fn rev_parse_commit(rev: &str) -> Self {
        Self::new().args(["rev-parse", "--verify", "--quiet"]).arg(format!("{rev}^{{commit}}"))
    }

    /// `git checkout --quiet --detach <commit>`
    pub fn checkout_detach(commit: &str) -> Self {
        Self::new().args(["checkout", "--quiet", "--detach", commit])
    }
}
