//! Error handling for the Cachito worker
//!
//! The worker's error system follows two rules:
//! 1. **Strongly-typed errors** so every failure carries a kind the task runtime can act on
//! 2. **Context-rich messages** so a failed work item can be correlated with its request
//!
//! # Architecture
//!
//! - [`CachitoError`] - Top-level error enum for every failure the worker raises
//! - [`SourceFetchError`], [`CacheWriteError`], [`ResolutionError`] - Per-component taxonomies
//! - [`ErrorKind`] - Serializable classification reported back to the queue
//! - [`ErrorContext`] - Wrapper that adds details and suggestions for CLI users
//!
//! Components return [`anyhow::Result`] and construct failures from these enums.
//! Callers classify an error with [`ErrorKind::of`], which looks through any
//! `anyhow` context layers added on the way up.
//!
//! # Examples
//!
//! ```rust,no_run
//! use cachito_worker::core::{CachitoError, ErrorKind, SourceFetchError};
//! use std::time::Duration;
//!
//! let error: anyhow::Error = CachitoError::from(SourceFetchError::Timeout {
//!     url: "https://example.com/repo.git".to_string(),
//!     reference: "abc123".to_string(),
//!     timeout: Duration::from_secs(30),
//! })
//! .into();
//!
//! let kind = ErrorKind::of(&error);
//! assert_eq!(kind, ErrorKind::SourceFetchTimeout);
//! assert!(kind.is_retryable());
//! ```

use colored::Colorize;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// The main error type for worker operations
///
/// Each component owns a nested taxonomy; the remaining variants cover the
/// plumbing shared between components (git invocation, configuration, I/O).
#[derive(Error, Debug)]
pub enum CachitoError {
    /// Fetching the application source failed
    #[error(transparent)]
    SourceFetch(#[from] SourceFetchError),

    /// Publishing an artifact into the shared cache failed
    #[error(transparent)]
    CacheWrite(#[from] CacheWriteError),

    /// Resolving the dependencies of a source archive failed
    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    /// A git command exited with a non-zero status
    ///
    /// # Fields
    /// - `operation`: The git operation that failed (e.g., "clone", "checkout")
    /// - `stderr`: The error output from the git command
    #[error("Git operation failed: {operation}")]
    GitCommand {
        /// The git operation that failed
        operation: String,
        /// The error output from the git command
        stderr: String,
    },

    /// A git command did not finish within its deadline
    #[error("Git {operation} timed out after {} seconds", .timeout.as_secs())]
    GitTimeout {
        /// The git operation that timed out
        operation: String,
        /// The deadline that was exceeded
        timeout: Duration,
    },

    /// Git executable not found in PATH
    #[error("Git is not installed or not found in PATH")]
    GitNotFound,

    /// Worker configuration is missing or invalid
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error
        message: String,
    },

    /// A queue message could not be turned into a task request
    #[error("Invalid request for task '{task}': {reason}")]
    InvalidTaskRequest {
        /// The task name carried by the message
        task: String,
        /// Why the message was rejected
        reason: String,
    },

    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// TOML parsing error
    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),
}

/// Failures of the source-control fetcher
#[derive(Error, Debug)]
pub enum SourceFetchError {
    /// The fetch did not complete within the configured deadline
    #[error("Timed out after {} seconds fetching '{reference}' from {url}", .timeout.as_secs())]
    Timeout {
        /// Repository URL (credentials stripped)
        url: String,
        /// Requested reference
        reference: String,
        /// The deadline that was exceeded
        timeout: Duration,
    },

    /// The repository does not exist or is not accessible
    #[error("Repository not found: {url}")]
    NotFound {
        /// Repository URL (credentials stripped)
        url: String,
        /// Output of the failing git command
        reason: String,
    },

    /// The reference is malformed or does not exist in the repository
    #[error("Invalid reference '{reference}' for {url}: {reason}")]
    InvalidReference {
        /// Repository URL (credentials stripped)
        url: String,
        /// Requested reference
        reference: String,
        /// Why the reference was rejected
        reason: String,
    },

    /// The repository URL cannot be used
    #[error("Invalid source URL '{url}': {reason}")]
    InvalidUrl {
        /// The rejected URL (credentials stripped)
        url: String,
        /// Why the URL was rejected
        reason: String,
    },

    /// The remote could not be reached
    #[error("Network failure fetching {url}: {reason}")]
    Network {
        /// Repository URL (credentials stripped)
        url: String,
        /// Output of the failing git command
        reason: String,
    },

    /// The checked-out tree could not be packed into an archive
    #[error("Failed to create archive {}: {reason}", .path.display())]
    Archive {
        /// Destination archive path
        path: PathBuf,
        /// Underlying failure
        reason: String,
    },
}

/// Failures of the cache stager
#[derive(Error, Debug)]
pub enum CacheWriteError {
    /// The shared cache root is missing or cannot be written
    #[error("Cache root {} is not writable: {reason}", .root.display())]
    UnwritableRoot {
        /// Configured cache root
        root: PathBuf,
        /// Underlying failure
        reason: String,
    },

    /// The relative destination is empty, absolute, or escapes the cache root
    #[error("Invalid cache destination '{destination}': {reason}")]
    InvalidDestination {
        /// Caller-supplied relative destination
        destination: String,
        /// Why the destination was rejected
        reason: String,
    },

    /// Copying into the cache failed midway
    #[error("Failed to write cache entry {}: {reason}", .path.display())]
    Io {
        /// Final destination path
        path: PathBuf,
        /// Underlying failure
        reason: String,
    },
}

/// Failures of the dependency resolver
#[derive(Error, Debug)]
pub enum ResolutionError {
    /// The package-manager tool exited unsuccessfully
    #[error("'{command}' failed{}: {stderr}", .status.map(|c| format!(" with exit code {c}")).unwrap_or_default())]
    ToolFailed {
        /// The command line that failed
        command: String,
        /// Process exit code, if any
        status: Option<i32>,
        /// Error output of the tool
        stderr: String,
    },

    /// The package-manager tool is not installed
    #[error("Package manager tool '{tool}' was not found")]
    ToolNotFound {
        /// The binary that could not be executed
        tool: String,
    },

    /// The dependency declaration file is missing or unparseable
    #[error("Malformed manifest {}: {reason}", .path.display())]
    MalformedManifest {
        /// Path of the manifest inside the scratch tree
        path: PathBuf,
        /// What is wrong with it
        reason: String,
    },

    /// The source archive could not be extracted
    #[error("Failed to extract {}: {reason}", .archive.display())]
    Extraction {
        /// The archive being extracted
        archive: PathBuf,
        /// Underlying failure
        reason: String,
    },
}

/// Serializable error classification reported back to the task runtime
///
/// Only [`ErrorKind::SourceFetchTimeout`] is retryable; every other kind is
/// considered fatal for the request and requires a re-submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Source fetch exceeded its deadline
    SourceFetchTimeout,
    /// Repository missing or inaccessible
    SourceNotFound,
    /// Reference malformed or missing
    InvalidReference,
    /// Repository URL unusable
    InvalidUrl,
    /// Remote unreachable or clone failed
    NetworkFailure,
    /// Shared cache write failed
    CacheWrite,
    /// Dependency resolution failed
    Resolution,
    /// Queue message could not be decoded
    InvalidRequest,
    /// Worker configuration problem
    Configuration,
    /// Anything else
    Internal,
}

impl ErrorKind {
    /// Classify an error, looking through `anyhow` context layers.
    pub fn of(error: &anyhow::Error) -> Self {
        for cause in error.chain() {
            if let Some(e) = cause.downcast_ref::<CachitoError>() {
                return Self::from_cachito(e);
            }
            if let Some(e) = cause.downcast_ref::<SourceFetchError>() {
                return Self::from_source_fetch(e);
            }
            if cause.is::<CacheWriteError>() {
                return Self::CacheWrite;
            }
            if cause.is::<ResolutionError>() {
                return Self::Resolution;
            }
        }
        Self::Internal
    }

    fn from_cachito(error: &CachitoError) -> Self {
        match error {
            CachitoError::SourceFetch(e) => Self::from_source_fetch(e),
            CachitoError::CacheWrite(_) => Self::CacheWrite,
            CachitoError::Resolution(_) => Self::Resolution,
            CachitoError::GitTimeout { .. } => Self::SourceFetchTimeout,
            CachitoError::GitCommand { .. } | CachitoError::GitNotFound => Self::NetworkFailure,
            CachitoError::Config { .. } | CachitoError::TomlError(_) => Self::Configuration,
            CachitoError::InvalidTaskRequest { .. } => Self::InvalidRequest,
            CachitoError::IoError(_) => Self::Internal,
        }
    }

    const fn from_source_fetch(error: &SourceFetchError) -> Self {
        match error {
            SourceFetchError::Timeout { .. } => Self::SourceFetchTimeout,
            SourceFetchError::NotFound { .. } => Self::SourceNotFound,
            SourceFetchError::InvalidReference { .. } => Self::InvalidReference,
            SourceFetchError::InvalidUrl { .. } => Self::InvalidUrl,
            SourceFetchError::Network { .. } => Self::NetworkFailure,
            // Packing is local work; a full disk is not a network problem
            SourceFetchError::Archive { .. } => Self::Internal,
        }
    }

    /// Whether the task runtime may re-deliver the failed work item as-is.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::SourceFetchTimeout)
    }

    /// The snake_case name used on the wire.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SourceFetchTimeout => "source_fetch_timeout",
            Self::SourceNotFound => "source_not_found",
            Self::InvalidReference => "invalid_reference",
            Self::InvalidUrl => "invalid_url",
            Self::NetworkFailure => "network_failure",
            Self::CacheWrite => "cache_write",
            Self::Resolution => "resolution",
            Self::InvalidRequest => "invalid_request",
            Self::Configuration => "configuration",
            Self::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error context wrapper that provides user-friendly error information
///
/// Used by the CLI entry point to print a failed command with optional details
/// (yellow) and an actionable suggestion (green).
#[derive(Debug)]
pub struct ErrorContext {
    /// The underlying error, rendered with its context chain
    pub error: anyhow::Error,
    /// Optional suggestion for resolving the error
    pub suggestion: Option<String>,
    /// Optional additional details about the error
    pub details: Option<String>,
}

impl ErrorContext {
    /// Create a new error context with no suggestion or details.
    #[must_use]
    pub const fn new(error: anyhow::Error) -> Self {
        Self {
            error,
            suggestion: None,
            details: None,
        }
    }

    /// Add a suggestion for resolving the error
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    /// Add additional details explaining the error
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Display the error context to stderr with terminal colors
    pub fn display(&self) {
        eprintln!("{}: {:#}", "error".red().bold(), self.error);

        if let Some(details) = &self.details {
            eprintln!("{}: {}", "details".yellow(), details);
        }

        if let Some(suggestion) = &self.suggestion {
            eprintln!("{}: {}", "suggestion".green(), suggestion);
        }
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#}", self.error)?;

        if let Some(details) = &self.details {
            write!(f, "\nDetails: {details}")?;
        }

        if let Some(suggestion) = &self.suggestion {
            write!(f, "\nSuggestion: {suggestion}")?;
        }

        Ok(())
    }
}

/// Convert any error into an [`ErrorContext`] with suggestions for its kind.
pub fn user_friendly_error(error: anyhow::Error) -> ErrorContext {
    let kind = ErrorKind::of(&error);
    let git_missing = error
        .chain()
        .any(|cause| matches!(cause.downcast_ref::<CachitoError>(), Some(CachitoError::GitNotFound)));

    let ctx = ErrorContext::new(error);
    if git_missing {
        return ctx
            .with_suggestion("Install git and make sure it is on PATH")
            .with_details("The worker fetches sources by invoking the system git binary");
    }

    match kind {
        ErrorKind::SourceFetchTimeout => ctx
            .with_suggestion("Retry the request or raise `fetch_timeout_secs` in the worker config")
            .with_details("This failure is retryable"),
        ErrorKind::SourceNotFound => {
            ctx.with_suggestion("Check that the repository URL exists and is accessible")
        }
        ErrorKind::InvalidReference => {
            ctx.with_suggestion("Pass a commit id, tag or branch that exists in the repository")
        }
        ErrorKind::InvalidUrl => ctx.with_suggestion(
            "Use an http(s)://, ssh://, git://, file:// or user@host:path repository URL",
        ),
        ErrorKind::NetworkFailure => {
            ctx.with_suggestion("Check network connectivity to the source control host")
        }
        ErrorKind::CacheWrite => ctx.with_suggestion(
            "Check permissions on `shared_dir` and use a relative destination inside it",
        ),
        ErrorKind::Resolution => {
            ctx.with_suggestion("Check the project's dependency declaration and the tool output above")
        }
        ErrorKind::Configuration => ctx.with_suggestion(
            "Fix the worker config file (see `cachito-worker validate-config`)",
        ),
        ErrorKind::InvalidRequest | ErrorKind::Internal => ctx,
    }
}
