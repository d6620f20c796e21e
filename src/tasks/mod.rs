//! Task dispatcher.
//!
//! The two tasks the worker serves:
//!
//! | Task                 | Arguments                                  | Result            |
//! |----------------------|--------------------------------------------|-------------------|
//! | `fetch_app_source`   | `url`, `ref`, `copy_cache_to` (optional)   | archive path      |
//! | `fetch_gomod_source` | `archive_path`, `copy_cache_to` (optional) | dependency list   |
//!
//! Each component logs enough context (URL and reference, or archive path)
//! to correlate a failure with its request and then re-raises; nothing here
//! retries. Whether a failure may be re-delivered is encoded in the
//! [`ErrorKind`] carried by the [`TaskReport`].

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::Instrument;

use crate::cache::CacheStager;
use crate::config::WorkerConfig;
use crate::core::{CachitoError, ErrorKind};
use crate::git::strip_auth_from_url;
use crate::resolver::{DependencyManifest, DependencyResolver};
use crate::source::GitFetcher;

/// Name of the source fetch task.
pub const FETCH_APP_SOURCE: &str = "fetch_app_source";

/// Name of the Go modules resolution task.
pub const FETCH_GOMOD_SOURCE: &str = "fetch_gomod_source";

/// Message attached to a fetch that exceeded its deadline.
pub const TIMEOUT_MESSAGE: &str = "The connection timed out while downloading the source";

/// A decoded unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "task", rename_all = "snake_case")]
pub enum TaskRequest {
    /// Fetch a repository reference into an archive
    FetchAppSource {
        /// Repository URL
        url: String,
        /// Branch, tag or commit
        #[serde(rename = "ref")]
        reference: String,
        /// Mirror the archive to this path beneath the shared cache
        copy_cache_to: Option<String>,
    },
    /// Resolve the Go modules of an archive
    FetchGomodSource {
        /// Archive produced by `fetch_app_source`
        archive_path: PathBuf,
        /// Stage downloaded modules beneath this path in the shared cache
        copy_cache_to: Option<String>,
    },
}

impl TaskRequest {
    /// Task name as used on the queue.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::FetchAppSource { .. } => FETCH_APP_SOURCE,
            Self::FetchGomodSource { .. } => FETCH_GOMOD_SOURCE,
        }
    }
}

/// Lifecycle of a task: `Pending → Running → Succeeded | Failed`.
///
/// A request rejected before it starts goes straight from `Pending` to
/// `Failed`. Terminal states have no outgoing transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Received, not started
    Pending,
    /// Executing
    Running,
    /// Finished with a result
    Succeeded,
    /// Finished with an error
    Failed,
}

impl TaskState {
    /// Whether the state is final.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    /// Whether `self → next` is a legal transition.
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Running | Self::Failed)
                | (Self::Running, Self::Succeeded | Self::Failed)
        )
    }
}

/// Serializable failure of a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskError {
    /// Classification of the failure
    pub kind: ErrorKind,
    /// Human-readable message including its causes
    pub message: String,
    /// Whether the work item may be re-delivered unchanged
    pub retryable: bool,
}

impl TaskError {
    /// Classify an error for the queue.
    pub fn from_error(error: &anyhow::Error) -> Self {
        let kind = ErrorKind::of(error);
        Self {
            kind,
            message: format!("{error:#}"),
            retryable: kind.is_retryable(),
        }
    }
}

/// Outcome of one task, reported back to the queue runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskReport {
    /// Message id
    pub id: String,
    /// Task name
    pub task: String,
    /// Current state
    pub state: TaskState,
    /// When execution started
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// When the task reached a terminal state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    /// Task result on success
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// Failure details
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<TaskError>,
}

impl TaskReport {
    /// A new report in the `Pending` state.
    pub fn pending(id: impl Into<String>, task: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            task: task.into(),
            state: TaskState::Pending,
            started_at: None,
            finished_at: None,
            result: None,
            error: None,
        }
    }

    /// A report for a request that could not be accepted.
    pub fn rejected(id: impl Into<String>, task: impl Into<String>, error: &anyhow::Error) -> Self {
        let mut report = Self::pending(id, task);
        report.fail(error);
        report
    }

    fn transition(&mut self, next: TaskState) {
        if !self.state.can_transition_to(next) {
            tracing::warn!("Ignoring task transition {:?} -> {:?} for {}", self.state, next, self.id);
            return;
        }
        self.state = next;
        match next {
            TaskState::Running => self.started_at = Some(Utc::now()),
            TaskState::Succeeded | TaskState::Failed => self.finished_at = Some(Utc::now()),
            TaskState::Pending => {}
        }
    }

    fn start(&mut self) {
        self.transition(TaskState::Running);
    }

    fn succeed(&mut self, result: serde_json::Value) {
        self.transition(TaskState::Succeeded);
        if self.state == TaskState::Succeeded {
            self.result = Some(result);
        }
    }

    fn fail(&mut self, error: &anyhow::Error) {
        self.transition(TaskState::Failed);
        if self.state == TaskState::Failed {
            self.error = Some(TaskError::from_error(error));
        }
    }
}

/// Runs task requests against the fetcher, stager and resolver.
#[derive(Debug, Clone)]
pub struct TaskDispatcher {
    fetcher: GitFetcher,
    stager: CacheStager,
    resolver: DependencyResolver,
}

impl TaskDispatcher {
    /// Dispatcher with the Go modules resolver.
    pub fn new(config: Arc<WorkerConfig>) -> Self {
        Self {
            fetcher: GitFetcher::new(Arc::clone(&config)),
            stager: CacheStager::from_config(&config),
            resolver: DependencyResolver::gomod(config),
        }
    }

    /// Fetch the application source and optionally mirror it into the shared
    /// cache. Returns the archive path.
    ///
    /// # Errors
    ///
    /// A fetch timeout is re-raised with [`TIMEOUT_MESSAGE`] and stays
    /// classified as retryable. Other fetch failures and staging failures are
    /// logged with the URL and reference and re-raised unchanged.
    pub async fn fetch_app_source(
        &self,
        url: &str,
        reference: &str,
        copy_cache_to: Option<&str>,
    ) -> Result<PathBuf> {
        let display_url = strip_auth_from_url(url);
        tracing::info!("Fetching the source from \"{}\" at reference \"{}\"", display_url, reference);

        if let Some(destination) = copy_cache_to {
            self.stager.resolve_destination(destination).map_err(CachitoError::from)?;
        }

        let archive = match self.fetcher.fetch_source(url, reference).await {
            Ok(archive) => archive,
            Err(e) if ErrorKind::of(&e) == ErrorKind::SourceFetchTimeout => {
                tracing::warn!(
                    "Timed out fetching the source from the URL \"{}\" and reference \"{}\"",
                    display_url,
                    reference
                );
                return Err(e.context(TIMEOUT_MESSAGE));
            }
            Err(e) => {
                tracing::error!(
                    "Failed to fetch the source from the URL \"{}\" and reference \"{}\": {:#}",
                    display_url,
                    reference,
                    e
                );
                return Err(e);
            }
        };

        if let Some(destination) = copy_cache_to {
            self.stager.stage_to_cache(&archive.path, destination).await.inspect_err(|e| {
                tracing::error!(
                    "Failed to copy the source of \"{}\" at \"{}\" to the cache: {:#}",
                    display_url,
                    reference,
                    e
                );
            })?;
        }

        Ok(archive.path)
    }

    /// Resolve and fetch the Go modules of an archive.
    ///
    /// # Errors
    ///
    /// Failures are logged with the archive path and re-raised unchanged.
    pub async fn fetch_gomod_source(
        &self,
        archive_path: &Path,
        copy_cache_to: Option<&str>,
    ) -> Result<DependencyManifest> {
        tracing::info!("Fetching gomod dependencies for \"{}\"", archive_path.display());
        self.resolver.resolve(archive_path, copy_cache_to).await.inspect_err(|e| {
            tracing::error!(
                "Failed to fetch gomod dependencies for \"{}\": {:#}",
                archive_path.display(),
                e
            );
        })
    }

    /// Execute a request and fold the outcome into a report.
    pub async fn dispatch(&self, id: impl Into<String>, request: TaskRequest) -> TaskReport {
        let mut report = TaskReport::pending(id, request.name());
        let span = tracing::info_span!("task", id = %report.id, task = request.name());

        async {
            report.start();
            let outcome = match &request {
                TaskRequest::FetchAppSource {
                    url,
                    reference,
                    copy_cache_to,
                } => self
                    .fetch_app_source(url, reference, copy_cache_to.as_deref())
                    .await
                    .map(|path| serde_json::Value::String(path.display().to_string())),
                TaskRequest::FetchGomodSource {
                    archive_path,
                    copy_cache_to,
                } => self
                    .fetch_gomod_source(archive_path, copy_cache_to.as_deref())
                    .await
                    .and_then(|manifest| {
                        serde_json::to_value(manifest).context("Failed to serialize the dependency list")
                    }),
            };

            match outcome {
                Ok(result) => report.succeed(result),
                Err(e) => report.fail(&e),
            }
            tracing::debug!("Task finished in state {:?}", report.state);
        }
        .instrument(span)
        .await;

        report
    }
}
