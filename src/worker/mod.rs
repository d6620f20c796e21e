//! Queue-facing worker runtime.
//!
//! The worker consumes task messages as JSON lines and writes one
//! [`TaskReport`] line per message once it reaches a terminal state.
//! A message names the task and carries its arguments positionally,
//! by keyword, or both:
//!
//! ```json
//! {"id": "7f3c", "task": "fetch_app_source", "args": ["https://github.com/org/app.git", "4f1d2c"], "kwargs": {"copy_cache_to": "org/app/4f1d2c.tar.gz"}}
//! {"task": "fetch_gomod_source", "kwargs": {"archive_path": "/var/lib/cachito/sources/github.com/org/app/4f1d2c.tar.gz"}}
//! ```
//!
//! Messages without an `id` get a random one. Up to `max_parallel` tasks run
//! at once. On shutdown, running tasks are aborted; archives and cache entries
//! are published atomically, so an aborted task leaves either nothing or a
//! complete artifact behind.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::config::WorkerConfig;
use crate::core::CachitoError;
use crate::tasks::{FETCH_APP_SOURCE, FETCH_GOMOD_SOURCE, TaskDispatcher, TaskReport, TaskRequest, TaskState};

/// Parameter names of `fetch_app_source`, in positional order.
const FETCH_APP_SOURCE_PARAMS: &[&str] = &["url", "ref", "copy_cache_to"];

/// Parameter names of `fetch_gomod_source`, in positional order.
const FETCH_GOMOD_SOURCE_PARAMS: &[&str] = &["archive_path", "copy_cache_to"];

/// A task message as received from the queue.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskMessage {
    /// Message id, echoed in the report
    #[serde(default)]
    pub id: Option<String>,
    /// Task name
    pub task: String,
    /// Positional arguments
    #[serde(default)]
    pub args: Vec<Value>,
    /// Keyword arguments
    #[serde(default)]
    pub kwargs: Map<String, Value>,
}

impl TaskMessage {
    /// Decode the message into a typed request.
    ///
    /// # Errors
    ///
    /// Returns [`CachitoError::InvalidTaskRequest`] for an unknown task,
    /// missing or unexpected arguments, an argument given both positionally
    /// and by keyword, or a non-string argument.
    pub fn into_request(self) -> Result<TaskRequest, CachitoError> {
        match self.task.as_str() {
            FETCH_APP_SOURCE => {
                let mut args = BoundArgs::bind(&self.task, FETCH_APP_SOURCE_PARAMS, self.args, self.kwargs)?;
                Ok(TaskRequest::FetchAppSource {
                    url: args.required("url")?,
                    reference: args.required("ref")?,
                    copy_cache_to: args.optional("copy_cache_to"),
                })
            }
            FETCH_GOMOD_SOURCE => {
                let mut args = BoundArgs::bind(&self.task, FETCH_GOMOD_SOURCE_PARAMS, self.args, self.kwargs)?;
                Ok(TaskRequest::FetchGomodSource {
                    archive_path: PathBuf::from(args.required("archive_path")?),
                    copy_cache_to: args.optional("copy_cache_to"),
                })
            }
            _ => Err(invalid_request(&self.task, "unknown task")),
        }
    }
}

/// Arguments of one message matched against a parameter list.
struct BoundArgs<'a> {
    task: &'a str,
    values: HashMap<&'static str, String>,
}

impl<'a> BoundArgs<'a> {
    fn bind(
        task: &'a str,
        params: &[&'static str],
        args: Vec<Value>,
        mut kwargs: Map<String, Value>,
    ) -> Result<Self, CachitoError> {
        if args.len() > params.len() {
            return Err(invalid_request(
                task,
                format!("expected at most {} positional arguments, got {}", params.len(), args.len()),
            ));
        }

        let mut bound: Vec<(&'static str, Value)> = params.iter().copied().zip(args).collect();
        for &param in params {
            if let Some(value) = kwargs.remove(param) {
                if bound.iter().any(|(name, _)| *name == param) {
                    return Err(invalid_request(
                        task,
                        format!("argument '{param}' given both positionally and by keyword"),
                    ));
                }
                bound.push((param, value));
            }
        }
        if let Some(unexpected) = kwargs.keys().next() {
            return Err(invalid_request(task, format!("unexpected argument '{unexpected}'")));
        }

        let mut values = HashMap::new();
        for (name, value) in bound {
            match value {
                Value::Null => {}
                Value::String(s) => {
                    values.insert(name, s);
                }
                other => {
                    return Err(invalid_request(
                        task,
                        format!("argument '{name}' must be a string, got {other}"),
                    ));
                }
            }
        }

        Ok(Self {
            task,
            values,
        })
    }

    fn required(&mut self, name: &str) -> Result<String, CachitoError> {
        self.values
            .remove(name)
            .ok_or_else(|| invalid_request(self.task, format!("missing required argument '{name}'")))
    }

    fn optional(&mut self, name: &str) -> Option<String> {
        self.values.remove(name)
    }
}

fn invalid_request(task: &str, reason: impl Into<String>) -> CachitoError {
    CachitoError::InvalidTaskRequest {
        task: task.to_string(),
        reason: reason.into(),
    }
}

fn new_task_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Counts of task outcomes over one worker run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerSummary {
    /// Tasks that succeeded
    pub succeeded: usize,
    /// Tasks that failed, including rejected messages
    pub failed: usize,
    /// Tasks aborted by shutdown
    pub aborted: usize,
}

impl WorkerSummary {
    fn record(&mut self, report: &TaskReport) {
        match report.state {
            TaskState::Succeeded => self.succeeded += 1,
            _ => self.failed += 1,
        }
    }
}

/// Executes task messages with bounded concurrency.
#[derive(Debug, Clone)]
pub struct Worker {
    dispatcher: Arc<TaskDispatcher>,
    max_parallel: usize,
}

impl Worker {
    /// Worker for `config`, running up to `config.max_parallel` tasks.
    pub fn new(config: Arc<WorkerConfig>) -> Self {
        let max_parallel = config.max_parallel;
        Self::with_dispatcher(TaskDispatcher::new(config), max_parallel)
    }

    /// Worker around an existing dispatcher.
    pub fn with_dispatcher(dispatcher: TaskDispatcher, max_parallel: usize) -> Self {
        Self {
            dispatcher: Arc::new(dispatcher),
            max_parallel: max_parallel.max(1),
        }
    }

    /// Process messages from `reader` until it closes or Ctrl-C is received.
    pub async fn run<R, W>(&self, reader: R, writer: W) -> Result<WorkerSummary>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let shutdown = async {
            if tokio::signal::ctrl_c().await.is_err() {
                tracing::warn!("Unable to listen for Ctrl-C; the worker stops when its input closes");
                std::future::pending::<()>().await;
            }
        };
        self.run_until(reader, writer, shutdown).await
    }

    /// Process messages from `reader` until it closes or `shutdown` completes.
    ///
    /// When input closes, running tasks are awaited and reported. When
    /// `shutdown` completes first, running tasks are aborted and not reported.
    ///
    /// # Errors
    ///
    /// Fails if reading input or writing a report fails. Task failures are
    /// reported, not returned.
    pub async fn run_until<R, W, F>(&self, reader: R, mut writer: W, shutdown: F) -> Result<WorkerSummary>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
        F: Future<Output = ()>,
    {
        let semaphore = Arc::new(Semaphore::new(self.max_parallel));
        let mut tasks: JoinSet<TaskReport> = JoinSet::new();
        let mut segments = reader.split(b'\n');
        let mut summary = WorkerSummary::default();
        let mut input_open = true;
        tokio::pin!(shutdown);

        tracing::info!("Worker started with {} task slot(s)", self.max_parallel);

        loop {
            if !input_open && tasks.is_empty() {
                break;
            }

            tokio::select! {
                () = &mut shutdown => {
                    tracing::warn!("Shutdown requested, aborting {} running task(s)", tasks.len());
                    tasks.abort_all();
                    while let Some(joined) = tasks.join_next().await {
                        match joined {
                            Ok(report) => {
                                summary.record(&report);
                                write_report(&mut writer, &report).await?;
                            }
                            Err(e) if e.is_cancelled() => summary.aborted += 1,
                            Err(e) => {
                                tracing::error!("Task panicked: {e}");
                                summary.failed += 1;
                            }
                        }
                    }
                    break;
                }
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    match joined {
                        Ok(report) => {
                            summary.record(&report);
                            write_report(&mut writer, &report).await?;
                        }
                        Err(e) => {
                            tracing::error!("Task panicked: {e}");
                            summary.failed += 1;
                        }
                    }
                }
                segment = segments.next_segment(), if input_open => {
                    match segment? {
                        Some(bytes) => {
                            let report = match String::from_utf8(bytes) {
                                Ok(line) => self.accept(&line, &semaphore, &mut tasks),
                                Err(e) => {
                                    let error = invalid_request("unknown", format!("malformed message: {e}"));
                                    tracing::error!("{error}");
                                    Some(TaskReport::rejected(new_task_id(), "unknown", &error.into()))
                                }
                            };
                            if let Some(report) = report {
                                summary.record(&report);
                                write_report(&mut writer, &report).await?;
                            }
                        }
                        None => {
                            tracing::debug!("Input closed, waiting for {} running task(s)", tasks.len());
                            input_open = false;
                        }
                    }
                }
            }
        }

        writer.flush().await?;
        tracing::info!(
            "Worker stopped: {} succeeded, {} failed, {} aborted",
            summary.succeeded,
            summary.failed,
            summary.aborted
        );
        Ok(summary)
    }

    /// Decode a message and spawn its task, or return the rejection report.
    fn accept(
        &self,
        line: &str,
        semaphore: &Arc<Semaphore>,
        tasks: &mut JoinSet<TaskReport>,
    ) -> Option<TaskReport> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }

        let message: TaskMessage = match serde_json::from_str(line) {
            Ok(message) => message,
            Err(e) => {
                let error = invalid_request("unknown", format!("malformed message: {e}"));
                tracing::error!("{error}");
                return Some(TaskReport::rejected(new_task_id(), "unknown", &error.into()));
            }
        };

        let id = message.id.clone().unwrap_or_else(new_task_id);
        let task = message.task.clone();
        let request = match message.into_request() {
            Ok(request) => request,
            Err(e) => {
                tracing::error!("Rejecting message {id}: {e}");
                return Some(TaskReport::rejected(id, task, &e.into()));
            }
        };

        tracing::debug!("Accepted {} message {}", request.name(), id);
        let dispatcher = Arc::clone(&self.dispatcher);
        let semaphore = Arc::clone(semaphore);
        tasks.spawn(async move {
            let _permit = semaphore.acquire_owned().await;
            dispatcher.dispatch(id, request).await
        });
        None
    }
}

async fn write_report<W: AsyncWrite + Unpin>(writer: &mut W, report: &TaskReport) -> Result<()> {
    let mut line = serde_json::to_vec(report)?;
    line.push(b'\n');
    writer.write_all(&line).await?;
    writer.flush().await?;
    Ok(())
}
