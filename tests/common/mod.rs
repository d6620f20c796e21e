//! Common test utilities for worker integration tests
//!
//! Wraps [`WorkerFixture`] with an on-disk config file and upstream
//! repositories, and knows how to invoke the worker binary against them.

// Not every helper is used by every test module
#![allow(dead_code)]

use anyhow::Result;
use assert_cmd::Command;
use cachito_worker::tasks::TaskDispatcher;
use cachito_worker::test_utils::{TestGit, WorkerFixture, init_test_logging};
use std::path::{Path, PathBuf};

/// A worker environment: directories, a config file and upstream repos.
pub struct TestWorker {
    pub fixture: WorkerFixture,
    config_path: PathBuf,
}

impl TestWorker {
    /// Create the directories and write a config file pointing at them.
    pub fn new() -> Result<Self> {
        Self::with_config("")
    }

    /// Like [`TestWorker::new`], appending `extra` TOML to the config file.
    pub fn with_config(extra: &str) -> Result<Self> {
        init_test_logging(None);
        let fixture = WorkerFixture::new()?;
        let config_path = fixture.root().join("worker.toml");
        let content = format!(
            "shared_dir = {:?}\nsources_dir = {:?}\nscratch_dir = {:?}\nmax_parallel = 2\n{extra}",
            path_str(fixture.shared_dir()),
            path_str(fixture.sources_dir()),
            path_str(fixture.scratch_dir()),
        );
        std::fs::write(&config_path, content)?;
        Ok(Self {
            fixture,
            config_path,
        })
    }

    /// Resolve Go modules with `go_binary` in [`TestWorker::dispatcher`].
    #[must_use]
    pub fn with_go(mut self, go_binary: &Path) -> Self {
        self.fixture = self.fixture.with_go_binary(go_binary);
        self
    }

    /// Path of the written config file.
    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Create an upstream repository named `name` with one commit.
    pub fn upstream(&self, name: &str, files: &[(&str, &str)]) -> Result<(TestGit, String)> {
        TestGit::create_repo(&self.fixture.root().join("upstream").join(name), files)
    }

    /// Dispatcher over the fixture config.
    pub fn dispatcher(&self) -> TaskDispatcher {
        TaskDispatcher::new(self.fixture.config())
    }

    /// The worker binary with `--config` pointing at this environment.
    pub fn command(&self) -> Command {
        let mut cmd = Command::cargo_bin("cachito-worker").unwrap();
        cmd.arg("--config").arg(&self.config_path).env_remove("RUST_LOG");
        cmd
    }

    /// Every regular file beneath `dir`, relative to it.
    pub fn files_under(dir: &Path) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = walkdir::WalkDir::new(dir)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_file())
            .filter_map(|e| e.path().strip_prefix(dir).ok().map(Path::to_path_buf))
            .collect();
        files.sort();
        files
    }
}

fn path_str(path: &Path) -> String {
    path.display().to_string()
}
