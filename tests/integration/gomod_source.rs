use anyhow::Result;
use cachito_worker::core::ErrorKind;
use cachito_worker::tasks::{TaskRequest, TaskState};
use cachito_worker::test_utils::{GO_MOD, write_fake_go};
use tempfile::TempDir;

use crate::common::TestWorker;

#[tokio::test]
async fn test_fetch_then_resolve_modules() -> Result<()> {
    let tools = TempDir::new()?;
    let go = write_fake_go(tools.path(), false)?;
    let worker = TestWorker::new()?.with_go(&go);
    let (upstream, commit) = worker.upstream("app", &[("go.mod", GO_MOD), ("main.go", "package main\n")])?;
    let dispatcher = worker.dispatcher();

    let archive = dispatcher.fetch_app_source(&upstream.file_url(), &commit, None).await?;
    let manifest = dispatcher.fetch_gomod_source(&archive, Some("deps/app")).await?;

    let names: Vec<_> = manifest.iter().map(|d| d.name.as_str()).collect();
    assert_eq!(
        names,
        ["github.com/Masterminds/semver", "github.com/pkg/errors", "golang.org/x/text", "example.com/lib"]
    );
    assert!(manifest.iter().all(|d| d.kind == "gomod"));
    assert!(
        worker
            .fixture
            .shared_dir()
            .join("deps/app/github.com/pkg/errors/@v/v0.9.1.zip")
            .is_file()
    );
    assert!(worker.fixture.scratch_is_empty());
    Ok(())
}

#[tokio::test]
async fn test_manifest_report_is_a_list() -> Result<()> {
    let tools = TempDir::new()?;
    let go = write_fake_go(tools.path(), false)?;
    let worker = TestWorker::new()?.with_go(&go);
    let archive = worker.fixture.archive_with("app", &[("go.mod", GO_MOD)])?;

    let report = worker
        .dispatcher()
        .dispatch(
            "deps",
            TaskRequest::FetchGomodSource {
                archive_path: archive,
                copy_cache_to: None,
            },
        )
        .await;

    assert_eq!(report.state, TaskState::Succeeded);
    let result = report.result.unwrap();
    assert_eq!(result.as_array().map(Vec::len), Some(4));
    assert_eq!(result[2]["replaced_by"]["version"], "v0.3.2");
    assert!(TestWorker::files_under(worker.fixture.shared_dir()).is_empty());
    Ok(())
}

#[tokio::test]
async fn test_missing_go_mod_leaves_nothing_behind() -> Result<()> {
    let tools = TempDir::new()?;
    let go = write_fake_go(tools.path(), false)?;
    let worker = TestWorker::new()?.with_go(&go);
    let archive = worker.fixture.archive_with("app", &[("README.md", "no modules here\n")])?;

    let err = worker
        .dispatcher()
        .fetch_gomod_source(&archive, Some("deps/app"))
        .await
        .unwrap_err();

    assert_eq!(ErrorKind::of(&err), ErrorKind::Resolution);
    assert!(format!("{err:#}").contains("go.mod"));
    assert!(worker.fixture.scratch_is_empty());
    assert!(TestWorker::files_under(worker.fixture.shared_dir()).is_empty());
    Ok(())
}

#[tokio::test]
async fn test_tool_failure_carries_its_output() -> Result<()> {
    let tools = TempDir::new()?;
    let go = write_fake_go(tools.path(), true)?;
    let worker = TestWorker::new()?.with_go(&go);
    let archive = worker.fixture.archive_with("app", &[("go.mod", GO_MOD)])?;

    let report = worker
        .dispatcher()
        .dispatch(
            "broken",
            TaskRequest::FetchGomodSource {
                archive_path: archive,
                copy_cache_to: Some("deps/app".to_string()),
            },
        )
        .await;

    let error = report.error.unwrap();
    assert_eq!(error.kind, ErrorKind::Resolution);
    assert!(!error.retryable);
    assert!(error.message.contains("404 Not Found"), "{}", error.message);
    assert!(worker.fixture.scratch_is_empty());
    assert!(TestWorker::files_under(worker.fixture.shared_dir()).is_empty());
    Ok(())
}
