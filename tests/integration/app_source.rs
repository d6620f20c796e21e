use anyhow::Result;
use cachito_worker::core::ErrorKind;
use cachito_worker::source::archive::{extract_archive, verify_archive};
use cachito_worker::tasks::{TIMEOUT_MESSAGE, TaskDispatcher, TaskRequest, TaskState};
use cachito_worker::utils::calculate_checksum;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use crate::common::TestWorker;

#[tokio::test]
async fn test_fetch_without_cache_copy() -> Result<()> {
    let worker = TestWorker::new()?;
    let (upstream, commit) = worker.upstream("app", &[("main.go", "package main\n")])?;

    let archive = worker.dispatcher().fetch_app_source(&upstream.file_url(), &commit, None).await?;

    assert!(archive.is_file());
    assert!(archive.starts_with(worker.fixture.sources_dir()));
    assert_eq!(archive.file_name().unwrap().to_string_lossy(), format!("{commit}.tar.gz"));
    assert!(TestWorker::files_under(worker.fixture.shared_dir()).is_empty());
    assert!(worker.fixture.scratch_is_empty());
    Ok(())
}

#[tokio::test]
async fn test_fetch_copies_identical_bytes_to_cache() -> Result<()> {
    let worker = TestWorker::new()?;
    let (upstream, commit) = worker.upstream("app", &[("main.go", "package main\n")])?;
    let destination = format!("myapp/{commit}.tar.gz");

    let archive = worker
        .dispatcher()
        .fetch_app_source(&upstream.file_url(), &commit, Some(&destination))
        .await?;

    let copy = worker.fixture.shared_dir().join(&destination);
    assert_eq!(std::fs::read(&copy)?, std::fs::read(&archive)?);
    Ok(())
}

#[tokio::test]
async fn test_archive_layout() -> Result<()> {
    let worker = TestWorker::new()?;
    let (upstream, commit) = worker.upstream(
        "app",
        &[("go.mod", "module example.com/app\n"), ("cmd/server/main.go", "package main\n")],
    )?;

    let archive = worker.dispatcher().fetch_app_source(&upstream.file_url(), "main", None).await?;

    assert_eq!(verify_archive(&archive)?, Some(commit));
    let out = TempDir::new()?;
    extract_archive(&archive, out.path())?;
    let app = out.path().join("app");
    assert!(app.join("go.mod").is_file());
    assert!(app.join("cmd/server/main.go").is_file());
    assert!(!app.join(".git").exists());
    Ok(())
}

#[tokio::test]
async fn test_repeated_fetch_is_idempotent() -> Result<()> {
    let worker = TestWorker::new()?;
    let (upstream, _) = worker.upstream("app", &[("README", "hello\n")])?;
    let dispatcher = worker.dispatcher();

    let first = dispatcher.fetch_app_source(&upstream.file_url(), "main", None).await?;
    let checksum = calculate_checksum(&first)?;
    let second = dispatcher.fetch_app_source(&upstream.file_url(), "main", None).await?;

    assert_eq!(first, second);
    assert_eq!(calculate_checksum(&second)?, checksum);
    assert_eq!(TestWorker::files_under(worker.fixture.sources_dir()).len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_missing_repository_is_not_retryable() -> Result<()> {
    let worker = TestWorker::new()?;
    let url = format!("file://{}", worker.fixture.root().join("nowhere").display());

    let report = worker
        .dispatcher()
        .dispatch(
            "missing",
            TaskRequest::FetchAppSource {
                url,
                reference: "main".to_string(),
                copy_cache_to: Some("nowhere.tar.gz".to_string()),
            },
        )
        .await;

    assert_eq!(report.state, TaskState::Failed);
    let error = report.error.unwrap();
    assert_eq!(error.kind, ErrorKind::SourceNotFound);
    assert!(!error.retryable);
    assert!(TestWorker::files_under(worker.fixture.shared_dir()).is_empty());
    Ok(())
}

#[tokio::test]
async fn test_timeout_is_reported_as_retryable() -> Result<()> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let port = listener.local_addr()?.port();
    let server = tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });

    let worker = TestWorker::new()?;
    let config = (*worker.fixture.config()).clone().with_fetch_timeout(Duration::from_secs(1));
    let dispatcher = TaskDispatcher::new(Arc::new(config));

    let report = dispatcher
        .dispatch(
            "slow",
            TaskRequest::FetchAppSource {
                url: format!("http://127.0.0.1:{port}/org/app.git"),
                reference: "main".to_string(),
                copy_cache_to: Some("org/app.tar.gz".to_string()),
            },
        )
        .await;
    server.abort();

    let error = report.error.unwrap();
    assert_eq!(error.kind, ErrorKind::SourceFetchTimeout);
    assert!(error.retryable);
    assert!(error.message.starts_with(TIMEOUT_MESSAGE));
    assert!(TestWorker::files_under(worker.fixture.sources_dir()).is_empty());
    assert!(TestWorker::files_under(worker.fixture.shared_dir()).is_empty());
    Ok(())
}

#[tokio::test]
async fn test_branch_with_slash_gets_its_own_archive() -> Result<()> {
    let worker = TestWorker::new()?;
    let (upstream, main_commit) = worker.upstream("app", &[("VERSION", "1\n")])?;
    upstream.create_branch("release/2.0")?;
    upstream.write_files(&[("VERSION", "2\n")])?;
    upstream.add_all()?;
    upstream.commit("Release 2.0")?;
    let release_commit = upstream.rev_parse_head()?;
    let dispatcher = worker.dispatcher();

    let release = dispatcher.fetch_app_source(&upstream.file_url(), "release/2.0", None).await?;
    let main = dispatcher.fetch_app_source(&upstream.file_url(), "main", None).await?;

    assert_eq!(release.file_name().unwrap().to_string_lossy(), "release%2F2.0.tar.gz");
    assert_eq!(release.parent(), main.parent());
    assert_eq!(verify_archive(&release)?, Some(release_commit));
    assert_eq!(verify_archive(&main)?, Some(main_commit));
    Ok(())
}
