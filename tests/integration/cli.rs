use anyhow::Result;
use assert_cmd::Command;
use predicates::prelude::*;

use crate::common::TestWorker;

#[test]
fn test_validate_config_text() -> Result<()> {
    let worker = TestWorker::new()?;

    worker
        .command()
        .arg("validate-config")
        .assert()
        .success()
        .stdout(predicate::str::contains("Worker configuration is valid"))
        .stdout(predicate::str::contains("Parallelism:   2"));
    Ok(())
}

#[test]
fn test_validate_config_json() -> Result<()> {
    let worker = TestWorker::with_config("fetch_timeout_secs = 42\n")?;

    let output = worker.command().args(["validate-config", "--format", "json"]).output()?;
    assert!(output.status.success());

    let result: serde_json::Value = serde_json::from_slice(&output.stdout)?;
    assert_eq!(result["valid"], true);
    assert_eq!(result["fetch_timeout_secs"], 42);
    assert_eq!(result["max_parallel"], 2);
    Ok(())
}

#[test]
fn test_invalid_config_fails() -> Result<()> {
    let worker = TestWorker::new()?;
    let config = worker.fixture.root().join("broken.toml");
    std::fs::write(
        &config,
        format!("shared_dir = {:?}\n", worker.fixture.root().join("missing").display().to_string()),
    )?;

    let output = Command::cargo_bin("cachito-worker")?
        .arg("--config")
        .arg(&config)
        .args(["validate-config", "--format", "json"])
        .output()?;

    assert!(!output.status.success());
    let result: serde_json::Value = serde_json::from_slice(&output.stdout)?;
    assert_eq!(result["valid"], false);
    assert_eq!(result["error_kind"], "configuration");
    Ok(())
}

#[test]
fn test_unknown_config_key_is_rejected() -> Result<()> {
    let worker = TestWorker::with_config("cache_size = 10\n")?;

    worker.command().arg("validate-config").assert().failure();
    Ok(())
}

#[test]
fn test_fetch_app_source_prints_archive_path() -> Result<()> {
    let worker = TestWorker::new()?;
    let (upstream, commit) = worker.upstream("app", &[("main.go", "package main\n")])?;

    let output = worker.command().args(["fetch-app-source", &upstream.file_url(), &commit]).output()?;
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let stdout = String::from_utf8(output.stdout)?;
    let archive = std::path::Path::new(stdout.trim());
    assert!(archive.is_file());
    assert!(archive.starts_with(worker.fixture.sources_dir()));
    Ok(())
}

#[test]
fn test_fetch_app_source_rejects_bad_reference() -> Result<()> {
    let worker = TestWorker::new()?;

    worker
        .command()
        .args(["fetch-app-source", "https://github.com/org/app.git", "bad ref"])
        .assert()
        .failure()
        .stdout(predicate::str::is_empty());
    Ok(())
}
