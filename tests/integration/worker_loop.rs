use anyhow::Result;
use cachito_worker::tasks::{TaskReport, TaskState};
use serde_json::json;
use std::path::PathBuf;

use crate::common::TestWorker;

fn parse_reports(stdout: &[u8]) -> Result<Vec<TaskReport>> {
    String::from_utf8_lossy(stdout)
        .lines()
        .map(|line| Ok(serde_json::from_str(line)?))
        .collect()
}

#[test]
fn test_run_processes_stdin_until_closed() -> Result<()> {
    let worker = TestWorker::new()?;
    let (upstream, commit) = worker.upstream("app", &[("main.go", "package main\n")])?;

    let messages = [
        json!({
            "id": "fetch-1",
            "task": "fetch_app_source",
            "args": [upstream.file_url(), commit],
            "kwargs": {"copy_cache_to": "app/source.tar.gz"}
        }),
        json!({"id": "bogus-1", "task": "fetch_rubygems_source"}),
    ];
    let stdin: String = messages.iter().map(|m| format!("{m}\n")).collect();

    let output = worker.command().arg("run").write_stdin(stdin).output()?;
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let reports = parse_reports(&output.stdout)?;
    assert_eq!(reports.len(), 2);

    let fetched = reports.iter().find(|r| r.id == "fetch-1").unwrap();
    assert_eq!(fetched.state, TaskState::Succeeded);
    let archive = PathBuf::from(fetched.result.as_ref().and_then(|v| v.as_str()).unwrap());
    assert!(archive.is_file());
    assert!(worker.fixture.shared_dir().join("app/source.tar.gz").is_file());

    let rejected = reports.iter().find(|r| r.id == "bogus-1").unwrap();
    assert_eq!(rejected.state, TaskState::Failed);
    assert_eq!(rejected.error.as_ref().unwrap().kind.as_str(), "invalid_request");
    Ok(())
}

#[test]
fn test_run_with_empty_input_exits_cleanly() -> Result<()> {
    let worker = TestWorker::new()?;

    let output = worker.command().arg("run").write_stdin("").output()?;

    assert!(output.status.success());
    assert!(output.stdout.is_empty());
    Ok(())
}
