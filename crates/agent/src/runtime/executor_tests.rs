// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use cv_core::test_support::job_identifier;
use std::time::{Duration, Instant};
use tempfile::tempdir;

fn sh(script: &str) -> Task {
    Task::new("sh", ["-c", script])
}

#[tokio::test]
async fn prepare_creates_the_pipeline_directory() {
    let dir = tempdir().unwrap();
    let executor = TaskExecutor::new(dir.path());

    let job_dir = executor.prepare(&job_identifier(1)).await.unwrap();

    assert_eq!(job_dir, dir.path().join("pipelines").join("studios"));
    assert!(job_dir.is_dir());
}

#[tokio::test]
async fn exit_status_decides_the_outcome() {
    let dir = tempdir().unwrap();
    let executor = TaskExecutor::new(dir.path());
    let cancel = CancellationToken::new();

    for (script, expected) in
        [("exit 0", TaskOutcome::Succeeded), ("exit 3", TaskOutcome::Failed(Some(3)))]
    {
        let outcome = executor.run_task(&sh(script), dir.path(), &[], &cancel).await;
        assert_eq!(outcome, expected, "script: {script}");
    }
}

#[tokio::test]
async fn missing_program_fails_the_task() {
    let dir = tempdir().unwrap();
    let executor = TaskExecutor::new(dir.path());
    let task = Task::new("definitely-not-a-real-program-cv", Vec::<String>::new());

    let outcome = executor.run_task(&task, dir.path(), &[], &CancellationToken::new()).await;
    assert_eq!(outcome, TaskOutcome::Failed(None));
}

#[tokio::test]
async fn variables_and_working_dir_are_applied() {
    let dir = tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("sub")).unwrap();
    let executor = TaskExecutor::new(dir.path());
    let mut task = sh("echo \"$GREETING $SECRET\" > out.txt");
    task.working_dir = Some("sub".to_string());
    let variables = vec![
        EnvironmentVariable::plain("GREETING", "hello"),
        EnvironmentVariable::secure("SECRET", "s3cr3t"),
    ];

    let outcome = executor.run_task(&task, dir.path(), &variables, &CancellationToken::new()).await;

    assert_eq!(outcome, TaskOutcome::Succeeded);
    let out = std::fs::read_to_string(dir.path().join("sub").join("out.txt")).unwrap();
    assert_eq!(out.trim(), "hello s3cr3t");
}

#[tokio::test]
async fn cancellation_kills_the_running_task() {
    let dir = tempdir().unwrap();
    let executor = TaskExecutor::new(dir.path());
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let outcome = executor.run_task(&sh("sleep 30"), dir.path(), &[], &cancel).await;

    assert_eq!(outcome, TaskOutcome::Cancelled);
    assert!(started.elapsed() < Duration::from_secs(10));
}
