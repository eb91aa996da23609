// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Runs a job's tasks as child processes.

use std::io;
use std::path::{Path, PathBuf};

use cv_core::{EnvironmentVariable, JobIdentifier, Task};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    Succeeded,
    /// Non-zero exit, death by signal (`None`), or failure to start
    Failed(Option<i32>),
    /// Killed because the job was cancelled
    Cancelled,
}

/// Executes tasks under `<root>/pipelines/<pipeline>`.
#[derive(Debug, Clone)]
pub struct TaskExecutor {
    root: PathBuf,
}

impl TaskExecutor {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn job_dir(&self, job: &JobIdentifier) -> PathBuf {
        self.root.join("pipelines").join(&job.pipeline_name)
    }

    /// Create the job's directory.
    pub async fn prepare(&self, job: &JobIdentifier) -> io::Result<PathBuf> {
        let dir = self.job_dir(job);
        tokio::fs::create_dir_all(&dir).await?;
        Ok(dir)
    }

    /// Run one task to completion, or kill it when `cancel` fires.
    pub async fn run_task(
        &self,
        task: &Task,
        job_dir: &Path,
        variables: &[EnvironmentVariable],
        cancel: &CancellationToken,
    ) -> TaskOutcome {
        let dir = match &task.working_dir {
            Some(relative) => job_dir.join(relative),
            None => job_dir.to_path_buf(),
        };
        let mut command = Command::new(&task.program);
        command.args(&task.args).current_dir(&dir).kill_on_drop(true);
        for variable in variables {
            command.env(&variable.name, &variable.value);
        }

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!(program = %task.program, dir = %dir.display(), error = %e, "failed to start task");
                return TaskOutcome::Failed(None);
            }
        };
        debug!(program = %task.program, pid = child.id(), "task started");

        tokio::select! {
            status = child.wait() => match status {
                Ok(status) if status.success() => TaskOutcome::Succeeded,
                Ok(status) => TaskOutcome::Failed(status.code()),
                Err(e) => {
                    warn!(program = %task.program, error = %e, "failed to wait for task");
                    TaskOutcome::Failed(None)
                }
            },
            _ = cancel.cancelled() => {
                if let Err(e) = child.kill().await {
                    warn!(program = %task.program, error = %e, "failed to kill cancelled task");
                }
                TaskOutcome::Cancelled
            }
        }
    }
}

#[cfg(test)]
#[path = "executor_tests.rs"]
mod tests;
