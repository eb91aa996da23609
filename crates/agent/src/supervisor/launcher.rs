// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Running the agent payload as a child process.

use std::io;
use std::path::PathBuf;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use super::payload::InstalledPayload;
use crate::env::CHECKSUM_VAR;

/// Runs an installed payload to completion.
#[async_trait]
pub trait Launcher: Send + Sync {
    /// Returns the exit code, or `None` if the process died from a signal.
    /// Dropping the future kills the process.
    async fn launch(&self, payload: &InstalledPayload) -> io::Result<Option<i32>>;
}

/// Launches the payload as `<payload> <host> <port>` in the working dir.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    host: String,
    port: u16,
    work_dir: PathBuf,
}

impl ProcessLauncher {
    pub fn new(host: impl Into<String>, port: u16, work_dir: impl Into<PathBuf>) -> Self {
        Self { host: host.into(), port, work_dir: work_dir.into() }
    }
}

#[async_trait]
impl Launcher for ProcessLauncher {
    async fn launch(&self, payload: &InstalledPayload) -> io::Result<Option<i32>> {
        let mut child = Command::new(&payload.path)
            .arg(&self.host)
            .arg(self.port.to_string())
            .env(CHECKSUM_VAR, &payload.manifest.sha256)
            .current_dir(&self.work_dir)
            .kill_on_drop(true)
            .spawn()?;
        debug!(pid = child.id(), path = %payload.path.display(), "agent process started");
        let status = child.wait().await?;
        Ok(status.code())
    }
}
