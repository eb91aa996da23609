// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Host-side watchdog that keeps one current agent running.
//!
//! The supervisor owns the working-directory lock for its whole life. Each
//! round it checks the installed payload against the dispatcher's manifest
//! (downloading on any mismatch), runs the agent to completion, and reads
//! its exit code: 0 asks for a re-fetch and relaunch, anything else is a
//! crash that is retried after a growing backoff until the budget runs out.
//! A restart request that finds the same payload published counts as a
//! crash, and a run that outlived the healthy-run threshold clears the count.

mod launcher;
mod payload;

pub use launcher::{Launcher, ProcessLauncher};
pub use payload::{InstalledPayload, PayloadSource};

use std::path::PathBuf;
use std::time::Duration;

use cv_wire::sha256_hex;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::client::ClientError;
use crate::lock::{wait_until_lost, Lock};

/// Lock file name the supervisor holds in its working directory.
pub const LOCK_FILE: &str = ".cv-supervisor.running";

/// Payload file name inside the working directory.
pub const PAYLOAD_FILE: &str = "cv-agent-payload";

const LOCK_CHECK_EVERY: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub work_dir: PathBuf,
    pub payload_path: PathBuf,
    /// Consecutive crashes tolerated; one more is fatal
    pub max_restarts: u32,
    /// Multiplied by the number of consecutive crashes
    pub restart_backoff: Duration,
    /// A run at least this long is healthy and clears the crash count
    pub healthy_run: Duration,
    pub download_retries: u32,
    /// Multiplied by the attempt number
    pub download_backoff: Duration,
}

impl SupervisorConfig {
    pub fn from_env(work_dir: PathBuf) -> Self {
        Self {
            payload_path: work_dir.join(PAYLOAD_FILE),
            work_dir,
            max_restarts: crate::env::max_restarts(),
            restart_backoff: crate::env::restart_backoff(),
            healthy_run: crate::env::healthy_run(),
            download_retries: crate::env::download_retries(),
            download_backoff: crate::env::restart_backoff(),
        }
    }
}

/// Fatal supervisor outcomes; each ends the process with a failure status.
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("another supervisor is running here ({0} is held)")]
    AlreadyRunning(PathBuf),

    #[error("lost ownership of {0} to another supervisor")]
    LockLost(PathBuf),

    #[error("could not obtain agent payload after {attempts} attempt(s): {source}")]
    Download {
        attempts: u32,
        #[source]
        source: ClientError,
    },

    #[error(
        "downloaded payload failed verification {attempts} time(s) (expected sha256 {expected})"
    )]
    Corrupt { attempts: u32, expected: String },

    #[error("failed to install payload at {path}: {source}")]
    Install {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("agent failed {crashes} times in a row (last exit code {last_code:?})")]
    RestartBudgetExhausted { crashes: u32, last_code: Option<i32> },
}

pub struct Supervisor<S, L, K> {
    config: SupervisorConfig,
    source: S,
    launcher: L,
    lock: K,
}

impl<S, L, K> Supervisor<S, L, K>
where
    S: PayloadSource,
    L: Launcher,
    K: Lock,
{
    pub fn new(config: SupervisorConfig, source: S, launcher: L, lock: K) -> Self {
        Self { config, source, launcher, lock }
    }

    /// Supervise until `shutdown` fires (Ok) or a fatal error (Err).
    pub async fn run(mut self, shutdown: CancellationToken) -> Result<(), SupervisorError> {
        if !self.lock.try_acquire() {
            return Err(SupervisorError::AlreadyRunning(self.config.work_dir.join(LOCK_FILE)));
        }
        let result = self.supervise(&shutdown).await;
        self.lock.release();
        result
    }

    async fn supervise(&self, shutdown: &CancellationToken) -> Result<(), SupervisorError> {
        let mut crashes = 0u32;
        let mut last_sha: Option<String> = None;
        let mut restart_requested = false;
        loop {
            let payload = tokio::select! {
                payload = self.ensure_payload() => payload?,
                _ = shutdown.cancelled() => return Ok(()),
            };

            let unchanged = last_sha.as_deref() == Some(payload.manifest.sha256.as_str());
            if !unchanged {
                crashes = 0;
            } else if restart_requested {
                warn!(version = %payload.manifest.version, "agent asked for a restart but no new version is published");
                crashes += 1;
                if !self.back_off(crashes, Some(0), shutdown).await? {
                    return Ok(());
                }
            }
            last_sha = Some(payload.manifest.sha256.clone());

            if !self.lock.is_owner() {
                return Err(self.lock_lost());
            }
            info!(version = %payload.manifest.version, "launching agent");
            let started = Instant::now();
            let exit = tokio::select! {
                exit = self.launcher.launch(&payload) => exit,
                _ = shutdown.cancelled() => {
                    info!("shutting down, stopping agent");
                    return Ok(());
                }
                () = wait_until_lost(&self.lock, LOCK_CHECK_EVERY) => {
                    return Err(self.lock_lost());
                }
            };
            if started.elapsed() >= self.config.healthy_run {
                crashes = 0;
            }

            let last_code = match exit {
                Ok(Some(0)) => {
                    info!("agent requested restart, checking for a new version");
                    restart_requested = true;
                    continue;
                }
                Ok(code) => {
                    warn!(?code, "agent exited unexpectedly");
                    code
                }
                Err(e) => {
                    warn!(error = %e, "failed to launch agent");
                    None
                }
            };
            restart_requested = false;

            crashes += 1;
            if !self.back_off(crashes, last_code, shutdown).await? {
                return Ok(());
            }
        }
    }

    fn lock_lost(&self) -> SupervisorError {
        error!("supervisor lock taken over, stopping agent");
        SupervisorError::LockLost(self.config.work_dir.join(LOCK_FILE))
    }

    /// Charge a failed run against the budget and wait out its backoff.
    /// Returns false when shutdown fired while waiting.
    async fn back_off(
        &self,
        crashes: u32,
        last_code: Option<i32>,
        shutdown: &CancellationToken,
    ) -> Result<bool, SupervisorError> {
        if crashes > self.config.max_restarts {
            error!(crashes, "agent keeps failing, giving up");
            return Err(SupervisorError::RestartBudgetExhausted { crashes, last_code });
        }
        let delay = self.config.restart_backoff * crashes;
        debug!(?delay, crashes, "relaunching after backoff");
        tokio::select! {
            _ = tokio::time::sleep(delay) => Ok(true),
            _ = shutdown.cancelled() => Ok(false),
        }
    }

    /// Make sure the installed payload matches what the dispatcher publishes.
    async fn ensure_payload(&self) -> Result<InstalledPayload, SupervisorError> {
        let path = &self.config.payload_path;
        let manifest = self.fetch_manifest().await?;
        if payload::matches(path, &manifest).await {
            debug!(version = %manifest.version, "installed payload is current");
            return Ok(InstalledPayload { path: path.clone(), manifest });
        }

        info!(version = %manifest.version, "downloading agent payload");
        let retries = self.config.download_retries.max(1);
        let mut corrupt = None;
        for attempt in 1..=retries {
            match self.source.fetch().await {
                Ok((served, data)) if served.verify(&data) => {
                    payload::install(path, &data)
                        .await
                        .map_err(|source| SupervisorError::Install { path: path.clone(), source })?;
                    info!(version = %served.version, bytes = data.len(), "installed agent payload");
                    return Ok(InstalledPayload { path: path.clone(), manifest: served });
                }
                Ok((served, data)) => {
                    warn!(
                        attempt,
                        expected = %served.sha256,
                        actual = %sha256_hex(&data),
                        "downloaded payload failed verification"
                    );
                    corrupt = Some(served.sha256);
                }
                Err(e) if e.is_transient() && attempt < retries => {
                    warn!(attempt, error = %e, "payload download failed");
                }
                Err(source) => return Err(SupervisorError::Download { attempts: attempt, source }),
            }
            if attempt < retries {
                tokio::time::sleep(self.config.download_backoff * attempt).await;
            }
        }
        Err(SupervisorError::Corrupt {
            attempts: retries,
            expected: corrupt.unwrap_or_default(),
        })
    }

    async fn fetch_manifest(&self) -> Result<cv_wire::PayloadManifest, SupervisorError> {
        let retries = self.config.download_retries.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.source.manifest().await {
                Ok(manifest) => return Ok(manifest),
                Err(e) if e.is_transient() && attempt < retries => {
                    warn!(attempt, error = %e, "failed to fetch payload manifest");
                    tokio::time::sleep(self.config.download_backoff * attempt).await;
                }
                Err(source) => return Err(SupervisorError::Download { attempts: attempt, source }),
            }
        }
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
