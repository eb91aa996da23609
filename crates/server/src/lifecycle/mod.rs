// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Dispatcher lifecycle management: startup and shutdown.

mod startup;
pub use startup::startup;

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_appender::rolling::RollingFileAppender;

use crate::config::ConfigError;
use crate::dispatch::Dispatcher;

/// Dispatcher process configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Root state directory (e.g. ~/.local/state/conveyor)
    pub state_dir: PathBuf,
    /// Path to lock/PID file
    pub lock_path: PathBuf,
    /// Path to dispatcher log file
    pub log_path: PathBuf,
    /// Address to listen on
    pub listen_addr: String,
    /// Pipeline configuration (TOML)
    pub config_path: Option<PathBuf>,
    /// Agent payload served to supervisors
    pub payload_path: Option<PathBuf>,
    pub payload_version: Option<String>,
    pub lost_contact_timeout: Duration,
    pub sweep_interval: Duration,
}

impl Config {
    /// Load configuration from the environment.
    pub fn load() -> Result<Self, LifecycleError> {
        Ok(Self::for_state_dir(crate::env::state_dir()?))
    }

    pub fn for_state_dir(state_dir: PathBuf) -> Self {
        Self {
            lock_path: state_dir.join("cvd.pid"),
            log_path: state_dir.join("cvd.log"),
            listen_addr: crate::env::listen_addr(),
            config_path: crate::env::config_path(),
            payload_path: crate::env::payload_path(),
            payload_version: crate::env::payload_version(),
            lost_contact_timeout: crate::env::lost_contact_timeout(),
            sweep_interval: crate::env::sweep_interval(),
            state_dir,
        }
    }

    /// Appender for `log_path`, creating its directory first.
    pub fn log_appender(&self) -> Result<RollingFileAppender, LifecycleError> {
        let Some(name) = self.log_path.file_name() else {
            return Err(LifecycleError::BadLogPath(self.log_path.clone()));
        };
        let dir = match self.log_path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir)?;
        Ok(tracing_appender::rolling::never(dir, name))
    }
}

/// A running dispatcher. Owns the pid-file lock for as long as it lives.
pub struct DaemonState {
    pub config: Config,
    // fs2 lock, released on drop
    #[allow(dead_code)]
    lock_file: File,
    pub dispatcher: Arc<Dispatcher>,
}

/// Result of startup: the dispatcher state and the bound listener.
pub struct StartupResult {
    pub daemon: DaemonState,
    pub listener: TcpListener,
}

impl DaemonState {
    /// Spawn the periodic lost-contact sweep.
    pub fn spawn_sweeper(&self) -> tokio::task::JoinHandle<()> {
        let dispatcher = Arc::clone(&self.dispatcher);
        let timeout = self.config.lost_contact_timeout;
        let mut interval = tokio::time::interval(self.config.sweep_interval);
        tokio::spawn(async move {
            loop {
                interval.tick().await;
                let lost = dispatcher.sweep_lost_contact(timeout);
                if !lost.is_empty() {
                    info!(count = lost.len(), "marked agents as lost contact");
                }
            }
        })
    }

    /// Shutdown the dispatcher.
    ///
    /// Agents keep running their jobs; they reconnect when the dispatcher
    /// comes back.
    pub fn shutdown(&mut self) -> Result<(), LifecycleError> {
        info!("Shutting down dispatcher...");

        match std::fs::remove_file(&self.config.lock_path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.config.lock_path.display(), error = %e, "failed to remove pid file"),
        }
        info!("Dispatcher shutdown complete");
        Ok(())
    }
}

/// Lifecycle errors
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("no state directory: set CV_STATE_DIR or HOME")]
    NoStateDir,

    #[error("Failed to acquire lock: dispatcher already running?")]
    LockFailed(#[source] std::io::Error),

    #[error("Failed to bind {0}: {1}")]
    BindFailed(String, std::io::Error),

    #[error("log path {0} does not name a file")]
    BadLogPath(PathBuf),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
