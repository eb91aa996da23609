// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Dispatcher startup and initialization logic.

use std::io::Write;
use std::sync::Arc;

use cv_core::SystemClock;
use fs2::FileExt;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::config::DispatcherConfig;
use crate::dispatch::Dispatcher;
use crate::payload::PayloadStore;
use crate::repository::MemoryRepository;

use super::{Config, DaemonState, LifecycleError, StartupResult};

/// Lock the state dir, load pipelines, and bind the listen address.
///
/// On failure the pid file is removed, unless the lock itself was refused:
/// then the file belongs to the dispatcher already running.
pub async fn startup(config: &Config) -> Result<StartupResult, LifecycleError> {
    let result = try_startup(config).await;
    if let Err(e) = &result {
        if !matches!(e, LifecycleError::LockFailed(_)) {
            remove_pid_file(config);
        }
    }
    result
}

async fn try_startup(config: &Config) -> Result<StartupResult, LifecycleError> {
    std::fs::create_dir_all(&config.state_dir)?;

    // Opened without truncation: until the lock is ours the pid inside may
    // be another dispatcher's
    let mut lock_file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(&config.lock_path)?;
    lock_file.try_lock_exclusive().map_err(LifecycleError::LockFailed)?;

    lock_file.set_len(0)?;
    writeln!(lock_file, "{}", std::process::id())?;

    let pipelines = match &config.config_path {
        Some(path) => {
            let loaded = DispatcherConfig::load(path)?;
            info!(path = %path.display(), pipelines = loaded.pipelines.len(), "loaded pipeline config");
            loaded
        }
        None => {
            info!("No pipeline config given, starting with no pipelines");
            DispatcherConfig::default()
        }
    };

    let payload = PayloadStore::new(config.payload_path.clone(), config.payload_version.clone());
    let dispatcher = Arc::new(Dispatcher::new(
        pipelines,
        Arc::new(MemoryRepository::new()),
        payload,
        SystemClock,
    ));

    // Bind last so a bad config never leaves a port half-open
    let listener = TcpListener::bind(&config.listen_addr)
        .await
        .map_err(|e| LifecycleError::BindFailed(config.listen_addr.clone(), e))?;
    info!(addr = %config.listen_addr, "listening");

    Ok(StartupResult {
        daemon: DaemonState { config: config.clone(), lock_file, dispatcher },
        listener,
    })
}

fn remove_pid_file(config: &Config) {
    if let Err(e) = std::fs::remove_file(&config.lock_path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %config.lock_path.display(), error = %e, "failed to remove pid file");
        }
    }
}

#[cfg(test)]
#[path = "startup_tests.rs"]
mod tests;
