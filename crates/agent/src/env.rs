// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Centralized environment variable access for the agent and supervisor.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;

/// Agent build version, reported in `Hello`
pub const BUILD_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Checksum of the payload the supervisor launched us from
pub const CHECKSUM_VAR: &str = "CV_AGENT_CHECKSUM";

/// Working directory for lock files, identity, and job checkouts.
/// CV_AGENT_DIR > current directory.
pub fn agent_dir() -> std::io::Result<PathBuf> {
    match std::env::var("CV_AGENT_DIR") {
        Ok(dir) if !dir.is_empty() => Ok(PathBuf::from(dir)),
        _ => std::env::current_dir(),
    }
}

/// How long a lock file may go untouched before it is presumed abandoned
pub fn lock_stale_after() -> Duration {
    millis_or("CV_LOCK_STALE_MS", Duration::from_secs(10 * 60))
}

/// How often the lock heartbeat touches the lock file
pub fn lock_heartbeat() -> Duration {
    millis_or("CV_LOCK_HEARTBEAT_MS", Duration::from_secs(5))
}

pub fn ping_interval() -> Duration {
    millis_or("CV_PING_INTERVAL_MS", Duration::from_secs(10))
}

/// Delay between `getWork` polls when there is nothing to do
pub fn work_poll_interval() -> Duration {
    millis_or("CV_WORK_POLL_MS", Duration::from_secs(5))
}

/// Consecutive crashes the supervisor tolerates before giving up
pub fn max_restarts() -> u32 {
    std::env::var("CV_MAX_RESTARTS").ok().and_then(|s| s.parse().ok()).unwrap_or(5)
}

/// Base delay before relaunching a crashed agent; grows with each crash
pub fn restart_backoff() -> Duration {
    millis_or("CV_RESTART_BACKOFF_MS", Duration::from_secs(2))
}

/// Run length after which the supervisor forgets earlier crashes
pub fn healthy_run() -> Duration {
    millis_or("CV_HEALTHY_RUN_MS", Duration::from_secs(10 * 60))
}

/// Attempts at fetching the payload manifest or payload before giving up
pub fn download_retries() -> u32 {
    std::env::var("CV_DOWNLOAD_RETRIES").ok().and_then(|s| s.parse().ok()).unwrap_or(5).max(1)
}

/// Resource tags offered by this agent, comma separated
pub fn agent_resources() -> BTreeSet<String> {
    std::env::var("CV_AGENT_RESOURCES")
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// Checksum handed down by the supervisor, if any
pub fn launched_checksum() -> Option<String> {
    std::env::var(CHECKSUM_VAR).ok().filter(|s| !s.is_empty())
}

pub fn ipc_timeout() -> Duration {
    millis_or("CV_IPC_TIMEOUT_MS", Duration::from_secs(30))
}

fn millis_or(var: &str, default: Duration) -> Duration {
    std::env::var(var)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or(default)
}

#[cfg(test)]
#[path = "env_tests.rs"]
mod tests;
