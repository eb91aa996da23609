// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Centralized environment variable access for the dispatcher.

use std::path::PathBuf;
use std::time::Duration;

use crate::lifecycle::LifecycleError;

/// Dispatcher build version, reported in `Hello`
pub const BUILD_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Resolve state directory: CV_STATE_DIR > XDG_STATE_HOME/conveyor > ~/.local/state/conveyor
pub fn state_dir() -> Result<PathBuf, LifecycleError> {
    if let Ok(dir) = std::env::var("CV_STATE_DIR") {
        return Ok(PathBuf::from(dir));
    }
    if let Ok(xdg) = std::env::var("XDG_STATE_HOME") {
        return Ok(PathBuf::from(xdg).join("conveyor"));
    }
    let home = std::env::var("HOME").map_err(|_| LifecycleError::NoStateDir)?;
    Ok(PathBuf::from(home).join(".local/state/conveyor"))
}

/// Address the dispatcher listens on (default `127.0.0.1:8153`)
pub fn listen_addr() -> String {
    std::env::var("CV_LISTEN_ADDR")
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "127.0.0.1:8153".to_string())
}

/// Pipeline configuration file. Without one the dispatcher knows no pipelines.
pub fn config_path() -> Option<PathBuf> {
    std::env::var("CV_CONFIG").ok().filter(|s| !s.is_empty()).map(PathBuf::from)
}

/// Agent payload served to supervisors
pub fn payload_path() -> Option<PathBuf> {
    std::env::var("CV_PAYLOAD").ok().filter(|s| !s.is_empty()).map(PathBuf::from)
}

/// Published payload version label; defaults to a checksum prefix
pub fn payload_version() -> Option<String> {
    std::env::var("CV_PAYLOAD_VERSION").ok().filter(|s| !s.is_empty())
}

/// Default IPC timeout
pub fn ipc_timeout() -> Duration {
    millis_or("CV_IPC_TIMEOUT_MS", Duration::from_secs(5))
}

/// How long an agent may go without pinging before it is marked LostContact
pub fn lost_contact_timeout() -> Duration {
    millis_or("CV_LOST_CONTACT_MS", Duration::from_secs(5 * 60))
}

/// How often the lost-contact sweep runs
pub fn sweep_interval() -> Duration {
    millis_or("CV_SWEEP_INTERVAL_MS", Duration::from_secs(30))
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
