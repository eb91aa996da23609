// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Conveyor agent library
//!
//! The pieces that run on a build host: the single-instance lock, the
//! supervisor that keeps a current agent running, the dispatch client,
//! and the agent runtime that executes jobs.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod client;
pub mod env;
pub mod identity;
pub mod lock;
pub mod runtime;
pub mod supervisor;

pub use client::{ClientError, Dispatch, DispatchClient};
pub use lock::{FileLock, Lock};
pub use runtime::{AgentRuntime, RuntimeConfig, RuntimeExit};
pub use supervisor::{
    InstalledPayload, Launcher, PayloadSource, ProcessLauncher, Supervisor, SupervisorConfig,
    SupervisorError,
};

/// Install the stderr tracing subscriber used by both binaries.
pub fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}
