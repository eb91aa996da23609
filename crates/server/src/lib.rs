// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Conveyor dispatcher library
//!
//! Hands jobs to remote build agents, tracks each job's lifecycle from
//! their reports, and serves the agent payload to supervisors.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod config;
pub mod dispatch;
pub mod env;
pub mod jobs;
pub mod lifecycle;
pub mod listener;
pub mod payload;
pub mod registry;
pub mod repository;
pub mod scheduler;
pub mod security;

pub use config::{ConfigError, DispatcherConfig};
pub use dispatch::{DispatchError, Dispatcher, DispatcherStatus};
pub use jobs::{JobError, JobLifecycleManager, JobTransition};
pub use lifecycle::{Config, DaemonState, LifecycleError, StartupResult};
pub use listener::{ListenCtx, Listener};
pub use payload::{PayloadError, PayloadStore};
pub use registry::{AgentRegistry, AgentStatusChange, RegistryError};
pub use repository::{JobRepository, MemoryRepository};
pub use scheduler::BuildCauseScheduler;
pub use security::{ConfigSecurity, SecurityService};
