// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! cv-core: data model shared by the conveyor dispatcher, agents, and supervisor

pub mod macros;

pub mod agent;
pub mod clock;
pub mod job;
pub mod outcome;
pub mod schedule;
pub mod work;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use agent::{
    short, AgentCookie, AgentIdentifier, AgentInstruction, AgentRuntimeInfo, AgentStatus,
};
pub use clock::{Clock, FakeClock, SystemClock};
#[cfg(any(test, feature = "test-support"))]
pub use job::JobInstanceBuilder;
pub use job::{
    BuildId, JobIdentifier, JobInstance, JobPlan, JobResult, JobState, StateTransition, Task,
};
pub use outcome::{RejectReason, ReportOutcome, ScheduleOutcome};
pub use schedule::{BuildCause, EnvironmentVariable, MaterialRevision, ScheduleOptions, TriggerKind};
pub use work::{BuildAssignment, DenyReason, Work};
