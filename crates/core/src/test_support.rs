// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test helpers for use across crates.
//!
//! Gated behind `#[cfg(any(test, feature = "test-support"))]`.

use crate::{AgentIdentifier, AgentRuntimeInfo, BuildId, JobIdentifier};

// ── Proptest strategies ─────────────────────────────────────────────────

/// Proptest strategies for the state machine enums.
pub mod strategies {
    use crate::{AgentStatus, JobResult, JobState};
    use proptest::prelude::*;

    pub fn arb_job_state() -> impl Strategy<Value = JobState> {
        prop_oneof![
            Just(JobState::Scheduled),
            Just(JobState::Assigned),
            Just(JobState::Preparing),
            Just(JobState::Building),
            Just(JobState::Completing),
            Just(JobState::Completed),
            Just(JobState::Rescheduled),
        ]
    }

    pub fn arb_job_result() -> impl Strategy<Value = JobResult> {
        prop_oneof![
            Just(JobResult::Unknown),
            Just(JobResult::Passed),
            Just(JobResult::Failed),
            Just(JobResult::Cancelled),
        ]
    }

    pub fn arb_agent_status() -> impl Strategy<Value = AgentStatus> {
        prop_oneof![
            Just(AgentStatus::Pending),
            Just(AgentStatus::LostContact),
            Just(AgentStatus::Missing),
            Just(AgentStatus::Building),
            Just(AgentStatus::Cancelled),
            Just(AgentStatus::Idle),
            Just(AgentStatus::Disabled),
        ]
    }
}

// ── Fixtures ────────────────────────────────────────────────────────────

pub fn job_identifier(build_id: u64) -> JobIdentifier {
    JobIdentifier::new("studios", "100", "pipeline", "cruise-test-data", BuildId(build_id))
}

pub fn agent_identifier(uuid: &str) -> AgentIdentifier {
    AgentIdentifier::new(format!("host-{uuid}"), "127.0.0.1", uuid)
}

/// Idle agent snapshot with no cookie, located at `/agents/{uuid}`.
pub fn runtime_info(uuid: &str) -> AgentRuntimeInfo {
    AgentRuntimeInfo::new(agent_identifier(uuid), format!("/agents/{uuid}"))
}
