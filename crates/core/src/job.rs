// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Job identifier, execution plan, and the per-job state machine.

use crate::schedule::EnvironmentVariable;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Unique, monotonically increasing job instance id.
///
/// The only key used for conflict detection; pipeline/stage/job names are
/// for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BuildId(pub u64);

impl fmt::Display for BuildId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobIdentifier {
    pub pipeline_name: String,
    pub pipeline_label: String,
    pub stage_name: String,
    pub job_name: String,
    pub build_id: BuildId,
}

impl JobIdentifier {
    pub fn new(
        pipeline_name: impl Into<String>,
        pipeline_label: impl Into<String>,
        stage_name: impl Into<String>,
        job_name: impl Into<String>,
        build_id: BuildId,
    ) -> Self {
        Self {
            pipeline_name: pipeline_name.into(),
            pipeline_label: pipeline_label.into(),
            stage_name: stage_name.into(),
            job_name: job_name.into(),
            build_id,
        }
    }

    /// Same names, different build id (used when a job is rescheduled).
    pub fn with_build_id(&self, build_id: BuildId) -> Self {
        Self { build_id, ..self.clone() }
    }
}

impl fmt::Display for JobIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{} (build {})",
            self.pipeline_name, self.pipeline_label, self.stage_name, self.job_name, self.build_id
        )
    }
}

/// Lifecycle state of a job instance.
///
/// `Scheduled → Assigned → Preparing → Building → Completing → Completed`,
/// with `Rescheduled` reachable from any state before `Completed`.
/// `Completed` and `Rescheduled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobState {
    Scheduled,
    Assigned,
    Preparing,
    Building,
    Completing,
    Completed,
    Rescheduled,
}

impl JobState {
    /// Position along the forward path; `None` for `Rescheduled`, which sits
    /// outside it.
    fn rank(&self) -> Option<u8> {
        match self {
            JobState::Scheduled => Some(0),
            JobState::Assigned => Some(1),
            JobState::Preparing => Some(2),
            JobState::Building => Some(3),
            JobState::Completing => Some(4),
            JobState::Completed => Some(5),
            JobState::Rescheduled => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Rescheduled)
    }

    /// Whether an agent report moving from `self` to `next` goes forward.
    ///
    /// Agents can never report `Scheduled`/`Assigned` (the dispatcher sets
    /// those) or `Rescheduled` (operator action).
    pub fn can_advance_to(&self, next: JobState) -> bool {
        if self.is_terminal() || matches!(next, JobState::Scheduled | JobState::Assigned) {
            return false;
        }
        match (self.rank(), next.rank()) {
            (Some(current), Some(next)) => next > current,
            _ => false,
        }
    }
}

crate::simple_display! {
    JobState {
        Scheduled => "Scheduled",
        Assigned => "Assigned",
        Preparing => "Preparing",
        Building => "Building",
        Completing => "Completing",
        Completed => "Completed",
        Rescheduled => "Rescheduled",
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum JobResult {
    #[default]
    Unknown,
    Passed,
    Failed,
    Cancelled,
}

crate::simple_display! {
    JobResult {
        Unknown => "Unknown",
        Passed => "Passed",
        Failed => "Failed",
        Cancelled => "Cancelled",
    }
}

/// One command an agent runs as part of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Relative to the agent's working directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
}

impl Task {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            working_dir: None,
        }
    }
}

/// What an agent needs to execute a job.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct JobPlan {
    /// Resource tags an agent must offer to run this job
    #[serde(default)]
    pub resources: BTreeSet<String>,
    #[serde(default)]
    pub tasks: Vec<Task>,
    #[serde(default)]
    pub variables: Vec<EnvironmentVariable>,
    /// Opaque location handed to the artifact store
    #[serde(default)]
    pub artifact_location: String,
}

impl JobPlan {
    crate::setters! {
        into {
            artifact_location: String,
        }
        set {
            resources: BTreeSet<String>,
            tasks: Vec<Task>,
            variables: Vec<EnvironmentVariable>,
        }
    }

    /// True when every required resource is offered.
    pub fn runnable_with(&self, offered: &BTreeSet<String>) -> bool {
        self.resources.is_subset(offered)
    }
}

/// One recorded state change of a job, for observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateTransition {
    pub state: JobState,
    pub at_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobInstance {
    pub identifier: JobIdentifier,
    pub state: JobState,
    pub result: JobResult,
    /// Agent uuid captured at assignment time
    pub assigned_agent: Option<String>,
    pub plan: JobPlan,
    #[serde(default)]
    pub transitions: Vec<StateTransition>,
}

impl JobInstance {
    pub fn scheduled(identifier: JobIdentifier, plan: JobPlan, at_ms: u64) -> Self {
        Self {
            identifier,
            state: JobState::Scheduled,
            result: JobResult::Unknown,
            assigned_agent: None,
            plan,
            transitions: vec![StateTransition { state: JobState::Scheduled, at_ms }],
        }
    }

    pub fn build_id(&self) -> BuildId {
        self.identifier.build_id
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn is_cancelled_or_rescheduled(&self) -> bool {
        self.result == JobResult::Cancelled || self.state == JobState::Rescheduled
    }

    pub fn is_assigned_to(&self, uuid: &str) -> bool {
        self.assigned_agent.as_deref() == Some(uuid)
    }

    /// Claim a scheduled job for an agent. Returns false if the job is no
    /// longer waiting for an agent.
    pub fn assign(&mut self, uuid: &str, at_ms: u64) -> bool {
        if self.state != JobState::Scheduled {
            return false;
        }
        self.assigned_agent = Some(uuid.to_string());
        self.change_state(JobState::Assigned, at_ms);
        true
    }

    pub fn change_state(&mut self, state: JobState, at_ms: u64) {
        self.state = state;
        self.transitions.push(StateTransition { state, at_ms });
    }

    /// Record a result without letting a later report overwrite a cancellation.
    pub fn set_result(&mut self, result: JobResult) {
        if self.result != JobResult::Cancelled {
            self.result = result;
        }
    }
}

crate::builder! {
    pub struct JobInstanceBuilder => JobInstance {
        set {
            identifier: JobIdentifier = JobIdentifier::new("pipe", "1", "build", "compile", BuildId(1)),
            state: JobState = JobState::Scheduled,
            result: JobResult = JobResult::Unknown,
            plan: JobPlan = JobPlan::default(),
            transitions: Vec<StateTransition> = Vec::new(),
        }
        option {
            assigned_agent: String = None,
        }
    }
}

#[cfg(test)]
#[path = "job_tests.rs"]
mod tests;
