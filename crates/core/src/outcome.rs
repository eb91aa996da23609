// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Non-error results of dispatcher operations.
//!
//! Stale reports, duplicate completions, and refused triggers are normal
//! outcomes the caller proceeds past; they are values here, not errors.

use crate::job::BuildId;
use serde::{Deserialize, Serialize};

/// Result of an agent status report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReportOutcome {
    Accepted,
    /// Same state (and result) already recorded; nothing changed
    Duplicate,
    Rejected { reason: RejectReason },
}

impl ReportOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, ReportOutcome::Accepted)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    UnknownJob,
    /// Job already `Completed` or `Rescheduled`
    Terminal,
    /// Reported state does not move the job forward
    NotForward,
}

crate::simple_display! {
    RejectReason {
        UnknownJob => "unknown job",
        Terminal => "job already finished",
        NotForward => "not a forward transition",
    }
}

/// Result of a build-cause trigger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ScheduleOutcome {
    Scheduled { pipeline: String, label: String, jobs: Vec<BuildId> },
    /// Another trigger for the same pipeline is being computed
    AlreadyInFlight { pipeline: String },
    Unauthorized { message: String },
    UnknownPipeline { pipeline: String },
    /// Material revisions match the latest build cause
    NoChange { pipeline: String },
    Invalid { message: String },
}

impl ScheduleOutcome {
    pub fn is_scheduled(&self) -> bool {
        matches!(self, ScheduleOutcome::Scheduled { .. })
    }
}
