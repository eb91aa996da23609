// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Work handed to an agent by `getWork`.

use crate::job::{JobIdentifier, JobPlan};
use serde::{Deserialize, Serialize};

/// A concrete build for one agent. Issued at most once per job instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildAssignment {
    pub job: JobIdentifier,
    pub plan: JobPlan,
}

/// Why an agent is refused work outright.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    /// Registered but not yet approved by an operator
    AwaitingApproval,
    Disabled,
}

crate::simple_display! {
    DenyReason {
        AwaitingApproval => "agent is awaiting approval",
        Disabled => "agent is disabled",
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Work {
    Build(BuildAssignment),
    /// Nothing runnable right now; poll again later
    NoWork,
    Deny { reason: DenyReason },
}

impl Work {
    pub fn is_build(&self) -> bool {
        matches!(self, Work::Build(_))
    }
}
