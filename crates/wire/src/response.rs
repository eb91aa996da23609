// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use cv_core::{AgentCookie, AgentInstruction, ReportOutcome, ScheduleOutcome, Work};
use serde::{Deserialize, Serialize};

use super::{AgentSummary, ErrorKind, JobSummary, PayloadManifest, RejectionCounts};

/// Response from the dispatcher
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum Response {
    /// Generic success
    Ok,

    /// Negotiated protocol version
    Hello { protocol: u32, version: String },

    Instruction { instruction: AgentInstruction },

    Work { work: Work },

    Report { outcome: ReportOutcome },

    Ignored { ignored: bool },

    Cookie { cookie: AgentCookie },

    Manifest { manifest: PayloadManifest },

    Payload { manifest: PayloadManifest, data: Vec<u8> },

    Schedule { outcome: ScheduleOutcome },

    Agents { agents: Vec<AgentSummary> },

    Jobs { jobs: Vec<JobSummary> },

    Status {
        uptime_secs: u64,
        agents: usize,
        jobs_active: usize,
        #[serde(default)]
        rejections: RejectionCounts,
    },

    Error { kind: ErrorKind, message: String },
}

impl Response {
    pub fn error(kind: ErrorKind, message: impl Into<String>) -> Self {
        Response::Error { kind, message: message.into() }
    }
}
