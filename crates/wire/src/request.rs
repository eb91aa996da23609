// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use cv_core::{
    AgentIdentifier, AgentRuntimeInfo, BuildId, JobIdentifier, JobResult, JobState,
    MaterialRevision, ScheduleOptions,
};
use serde::{Deserialize, Serialize};

/// Request to the dispatcher.
///
/// Variants may gain fields (with `#[serde(default)]`) but are never
/// renamed or removed without bumping the protocol version.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum Request {
    /// Protocol version negotiation
    Hello {
        protocol: u32,
        /// Client build version, for logs
        #[serde(default)]
        version: String,
    },

    // ── Agent-facing dispatch contract ──────────────────────────────────
    /// Register/refresh last-seen state; answered with an instruction
    Ping { info: AgentRuntimeInfo },

    /// Ask for at most one unit of work
    GetWork { info: AgentRuntimeInfo },

    ReportCurrentStatus { info: AgentRuntimeInfo, job: JobIdentifier, state: JobState },

    ReportCompleting { info: AgentRuntimeInfo, job: JobIdentifier, result: JobResult },

    ReportCompleted { info: AgentRuntimeInfo, job: JobIdentifier, result: JobResult },

    /// Cheap check whether the agent should abandon a job
    IsIgnored { job: JobIdentifier },

    /// Obtain a session cookie bound to a working-directory location
    GetCookie { identifier: AgentIdentifier, location: String },

    // ── Supervisor-facing payload distribution ──────────────────────────
    PayloadManifest,

    FetchPayload,

    // ── Operator actions ────────────────────────────────────────────────
    TriggerPipeline {
        pipeline: String,
        user: String,
        #[serde(default)]
        options: ScheduleOptions,
    },

    /// An upstream material changed
    MaterialChanged { pipeline: String, revisions: Vec<MaterialRevision> },

    CancelJob { build_id: BuildId },

    RescheduleJob { build_id: BuildId },

    ApproveAgent { uuid: String },

    DisableAgent { uuid: String },

    ListAgents,

    ListJobs {
        /// Include terminal jobs
        #[serde(default)]
        all: bool,
    },

    Status,
}

impl Request {
    /// Short name for logs (avoids dumping runtime info and payloads).
    pub fn kind(&self) -> &'static str {
        match self {
            Request::Hello { .. } => "hello",
            Request::Ping { .. } => "ping",
            Request::GetWork { .. } => "get_work",
            Request::ReportCurrentStatus { .. } => "report_current_status",
            Request::ReportCompleting { .. } => "report_completing",
            Request::ReportCompleted { .. } => "report_completed",
            Request::IsIgnored { .. } => "is_ignored",
            Request::GetCookie { .. } => "get_cookie",
            Request::PayloadManifest => "payload_manifest",
            Request::FetchPayload => "fetch_payload",
            Request::TriggerPipeline { .. } => "trigger_pipeline",
            Request::MaterialChanged { .. } => "material_changed",
            Request::CancelJob { .. } => "cancel_job",
            Request::RescheduleJob { .. } => "reschedule_job",
            Request::ApproveAgent { .. } => "approve_agent",
            Request::DisableAgent { .. } => "disable_agent",
            Request::ListAgents => "list_agents",
            Request::ListJobs { .. } => "list_jobs",
            Request::Status => "status",
        }
    }
}
