// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Client side of the dispatch protocol.
//!
//! Each call opens a fresh TCP connection, sends one framed request and
//! reads one framed response. Rejections the dispatcher reports as
//! `Response::Error` come back as [`ClientError::Rejected`] with their kind.

use std::time::Duration;

use async_trait::async_trait;
use cv_core::{
    AgentCookie, AgentIdentifier, AgentInstruction, AgentRuntimeInfo, BuildId, JobIdentifier,
    JobResult, JobState, MaterialRevision, ReportOutcome, ScheduleOptions, ScheduleOutcome, Work,
};
use cv_wire::{
    AgentSummary, ErrorKind, JobSummary, PayloadManifest, ProtocolError, RejectionCounts, Request,
    Response, PROTOCOL_VERSION,
};
use thiserror::Error;
use tokio::net::TcpStream;

use crate::env::BUILD_VERSION;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("cannot reach dispatcher at {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("dispatcher refused request ({kind:?}): {message}")]
    Rejected { kind: ErrorKind, message: String },

    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),
}

impl ClientError {
    /// Kind reported by the dispatcher, if it answered with an error.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            ClientError::Rejected { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// Network trouble worth retrying, as opposed to a refusal.
    pub fn is_transient(&self) -> bool {
        matches!(self, ClientError::Connect { .. } | ClientError::Protocol(_))
    }
}

/// The dispatch calls an agent runtime makes.
#[async_trait]
pub trait Dispatch: Send + Sync + 'static {
    /// Negotiate the protocol; returns (protocol, dispatcher version).
    async fn hello(&self) -> Result<(u32, String), ClientError>;

    async fn get_cookie(
        &self,
        identifier: &AgentIdentifier,
        location: &str,
    ) -> Result<AgentCookie, ClientError>;

    async fn ping(&self, info: &AgentRuntimeInfo) -> Result<AgentInstruction, ClientError>;

    async fn get_work(&self, info: &AgentRuntimeInfo) -> Result<Work, ClientError>;

    async fn report_current_status(
        &self,
        info: &AgentRuntimeInfo,
        job: &JobIdentifier,
        state: JobState,
    ) -> Result<ReportOutcome, ClientError>;

    async fn report_completing(
        &self,
        info: &AgentRuntimeInfo,
        job: &JobIdentifier,
        result: JobResult,
    ) -> Result<ReportOutcome, ClientError>;

    async fn report_completed(
        &self,
        info: &AgentRuntimeInfo,
        job: &JobIdentifier,
        result: JobResult,
    ) -> Result<ReportOutcome, ClientError>;

    async fn is_ignored(&self, job: &JobIdentifier) -> Result<bool, ClientError>;

    async fn payload_manifest(&self) -> Result<PayloadManifest, ClientError>;
}

/// Connection settings for a dispatcher.
#[derive(Debug, Clone)]
pub struct DispatchClient {
    addr: String,
    timeout: Duration,
}

impl DispatchClient {
    pub fn new(addr: impl Into<String>, timeout: Duration) -> Self {
        Self { addr: addr.into(), timeout }
    }

    /// Client for `host:port` with the timeout from the environment.
    pub fn for_host(host: &str, port: u16) -> Self {
        Self::new(format!("{host}:{port}"), crate::env::ipc_timeout())
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub async fn send(&self, request: &Request) -> Result<Response, ClientError> {
        let mut stream = tokio::time::timeout(self.timeout, TcpStream::connect(&self.addr))
            .await
            .map_err(|_| ProtocolError::Timeout)?
            .map_err(|source| ClientError::Connect { addr: self.addr.clone(), source })?;
        Ok(cv_wire::call(&mut stream, request, self.timeout).await?)
    }

    fn reject<T>(response: Response) -> Result<T, ClientError> {
        match response {
            Response::Error { kind, message } => Err(ClientError::Rejected { kind, message }),
            other => Err(ClientError::UnexpectedResponse(response_name(&other).to_string())),
        }
    }

    pub async fn fetch_payload(&self) -> Result<(PayloadManifest, Vec<u8>), ClientError> {
        match self.send(&Request::FetchPayload).await? {
            Response::Payload { manifest, data } => Ok((manifest, data)),
            other => Self::reject(other),
        }
    }

    // ── Operator actions ────────────────────────────────────────────────

    pub async fn trigger_pipeline(
        &self,
        pipeline: &str,
        user: &str,
        options: ScheduleOptions,
    ) -> Result<ScheduleOutcome, ClientError> {
        let request = Request::TriggerPipeline {
            pipeline: pipeline.to_string(),
            user: user.to_string(),
            options,
        };
        match self.send(&request).await? {
            Response::Schedule { outcome } => Ok(outcome),
            other => Self::reject(other),
        }
    }

    pub async fn material_changed(
        &self,
        pipeline: &str,
        revisions: Vec<MaterialRevision>,
    ) -> Result<ScheduleOutcome, ClientError> {
        let request = Request::MaterialChanged { pipeline: pipeline.to_string(), revisions };
        match self.send(&request).await? {
            Response::Schedule { outcome } => Ok(outcome),
            other => Self::reject(other),
        }
    }

    pub async fn cancel_job(&self, build_id: BuildId) -> Result<(), ClientError> {
        match self.send(&Request::CancelJob { build_id }).await? {
            Response::Ok => Ok(()),
            other => Self::reject(other),
        }
    }

    pub async fn reschedule_job(&self, build_id: BuildId) -> Result<(), ClientError> {
        match self.send(&Request::RescheduleJob { build_id }).await? {
            Response::Ok => Ok(()),
            other => Self::reject(other),
        }
    }

    pub async fn approve_agent(&self, uuid: &str) -> Result<(), ClientError> {
        match self.send(&Request::ApproveAgent { uuid: uuid.to_string() }).await? {
            Response::Ok => Ok(()),
            other => Self::reject(other),
        }
    }

    pub async fn disable_agent(&self, uuid: &str) -> Result<(), ClientError> {
        match self.send(&Request::DisableAgent { uuid: uuid.to_string() }).await? {
            Response::Ok => Ok(()),
            other => Self::reject(other),
        }
    }

    pub async fn list_agents(&self) -> Result<Vec<AgentSummary>, ClientError> {
        match self.send(&Request::ListAgents).await? {
            Response::Agents { agents } => Ok(agents),
            other => Self::reject(other),
        }
    }

    pub async fn list_jobs(&self, all: bool) -> Result<Vec<JobSummary>, ClientError> {
        match self.send(&Request::ListJobs { all }).await? {
            Response::Jobs { jobs } => Ok(jobs),
            other => Self::reject(other),
        }
    }

    /// Returns (uptime_secs, agents, jobs_active, rejections).
    pub async fn status(&self) -> Result<(u64, usize, usize, RejectionCounts), ClientError> {
        match self.send(&Request::Status).await? {
            Response::Status { uptime_secs, agents, jobs_active, rejections } => {
                Ok((uptime_secs, agents, jobs_active, rejections))
            }
            other => Self::reject(other),
        }
    }
}

#[async_trait]
impl Dispatch for DispatchClient {
    async fn hello(&self) -> Result<(u32, String), ClientError> {
        let request =
            Request::Hello { protocol: PROTOCOL_VERSION, version: BUILD_VERSION.to_string() };
        match self.send(&request).await? {
            Response::Hello { protocol, version } => Ok((protocol, version)),
            other => Self::reject(other),
        }
    }

    async fn get_cookie(
        &self,
        identifier: &AgentIdentifier,
        location: &str,
    ) -> Result<AgentCookie, ClientError> {
        let request =
            Request::GetCookie { identifier: identifier.clone(), location: location.to_string() };
        match self.send(&request).await? {
            Response::Cookie { cookie } => Ok(cookie),
            other => Self::reject(other),
        }
    }

    async fn ping(&self, info: &AgentRuntimeInfo) -> Result<AgentInstruction, ClientError> {
        match self.send(&Request::Ping { info: info.clone() }).await? {
            Response::Instruction { instruction } => Ok(instruction),
            other => Self::reject(other),
        }
    }

    async fn get_work(&self, info: &AgentRuntimeInfo) -> Result<Work, ClientError> {
        match self.send(&Request::GetWork { info: info.clone() }).await? {
            Response::Work { work } => Ok(work),
            other => Self::reject(other),
        }
    }

    async fn report_current_status(
        &self,
        info: &AgentRuntimeInfo,
        job: &JobIdentifier,
        state: JobState,
    ) -> Result<ReportOutcome, ClientError> {
        let request =
            Request::ReportCurrentStatus { info: info.clone(), job: job.clone(), state };
        match self.send(&request).await? {
            Response::Report { outcome } => Ok(outcome),
            other => Self::reject(other),
        }
    }

    async fn report_completing(
        &self,
        info: &AgentRuntimeInfo,
        job: &JobIdentifier,
        result: JobResult,
    ) -> Result<ReportOutcome, ClientError> {
        let request = Request::ReportCompleting { info: info.clone(), job: job.clone(), result };
        match self.send(&request).await? {
            Response::Report { outcome } => Ok(outcome),
            other => Self::reject(other),
        }
    }

    async fn report_completed(
        &self,
        info: &AgentRuntimeInfo,
        job: &JobIdentifier,
        result: JobResult,
    ) -> Result<ReportOutcome, ClientError> {
        let request = Request::ReportCompleted { info: info.clone(), job: job.clone(), result };
        match self.send(&request).await? {
            Response::Report { outcome } => Ok(outcome),
            other => Self::reject(other),
        }
    }

    async fn is_ignored(&self, job: &JobIdentifier) -> Result<bool, ClientError> {
        match self.send(&Request::IsIgnored { job: job.clone() }).await? {
            Response::Ignored { ignored } => Ok(ignored),
            other => Self::reject(other),
        }
    }

    async fn payload_manifest(&self) -> Result<PayloadManifest, ClientError> {
        match self.send(&Request::PayloadManifest).await? {
            Response::Manifest { manifest } => Ok(manifest),
            other => Self::reject(other),
        }
    }
}

/// Variant name only; payload responses carry the whole binary.
fn response_name(response: &Response) -> &'static str {
    match response {
        Response::Ok => "Ok",
        Response::Hello { .. } => "Hello",
        Response::Instruction { .. } => "Instruction",
        Response::Work { .. } => "Work",
        Response::Report { .. } => "Report",
        Response::Ignored { .. } => "Ignored",
        Response::Cookie { .. } => "Cookie",
        Response::Manifest { .. } => "Manifest",
        Response::Payload { .. } => "Payload",
        Response::Schedule { .. } => "Schedule",
        Response::Agents { .. } => "Agents",
        Response::Jobs { .. } => "Jobs",
        Response::Status { .. } => "Status",
        Response::Error { .. } => "Error",
    }
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;
