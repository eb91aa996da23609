// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The dispatcher: one context object behind every request handler.

use std::sync::Arc;
use std::time::{Duration, Instant};

use cv_core::{
    AgentCookie, AgentIdentifier, AgentInstruction, AgentRuntimeInfo, AgentStatus, BuildId,
    Clock, DenyReason, JobIdentifier, JobResult, JobState, MaterialRevision, ReportOutcome,
    ScheduleOptions, ScheduleOutcome, SystemClock, Work,
};
use cv_wire::{AgentSummary, ErrorKind, JobSummary, PayloadManifest, RejectionCounts};
use thiserror::Error;
use tracing::info;

use crate::config::DispatcherConfig;
use crate::jobs::{JobError, JobLifecycleManager};
use crate::payload::{PayloadError, PayloadStore};
use crate::registry::{AgentRegistry, RegistryError};
use crate::repository::JobRepository;
use crate::scheduler::BuildCauseScheduler;
use crate::security::ConfigSecurity;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Job(#[from] JobError),

    #[error(transparent)]
    Payload(#[from] PayloadError),
}

impl DispatchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DispatchError::Registry(RegistryError::CookieMismatch { .. }) => ErrorKind::CookieMismatch,
            DispatchError::Registry(RegistryError::UnknownAgent(_)) => ErrorKind::UnknownAgent,
            DispatchError::Job(JobError::AgentMismatch { .. }) => ErrorKind::AgentMismatch,
            DispatchError::Job(JobError::UnknownJob(_)) => ErrorKind::UnknownJob,
            DispatchError::Payload(PayloadError::NotConfigured) => ErrorKind::NoPayload,
            DispatchError::Payload(PayloadError::Io { .. }) => ErrorKind::Internal,
        }
    }
}

/// Point-in-time counters for the `Status` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatcherStatus {
    pub uptime_secs: u64,
    pub agents: usize,
    pub jobs_active: usize,
    pub rejections: RejectionCounts,
}

pub struct Dispatcher<C: Clock = SystemClock> {
    registry: AgentRegistry<C>,
    jobs: Arc<JobLifecycleManager<C>>,
    scheduler: BuildCauseScheduler<C>,
    payload: PayloadStore,
    start_time: Instant,
}

impl<C: Clock> Dispatcher<C> {
    pub fn new(
        config: DispatcherConfig,
        repository: Arc<dyn JobRepository>,
        payload: PayloadStore,
        clock: C,
    ) -> Self {
        let config = Arc::new(config);
        let security = Arc::new(ConfigSecurity::from_config(&config));
        let jobs = Arc::new(JobLifecycleManager::new(Arc::clone(&repository), clock.clone()));
        let scheduler = BuildCauseScheduler::new(
            Arc::clone(&config),
            security,
            repository,
            Arc::clone(&jobs),
            clock.clone(),
        );
        Self {
            registry: AgentRegistry::new(config.auto_register, clock),
            jobs,
            scheduler,
            payload,
            start_time: Instant::now(),
        }
    }

    pub fn registry(&self) -> &AgentRegistry<C> {
        &self.registry
    }

    pub fn jobs(&self) -> &JobLifecycleManager<C> {
        &self.jobs
    }

    // ── Agent-facing contract ───────────────────────────────────────────

    pub fn ping(&self, info: &AgentRuntimeInfo) -> Result<AgentInstruction, DispatchError> {
        Ok(self.registry.ping(info, &self.jobs)?)
    }

    /// At most one build per call. Unapproved and disabled agents are
    /// denied; agents that say they are busy get nothing.
    pub fn get_work(&self, info: &AgentRuntimeInfo) -> Result<Work, DispatchError> {
        match self.registry.observe(info)? {
            AgentStatus::Pending => return Ok(Work::Deny { reason: DenyReason::AwaitingApproval }),
            AgentStatus::Disabled => return Ok(Work::Deny { reason: DenyReason::Disabled }),
            _ => {}
        }
        if info.status != AgentStatus::Idle || info.current_job.is_some() {
            return Ok(Work::NoWork);
        }
        if let Some(copy) = self.jobs.release_abandoned(info.uuid()) {
            info!(agent = %info.identifier, new_build_id = %copy, "requeued abandoned job");
        }
        Ok(self.jobs.assign_next(info).map_or(Work::NoWork, Work::Build))
    }

    pub fn report_current_status(
        &self,
        info: &AgentRuntimeInfo,
        job: &JobIdentifier,
        state: JobState,
    ) -> Result<ReportOutcome, DispatchError> {
        self.registry.observe(info)?;
        Ok(self.jobs.report_status(info.uuid(), job.build_id, state)?)
    }

    pub fn report_completing(
        &self,
        info: &AgentRuntimeInfo,
        job: &JobIdentifier,
        result: JobResult,
    ) -> Result<ReportOutcome, DispatchError> {
        self.registry.observe(info)?;
        Ok(self.jobs.report_completing(info.uuid(), job.build_id, result)?)
    }

    pub fn report_completed(
        &self,
        info: &AgentRuntimeInfo,
        job: &JobIdentifier,
        result: JobResult,
    ) -> Result<ReportOutcome, DispatchError> {
        self.registry.observe(info)?;
        Ok(self.jobs.report_completed(info.uuid(), job.build_id, result)?)
    }

    pub fn is_ignored(&self, job: &JobIdentifier) -> bool {
        self.jobs.is_cancelled_or_rescheduled(job.build_id)
    }

    pub fn get_cookie(&self, identifier: AgentIdentifier, location: &str) -> AgentCookie {
        self.registry.issue_cookie(identifier, location)
    }

    // ── Payload distribution ────────────────────────────────────────────

    pub fn payload_manifest(&self) -> Result<PayloadManifest, DispatchError> {
        Ok(self.payload.manifest()?)
    }

    pub fn fetch_payload(&self) -> Result<(PayloadManifest, Vec<u8>), DispatchError> {
        Ok(self.payload.read()?)
    }

    // ── Operator actions ────────────────────────────────────────────────

    pub fn trigger_pipeline(
        &self,
        pipeline: &str,
        user: &str,
        options: &ScheduleOptions,
    ) -> ScheduleOutcome {
        self.scheduler.trigger_manual(pipeline, user, options)
    }

    pub fn material_changed(&self, pipeline: &str, revisions: &[MaterialRevision]) -> ScheduleOutcome {
        self.scheduler.trigger_material_change(pipeline, revisions)
    }

    pub fn cancel_job(&self, build_id: BuildId) -> Result<bool, DispatchError> {
        Ok(self.jobs.cancel(build_id)?)
    }

    pub fn reschedule_job(&self, build_id: BuildId) -> Result<Option<BuildId>, DispatchError> {
        Ok(self.jobs.reschedule(build_id)?)
    }

    pub fn approve_agent(&self, uuid: &str) -> Result<AgentStatus, DispatchError> {
        Ok(self.registry.approve(uuid)?)
    }

    pub fn disable_agent(&self, uuid: &str) -> Result<(), DispatchError> {
        Ok(self.registry.disable(uuid)?)
    }

    pub fn list_agents(&self) -> Vec<AgentSummary> {
        self.registry.summaries()
    }

    pub fn list_jobs(&self, all: bool) -> Vec<JobSummary> {
        self.jobs.list(all)
    }

    pub fn status(&self) -> DispatcherStatus {
        DispatcherStatus {
            uptime_secs: self.start_time.elapsed().as_secs(),
            agents: self.registry.len(),
            jobs_active: self.jobs.active_count(),
            rejections: self.jobs.rejections(),
        }
    }

    pub fn sweep_lost_contact(&self, timeout: Duration) -> Vec<String> {
        self.registry.sweep_lost_contact(timeout)
    }
}

#[cfg(test)]
#[path = "dispatch_tests.rs"]
mod tests;
