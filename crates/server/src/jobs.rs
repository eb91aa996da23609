// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Job lifecycle: assignment, agent status reports, and operator actions.
//!
//! Each job instance sits behind its own mutex. The map lock is only held
//! long enough to look up or insert an entry, so reports for different
//! jobs never wait on each other. Lock order is job, then the waiting
//! index, then the assignment map.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use cv_core::{
    AgentInstruction, AgentRuntimeInfo, BuildAssignment, BuildId, Clock, JobIdentifier,
    JobInstance, JobPlan, JobResult, JobState, RejectReason, ReportOutcome, SystemClock,
};
use cv_wire::{JobSummary, RejectionCounts};
use parking_lot::{Mutex, RwLock};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::repository::JobRepository;

const TRANSITION_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Error)]
pub enum JobError {
    /// The reporting agent is not the one the job was assigned to
    #[error("agent {reported} reported on job {build_id} assigned to {assigned:?}")]
    AgentMismatch { build_id: BuildId, assigned: Option<String>, reported: String },

    #[error("unknown job {0}")]
    UnknownJob(BuildId),
}

/// Published on every committed change to a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobTransition {
    pub build_id: BuildId,
    pub state: JobState,
    pub result: JobResult,
    pub agent: Option<String>,
    pub at_ms: u64,
}

#[derive(Debug, Default)]
struct RejectionStats {
    unknown_job: AtomicU64,
    terminal: AtomicU64,
    not_forward: AtomicU64,
    duplicate: AtomicU64,
    agent_mismatch: AtomicU64,
}

impl RejectionStats {
    fn record(&self, outcome: &ReportOutcome) {
        let counter = match outcome {
            ReportOutcome::Accepted => return,
            ReportOutcome::Duplicate => &self.duplicate,
            ReportOutcome::Rejected { reason: RejectReason::UnknownJob } => &self.unknown_job,
            ReportOutcome::Rejected { reason: RejectReason::Terminal } => &self.terminal,
            ReportOutcome::Rejected { reason: RejectReason::NotForward } => &self.not_forward,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> RejectionCounts {
        RejectionCounts {
            unknown_job: self.unknown_job.load(Ordering::Relaxed),
            terminal: self.terminal.load(Ordering::Relaxed),
            not_forward: self.not_forward.load(Ordering::Relaxed),
            duplicate: self.duplicate.load(Ordering::Relaxed),
            agent_mismatch: self.agent_mismatch.load(Ordering::Relaxed),
        }
    }
}

pub struct JobLifecycleManager<C: Clock = SystemClock> {
    jobs: RwLock<HashMap<BuildId, Arc<Mutex<JobInstance>>>>,
    /// Jobs in `Scheduled`, oldest first
    waiting: Mutex<BTreeSet<BuildId>>,
    /// Most recent job handed to each agent uuid
    assignments: RwLock<HashMap<String, BuildId>>,
    next_build_id: AtomicU64,
    repository: Arc<dyn JobRepository>,
    clock: C,
    events: broadcast::Sender<JobTransition>,
    rejections: RejectionStats,
}

impl<C: Clock> JobLifecycleManager<C> {
    pub fn new(repository: Arc<dyn JobRepository>, clock: C) -> Self {
        let (events, _) = broadcast::channel(TRANSITION_CHANNEL_CAPACITY);
        Self {
            jobs: RwLock::new(HashMap::new()),
            waiting: Mutex::new(BTreeSet::new()),
            assignments: RwLock::new(HashMap::new()),
            next_build_id: AtomicU64::new(1),
            repository,
            clock,
            events,
            rejections: RejectionStats::default(),
        }
    }

    /// Observe committed transitions. Slow receivers lose the oldest events.
    pub fn subscribe(&self) -> broadcast::Receiver<JobTransition> {
        self.events.subscribe()
    }

    /// Create a `Scheduled` job instance with a fresh build id.
    pub fn create(
        &self,
        pipeline: &str,
        label: &str,
        stage: &str,
        job: &str,
        plan: JobPlan,
    ) -> BuildId {
        self.insert_scheduled(JobIdentifier::new(pipeline, label, stage, job, BuildId(0)), plan)
    }

    fn insert_scheduled(&self, identifier: JobIdentifier, plan: JobPlan) -> BuildId {
        let build_id = BuildId(self.next_build_id.fetch_add(1, Ordering::SeqCst));
        let job = JobInstance::scheduled(identifier.with_build_id(build_id), plan, self.clock.epoch_ms());
        self.commit(&job);
        self.jobs.write().insert(build_id, Arc::new(Mutex::new(job)));
        self.waiting.lock().insert(build_id);
        build_id
    }

    pub fn get(&self, build_id: BuildId) -> Option<JobInstance> {
        self.entry(build_id).map(|entry| entry.lock().clone())
    }

    /// Hand the oldest runnable job to an agent.
    ///
    /// The per-job lock plus the `Scheduled` check make each job go to at
    /// most one agent even when many agents ask at once.
    pub fn assign_next(&self, info: &AgentRuntimeInfo) -> Option<BuildAssignment> {
        let candidates: Vec<BuildId> = self.waiting.lock().iter().copied().collect();
        for build_id in candidates {
            let Some(entry) = self.entry(build_id) else {
                self.waiting.lock().remove(&build_id);
                continue;
            };
            let mut job = entry.lock();
            if job.state != JobState::Scheduled {
                self.waiting.lock().remove(&build_id);
                continue;
            }
            if !job.plan.runnable_with(&info.resources) {
                continue;
            }
            if !job.assign(info.uuid(), self.clock.epoch_ms()) {
                continue;
            }
            self.waiting.lock().remove(&build_id);
            self.assignments.write().insert(info.uuid().to_string(), build_id);
            self.commit(&job);
            info!(job = %job.identifier, agent = %info.identifier, "assigned job");
            return Some(BuildAssignment { job: job.identifier.clone(), plan: job.plan.clone() });
        }
        None
    }

    /// Apply an agent's `reportCurrentStatus`.
    pub fn report_status(
        &self,
        uuid: &str,
        build_id: BuildId,
        state: JobState,
    ) -> Result<ReportOutcome, JobError> {
        let Some(entry) = self.entry(build_id) else {
            return Ok(self.unknown(build_id, uuid));
        };
        let mut job = entry.lock();
        self.check_agent(&job, uuid)?;

        let outcome = if job.is_terminal() {
            ReportOutcome::Rejected { reason: RejectReason::Terminal }
        } else if job.state == state {
            ReportOutcome::Duplicate
        } else if !job.state.can_advance_to(state) {
            ReportOutcome::Rejected { reason: RejectReason::NotForward }
        } else {
            job.change_state(state, self.clock.epoch_ms());
            self.commit(&job);
            ReportOutcome::Accepted
        };
        self.finish_report(&job, uuid, state, outcome);
        Ok(outcome)
    }

    /// Apply `reportCompleting`: record the result and move to `Completing`.
    pub fn report_completing(
        &self,
        uuid: &str,
        build_id: BuildId,
        result: JobResult,
    ) -> Result<ReportOutcome, JobError> {
        let Some(entry) = self.entry(build_id) else {
            return Ok(self.unknown(build_id, uuid));
        };
        let mut job = entry.lock();
        self.check_agent(&job, uuid)?;

        let outcome = match job.state {
            JobState::Completed | JobState::Rescheduled => {
                ReportOutcome::Rejected { reason: RejectReason::Terminal }
            }
            JobState::Completing => {
                let before = job.result;
                job.set_result(result);
                if job.result == before {
                    ReportOutcome::Duplicate
                } else {
                    self.commit(&job);
                    ReportOutcome::Accepted
                }
            }
            _ => {
                job.set_result(result);
                job.change_state(JobState::Completing, self.clock.epoch_ms());
                self.commit(&job);
                ReportOutcome::Accepted
            }
        };
        self.finish_report(&job, uuid, JobState::Completing, outcome);
        Ok(outcome)
    }

    /// Apply `reportCompleted`. Idempotent: repeating it is a `Duplicate`
    /// and leaves the job unchanged.
    pub fn report_completed(
        &self,
        uuid: &str,
        build_id: BuildId,
        result: JobResult,
    ) -> Result<ReportOutcome, JobError> {
        let Some(entry) = self.entry(build_id) else {
            return Ok(self.unknown(build_id, uuid));
        };
        let mut job = entry.lock();
        self.check_agent(&job, uuid)?;

        let outcome = match job.state {
            JobState::Completed => ReportOutcome::Duplicate,
            JobState::Rescheduled => ReportOutcome::Rejected { reason: RejectReason::Terminal },
            _ => {
                job.set_result(result);
                job.change_state(JobState::Completed, self.clock.epoch_ms());
                self.commit(&job);
                ReportOutcome::Accepted
            }
        };
        self.finish_report(&job, uuid, JobState::Completed, outcome);
        Ok(outcome)
    }

    /// Whether the agent running this job should abandon it. Unknown jobs
    /// are not ignored.
    pub fn is_cancelled_or_rescheduled(&self, build_id: BuildId) -> bool {
        self.entry(build_id).is_some_and(|entry| entry.lock().is_cancelled_or_rescheduled())
    }

    /// Instruction for an agent's ping, derived from the job it is running
    /// (or was last given).
    pub fn instruction_for(&self, info: &AgentRuntimeInfo) -> AgentInstruction {
        let (build_id, idle) = match &info.current_job {
            Some(job) => (Some(job.build_id), false),
            None => (self.assignments.read().get(info.uuid()).copied(), true),
        };
        let Some(entry) = build_id.and_then(|id| self.entry(id)) else {
            return AgentInstruction::NONE;
        };
        let job = entry.lock();
        // An idle agent has nothing left to stop once its last job is retired
        if idle && job.is_terminal() {
            return AgentInstruction::NONE;
        }
        if job.state != JobState::Completed && job.is_cancelled_or_rescheduled() {
            AgentInstruction::CANCEL
        } else {
            AgentInstruction::NONE
        }
    }

    /// Operator cancel. A waiting job completes as `Cancelled` immediately;
    /// a running one is marked and its agent is told to stop on next ping.
    ///
    /// Returns false when the job was already finished or cancelled.
    pub fn cancel(&self, build_id: BuildId) -> Result<bool, JobError> {
        let entry = self.entry(build_id).ok_or(JobError::UnknownJob(build_id))?;
        let mut job = entry.lock();
        let changed = match job.state {
            JobState::Completed | JobState::Rescheduled => false,
            JobState::Scheduled => {
                job.set_result(JobResult::Cancelled);
                job.change_state(JobState::Completed, self.clock.epoch_ms());
                self.waiting.lock().remove(&build_id);
                true
            }
            _ if job.result == JobResult::Cancelled => false,
            _ => {
                job.set_result(JobResult::Cancelled);
                true
            }
        };
        if changed {
            self.commit(&job);
            info!(job = %job.identifier, state = %job.state, "cancelled job");
        }
        Ok(changed)
    }

    /// Operator reschedule: retire the instance as `Rescheduled` and queue
    /// a copy under a new build id. `None` if the job already finished.
    pub fn reschedule(&self, build_id: BuildId) -> Result<Option<BuildId>, JobError> {
        let entry = self.entry(build_id).ok_or(JobError::UnknownJob(build_id))?;
        let (identifier, plan) = {
            let mut job = entry.lock();
            if job.is_terminal() {
                return Ok(None);
            }
            job.change_state(JobState::Rescheduled, self.clock.epoch_ms());
            self.waiting.lock().remove(&build_id);
            self.commit(&job);
            (job.identifier.clone(), job.plan.clone())
        };
        let copy = self.insert_scheduled(identifier, plan);
        info!(%build_id, new_build_id = %copy, "rescheduled job");
        Ok(Some(copy))
    }

    /// An idle agent asking for work no longer runs the job it was last
    /// given. Reschedule that job, or complete it if it was cancelled.
    pub fn release_abandoned(&self, uuid: &str) -> Option<BuildId> {
        let build_id = self.assignments.read().get(uuid).copied()?;
        let entry = self.entry(build_id)?;
        {
            let mut job = entry.lock();
            if job.is_terminal() || !job.is_assigned_to(uuid) {
                return None;
            }
            warn!(job = %job.identifier, agent = uuid, "agent abandoned job");
            if job.result == JobResult::Cancelled {
                job.change_state(JobState::Completed, self.clock.epoch_ms());
                self.commit(&job);
                return None;
            }
        }
        self.reschedule(build_id).ok().flatten()
    }

    /// Jobs sorted by build id; terminal ones only when `all`.
    pub fn list(&self, all: bool) -> Vec<JobSummary> {
        let entries: Vec<_> = self.jobs.read().values().cloned().collect();
        let mut summaries: Vec<JobSummary> = entries
            .iter()
            .map(|entry| entry.lock().clone())
            .filter(|job| all || !job.is_terminal())
            .map(|job| JobSummary {
                identifier: job.identifier,
                state: job.state,
                result: job.result,
                assigned_agent: job.assigned_agent,
            })
            .collect();
        summaries.sort_by_key(|s| s.identifier.build_id);
        summaries
    }

    pub fn active_count(&self) -> usize {
        let entries: Vec<_> = self.jobs.read().values().cloned().collect();
        entries.iter().filter(|entry| !entry.lock().is_terminal()).count()
    }

    pub fn rejections(&self) -> RejectionCounts {
        self.rejections.snapshot()
    }

    fn entry(&self, build_id: BuildId) -> Option<Arc<Mutex<JobInstance>>> {
        self.jobs.read().get(&build_id).cloned()
    }

    fn check_agent(&self, job: &JobInstance, uuid: &str) -> Result<(), JobError> {
        if job.is_assigned_to(uuid) {
            return Ok(());
        }
        self.rejections.agent_mismatch.fetch_add(1, Ordering::Relaxed);
        error!(
            job = %job.identifier,
            reported = uuid,
            assigned = ?job.assigned_agent,
            "agent uuid changed in the middle of a job"
        );
        Err(JobError::AgentMismatch {
            build_id: job.build_id(),
            assigned: job.assigned_agent.clone(),
            reported: uuid.to_string(),
        })
    }

    fn unknown(&self, build_id: BuildId, uuid: &str) -> ReportOutcome {
        let outcome = ReportOutcome::Rejected { reason: RejectReason::UnknownJob };
        self.rejections.record(&outcome);
        warn!(%build_id, agent = uuid, "report for unknown job");
        outcome
    }

    fn finish_report(&self, job: &JobInstance, uuid: &str, reported: JobState, outcome: ReportOutcome) {
        self.rejections.record(&outcome);
        match outcome {
            ReportOutcome::Accepted => {
                debug!(job = %job.identifier, agent = uuid, state = %job.state, "report accepted")
            }
            ReportOutcome::Duplicate => {
                debug!(job = %job.identifier, agent = uuid, %reported, "duplicate report")
            }
            ReportOutcome::Rejected { reason } => warn!(
                job = %job.identifier,
                agent = uuid,
                current = %job.state,
                %reported,
                %reason,
                "report rejected"
            ),
        }
    }

    fn commit(&self, job: &JobInstance) {
        self.repository.save_job(job);
        let _ = self.events.send(JobTransition {
            build_id: job.build_id(),
            state: job.state,
            result: job.result,
            agent: job.assigned_agent.clone(),
            at_ms: job.transitions.last().map_or(0, |t| t.at_ms),
        });
    }
}

#[cfg(test)]
#[path = "jobs_tests.rs"]
mod tests;
