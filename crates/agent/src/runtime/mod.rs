// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The agent runtime: registration, the ping loop, and the work loop.
//!
//! Pings and work requests run concurrently. Cancellation only ever
//! arrives as data (a ping instruction or `isIgnored`), which trips the
//! current job's cancellation token; the job then kills its task and
//! reports completion itself.

mod executor;

pub use executor::{TaskExecutor, TaskOutcome};

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use cv_core::{
    AgentRuntimeInfo, BuildAssignment, JobIdentifier, JobResult, JobState, ReportOutcome, Work,
};
use cv_wire::ErrorKind;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::client::{ClientError, Dispatch};

/// Lock file name the agent holds in its working directory.
pub const LOCK_FILE: &str = ".cv-agent.running";

/// Attempts at delivering a completion report before giving up on it.
const COMPLETION_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub work_dir: PathBuf,
    pub ping_interval: Duration,
    pub work_poll: Duration,
    /// Checksum of the payload this process was launched from
    pub checksum: Option<String>,
}

impl RuntimeConfig {
    pub fn from_env(work_dir: PathBuf) -> Self {
        Self {
            work_dir,
            ping_interval: crate::env::ping_interval(),
            work_poll: crate::env::work_poll_interval(),
            checksum: crate::env::launched_checksum(),
        }
    }
}

/// Why the runtime stopped. Both map to exit code 0 so a supervisor
/// re-checks the payload and relaunches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeExit {
    /// The dispatcher publishes a different payload (or no longer speaks
    /// our protocol)
    Upgrade,
    Shutdown,
}

/// State shared between the ping loop and the work loop.
struct Shared {
    info: Mutex<AgentRuntimeInfo>,
    /// Cancels the job in progress
    job_cancel: Mutex<Option<CancellationToken>>,
}

impl Shared {
    fn snapshot(&self) -> AgentRuntimeInfo {
        self.info.lock().clone()
    }

    fn cancel_current_job(&self) {
        if let Some(token) = self.job_cancel.lock().as_ref() {
            if !token.is_cancelled() {
                info!("dispatcher cancelled the current job");
                token.cancel();
            }
        }
    }
}

pub struct AgentRuntime<D> {
    dispatch: Arc<D>,
    config: RuntimeConfig,
    shared: Arc<Shared>,
    executor: TaskExecutor,
}

impl<D: Dispatch> AgentRuntime<D> {
    pub fn new(dispatch: D, config: RuntimeConfig, info: AgentRuntimeInfo) -> Self {
        Self {
            dispatch: Arc::new(dispatch),
            executor: TaskExecutor::new(&config.work_dir),
            config,
            shared: Arc::new(Shared { info: Mutex::new(info), job_cancel: Mutex::new(None) }),
        }
    }

    /// Current runtime snapshot.
    pub fn info(&self) -> AgentRuntimeInfo {
        self.shared.snapshot()
    }

    /// Register and serve work until `shutdown` fires or an upgrade is due.
    pub async fn run(self, shutdown: CancellationToken) -> RuntimeExit {
        if let Some(exit) = self.register(&shutdown).await {
            return exit;
        }

        let stop_pinging = shutdown.child_token();
        let pinger = tokio::spawn(ping_loop(
            Arc::clone(&self.dispatch),
            Arc::clone(&self.shared),
            self.config.ping_interval,
            stop_pinging.clone(),
        ));

        let exit = self.work_loop(&shutdown).await;

        stop_pinging.cancel();
        let _ = pinger.await;
        exit
    }

    /// Negotiate the protocol and obtain a cookie, retrying until the
    /// dispatcher answers. Returns `Some` when the runtime should stop.
    async fn register(&self, shutdown: &CancellationToken) -> Option<RuntimeExit> {
        loop {
            match self.dispatch.hello().await {
                Ok((protocol, version)) => {
                    info!(protocol, dispatcher = %version, "connected to dispatcher");
                    match refresh_cookie(self.dispatch.as_ref(), &self.shared).await {
                        Ok(()) => return None,
                        Err(e) => warn!(error = %e, "failed to register with dispatcher"),
                    }
                }
                Err(e) if e.kind() == Some(ErrorKind::UnsupportedProtocol) => {
                    warn!(error = %e, "dispatcher no longer speaks our protocol");
                    return Some(RuntimeExit::Upgrade);
                }
                Err(e) => warn!(error = %e, "dispatcher unreachable"),
            }
            tokio::select! {
                _ = tokio::time::sleep(self.config.work_poll) => {}
                _ = shutdown.cancelled() => return Some(RuntimeExit::Shutdown),
            }
        }
    }

    async fn work_loop(&self, shutdown: &CancellationToken) -> RuntimeExit {
        loop {
            if shutdown.is_cancelled() {
                return RuntimeExit::Shutdown;
            }
            if self.upgrade_available().await {
                return RuntimeExit::Upgrade;
            }

            match self.dispatch.get_work(&self.shared.snapshot()).await {
                Ok(Work::Build(assignment)) => {
                    self.run_job(assignment, shutdown).await;
                    continue;
                }
                Ok(Work::NoWork) => debug!("no work available"),
                Ok(Work::Deny { reason }) => debug!(%reason, "dispatcher refused work"),
                Err(e) => self.handle_error("get work", e).await,
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.work_poll) => {}
                _ = shutdown.cancelled() => return RuntimeExit::Shutdown,
            }
        }
    }

    /// True when the dispatcher publishes a payload other than ours.
    async fn upgrade_available(&self) -> bool {
        let Some(ours) = &self.config.checksum else {
            return false;
        };
        match self.dispatch.payload_manifest().await {
            Ok(manifest) if &manifest.sha256 != ours => {
                info!(version = %manifest.version, "new agent version published, restarting");
                true
            }
            Ok(_) => false,
            Err(e) => {
                debug!(error = %e, "could not check payload version");
                false
            }
        }
    }

    async fn run_job(&self, assignment: BuildAssignment, shutdown: &CancellationToken) {
        let job = assignment.job.clone();
        let cancel = shutdown.child_token();
        self.shared.info.lock().building(job.clone());
        *self.shared.job_cancel.lock() = Some(cancel.clone());
        info!(%job, "starting job");

        if let Some(result) = self.execute(&assignment, &cancel).await {
            if result == JobResult::Cancelled {
                self.shared.info.lock().cancelled();
            }
            self.report_completion(&job, result).await;
            info!(%job, %result, "job finished");
        }

        self.shared.job_cancel.lock().take();
        self.shared.info.lock().idle();
    }

    /// Run the job's tasks. `None` means the job was taken away from us and
    /// nothing more should be reported.
    async fn execute(
        &self,
        assignment: &BuildAssignment,
        cancel: &CancellationToken,
    ) -> Option<JobResult> {
        let job = &assignment.job;
        let plan = &assignment.plan;

        self.report_state(job, JobState::Preparing).await?;
        let job_dir = match self.executor.prepare(job).await {
            Ok(dir) => dir,
            Err(e) => {
                warn!(%job, error = %e, "failed to prepare job directory");
                return Some(JobResult::Failed);
            }
        };
        self.report_state(job, JobState::Building).await?;

        for task in &plan.tasks {
            self.check_ignored(job, cancel).await;
            if cancel.is_cancelled() {
                return Some(JobResult::Cancelled);
            }
            match self.executor.run_task(task, &job_dir, &plan.variables, cancel).await {
                TaskOutcome::Succeeded => {}
                TaskOutcome::Failed(code) => {
                    info!(%job, program = %task.program, ?code, "task failed");
                    return Some(JobResult::Failed);
                }
                TaskOutcome::Cancelled => return Some(JobResult::Cancelled),
            }
        }
        if cancel.is_cancelled() {
            return Some(JobResult::Cancelled);
        }
        Some(JobResult::Passed)
    }

    async fn check_ignored(&self, job: &JobIdentifier, cancel: &CancellationToken) {
        match self.dispatch.is_ignored(job).await {
            Ok(true) => {
                info!(%job, "job was cancelled or rescheduled, abandoning");
                cancel.cancel();
            }
            Ok(false) => {}
            Err(e) => debug!(%job, error = %e, "could not check whether job is ignored"),
        }
    }

    /// Report a state change; `None` means stop working on the job.
    async fn report_state(&self, job: &JobIdentifier, state: JobState) -> Option<()> {
        let outcome =
            self.dispatch.report_current_status(&self.shared.snapshot(), job, state).await;
        match outcome {
            Ok(ReportOutcome::Accepted | ReportOutcome::Duplicate) => Some(()),
            Ok(ReportOutcome::Rejected { reason }) => {
                warn!(%job, %state, %reason, "status report rejected, abandoning job");
                None
            }
            Err(e) if e.kind() == Some(ErrorKind::AgentMismatch) => {
                error!(%job, error = %e, "job is assigned to another agent, abandoning");
                None
            }
            Err(e) => {
                self.handle_error("report status", e).await;
                Some(())
            }
        }
    }

    /// Two-phase completion. Transient failures are retried; refusals are
    /// logged and dropped.
    async fn report_completion(&self, job: &JobIdentifier, result: JobResult) {
        for phase in [JobState::Completing, JobState::Completed] {
            for attempt in 1..=COMPLETION_ATTEMPTS {
                let info = self.shared.snapshot();
                let outcome = match phase {
                    JobState::Completing => self.dispatch.report_completing(&info, job, result).await,
                    _ => self.dispatch.report_completed(&info, job, result).await,
                };
                match outcome {
                    Ok(ReportOutcome::Rejected { reason }) => {
                        warn!(%job, %phase, %reason, "completion report rejected");
                        break;
                    }
                    Ok(_) => break,
                    Err(e) if e.kind() == Some(ErrorKind::AgentMismatch) => {
                        error!(%job, error = %e, "job is assigned to another agent");
                        return;
                    }
                    Err(e) => {
                        warn!(%job, %phase, attempt, error = %e, "failed to report completion");
                        let refreshed = match e.kind() {
                            Some(ErrorKind::CookieMismatch) => {
                                match refresh_cookie(self.dispatch.as_ref(), &self.shared).await {
                                    Ok(()) => true,
                                    Err(e) => {
                                        warn!(%job, error = %e, "failed to re-register");
                                        false
                                    }
                                }
                            }
                            _ => false,
                        };
                        if !refreshed && attempt < COMPLETION_ATTEMPTS {
                            tokio::time::sleep(self.config.work_poll).await;
                        }
                    }
                }
            }
        }
    }

    async fn handle_error(&self, what: &str, e: ClientError) {
        if e.kind() == Some(ErrorKind::CookieMismatch) {
            warn!(error = %e, "cookie rejected during {}, re-registering", what);
            if let Err(e) = refresh_cookie(self.dispatch.as_ref(), &self.shared).await {
                warn!(error = %e, "failed to re-register");
            }
        } else {
            warn!(error = %e, "failed to {}", what);
        }
    }
}

async fn refresh_cookie<D: Dispatch>(dispatch: &D, shared: &Shared) -> Result<(), ClientError> {
    let (identifier, location) = {
        let info = shared.info.lock();
        (info.identifier.clone(), info.location.clone())
    };
    let cookie = dispatch.get_cookie(&identifier, &location).await?;
    debug!(%cookie, "obtained cookie");
    shared.info.lock().cookie = Some(cookie);
    Ok(())
}

async fn ping_loop<D: Dispatch>(
    dispatch: Arc<D>,
    shared: Arc<Shared>,
    every: Duration,
    stop: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(every) => {}
            _ = stop.cancelled() => return,
        }
        match dispatch.ping(&shared.snapshot()).await {
            Ok(instruction) if instruction.cancel => shared.cancel_current_job(),
            Ok(_) => {}
            Err(e) if e.kind() == Some(ErrorKind::CookieMismatch) => {
                warn!("cookie rejected on ping, re-registering");
                if let Err(e) = refresh_cookie(dispatch.as_ref(), &shared).await {
                    warn!(error = %e, "failed to re-register");
                }
            }
            Err(e) => warn!(error = %e, "ping failed"),
        }
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
