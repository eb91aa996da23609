// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent registry: last-seen runtime info, approval state, and cookies.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use cv_core::{
    AgentCookie, AgentIdentifier, AgentInstruction, AgentRuntimeInfo, AgentStatus, Clock,
    SystemClock,
};
use cv_wire::AgentSummary;
use parking_lot::{Mutex, RwLock};
use thiserror::Error;
use tracing::{info, warn};

use crate::jobs::JobLifecycleManager;

/// Bound on the status audit trail
const HISTORY_LIMIT: usize = 1024;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("cookie for agent {uuid} does not match the one issued; re-register")]
    CookieMismatch { uuid: String },

    #[error("unknown agent {0}")]
    UnknownAgent(String),
}

/// One entry in the status audit trail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentStatusChange {
    pub uuid: String,
    /// `None` when the agent was first registered
    pub from: Option<AgentStatus>,
    pub to: AgentStatus,
    pub at_ms: u64,
}

struct AgentRecord {
    /// Latest snapshot the agent sent
    info: AgentRuntimeInfo,
    /// Status as the dispatcher sees it
    status: AgentStatus,
    last_seen_ms: u64,
    cookie: Option<AgentCookie>,
    /// Location the cookie is bound to
    location: String,
}

pub struct AgentRegistry<C: Clock = SystemClock> {
    agents: RwLock<HashMap<String, Arc<Mutex<AgentRecord>>>>,
    history: Mutex<VecDeque<AgentStatusChange>>,
    auto_register: bool,
    clock: C,
}

impl<C: Clock> AgentRegistry<C> {
    pub fn new(auto_register: bool, clock: C) -> Self {
        Self {
            agents: RwLock::new(HashMap::new()),
            history: Mutex::new(VecDeque::new()),
            auto_register,
            clock,
        }
    }

    /// Issue a fresh cookie bound to `(uuid, location)`, registering the
    /// agent if this is its first contact.
    pub fn issue_cookie(&self, identifier: AgentIdentifier, location: &str) -> AgentCookie {
        let info = AgentRuntimeInfo::new(identifier, location);
        let entry = self.entry_or_register(&info);
        let mut record = entry.lock();
        let cookie = AgentCookie::generate();
        record.cookie = Some(cookie.clone());
        record.location = location.to_string();
        record.info.identifier = info.identifier;
        info!(agent = %record.info.identifier, location, "issued cookie");
        cookie
    }

    /// Record an agent's snapshot: registers unknown agents, refreshes
    /// last-seen, and adopts the agent's self-reported status unless an
    /// operator holds it Pending or Disabled.
    pub fn observe(&self, info: &AgentRuntimeInfo) -> Result<AgentStatus, RegistryError> {
        let entry = self.entry_or_register(info);
        let mut record = entry.lock();
        if let Some(issued) = &record.cookie {
            if info.cookie.as_ref() != Some(issued) || info.location != record.location {
                warn!(agent = %info.identifier, location = %info.location, "cookie mismatch");
                return Err(RegistryError::CookieMismatch { uuid: info.uuid().to_string() });
            }
        }

        record.info = info.clone();
        record.last_seen_ms = self.clock.epoch_ms();
        let next = match record.status {
            AgentStatus::Pending | AgentStatus::Disabled => record.status,
            _ => reported_status(info),
        };
        self.transition(&mut record, next);
        Ok(record.status)
    }

    /// Handle a ping: observe the snapshot and derive the instruction from
    /// the job the agent is running.
    pub fn ping(
        &self,
        info: &AgentRuntimeInfo,
        jobs: &JobLifecycleManager<C>,
    ) -> Result<AgentInstruction, RegistryError> {
        self.observe(info)?;
        Ok(jobs.instruction_for(info))
    }

    pub fn status(&self, uuid: &str) -> Option<AgentStatus> {
        self.entry(uuid).map(|entry| entry.lock().status)
    }

    /// Operator approval of a Pending (or Disabled) agent.
    pub fn approve(&self, uuid: &str) -> Result<AgentStatus, RegistryError> {
        let entry = self.entry(uuid).ok_or_else(|| RegistryError::UnknownAgent(uuid.to_string()))?;
        let mut record = entry.lock();
        if matches!(record.status, AgentStatus::Pending | AgentStatus::Disabled) {
            let next = reported_status(&record.info);
            self.transition(&mut record, next);
        }
        Ok(record.status)
    }

    pub fn disable(&self, uuid: &str) -> Result<(), RegistryError> {
        let entry = self.entry(uuid).ok_or_else(|| RegistryError::UnknownAgent(uuid.to_string()))?;
        let mut record = entry.lock();
        self.transition(&mut record, AgentStatus::Disabled);
        Ok(())
    }

    /// Mark agents silent for longer than `timeout` as LostContact.
    ///
    /// Their jobs stay assigned; freeing them is an operator decision.
    pub fn sweep_lost_contact(&self, timeout: Duration) -> Vec<String> {
        let limit = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        let entries: Vec<_> = self.agents.read().values().cloned().collect();
        let mut lost = Vec::new();
        for entry in entries {
            let mut record = entry.lock();
            let exempt = matches!(
                record.status,
                AgentStatus::Pending | AgentStatus::Disabled | AgentStatus::LostContact
            );
            if !exempt && self.clock.ms_since(record.last_seen_ms) > limit {
                warn!(agent = %record.info.identifier, "lost contact with agent");
                self.transition(&mut record, AgentStatus::LostContact);
                lost.push(record.info.uuid().to_string());
            }
        }
        lost
    }

    /// Agents for display, sorted by status priority then hostname.
    pub fn summaries(&self) -> Vec<AgentSummary> {
        let entries: Vec<_> = self.agents.read().values().cloned().collect();
        let mut summaries: Vec<AgentSummary> = entries
            .iter()
            .map(|entry| {
                let record = entry.lock();
                AgentSummary {
                    uuid: record.info.identifier.uuid.clone(),
                    hostname: record.info.identifier.hostname.clone(),
                    ip_address: record.info.identifier.ip_address.clone(),
                    status: record.status,
                    current_job: record.info.current_job.as_ref().map(|job| job.build_id),
                    last_seen_ms: record.last_seen_ms,
                    resources: record.info.resources.iter().cloned().collect(),
                }
            })
            .collect();
        summaries.sort_by(|a, b| a.status.cmp(&b.status).then_with(|| a.hostname.cmp(&b.hostname)));
        summaries
    }

    /// Status changes for one agent, oldest first.
    pub fn history(&self, uuid: &str) -> Vec<AgentStatusChange> {
        self.history.lock().iter().filter(|change| change.uuid == uuid).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.agents.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn entry(&self, uuid: &str) -> Option<Arc<Mutex<AgentRecord>>> {
        self.agents.read().get(uuid).cloned()
    }

    fn entry_or_register(&self, info: &AgentRuntimeInfo) -> Arc<Mutex<AgentRecord>> {
        if let Some(entry) = self.entry(info.uuid()) {
            return entry;
        }
        let mut agents = self.agents.write();
        if let Some(entry) = agents.get(info.uuid()) {
            return Arc::clone(entry);
        }
        let status =
            if self.auto_register { reported_status(info) } else { AgentStatus::Pending };
        let now = self.clock.epoch_ms();
        let record = AgentRecord {
            info: info.clone(),
            status,
            last_seen_ms: now,
            cookie: None,
            location: info.location.clone(),
        };
        info!(agent = %info.identifier, %status, "registered agent");
        self.record_change(AgentStatusChange {
            uuid: info.uuid().to_string(),
            from: None,
            to: status,
            at_ms: now,
        });
        let entry = Arc::new(Mutex::new(record));
        agents.insert(info.uuid().to_string(), Arc::clone(&entry));
        entry
    }

    fn transition(&self, record: &mut AgentRecord, next: AgentStatus) {
        if record.status == next {
            return;
        }
        info!(agent = %record.info.identifier, from = %record.status, to = %next, "agent status changed");
        self.record_change(AgentStatusChange {
            uuid: record.info.uuid().to_string(),
            from: Some(record.status),
            to: next,
            at_ms: self.clock.epoch_ms(),
        });
        record.status = next;
    }

    fn record_change(&self, change: AgentStatusChange) {
        let mut history = self.history.lock();
        if history.len() == HISTORY_LIMIT {
            history.pop_front();
        }
        history.push_back(change);
    }
}

/// The status an agent claims for itself; dispatcher-only statuses in a
/// snapshot are read as Idle.
fn reported_status(info: &AgentRuntimeInfo) -> AgentStatus {
    if info.status.is_self_reported() {
        info.status
    } else {
        AgentStatus::Idle
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
