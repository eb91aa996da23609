// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent identity, status, and the runtime snapshot sent on every dispatch call.

use crate::job::JobIdentifier;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::collections::BTreeSet;
use std::fmt;

/// Session token binding an agent uuid to a working-directory location.
///
/// Issued by the dispatcher on `getCookie`; a presented cookie that no
/// longer matches the issued one means the agent's on-disk identity
/// desynced and it must re-register.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentCookie(SmolStr);

impl AgentCookie {
    pub const PREFIX: &'static str = "ck-";

    pub fn generate() -> Self {
        // 19 random characters keep the whole token within SmolStr's inline capacity
        Self(SmolStr::new(format!("{}{}", Self::PREFIX, nanoid::nanoid!(19))))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AgentCookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Truncated: cookies end up in logs
        write!(f, "{}…", short(&self.0, Self::PREFIX.len() + 4))
    }
}

impl From<&str> for AgentCookie {
    fn from(s: &str) -> Self {
        Self(SmolStr::new(s))
    }
}

impl PartialEq<&str> for AgentCookie {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

/// Truncate to at most `n` characters without splitting a code point.
pub fn short(s: &str, n: usize) -> &str {
    match s.char_indices().nth(n) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Durable identity of an agent host.
///
/// `uuid` survives restarts and never changes for a given working directory;
/// hostname and address are informational.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AgentIdentifier {
    pub hostname: String,
    pub ip_address: String,
    pub uuid: String,
}

impl AgentIdentifier {
    pub fn new(
        hostname: impl Into<String>,
        ip_address: impl Into<String>,
        uuid: impl Into<String>,
    ) -> Self {
        Self { hostname: hostname.into(), ip_address: ip_address.into(), uuid: uuid.into() }
    }
}

impl fmt::Display for AgentIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}, {}]", self.hostname, self.ip_address, short(&self.uuid, 8))
    }
}

/// Agent status as seen by the dispatcher.
///
/// Variants are declared in triage priority order so the derived `Ord`
/// gives `Pending < LostContact < Missing < Building < Cancelled < Idle <
/// Disabled`. The order is for display sorting only; no dispatch decision
/// compares statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AgentStatus {
    Pending,
    LostContact,
    Missing,
    Building,
    Cancelled,
    Idle,
    Disabled,
}

impl AgentStatus {
    /// Statuses an agent may report about itself; the rest are assigned by
    /// the dispatcher.
    pub fn is_self_reported(&self) -> bool {
        matches!(self, AgentStatus::Idle | AgentStatus::Building | AgentStatus::Cancelled)
    }
}

crate::simple_display! {
    AgentStatus {
        Pending => "Pending",
        LostContact => "LostContact",
        Missing => "Missing",
        Building => "Building",
        Cancelled => "Cancelled",
        Idle => "Idle",
        Disabled => "Disabled",
    }
}

/// Snapshot of an agent's state, owned by the agent process and sent with
/// every dispatch call. The dispatcher stores copies, never references.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentRuntimeInfo {
    pub identifier: AgentIdentifier,
    pub status: AgentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_job: Option<JobIdentifier>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cookie: Option<AgentCookie>,
    /// Working directory the cookie is bound to
    #[serde(default)]
    pub location: String,
    /// Resource tags this agent offers for job matching
    #[serde(default)]
    pub resources: BTreeSet<String>,
}

impl AgentRuntimeInfo {
    /// Fresh snapshot for an agent that just started: idle, no job, no cookie.
    pub fn new(identifier: AgentIdentifier, location: impl Into<String>) -> Self {
        Self {
            identifier,
            status: AgentStatus::Idle,
            current_job: None,
            cookie: None,
            location: location.into(),
            resources: BTreeSet::new(),
        }
    }

    pub fn uuid(&self) -> &str {
        &self.identifier.uuid
    }

    pub fn with_resources<I, S>(mut self, resources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.resources = resources.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_cookie(mut self, cookie: AgentCookie) -> Self {
        self.cookie = Some(cookie);
        self
    }

    pub fn idle(&mut self) {
        self.status = AgentStatus::Idle;
        self.current_job = None;
    }

    pub fn building(&mut self, job: JobIdentifier) {
        self.status = AgentStatus::Building;
        self.current_job = Some(job);
    }

    pub fn cancelled(&mut self) {
        self.status = AgentStatus::Cancelled;
    }
}

/// Instruction returned from every ping. Recomputed per call from job
/// state, never queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AgentInstruction {
    pub cancel: bool,
}

impl AgentInstruction {
    pub const NONE: AgentInstruction = AgentInstruction { cancel: false };
    pub const CANCEL: AgentInstruction = AgentInstruction { cancel: true };
}

#[cfg(test)]
#[path = "agent_tests.rs"]
mod tests;
