// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! DTOs carried in responses.

use cv_core::{AgentStatus, BuildId, JobIdentifier, JobResult, JobState};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Classifies `Response::Error` so callers can react without parsing text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Reporting agent is not the one the job was assigned to
    AgentMismatch,
    /// Presented cookie does not match the issued one; re-register
    CookieMismatch,
    UnknownAgent,
    UnknownJob,
    UnsupportedProtocol,
    /// No agent payload is published
    NoPayload,
    Internal,
}

/// Version and checksum of the published agent payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadManifest {
    pub version: String,
    /// Lowercase hex SHA-256 of the payload bytes
    pub sha256: String,
    pub len: u64,
}

impl PayloadManifest {
    /// Describe `bytes` as the payload published under `version`.
    pub fn of(version: impl Into<String>, bytes: &[u8]) -> Self {
        Self { version: version.into(), sha256: sha256_hex(bytes), len: bytes.len() as u64 }
    }

    /// True when `bytes` are exactly the payload this manifest describes.
    pub fn verify(&self, bytes: &[u8]) -> bool {
        bytes.len() as u64 == self.len && sha256_hex(bytes) == self.sha256
    }
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Agent listing for operators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentSummary {
    pub uuid: String,
    pub hostname: String,
    pub ip_address: String,
    pub status: AgentStatus,
    #[serde(default)]
    pub current_job: Option<BuildId>,
    pub last_seen_ms: u64,
    #[serde(default)]
    pub resources: Vec<String>,
}

/// Job listing for operators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSummary {
    pub identifier: JobIdentifier,
    pub state: JobState,
    pub result: JobResult,
    #[serde(default)]
    pub assigned_agent: Option<String>,
}

/// Counters of reports that were refused, by cause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RejectionCounts {
    pub unknown_job: u64,
    pub terminal: u64,
    pub not_forward: u64,
    pub duplicate: u64,
    pub agent_mismatch: u64,
}

#[cfg(test)]
#[path = "types_tests.rs"]
mod tests;
