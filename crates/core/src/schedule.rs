// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Build causes and the options a manual trigger carries.

use crate::job::BuildId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

const MASK: &str = "****";

/// Environment variable handed to a job. Secure values never appear in
/// `Debug` output or logs.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentVariable {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub secure: bool,
}

impl EnvironmentVariable {
    pub fn plain(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self { name: name.into(), value: value.into(), secure: false }
    }

    pub fn secure(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self { name: name.into(), value: value.into(), secure: true }
    }

    /// Value safe for display.
    pub fn display_value(&self) -> &str {
        if self.secure {
            MASK
        } else {
            &self.value
        }
    }
}

impl fmt::Debug for EnvironmentVariable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnvironmentVariable")
            .field("name", &self.name)
            .field("value", &self.display_value())
            .field("secure", &self.secure)
            .finish()
    }
}

/// Parameters of a manual trigger: revision overrides keyed by material
/// name, plain variables, and secure variables.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleOptions {
    #[serde(default)]
    pub revisions: BTreeMap<String, String>,
    #[serde(default)]
    pub variables: BTreeMap<String, String>,
    #[serde(default)]
    pub secure_variables: BTreeMap<String, String>,
}

impl ScheduleOptions {
    /// Plain then secure variables, each sorted by name.
    pub fn environment_variables(&self) -> Vec<EnvironmentVariable> {
        self.variables
            .iter()
            .map(|(k, v)| EnvironmentVariable::plain(k, v))
            .chain(self.secure_variables.iter().map(|(k, v)| EnvironmentVariable::secure(k, v)))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.revisions.is_empty() && self.variables.is_empty() && self.secure_variables.is_empty()
    }
}

impl fmt::Debug for ScheduleOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let masked: BTreeMap<&str, &str> =
            self.secure_variables.keys().map(|k| (k.as_str(), MASK)).collect();
        f.debug_struct("ScheduleOptions")
            .field("revisions", &self.revisions)
            .field("variables", &self.variables)
            .field("secure_variables", &masked)
            .finish()
    }
}

/// A material (e.g. a repository) pinned at a revision.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MaterialRevision {
    pub material: String,
    pub revision: String,
}

impl MaterialRevision {
    pub fn new(material: impl Into<String>, revision: impl Into<String>) -> Self {
        Self { material: material.into(), revision: revision.into() }
    }
}

/// Why a pipeline run was created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TriggerKind {
    Manual { user: String },
    MaterialChange,
}

/// The job instances created for one pipeline run, with what caused it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildCause {
    pub pipeline_name: String,
    /// Per-pipeline run counter, used as the pipeline label
    pub counter: u64,
    pub trigger: TriggerKind,
    /// Sorted by material name
    pub revisions: Vec<MaterialRevision>,
    pub variables: Vec<EnvironmentVariable>,
    pub jobs: Vec<BuildId>,
    pub created_at_ms: u64,
}

impl BuildCause {
    pub fn label(&self) -> String {
        self.counter.to_string()
    }
}

#[cfg(test)]
#[path = "schedule_tests.rs"]
mod tests;
