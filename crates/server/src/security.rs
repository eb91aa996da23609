// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Operate-permission checks consulted before a manual trigger creates jobs.

use std::collections::{HashMap, HashSet};

use crate::config::DispatcherConfig;

pub trait SecurityService: Send + Sync {
    fn has_operate_permission(&self, user: &str, pipeline: &str, stage: &str) -> bool;
}

/// Permissions taken from the `[security]` table and each pipeline's
/// `operators` list.
#[derive(Debug, Clone, Default)]
pub struct ConfigSecurity {
    enabled: bool,
    admins: HashSet<String>,
    operators: HashMap<String, HashSet<String>>,
}

impl ConfigSecurity {
    pub fn from_config(config: &DispatcherConfig) -> Self {
        Self {
            enabled: config.security.enabled,
            admins: config.security.admins.iter().cloned().collect(),
            operators: config
                .pipelines
                .iter()
                .map(|p| (p.name.clone(), p.operators.iter().cloned().collect()))
                .collect(),
        }
    }
}

impl SecurityService for ConfigSecurity {
    fn has_operate_permission(&self, user: &str, pipeline: &str, _stage: &str) -> bool {
        if !self.enabled || self.admins.contains(user) {
            return true;
        }
        self.operators.get(pipeline).is_some_and(|users| users.contains(user))
    }
}

/// Message returned when a trigger is refused.
pub fn denied_message(user: &str, pipeline: &str, stage: &str) -> String {
    format!("User {user} does not have permission to schedule {pipeline}/{stage}")
}

#[cfg(test)]
#[path = "security_tests.rs"]
mod tests;
