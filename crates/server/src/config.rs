// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Pipeline configuration, loaded from TOML at startup.
//!
//! ```toml
//! auto_register = false
//!
//! [security]
//! enabled = true
//! admins = ["root"]
//!
//! [[pipeline]]
//! name = "studios"
//! operators = ["alice"]
//!
//! [[pipeline.material]]
//! name = "repo"
//!
//! [[pipeline.stage]]
//! name = "build"
//!
//! [[pipeline.stage.job]]
//! name = "compile"
//! resources = ["linux"]
//! tasks = [{ program = "make", args = ["all"] }]
//! ```

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use cv_core::Task;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// Approve agents on first contact instead of leaving them Pending
    #[serde(default)]
    pub auto_register: bool,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default, rename = "pipeline")]
    pub pipelines: Vec<PipelineConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// When false every user may operate every pipeline
    #[serde(default)]
    pub enabled: bool,
    /// Users allowed to operate all pipelines
    #[serde(default)]
    pub admins: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub name: String,
    /// Users allowed to trigger this pipeline
    #[serde(default)]
    pub operators: Vec<String>,
    #[serde(default, rename = "material")]
    pub materials: Vec<MaterialConfig>,
    /// Plain variables handed to every job; trigger options override them
    #[serde(default)]
    pub variables: BTreeMap<String, String>,
    #[serde(rename = "stage")]
    pub stages: Vec<StageConfig>,
}

impl PipelineConfig {
    /// The stage a new build cause starts with.
    pub fn first_stage(&self) -> Option<&StageConfig> {
        self.stages.first()
    }

    pub fn has_material(&self, name: &str) -> bool {
        self.materials.iter().any(|m| m.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaterialConfig {
    pub name: String,
    #[serde(default)]
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageConfig {
    pub name: String,
    #[serde(rename = "job")]
    pub jobs: Vec<JobConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobConfig {
    pub name: String,
    #[serde(default)]
    pub resources: Vec<String>,
    #[serde(default)]
    pub tasks: Vec<Task>,
}

impl DispatcherConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: DispatcherConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn pipeline(&self, name: &str) -> Option<&PipelineConfig> {
        self.pipelines.iter().find(|p| p.name == name)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for pipeline in &self.pipelines {
            if !seen.insert(pipeline.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "pipeline '{}' is defined twice",
                    pipeline.name
                )));
            }
            if pipeline.stages.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "pipeline '{}' has no stages",
                    pipeline.name
                )));
            }
            for stage in &pipeline.stages {
                if stage.jobs.is_empty() {
                    return Err(ConfigError::Invalid(format!(
                        "stage '{}/{}' has no jobs",
                        pipeline.name, stage.name
                    )));
                }
                let mut jobs = HashSet::new();
                for job in &stage.jobs {
                    if !jobs.insert(job.name.as_str()) {
                        return Err(ConfigError::Invalid(format!(
                            "job '{}' is defined twice in '{}/{}'",
                            job.name, pipeline.name, stage.name
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
