// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Build-cause scheduling: turns a trigger into job instances.
//!
//! At most one trigger per pipeline is computed at a time. A concurrent
//! trigger for the same pipeline gets `AlreadyInFlight` instead of waiting;
//! triggers for different pipelines never contend.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use cv_core::{
    BuildCause, Clock, EnvironmentVariable, JobPlan, MaterialRevision, ScheduleOptions,
    ScheduleOutcome, SystemClock, TriggerKind,
};
use parking_lot::Mutex;
use tracing::{info, warn};

use crate::config::{DispatcherConfig, PipelineConfig};
use crate::jobs::JobLifecycleManager;
use crate::repository::JobRepository;
use crate::security::{denied_message, SecurityService};

/// Pipelines with a trigger currently being computed.
#[derive(Default)]
struct InFlight {
    pipelines: Mutex<HashSet<String>>,
}

impl InFlight {
    fn try_enter(&self, pipeline: &str) -> Option<InFlightGuard<'_>> {
        if self.pipelines.lock().insert(pipeline.to_string()) {
            Some(InFlightGuard { set: self, pipeline: pipeline.to_string() })
        } else {
            None
        }
    }
}

/// Clears the pipeline's in-flight mark on drop, including on early return.
struct InFlightGuard<'a> {
    set: &'a InFlight,
    pipeline: String,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.set.pipelines.lock().remove(&self.pipeline);
    }
}

pub struct BuildCauseScheduler<C: Clock = SystemClock> {
    config: Arc<DispatcherConfig>,
    security: Arc<dyn SecurityService>,
    repository: Arc<dyn JobRepository>,
    jobs: Arc<JobLifecycleManager<C>>,
    in_flight: InFlight,
    clock: C,
}

impl<C: Clock> BuildCauseScheduler<C> {
    pub fn new(
        config: Arc<DispatcherConfig>,
        security: Arc<dyn SecurityService>,
        repository: Arc<dyn JobRepository>,
        jobs: Arc<JobLifecycleManager<C>>,
        clock: C,
    ) -> Self {
        Self { config, security, repository, jobs, in_flight: InFlight::default(), clock }
    }

    /// Operator-initiated run. Permission is checked against the first
    /// stage before any job is created.
    pub fn trigger_manual(
        &self,
        pipeline: &str,
        user: &str,
        options: &ScheduleOptions,
    ) -> ScheduleOutcome {
        let Some(config) = self.config.pipeline(pipeline) else {
            return ScheduleOutcome::UnknownPipeline { pipeline: pipeline.to_string() };
        };
        let Some(_guard) = self.in_flight.try_enter(pipeline) else {
            info!(pipeline, user, "trigger already in flight");
            return ScheduleOutcome::AlreadyInFlight { pipeline: pipeline.to_string() };
        };

        let Some(stage) = config.first_stage() else {
            return ScheduleOutcome::Invalid { message: format!("pipeline {pipeline} has no stages") };
        };
        if !self.security.has_operate_permission(user, pipeline, &stage.name) {
            let message = denied_message(user, pipeline, &stage.name);
            warn!(pipeline, user, "{message}");
            return ScheduleOutcome::Unauthorized { message };
        }

        if let Some(unknown) = options.revisions.keys().find(|name| !config.has_material(name)) {
            return ScheduleOutcome::Invalid {
                message: format!("material {unknown} is not part of pipeline {pipeline}"),
            };
        }

        let latest = self.repository.find_latest_for_pipeline(pipeline);
        let mut revisions: BTreeMap<String, String> = latest
            .as_ref()
            .map(|cause| {
                cause.revisions.iter().map(|r| (r.material.clone(), r.revision.clone())).collect()
            })
            .unwrap_or_default();
        revisions.extend(options.revisions.iter().map(|(k, v)| (k.clone(), v.clone())));

        info!(pipeline, user, overrides = !options.is_empty(), "manual trigger");
        let trigger = TriggerKind::Manual { user: user.to_string() };
        self.create_cause(config, latest, trigger, revisions, options.environment_variables())
    }

    /// Run caused by upstream material changes. Revisions identical to the
    /// latest build cause produce `NoChange`.
    pub fn trigger_material_change(
        &self,
        pipeline: &str,
        revisions: &[MaterialRevision],
    ) -> ScheduleOutcome {
        let Some(config) = self.config.pipeline(pipeline) else {
            return ScheduleOutcome::UnknownPipeline { pipeline: pipeline.to_string() };
        };
        let Some(_guard) = self.in_flight.try_enter(pipeline) else {
            return ScheduleOutcome::AlreadyInFlight { pipeline: pipeline.to_string() };
        };

        if let Some(unknown) = revisions.iter().find(|r| !config.has_material(&r.material)) {
            return ScheduleOutcome::Invalid {
                message: format!("material {} is not part of pipeline {pipeline}", unknown.material),
            };
        }

        let revisions: BTreeMap<String, String> =
            revisions.iter().map(|r| (r.material.clone(), r.revision.clone())).collect();
        let latest = self.repository.find_latest_for_pipeline(pipeline);
        if latest.as_ref().is_some_and(|cause| same_revisions(&cause.revisions, &revisions)) {
            return ScheduleOutcome::NoChange { pipeline: pipeline.to_string() };
        }

        self.create_cause(config, latest, TriggerKind::MaterialChange, revisions, Vec::new())
    }

    fn create_cause(
        &self,
        config: &PipelineConfig,
        latest: Option<BuildCause>,
        trigger: TriggerKind,
        revisions: BTreeMap<String, String>,
        overrides: Vec<EnvironmentVariable>,
    ) -> ScheduleOutcome {
        let Some(stage) = config.first_stage() else {
            return ScheduleOutcome::Invalid {
                message: format!("pipeline {} has no stages", config.name),
            };
        };
        let mut cause = BuildCause {
            pipeline_name: config.name.clone(),
            counter: latest.map_or(0, |cause| cause.counter) + 1,
            trigger,
            revisions: revisions
                .into_iter()
                .map(|(material, revision)| MaterialRevision { material, revision })
                .collect(),
            variables: merge_variables(&config.variables, overrides),
            jobs: Vec::new(),
            created_at_ms: self.clock.epoch_ms(),
        };
        let label = cause.label();

        let jobs = stage
            .jobs
            .iter()
            .map(|job| {
                let plan = JobPlan::default()
                    .resources(job.resources.iter().cloned().collect())
                    .tasks(job.tasks.clone())
                    .variables(cause.variables.clone())
                    .artifact_location(format!("{}/{label}/{}/{}", config.name, stage.name, job.name));
                self.jobs.create(&config.name, &label, &stage.name, &job.name, plan)
            })
            .collect::<Vec<_>>();
        cause.jobs = jobs.clone();

        self.repository.save_build_cause(&cause);
        info!(pipeline = %config.name, %label, stage = %stage.name, jobs = jobs.len(), "scheduled build cause");

        ScheduleOutcome::Scheduled { pipeline: config.name.clone(), label, jobs }
    }
}

fn same_revisions(previous: &[MaterialRevision], current: &BTreeMap<String, String>) -> bool {
    previous.len() == current.len()
        && previous.iter().all(|r| current.get(&r.material) == Some(&r.revision))
}

/// Pipeline variables with trigger-supplied ones taking precedence.
fn merge_variables(
    defaults: &BTreeMap<String, String>,
    overrides: Vec<EnvironmentVariable>,
) -> Vec<EnvironmentVariable> {
    let mut merged: Vec<EnvironmentVariable> = defaults
        .iter()
        .filter(|(name, _)| !overrides.iter().any(|v| &v.name == *name))
        .map(|(name, value)| EnvironmentVariable::plain(name, value))
        .collect();
    merged.extend(overrides);
    merged
}

#[cfg(test)]
#[path = "scheduler_tests.rs"]
mod tests;
