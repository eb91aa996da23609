// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Storage seam for job instances and build causes.
//!
//! Callers write through on every accepted transition so a durable
//! implementation sees the same sequence of states the dispatcher does.

use std::collections::HashMap;

use cv_core::{BuildCause, BuildId, JobInstance};
use parking_lot::Mutex;

pub trait JobRepository: Send + Sync {
    fn save_job(&self, job: &JobInstance);

    fn find_job(&self, build_id: BuildId) -> Option<JobInstance>;

    fn save_build_cause(&self, cause: &BuildCause);

    /// Most recent build cause for a pipeline (highest counter).
    fn find_latest_for_pipeline(&self, pipeline: &str) -> Option<BuildCause>;
}

/// In-process repository. State is lost on restart.
#[derive(Default)]
pub struct MemoryRepository {
    jobs: Mutex<HashMap<BuildId, JobInstance>>,
    latest_causes: Mutex<HashMap<String, BuildCause>>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl JobRepository for MemoryRepository {
    fn save_job(&self, job: &JobInstance) {
        self.jobs.lock().insert(job.build_id(), job.clone());
    }

    fn find_job(&self, build_id: BuildId) -> Option<JobInstance> {
        self.jobs.lock().get(&build_id).cloned()
    }

    fn save_build_cause(&self, cause: &BuildCause) {
        let mut causes = self.latest_causes.lock();
        let newer = causes.get(&cause.pipeline_name).map_or(true, |c| cause.counter >= c.counter);
        if newer {
            causes.insert(cause.pipeline_name.clone(), cause.clone());
        }
    }

    fn find_latest_for_pipeline(&self, pipeline: &str) -> Option<BuildCause> {
        self.latest_causes.lock().get(pipeline).cloned()
    }
}

#[cfg(test)]
#[path = "repository_tests.rs"]
mod tests;
