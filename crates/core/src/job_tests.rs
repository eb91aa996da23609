// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::test_support::strategies::arb_job_state;
use proptest::prelude::*;

#[yare::parameterized(
    assigned_to_preparing   = { JobState::Assigned,   JobState::Preparing,  true },
    assigned_to_building    = { JobState::Assigned,   JobState::Building,   true },
    preparing_to_building   = { JobState::Preparing,  JobState::Building,   true },
    building_to_completing  = { JobState::Building,   JobState::Completing, true },
    completing_to_completed = { JobState::Completing, JobState::Completed,  true },
    building_to_completed   = { JobState::Building,   JobState::Completed,  true },
    same_state              = { JobState::Building,   JobState::Building,   false },
    backwards               = { JobState::Completing, JobState::Preparing,  false },
    agent_cannot_reschedule = { JobState::Building,   JobState::Rescheduled, false },
    agent_cannot_assign     = { JobState::Scheduled,  JobState::Assigned,   false },
    from_completed          = { JobState::Completed,  JobState::Completed,  false },
    from_rescheduled        = { JobState::Rescheduled, JobState::Building,  false },
)]
fn forward_transitions(from: JobState, to: JobState, expected: bool) {
    assert_eq!(from.can_advance_to(to), expected);
}

proptest! {
    #[test]
    fn terminal_states_never_advance(next in arb_job_state()) {
        prop_assert!(!JobState::Completed.can_advance_to(next));
        prop_assert!(!JobState::Rescheduled.can_advance_to(next));
    }

    #[test]
    fn advancing_is_antisymmetric(a in arb_job_state(), b in arb_job_state()) {
        prop_assert!(!(a.can_advance_to(b) && b.can_advance_to(a)));
    }
}

#[test]
fn assign_only_claims_scheduled_jobs() {
    let mut job = JobInstance::builder().build();
    assert!(job.assign("u1", 10));
    assert_eq!(job.state, JobState::Assigned);
    assert!(job.is_assigned_to("u1"));

    // A second claim must not steal the job.
    assert!(!job.assign("u2", 11));
    assert!(job.is_assigned_to("u1"));
}

#[test]
fn scheduled_job_records_initial_transition() {
    let job = JobInstance::scheduled(
        JobIdentifier::new("p", "3", "s", "j", BuildId(9)),
        JobPlan::default(),
        1234,
    );
    assert_eq!(job.state, JobState::Scheduled);
    assert_eq!(job.result, JobResult::Unknown);
    assert_eq!(job.transitions, vec![StateTransition { state: JobState::Scheduled, at_ms: 1234 }]);
}

#[test]
fn cancelled_result_is_sticky() {
    let mut job = JobInstance::builder().result(JobResult::Cancelled).build();
    job.set_result(JobResult::Passed);
    assert_eq!(job.result, JobResult::Cancelled);
}

#[yare::parameterized(
    cancelled   = { JobState::Building,    JobResult::Cancelled, true },
    rescheduled = { JobState::Rescheduled, JobResult::Unknown,   true },
    building    = { JobState::Building,    JobResult::Unknown,   false },
    passed      = { JobState::Completed,   JobResult::Passed,    false },
)]
fn cancelled_or_rescheduled(state: JobState, result: JobResult, expected: bool) {
    let job = JobInstance::builder().state(state).result(result).build();
    assert_eq!(job.is_cancelled_or_rescheduled(), expected);
}

#[test]
fn plan_runnable_when_resources_are_subset() {
    let plan = JobPlan::default().resources(["linux".to_string()].into());
    let offered: BTreeSet<String> = ["linux".to_string(), "docker".to_string()].into();
    assert!(plan.runnable_with(&offered));
    assert!(!plan.runnable_with(&BTreeSet::new()));
    assert!(JobPlan::default().runnable_with(&BTreeSet::new()));
}

#[test]
fn identifier_display_includes_build_id() {
    let id = JobIdentifier::new("studios", "100", "pipeline", "cruise-test-data", BuildId(42));
    assert_eq!(id.to_string(), "studios/100/pipeline/cruise-test-data (build 42)");
    assert_eq!(id.with_build_id(BuildId(43)).build_id, BuildId(43));
}
