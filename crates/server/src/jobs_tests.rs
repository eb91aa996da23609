// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::repository::MemoryRepository;
use cv_core::test_support::runtime_info;
use cv_core::FakeClock;
use proptest::prelude::*;
use std::time::Duration;

fn manager() -> (JobLifecycleManager<FakeClock>, Arc<MemoryRepository>, FakeClock) {
    let repo = Arc::new(MemoryRepository::new());
    let clock = FakeClock::new();
    (JobLifecycleManager::new(repo.clone(), clock.clone()), repo, clock)
}

fn plan(resources: &[&str]) -> JobPlan {
    JobPlan::default().resources(resources.iter().map(|r| r.to_string()).collect())
}

/// One job assigned to agent `u1`.
fn assigned() -> (JobLifecycleManager<FakeClock>, BuildId) {
    let (jobs, _, _) = manager();
    let id = jobs.create("studios", "1", "build", "compile", JobPlan::default());
    let assignment = jobs.assign_next(&runtime_info("u1")).unwrap();
    assert_eq!(assignment.job.build_id, id);
    (jobs, id)
}

// ── Creation and assignment ─────────────────────────────────────────────

#[test]
fn build_ids_are_unique_and_increasing() {
    let (jobs, _, _) = manager();
    let a = jobs.create("p", "1", "s", "a", JobPlan::default());
    let b = jobs.create("p", "1", "s", "b", JobPlan::default());
    assert!(b > a);
    assert_eq!(jobs.get(a).unwrap().state, JobState::Scheduled);
}

#[test]
fn created_jobs_are_written_through() {
    let (jobs, repo, _) = manager();
    let id = jobs.create("p", "1", "s", "a", JobPlan::default());
    assert_eq!(repo.find_job(id).unwrap().state, JobState::Scheduled);
    jobs.assign_next(&runtime_info("u1")).unwrap();
    assert_eq!(repo.find_job(id).unwrap().state, JobState::Assigned);
}

#[test]
fn oldest_runnable_job_is_assigned_first() {
    let (jobs, _, _) = manager();
    let first = jobs.create("p", "1", "s", "a", JobPlan::default());
    let second = jobs.create("p", "1", "s", "b", JobPlan::default());

    assert_eq!(jobs.assign_next(&runtime_info("u1")).unwrap().job.build_id, first);
    assert_eq!(jobs.assign_next(&runtime_info("u2")).unwrap().job.build_id, second);
    assert!(jobs.assign_next(&runtime_info("u3")).is_none());
}

#[test]
fn jobs_only_go_to_agents_offering_their_resources() {
    let (jobs, _, _) = manager();
    let id = jobs.create("p", "1", "s", "gpu", plan(&["linux", "gpu"]));

    assert!(jobs.assign_next(&runtime_info("u1").with_resources(["linux"])).is_none());
    let assignment =
        jobs.assign_next(&runtime_info("u2").with_resources(["linux", "gpu", "big"])).unwrap();
    assert_eq!(assignment.job.build_id, id);
    assert_eq!(jobs.get(id).unwrap().assigned_agent.as_deref(), Some("u2"));
}

#[test]
fn concurrent_requests_assign_a_job_at_most_once() {
    let (jobs, _, _) = manager();
    let jobs = Arc::new(jobs);
    let id = jobs.create("p", "1", "s", "only", JobPlan::default());

    let winners: Vec<_> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..16)
            .map(|n| {
                let jobs = Arc::clone(&jobs);
                scope.spawn(move || jobs.assign_next(&runtime_info(&format!("u{n}"))))
            })
            .collect();
        handles.into_iter().filter_map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(winners.len(), 1);
    assert_eq!(winners[0].job.build_id, id);
}

// ── Agent reports ───────────────────────────────────────────────────────

#[test]
fn forward_reports_are_accepted_in_order() {
    let (jobs, id) = assigned();
    for state in [JobState::Preparing, JobState::Building, JobState::Completing] {
        assert_eq!(jobs.report_status("u1", id, state).unwrap(), ReportOutcome::Accepted);
    }
    assert_eq!(jobs.get(id).unwrap().state, JobState::Completing);
}

#[test]
fn skipping_ahead_is_still_forward() {
    let (jobs, id) = assigned();
    assert!(jobs.report_status("u1", id, JobState::Building).unwrap().is_accepted());
}

#[test]
fn backward_report_is_rejected_and_state_kept() {
    let (jobs, id) = assigned();
    jobs.report_status("u1", id, JobState::Building).unwrap();

    let outcome = jobs.report_status("u1", id, JobState::Preparing).unwrap();
    assert_eq!(outcome, ReportOutcome::Rejected { reason: RejectReason::NotForward });
    assert_eq!(jobs.get(id).unwrap().state, JobState::Building);
    assert_eq!(jobs.rejections().not_forward, 1);
}

#[test]
fn repeated_report_is_duplicate() {
    let (jobs, id) = assigned();
    jobs.report_status("u1", id, JobState::Building).unwrap();
    assert_eq!(jobs.report_status("u1", id, JobState::Building).unwrap(), ReportOutcome::Duplicate);
    assert_eq!(jobs.rejections().duplicate, 1);
}

#[test]
fn report_for_unknown_job_is_rejected() {
    let (jobs, _) = assigned();
    let outcome = jobs.report_status("u1", BuildId(999), JobState::Building).unwrap();
    assert_eq!(outcome, ReportOutcome::Rejected { reason: RejectReason::UnknownJob });
    assert_eq!(jobs.rejections().unknown_job, 1);
}

#[test]
fn report_from_another_agent_is_an_identity_error() {
    let (jobs, id) = assigned();
    match jobs.report_status("intruder", id, JobState::Building) {
        Err(JobError::AgentMismatch { build_id, assigned, reported }) => {
            assert_eq!(build_id, id);
            assert_eq!(assigned.as_deref(), Some("u1"));
            assert_eq!(reported, "intruder");
        }
        other => panic!("expected AgentMismatch, got {other:?}"),
    }
    assert_eq!(jobs.get(id).unwrap().state, JobState::Assigned);
    assert_eq!(jobs.rejections().agent_mismatch, 1);
}

#[test]
fn identity_is_checked_before_terminal_state() {
    let (jobs, id) = assigned();
    jobs.report_completed("u1", id, JobResult::Passed).unwrap();
    assert!(matches!(
        jobs.report_completed("intruder", id, JobResult::Failed),
        Err(JobError::AgentMismatch { .. })
    ));
}

#[test]
fn report_for_unassigned_job_is_an_identity_error() {
    let (jobs, _, _) = manager();
    let id = jobs.create("p", "1", "s", "a", JobPlan::default());
    assert!(matches!(
        jobs.report_status("u1", id, JobState::Building),
        Err(JobError::AgentMismatch { assigned: None, .. })
    ));
}

#[test]
fn completing_records_result() {
    let (jobs, id) = assigned();
    jobs.report_status("u1", id, JobState::Building).unwrap();
    assert!(jobs.report_completing("u1", id, JobResult::Failed).unwrap().is_accepted());

    let job = jobs.get(id).unwrap();
    assert_eq!(job.state, JobState::Completing);
    assert_eq!(job.result, JobResult::Failed);
    assert_eq!(jobs.report_completing("u1", id, JobResult::Failed).unwrap(), ReportOutcome::Duplicate);
}

#[test]
fn completed_is_idempotent() {
    let (jobs, id) = assigned();
    assert!(jobs.report_completed("u1", id, JobResult::Passed).unwrap().is_accepted());
    let first = jobs.get(id).unwrap();

    assert_eq!(jobs.report_completed("u1", id, JobResult::Passed).unwrap(), ReportOutcome::Duplicate);
    assert_eq!(jobs.report_completed("u1", id, JobResult::Failed).unwrap(), ReportOutcome::Duplicate);
    assert_eq!(jobs.get(id).unwrap(), first);
    assert_eq!(first.result, JobResult::Passed);
}

#[test]
fn reports_after_completion_are_rejected_as_terminal() {
    let (jobs, id) = assigned();
    jobs.report_completed("u1", id, JobResult::Passed).unwrap();
    assert_eq!(
        jobs.report_status("u1", id, JobState::Building).unwrap(),
        ReportOutcome::Rejected { reason: RejectReason::Terminal }
    );
    assert_eq!(
        jobs.report_completing("u1", id, JobResult::Passed).unwrap(),
        ReportOutcome::Rejected { reason: RejectReason::Terminal }
    );
    assert_eq!(jobs.rejections().terminal, 2);
}

#[test]
fn transitions_are_timestamped_from_the_clock() {
    let (jobs, _, clock) = manager();
    let id = jobs.create("p", "1", "s", "a", JobPlan::default());
    clock.advance(Duration::from_millis(500));
    jobs.assign_next(&runtime_info("u1")).unwrap();

    let job = jobs.get(id).unwrap();
    assert_eq!(job.transitions.len(), 2);
    assert_eq!(job.transitions[1].at_ms - job.transitions[0].at_ms, 500);
}

#[tokio::test]
async fn committed_transitions_are_broadcast() {
    let (jobs, _, _) = manager();
    let mut rx = jobs.subscribe();
    let id = jobs.create("p", "1", "s", "a", JobPlan::default());
    jobs.assign_next(&runtime_info("u1")).unwrap();
    jobs.report_status("u1", id, JobState::Building).unwrap();
    jobs.report_status("u1", id, JobState::Building).unwrap();

    let states: Vec<_> = (0..3).map(|_| rx.try_recv().unwrap().state).collect();
    assert_eq!(states, vec![JobState::Scheduled, JobState::Assigned, JobState::Building]);
    assert!(rx.try_recv().is_err(), "duplicates are not broadcast");
}

// ── Cancel and reschedule ───────────────────────────────────────────────

#[test]
fn cancelling_waiting_job_completes_it() {
    let (jobs, _, _) = manager();
    let id = jobs.create("p", "1", "s", "a", JobPlan::default());
    assert!(jobs.cancel(id).unwrap());

    let job = jobs.get(id).unwrap();
    assert_eq!((job.state, job.result), (JobState::Completed, JobResult::Cancelled));
    assert!(jobs.assign_next(&runtime_info("u1")).is_none());
}

#[test]
fn cancelling_running_job_instructs_its_agent() {
    let (jobs, id) = assigned();
    let mut info = runtime_info("u1");
    info.building(jobs.get(id).unwrap().identifier);
    assert_eq!(jobs.instruction_for(&info), AgentInstruction::NONE);

    assert!(jobs.cancel(id).unwrap());
    assert!(!jobs.cancel(id).unwrap(), "second cancel changes nothing");
    assert!(jobs.is_cancelled_or_rescheduled(id));
    assert_eq!(jobs.instruction_for(&info), AgentInstruction::CANCEL);

    jobs.report_completed("u1", id, JobResult::Failed).unwrap();
    let job = jobs.get(id).unwrap();
    assert_eq!(job.result, JobResult::Cancelled, "cancellation survives a late failure report");
    assert_eq!(jobs.instruction_for(&info), AgentInstruction::NONE);
}

#[test]
fn cancelling_finished_job_is_a_no_op() {
    let (jobs, id) = assigned();
    jobs.report_completed("u1", id, JobResult::Passed).unwrap();
    assert!(!jobs.cancel(id).unwrap());
    assert_eq!(jobs.get(id).unwrap().result, JobResult::Passed);
}

#[test]
fn operator_actions_on_unknown_jobs_are_errors() {
    let (jobs, _, _) = manager();
    assert!(matches!(jobs.cancel(BuildId(5)), Err(JobError::UnknownJob(BuildId(5)))));
    assert!(matches!(jobs.reschedule(BuildId(5)), Err(JobError::UnknownJob(BuildId(5)))));
}

#[test]
fn reschedule_retires_job_and_queues_a_copy() {
    let (jobs, id) = assigned();
    jobs.report_status("u1", id, JobState::Building).unwrap();

    let copy = jobs.reschedule(id).unwrap().unwrap();
    assert_ne!(copy, id);
    assert_eq!(jobs.get(id).unwrap().state, JobState::Rescheduled);
    assert!(jobs.is_cancelled_or_rescheduled(id));

    let fresh = jobs.get(copy).unwrap();
    assert_eq!(fresh.state, JobState::Scheduled);
    assert_eq!(fresh.identifier.job_name, "compile");
    assert_eq!(fresh.assigned_agent, None);

    assert_eq!(
        jobs.report_completed("u1", id, JobResult::Passed).unwrap(),
        ReportOutcome::Rejected { reason: RejectReason::Terminal }
    );
    assert_eq!(jobs.assign_next(&runtime_info("u2")).unwrap().job.build_id, copy);
}

#[test]
fn rescheduled_job_cancels_its_agent_only_while_it_runs_it() {
    let (jobs, id) = assigned();
    let mut busy = runtime_info("u1");
    busy.building(jobs.get(id).unwrap().identifier);
    jobs.reschedule(id).unwrap().unwrap();

    assert_eq!(jobs.instruction_for(&busy), AgentInstruction::CANCEL);
    let idle = runtime_info("u1");
    assert_eq!(jobs.instruction_for(&idle), AgentInstruction::NONE);
    assert_eq!(jobs.instruction_for(&idle), AgentInstruction::NONE, "idle pings stay quiet");
}

#[test]
fn rescheduling_finished_job_does_nothing() {
    let (jobs, id) = assigned();
    jobs.report_completed("u1", id, JobResult::Passed).unwrap();
    assert_eq!(jobs.reschedule(id).unwrap(), None);
}

#[test]
fn unknown_job_is_not_ignored() {
    let (jobs, _, _) = manager();
    assert!(!jobs.is_cancelled_or_rescheduled(BuildId(42)));
}

#[test]
fn abandoned_job_is_rescheduled_for_another_agent() {
    let (jobs, id) = assigned();
    let copy = jobs.release_abandoned("u1").unwrap();
    assert_eq!(jobs.get(id).unwrap().state, JobState::Rescheduled);
    assert_eq!(jobs.get(copy).unwrap().state, JobState::Scheduled);
    assert_eq!(jobs.release_abandoned("u1"), None);
}

#[test]
fn abandoned_cancelled_job_is_completed_not_rerun() {
    let (jobs, id) = assigned();
    jobs.cancel(id).unwrap();
    assert_eq!(jobs.release_abandoned("u1"), None);
    let job = jobs.get(id).unwrap();
    assert_eq!((job.state, job.result), (JobState::Completed, JobResult::Cancelled));
    assert_eq!(jobs.active_count(), 0);
}

#[test]
fn listing_hides_finished_jobs_unless_asked() {
    let (jobs, id) = assigned();
    let waiting = jobs.create("p", "1", "s", "b", JobPlan::default());
    jobs.report_completed("u1", id, JobResult::Passed).unwrap();

    let active: Vec<_> = jobs.list(false).iter().map(|j| j.identifier.build_id).collect();
    assert_eq!(active, vec![waiting]);
    let all: Vec<_> = jobs.list(true).iter().map(|j| j.identifier.build_id).collect();
    assert_eq!(all, vec![id, waiting]);
    assert_eq!(jobs.active_count(), 1);
}

// ── Properties ──────────────────────────────────────────────────────────

proptest! {
    #[test]
    fn reports_never_move_a_job_backwards(
        reports in proptest::collection::vec(cv_core::test_support::strategies::arb_job_state(), 1..24),
    ) {
        let (jobs, id) = assigned();
        for state in reports {
            let _ = jobs.report_status("u1", id, state).unwrap();
        }
        let job = jobs.get(id).unwrap();
        for pair in job.transitions[1..].windows(2) {
            prop_assert!(pair[0].state.can_advance_to(pair[1].state), "{:?} -> {:?}", pair[0].state, pair[1].state);
        }
        let terminal = job.transitions.iter().filter(|t| t.state.is_terminal()).count();
        prop_assert!(terminal <= 1);
    }
}
