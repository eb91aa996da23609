// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::repository::MemoryRepository;
use cv_core::test_support::{agent_identifier, runtime_info};
use cv_core::{FakeClock, JobPlan};

fn registry(auto_register: bool) -> (AgentRegistry<FakeClock>, FakeClock) {
    let clock = FakeClock::new();
    (AgentRegistry::new(auto_register, clock.clone()), clock)
}

#[test]
fn first_contact_registers_pending_without_auto_register() {
    let (agents, _) = registry(false);
    assert_eq!(agents.observe(&runtime_info("u1")).unwrap(), AgentStatus::Pending);

    let mut building = runtime_info("u1");
    building.status = AgentStatus::Building;
    assert_eq!(agents.observe(&building).unwrap(), AgentStatus::Pending, "pending is held");
}

#[test]
fn auto_register_adopts_reported_status() {
    let (agents, _) = registry(true);
    assert_eq!(agents.observe(&runtime_info("u1")).unwrap(), AgentStatus::Idle);
    assert_eq!(agents.len(), 1);
}

#[test]
fn approval_releases_pending_agent() {
    let (agents, _) = registry(false);
    agents.observe(&runtime_info("u1")).unwrap();
    assert_eq!(agents.approve("u1").unwrap(), AgentStatus::Idle);
    assert_eq!(agents.status("u1"), Some(AgentStatus::Idle));
}

#[test]
fn disabled_agent_stays_disabled_until_approved() {
    let (agents, _) = registry(true);
    agents.observe(&runtime_info("u1")).unwrap();
    agents.disable("u1").unwrap();
    assert_eq!(agents.observe(&runtime_info("u1")).unwrap(), AgentStatus::Disabled);
    assert_eq!(agents.approve("u1").unwrap(), AgentStatus::Idle);
}

#[test]
fn operator_actions_on_unknown_agent_fail() {
    let (agents, _) = registry(true);
    assert!(matches!(agents.approve("ghost"), Err(RegistryError::UnknownAgent(_))));
    assert!(matches!(agents.disable("ghost"), Err(RegistryError::UnknownAgent(_))));
}

#[test]
fn dispatcher_only_statuses_in_snapshots_read_as_idle() {
    let (agents, _) = registry(true);
    let mut info = runtime_info("u1");
    info.status = AgentStatus::LostContact;
    assert_eq!(agents.observe(&info).unwrap(), AgentStatus::Idle);
}

// ── Cookies ─────────────────────────────────────────────────────────────

#[test]
fn matching_cookie_is_accepted() {
    let (agents, _) = registry(true);
    let cookie = agents.issue_cookie(agent_identifier("u1"), "/agents/u1");
    assert!(cookie.as_str().starts_with("ck-"));
    assert!(agents.observe(&runtime_info("u1").with_cookie(cookie)).is_ok());
}

#[yare::parameterized(
    missing_cookie = { None, "/agents/u1" },
    stale_cookie   = { Some("ck-stale"), "/agents/u1" },
    moved_location = { Some("issued"), "/elsewhere" },
)]
fn cookie_mismatch_requires_reregistration(cookie: Option<&str>, location: &str) {
    let (agents, _) = registry(true);
    let issued = agents.issue_cookie(agent_identifier("u1"), "/agents/u1");

    let mut info = runtime_info("u1");
    info.location = location.to_string();
    info.cookie = cookie.map(|c| if c == "issued" { issued.clone() } else { AgentCookie::from(c) });

    assert!(matches!(agents.observe(&info), Err(RegistryError::CookieMismatch { .. })));
}

#[test]
fn reissuing_cookie_invalidates_the_old_one() {
    let (agents, _) = registry(true);
    let old = agents.issue_cookie(agent_identifier("u1"), "/agents/u1");
    let new = agents.issue_cookie(agent_identifier("u1"), "/agents/u1");
    assert_ne!(old, new);
    assert!(agents.observe(&runtime_info("u1").with_cookie(old)).is_err());
    assert!(agents.observe(&runtime_info("u1").with_cookie(new)).is_ok());
}

// ── Lost contact ────────────────────────────────────────────────────────

#[test]
fn silent_agents_are_marked_lost_and_recover_on_ping() {
    let (agents, clock) = registry(true);
    agents.observe(&runtime_info("u1")).unwrap();
    agents.observe(&runtime_info("u2")).unwrap();

    clock.advance(Duration::from_secs(30));
    agents.observe(&runtime_info("u2")).unwrap();
    clock.advance(Duration::from_secs(45));

    assert_eq!(agents.sweep_lost_contact(Duration::from_secs(60)), vec!["u1".to_string()]);
    assert_eq!(agents.status("u1"), Some(AgentStatus::LostContact));
    assert_eq!(agents.status("u2"), Some(AgentStatus::Idle));
    assert!(agents.sweep_lost_contact(Duration::from_secs(60)).is_empty(), "already lost");

    assert_eq!(agents.observe(&runtime_info("u1")).unwrap(), AgentStatus::Idle);
}

#[test]
fn losing_contact_does_not_free_the_agents_job() {
    let (agents, clock) = registry(true);
    let jobs = JobLifecycleManager::new(Arc::new(MemoryRepository::new()), clock.clone());
    let id = jobs.create("p", "1", "s", "j", JobPlan::default());
    agents.observe(&runtime_info("u1")).unwrap();
    jobs.assign_next(&runtime_info("u1")).unwrap();

    clock.advance(Duration::from_secs(600));
    agents.sweep_lost_contact(Duration::from_secs(60));

    let job = jobs.get(id).unwrap();
    assert!(job.is_assigned_to("u1"));
    assert!(!job.is_terminal());
}

#[test]
fn pending_agents_are_not_swept() {
    let (agents, clock) = registry(false);
    agents.observe(&runtime_info("u1")).unwrap();
    clock.advance(Duration::from_secs(600));
    assert!(agents.sweep_lost_contact(Duration::from_secs(60)).is_empty());
}

#[yare::parameterized(
    max = { Duration::MAX },
    millis_just_past_u64 = { Duration::from_secs(18_446_744_073_709_552) },
)]
fn huge_timeouts_never_expire(timeout: Duration) {
    let (agents, clock) = registry(true);
    agents.observe(&runtime_info("u1")).unwrap();
    clock.advance(Duration::from_secs(3600));
    assert!(agents.sweep_lost_contact(timeout).is_empty());
    assert_eq!(agents.status("u1"), Some(AgentStatus::Idle));
}

// ── Ping, listing, audit ────────────────────────────────────────────────

#[test]
fn ping_returns_cancel_for_cancelled_job() {
    let (agents, clock) = registry(true);
    let jobs = JobLifecycleManager::new(Arc::new(MemoryRepository::new()), clock);
    let id = jobs.create("p", "1", "s", "j", JobPlan::default());
    let assignment = jobs.assign_next(&runtime_info("u1")).unwrap();

    let mut info = runtime_info("u1");
    info.building(assignment.job);
    assert_eq!(agents.ping(&info, &jobs).unwrap(), AgentInstruction::NONE);

    jobs.cancel(id).unwrap();
    assert_eq!(agents.ping(&info, &jobs).unwrap(), AgentInstruction::CANCEL);
}

#[test]
fn summaries_sort_by_status_priority_then_hostname() {
    let (agents, _) = registry(true);
    for uuid in ["b", "a", "c"] {
        agents.observe(&runtime_info(uuid)).unwrap();
    }
    agents.disable("a").unwrap();
    let mut building = runtime_info("c");
    building.status = AgentStatus::Building;
    agents.observe(&building).unwrap();

    let order: Vec<_> = agents.summaries().into_iter().map(|s| (s.uuid, s.status)).collect();
    assert_eq!(
        order,
        vec![
            ("c".to_string(), AgentStatus::Building),
            ("b".to_string(), AgentStatus::Idle),
            ("a".to_string(), AgentStatus::Disabled),
        ]
    );
}

#[test]
fn history_records_each_status_change() {
    let (agents, _) = registry(false);
    agents.observe(&runtime_info("u1")).unwrap();
    agents.observe(&runtime_info("u1")).unwrap();
    agents.approve("u1").unwrap();
    agents.disable("u1").unwrap();
    agents.observe(&runtime_info("other")).unwrap();

    let changes: Vec<_> = agents.history("u1").into_iter().map(|c| (c.from, c.to)).collect();
    assert_eq!(
        changes,
        vec![
            (None, AgentStatus::Pending),
            (Some(AgentStatus::Pending), AgentStatus::Idle),
            (Some(AgentStatus::Idle), AgentStatus::Disabled),
        ]
    );
}
