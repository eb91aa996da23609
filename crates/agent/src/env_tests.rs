// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use serial_test::serial;

#[test]
#[serial]
fn lock_defaults_are_ten_minutes_and_five_seconds() {
    std::env::remove_var("CV_LOCK_STALE_MS");
    std::env::remove_var("CV_LOCK_HEARTBEAT_MS");
    assert_eq!(lock_stale_after(), Duration::from_secs(600));
    assert_eq!(lock_heartbeat(), Duration::from_secs(5));
}

#[test]
#[serial]
fn lock_windows_read_millis() {
    std::env::set_var("CV_LOCK_STALE_MS", "1500");
    std::env::set_var("CV_LOCK_HEARTBEAT_MS", "100");
    assert_eq!(lock_stale_after(), Duration::from_millis(1500));
    assert_eq!(lock_heartbeat(), Duration::from_millis(100));
    std::env::remove_var("CV_LOCK_STALE_MS");
    std::env::remove_var("CV_LOCK_HEARTBEAT_MS");
}

#[yare::parameterized(
    unset = { None, &[] },
    single = { Some("linux"), &["linux"] },
    padded = { Some(" linux , docker ,"), &["docker", "linux"] },
    empty = { Some(""), &[] },
)]
#[serial]
fn resources_are_split_on_commas(raw: Option<&str>, expected: &[&str]) {
    match raw {
        Some(raw) => std::env::set_var("CV_AGENT_RESOURCES", raw),
        None => std::env::remove_var("CV_AGENT_RESOURCES"),
    }
    let expected: BTreeSet<String> = expected.iter().map(|s| s.to_string()).collect();
    assert_eq!(agent_resources(), expected);
    std::env::remove_var("CV_AGENT_RESOURCES");
}

#[test]
#[serial]
fn download_retries_is_at_least_one() {
    std::env::set_var("CV_DOWNLOAD_RETRIES", "0");
    assert_eq!(download_retries(), 1);
    std::env::remove_var("CV_DOWNLOAD_RETRIES");
    assert_eq!(download_retries(), 5);
}

#[test]
#[serial]
fn agent_dir_prefers_override() {
    std::env::set_var("CV_AGENT_DIR", "/tmp/cv-agent");
    assert_eq!(agent_dir().unwrap(), PathBuf::from("/tmp/cv-agent"));
    std::env::set_var("CV_AGENT_DIR", "");
    assert_eq!(agent_dir().unwrap(), std::env::current_dir().unwrap());
    std::env::remove_var("CV_AGENT_DIR");
}

#[test]
#[serial]
fn empty_checksum_is_unset() {
    std::env::set_var(CHECKSUM_VAR, "");
    assert_eq!(launched_checksum(), None);
    std::env::set_var(CHECKSUM_VAR, "abc");
    assert_eq!(launched_checksum().as_deref(), Some("abc"));
    std::env::remove_var(CHECKSUM_VAR);
}

#[test]
#[serial]
fn healthy_run_defaults_to_ten_minutes() {
    std::env::remove_var("CV_HEALTHY_RUN_MS");
    assert_eq!(healthy_run(), Duration::from_secs(600));
    std::env::set_var("CV_HEALTHY_RUN_MS", "250");
    assert_eq!(healthy_run(), Duration::from_millis(250));
    std::env::remove_var("CV_HEALTHY_RUN_MS");
}
