// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use tempfile::tempdir;

#[test]
fn uuid_is_generated_once_and_reused() {
    let dir = tempdir().unwrap();
    let first = load_or_create_uuid(dir.path()).unwrap();
    let second = load_or_create_uuid(dir.path()).unwrap();

    assert_eq!(first, second);
    assert!(uuid::Uuid::parse_str(&first).is_ok());
    assert_eq!(std::fs::read_to_string(guid_path(dir.path())).unwrap(), first);
}

#[test]
fn existing_guid_file_is_trimmed() {
    let dir = tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("config")).unwrap();
    std::fs::write(guid_path(dir.path()), "  agent-1234\n").unwrap();

    assert_eq!(load_or_create_uuid(dir.path()).unwrap(), "agent-1234");
}

#[test]
fn blank_guid_file_is_replaced() {
    let dir = tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("config")).unwrap();
    std::fs::write(guid_path(dir.path()), "\n").unwrap();

    let uuid = load_or_create_uuid(dir.path()).unwrap();
    assert!(!uuid.is_empty());
    assert_eq!(std::fs::read_to_string(guid_path(dir.path())).unwrap(), uuid);
}

#[test]
fn local_identifier_keeps_the_uuid() {
    let identifier = local_identifier("u-1".to_string());
    assert_eq!(identifier.uuid, "u-1");
    assert!(!identifier.hostname.is_empty());
    assert!(!identifier.ip_address.is_empty());
}
