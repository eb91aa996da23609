// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

const STUDIOS: &str = r#"
auto_register = true

[security]
enabled = true
admins = ["root"]

[[pipeline]]
name = "studios"
operators = ["alice"]
variables = { TARGET = "release" }

[[pipeline.material]]
name = "repo"
url = "git@example.com:studios.git"

[[pipeline.stage]]
name = "build"

[[pipeline.stage.job]]
name = "compile"
resources = ["linux", "jdk"]
tasks = [{ program = "make", args = ["all"] }]

[[pipeline.stage.job]]
name = "lint"
tasks = [{ program = "make", args = ["lint"], working_dir = "src" }]

[[pipeline.stage]]
name = "deploy"

[[pipeline.stage.job]]
name = "ship"
"#;

#[test]
fn parses_full_pipeline_definition() {
    let config = DispatcherConfig::parse(STUDIOS).unwrap();
    assert!(config.auto_register);
    assert!(config.security.enabled);
    assert_eq!(config.security.admins, vec!["root"]);

    let pipeline = config.pipeline("studios").unwrap();
    assert_eq!(pipeline.operators, vec!["alice"]);
    assert!(pipeline.has_material("repo"));
    assert!(!pipeline.has_material("docs"));
    assert_eq!(pipeline.variables.get("TARGET").map(String::as_str), Some("release"));

    let stage = pipeline.first_stage().unwrap();
    assert_eq!(stage.name, "build");
    assert_eq!(stage.jobs.len(), 2);
    assert_eq!(stage.jobs[0].resources, vec!["linux", "jdk"]);
    assert_eq!(stage.jobs[0].tasks, vec![Task::new("make", ["all"])]);
    assert_eq!(stage.jobs[1].tasks[0].working_dir.as_deref(), Some("src"));
}

#[test]
fn empty_config_has_no_pipelines_and_security_off() {
    let config = DispatcherConfig::parse("").unwrap();
    assert!(config.pipelines.is_empty());
    assert!(!config.security.enabled);
    assert!(!config.auto_register);
    assert!(config.pipeline("studios").is_none());
}

#[yare::parameterized(
    duplicate_pipeline = {
        "[[pipeline]]\nname = \"a\"\n[[pipeline.stage]]\nname = \"s\"\n[[pipeline.stage.job]]\nname = \"j\"\n\
         [[pipeline]]\nname = \"a\"\n[[pipeline.stage]]\nname = \"s\"\n[[pipeline.stage.job]]\nname = \"j\"\n",
        "defined twice"
    },
    empty_stages = { "[[pipeline]]\nname = \"a\"\nstage = []\n", "has no stages" },
    empty_jobs = { "[[pipeline]]\nname = \"a\"\n[[pipeline.stage]]\nname = \"s\"\njob = []\n", "has no jobs" },
    duplicate_job = {
        "[[pipeline]]\nname = \"a\"\n[[pipeline.stage]]\nname = \"s\"\n\
         [[pipeline.stage.job]]\nname = \"j\"\n[[pipeline.stage.job]]\nname = \"j\"\n",
        "job 'j' is defined twice"
    },
)]
fn rejects_invalid_pipelines(content: &str, fragment: &str) {
    match DispatcherConfig::parse(content) {
        Err(ConfigError::Invalid(message)) => {
            assert!(message.contains(fragment), "unexpected message: {message}")
        }
        other => panic!("expected Invalid, got {other:?}"),
    }
}

#[test]
fn malformed_toml_is_a_parse_error() {
    assert!(matches!(DispatcherConfig::parse("pipeline = ["), Err(ConfigError::Parse(_))));
}

#[test]
fn load_reports_missing_file_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("missing.toml");
    match DispatcherConfig::load(&path) {
        Err(ConfigError::Io { path: reported, .. }) => assert_eq!(reported, path),
        other => panic!("expected Io error, got {other:?}"),
    }
}
