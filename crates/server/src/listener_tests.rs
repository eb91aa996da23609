// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::config::DispatcherConfig;
use crate::payload::PayloadStore;
use crate::repository::MemoryRepository;
use cv_core::test_support::runtime_info;
use cv_core::{BuildId, ScheduleOptions, ScheduleOutcome, SystemClock, Work};
use std::time::Duration;

const CONFIG: &str = r#"
auto_register = true

[[pipeline]]
name = "studios"
[[pipeline.stage]]
name = "build"
[[pipeline.stage.job]]
name = "compile"
"#;

fn ctx_with_payload(payload: PayloadStore) -> ListenCtx {
    ListenCtx {
        dispatcher: Arc::new(Dispatcher::new(
            DispatcherConfig::parse(CONFIG).unwrap(),
            Arc::new(MemoryRepository::new()),
            payload,
            SystemClock,
        )),
    }
}

fn ctx() -> ListenCtx {
    ctx_with_payload(PayloadStore::disabled())
}

/// Send one request through `handle_connection` over an in-memory pipe.
async fn roundtrip(ctx: &ListenCtx, request: Request) -> Response {
    let (mut client, server) = tokio::io::duplex(1024 * 1024);
    let (reader, writer) = tokio::io::split(server);
    let (response, served) = tokio::join!(
        cv_wire::call(&mut client, &request, Duration::from_secs(5)),
        handle_connection(reader, writer, ctx),
    );
    served.unwrap();
    response.unwrap()
}

#[tokio::test]
async fn hello_negotiates_protocol() {
    let ctx = ctx();
    match roundtrip(&ctx, Request::Hello { protocol: PROTOCOL_VERSION + 1, version: "test".into() }).await {
        Response::Hello { protocol, version } => {
            assert_eq!(protocol, PROTOCOL_VERSION);
            assert_eq!(version, BUILD_VERSION);
        }
        other => panic!("unexpected response: {other:?}"),
    }
}

#[tokio::test]
async fn hello_from_too_old_client_is_refused() {
    let ctx = ctx();
    match roundtrip(&ctx, Request::Hello { protocol: 0, version: String::new() }).await {
        Response::Error { kind, message } => {
            assert_eq!(kind, ErrorKind::UnsupportedProtocol);
            assert!(message.contains("protocol 0"), "unexpected message: {message}");
        }
        other => panic!("unexpected response: {other:?}"),
    }
}

#[tokio::test]
async fn trigger_then_get_work_over_the_wire() {
    let ctx = ctx();
    let trigger = Request::TriggerPipeline {
        pipeline: "studios".into(),
        user: "alice".into(),
        options: ScheduleOptions::default(),
    };
    let Response::Schedule { outcome: ScheduleOutcome::Scheduled { jobs, .. } } =
        roundtrip(&ctx, trigger).await
    else {
        panic!("expected Scheduled");
    };

    match roundtrip(&ctx, Request::GetWork { info: runtime_info("u1") }).await {
        Response::Work { work: Work::Build(assignment) } => {
            assert_eq!(assignment.job.build_id, jobs[0])
        }
        other => panic!("unexpected response: {other:?}"),
    }
}

#[tokio::test]
async fn operator_errors_carry_a_kind() {
    let ctx = ctx();
    match roundtrip(&ctx, Request::CancelJob { build_id: BuildId(404) }).await {
        Response::Error { kind, .. } => assert_eq!(kind, ErrorKind::UnknownJob),
        other => panic!("unexpected response: {other:?}"),
    }
    match roundtrip(&ctx, Request::FetchPayload).await {
        Response::Error { kind, .. } => assert_eq!(kind, ErrorKind::NoPayload),
        other => panic!("unexpected response: {other:?}"),
    }
}

#[tokio::test]
async fn payload_is_served_with_its_manifest() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("agent.bin");
    std::fs::write(&path, b"#!/bin/sh\nexit 0\n").unwrap();
    let ctx = ctx_with_payload(PayloadStore::new(Some(path), Some("9".into())));

    let Response::Manifest { manifest } = roundtrip(&ctx, Request::PayloadManifest).await else {
        panic!("expected Manifest");
    };
    match roundtrip(&ctx, Request::FetchPayload).await {
        Response::Payload { manifest: served, data } => {
            assert_eq!(served, manifest);
            assert!(manifest.verify(&data));
        }
        other => panic!("unexpected response: {other:?}"),
    }
}

#[tokio::test]
async fn status_reports_counts() {
    let ctx = ctx();
    roundtrip(&ctx, Request::Ping { info: runtime_info("u1") }).await;
    match roundtrip(&ctx, Request::Status).await {
        Response::Status { agents, jobs_active, .. } => {
            assert_eq!(agents, 1);
            assert_eq!(jobs_active, 0);
        }
        other => panic!("unexpected response: {other:?}"),
    }
}

#[tokio::test]
async fn garbage_request_is_a_protocol_error() {
    let ctx = ctx();
    let (mut client, server) = tokio::io::duplex(1024);
    let (reader, writer) = tokio::io::split(server);
    cv_wire::write_message(&mut client, b"not json").await.unwrap();
    let result = handle_connection(reader, writer, &ctx).await;
    assert!(matches!(result, Err(ConnectionError::Protocol(ProtocolError::Json(_)))));
}
