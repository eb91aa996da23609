// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Listener task for handling socket I/O.
//!
//! Accepts TCP connections and serves one request per connection, each
//! on its own task so a slow client never blocks the others.

use std::sync::Arc;

use cv_wire::{
    negotiate, ErrorKind, ProtocolError, Request, Response, MIN_PROTOCOL_VERSION,
    PROTOCOL_VERSION,
};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use crate::dispatch::{DispatchError, Dispatcher};
use crate::env::{ipc_timeout, BUILD_VERSION};

/// Shared context for all request handlers.
pub struct ListenCtx {
    pub dispatcher: Arc<Dispatcher>,
}

/// Listener task for accepting connections.
pub struct Listener {
    tcp: TcpListener,
    ctx: Arc<ListenCtx>,
}

/// Errors from connection handling.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Listener {
    pub fn new(tcp: TcpListener, ctx: Arc<ListenCtx>) -> Self {
        Self { tcp, ctx }
    }

    /// Run the accept loop, spawning a task for each connection.
    pub async fn run(self) {
        loop {
            match self.tcp.accept().await {
                Ok((stream, addr)) => {
                    debug!("connection from {}", addr);
                    let ctx = Arc::clone(&self.ctx);
                    tokio::spawn(async move {
                        let (reader, writer) = stream.into_split();
                        if let Err(e) = handle_connection(reader, writer, &ctx).await {
                            log_connection_error(e);
                        }
                    });
                }
                Err(e) => error!("TCP accept error: {}", e),
            }
        }
    }
}

fn log_connection_error(e: ConnectionError) {
    match e {
        ConnectionError::Protocol(ProtocolError::ConnectionClosed) => {
            debug!("Client disconnected")
        }
        ConnectionError::Protocol(ProtocolError::Timeout) => {
            warn!("Connection timeout")
        }
        _ => error!("Connection error: {}", e),
    }
}

/// Handle a single client connection: one request, one response.
pub(crate) async fn handle_connection<R, W>(
    mut reader: R,
    mut writer: W,
    ctx: &ListenCtx,
) -> Result<(), ConnectionError>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    let request = cv_wire::read_request(&mut reader, ipc_timeout()).await?;

    // Agents poll constantly; keep their traffic out of info logs
    match request {
        Request::Ping { .. } | Request::GetWork { .. } | Request::IsIgnored { .. } => {
            debug!(request = request.kind(), "received request")
        }
        _ => info!(request = request.kind(), "received request"),
    }

    let response = handle_request(request, ctx).await?;
    if let Response::Error { kind, message } = &response {
        debug!(?kind, %message, "sending error response");
    }
    cv_wire::write_response(&mut writer, &response, ipc_timeout()).await?;
    Ok(())
}

/// Handle a single request and return a response.
async fn handle_request(request: Request, ctx: &ListenCtx) -> Result<Response, ConnectionError> {
    let dispatcher = &ctx.dispatcher;
    let response = match request {
        Request::Hello { protocol, version } => match negotiate(protocol) {
            Some(protocol) => {
                debug!(client = %version, protocol, "negotiated protocol");
                Response::Hello { protocol, version: BUILD_VERSION.to_string() }
            }
            None => Response::error(
                ErrorKind::UnsupportedProtocol,
                format!(
                    "protocol {protocol} is not supported (supported: {MIN_PROTOCOL_VERSION}..={PROTOCOL_VERSION})"
                ),
            ),
        },

        Request::Ping { info } => {
            respond(dispatcher.ping(&info), |instruction| Response::Instruction { instruction })
        }

        Request::GetWork { info } => respond(dispatcher.get_work(&info), |work| Response::Work { work }),

        Request::ReportCurrentStatus { info, job, state } => respond(
            dispatcher.report_current_status(&info, &job, state),
            |outcome| Response::Report { outcome },
        ),

        Request::ReportCompleting { info, job, result } => respond(
            dispatcher.report_completing(&info, &job, result),
            |outcome| Response::Report { outcome },
        ),

        Request::ReportCompleted { info, job, result } => respond(
            dispatcher.report_completed(&info, &job, result),
            |outcome| Response::Report { outcome },
        ),

        Request::IsIgnored { job } => Response::Ignored { ignored: dispatcher.is_ignored(&job) },

        Request::GetCookie { identifier, location } => {
            Response::Cookie { cookie: dispatcher.get_cookie(identifier, &location) }
        }

        Request::PayloadManifest => {
            let dispatcher = Arc::clone(dispatcher);
            let result = tokio::task::spawn_blocking(move || dispatcher.payload_manifest())
                .await
                .map_err(|e| ConnectionError::Internal(e.to_string()))?;
            respond(result, |manifest| Response::Manifest { manifest })
        }

        Request::FetchPayload => {
            let dispatcher = Arc::clone(dispatcher);
            let result = tokio::task::spawn_blocking(move || dispatcher.fetch_payload())
                .await
                .map_err(|e| ConnectionError::Internal(e.to_string()))?;
            respond(result, |(manifest, data)| Response::Payload { manifest, data })
        }

        Request::TriggerPipeline { pipeline, user, options } => Response::Schedule {
            outcome: dispatcher.trigger_pipeline(&pipeline, &user, &options),
        },

        Request::MaterialChanged { pipeline, revisions } => Response::Schedule {
            outcome: dispatcher.material_changed(&pipeline, &revisions),
        },

        Request::CancelJob { build_id } => respond(dispatcher.cancel_job(build_id), |_| Response::Ok),

        Request::RescheduleJob { build_id } => {
            respond(dispatcher.reschedule_job(build_id), |_| Response::Ok)
        }

        Request::ApproveAgent { uuid } => respond(dispatcher.approve_agent(&uuid), |_| Response::Ok),

        Request::DisableAgent { uuid } => respond(dispatcher.disable_agent(&uuid), |_| Response::Ok),

        Request::ListAgents => Response::Agents { agents: dispatcher.list_agents() },

        Request::ListJobs { all } => Response::Jobs { jobs: dispatcher.list_jobs(all) },

        Request::Status => {
            let status = dispatcher.status();
            Response::Status {
                uptime_secs: status.uptime_secs,
                agents: status.agents,
                jobs_active: status.jobs_active,
                rejections: status.rejections,
            }
        }
    };
    Ok(response)
}

fn respond<T>(result: Result<T, DispatchError>, ok: impl FnOnce(T) -> Response) -> Response {
    match result {
        Ok(value) => ok(value),
        Err(e) => Response::error(e.kind(), e.to_string()),
    }
}

#[cfg(test)]
#[path = "../listener_tests.rs"]
mod tests;
