// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `cv-agent`: runs jobs handed out by a conveyor dispatcher.
//!
//! Normally launched by `cv-supervisor`. Exits 0 when it wants to be
//! relaunched (new version published, or asked to stop).

use anyhow::{bail, Context, Result};
use clap::Parser;
use cv_agent::identity::{load_or_create_uuid, local_identifier};
use cv_agent::runtime::LOCK_FILE;
use cv_agent::lock::wait_until_lost;
use cv_agent::{AgentRuntime, DispatchClient, FileLock, Lock, RuntimeConfig, RuntimeExit};
use cv_core::AgentRuntimeInfo;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "cv-agent", version, about = "Conveyor build agent")]
struct Cli {
    /// Dispatcher host
    host: String,
    /// Dispatcher port
    port: u16,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    cv_agent::init_logging();

    let work_dir = cv_agent::env::agent_dir().context("failed to resolve agent directory")?;
    std::fs::create_dir_all(&work_dir)
        .with_context(|| format!("failed to create {}", work_dir.display()))?;

    let mut lock = FileLock::from_env(work_dir.join(LOCK_FILE));
    if !lock.try_acquire() {
        bail!("another agent is running in {}", work_dir.display());
    }

    let uuid = load_or_create_uuid(&work_dir).context("failed to load agent identity")?;
    let info = AgentRuntimeInfo::new(local_identifier(uuid), work_dir.display().to_string())
        .with_resources(cv_agent::env::agent_resources());
    info!(agent = %info.identifier, dispatcher = %format!("{}:{}", cli.host, cli.port), "starting agent");

    let runtime = AgentRuntime::new(
        DispatchClient::for_host(&cli.host, cli.port),
        RuntimeConfig::from_env(work_dir),
        info,
    );

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to wait for ctrl-c: {}", e);
            return;
        }
        info!("received shutdown signal");
        signal.cancel();
    });

    let exit = tokio::select! {
        exit = runtime.run(shutdown) => exit,
        () = wait_until_lost(&lock, cv_agent::env::lock_heartbeat()) => {
            bail!("lost {} to another agent", lock.path().display());
        }
    };
    match exit {
        RuntimeExit::Upgrade => info!("exiting so the supervisor can upgrade"),
        RuntimeExit::Shutdown => info!("agent stopped"),
    }
    lock.release();
    Ok(())
}
