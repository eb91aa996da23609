// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `cv-supervisor`: keeps one current `cv-agent` running on this host.

use std::process::ExitCode;

use clap::Parser;
use cv_agent::supervisor::LOCK_FILE;
use cv_agent::{DispatchClient, FileLock, ProcessLauncher, Supervisor, SupervisorConfig};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "cv-supervisor", version, about = "Conveyor agent supervisor")]
struct Cli {
    /// Dispatcher host
    host: String,
    /// Dispatcher port
    port: u16,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    cv_agent::init_logging();

    let work_dir = match cv_agent::env::agent_dir() {
        Ok(dir) => dir,
        Err(e) => {
            error!("failed to resolve agent directory: {}", e);
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = std::fs::create_dir_all(&work_dir) {
        error!("failed to create {}: {}", work_dir.display(), e);
        return ExitCode::FAILURE;
    }

    let supervisor = Supervisor::new(
        SupervisorConfig::from_env(work_dir.clone()),
        DispatchClient::for_host(&cli.host, cli.port),
        ProcessLauncher::new(cli.host.clone(), cli.port, work_dir.clone()),
        FileLock::from_env(work_dir.join(LOCK_FILE)),
    );

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("received shutdown signal");
            signal.cancel();
        }
    });

    info!(dir = %work_dir.display(), dispatcher = %format!("{}:{}", cli.host, cli.port), "starting supervisor");
    match supervisor.run(shutdown).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
