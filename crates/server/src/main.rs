// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `cvd`: the conveyor dispatcher daemon.

use std::sync::Arc;

use anyhow::{Context, Result};
use cv_server::{lifecycle, Config, ListenCtx, Listener};
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load().context("failed to resolve dispatcher configuration")?;
    std::fs::create_dir_all(&config.state_dir)
        .with_context(|| format!("failed to create {}", config.state_dir.display()))?;

    // Log to stderr and to the configured log file
    let file_appender = config.log_appender().context("failed to open dispatcher log")?;
    let (file_writer, _guard) = tracing_appender::non_blocking(file_appender);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(tracing_subscriber::fmt::layer().with_writer(file_writer).with_ansi(false))
        .init();

    info!(version = cv_server::env::BUILD_VERSION, "starting dispatcher");
    let started = lifecycle::startup(&config).await?;
    let mut daemon = started.daemon;

    let listener =
        Listener::new(started.listener, Arc::new(ListenCtx { dispatcher: Arc::clone(&daemon.dispatcher) }));
    let listen_task = tokio::spawn(listener.run());
    let sweep_task = daemon.spawn_sweeper();

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                error!("failed to wait for ctrl-c: {}", e);
            }
            info!("received shutdown signal");
        }
        _ = listen_task => error!("listener exited unexpectedly"),
    }

    sweep_task.abort();
    daemon.shutdown()?;
    Ok(())
}
