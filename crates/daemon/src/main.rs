// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `desd`: the service supervisor control daemon.
//! Connects to the spawner, loads the service configuration, runs the
//! reconciliation core, and serves the control socket.

#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

mod cli;
mod commands;
mod error;
mod listener;
mod signals;

use std::collections::HashSet;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use desd_core::SystemClock;
use desd_engine::{ActionExecutor, ConfigFacade, KillscriptDispatcher, Reconciler, SpawnerClient};
use tokio::net::UnixStream;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use cli::{Cli, ControlArg};
use error::DaemonError;

/// Map the net verbosity delta onto a default `tracing` filter, honored
/// unless the caller overrides it with `RUST_LOG`.
fn init_logging(verbosity: i64) {
    let default_directive = match verbosity {
        i64::MIN..=-1 => "error",
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbosity());

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(err) => {
            error!(error = %err, "failed to start async runtime");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "desd exiting");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), DaemonError> {
    if let Some(base_dir) = &cli.base_dir {
        if let Err(source) = std::env::set_current_dir(base_dir) {
            return Err(DaemonError::BaseDir { path: base_dir.clone(), source });
        }
    }

    let config = Arc::new(
        ConfigFacade::load(cli.config.as_path())
            .map_err(|source| DaemonError::Config { path: cli.config.clone(), source })?,
    );

    let control_path = match &cli.control {
        ControlArg::Path(path) => path.clone(),
        ControlArg::Fd(_) => return Err(DaemonError::ControlFdUnsupported),
    };

    let spawner_stream = UnixStream::connect(&control_path)
        .await
        .map_err(|e| DaemonError::SpawnerConnect(control_path.display().to_string(), e))?;

    let (events_tx, events_rx) = tokio::sync::mpsc::unbounded_channel();
    let spawner = SpawnerClient::new(spawner_stream, events_tx);
    let executor = ActionExecutor::new();
    let (reconciler, handle, work_rx) = Reconciler::new(spawner, executor, config, SystemClock);

    // Forward the spawner's own translated events onto the same work queue
    // the reconciler drains: every observed-state change re-dirties its
    // service.
    {
        let handle = handle.clone();
        let mut events_rx = events_rx;
        tokio::spawn(async move {
            while let Some(event) = events_rx.recv().await {
                match event {
                    desd_engine::SpawnerEvent::StatedumpComplete => {}
                    desd_engine::SpawnerEvent::ServiceState { name, .. } => handle.enqueue_service(name),
                    desd_engine::SpawnerEvent::ServiceExit { name, .. } => handle.enqueue_service(name),
                    desd_engine::SpawnerEvent::Signal(name) => handle.enqueue_signal(name),
                }
            }
        });
    }

    signals::install(handle.clone())?;

    let killscripts = KillscriptDispatcher::new(reconciler.spawner());

    let tokens: HashSet<String> = cli.grant_tokens.iter().cloned().collect();
    let bound = listener::Listener::bind(&cli.socket, Arc::clone(&reconciler), handle.clone(), killscripts, tokens)
        .map_err(|e| DaemonError::ControlBind {
            path: cli.socket.clone(),
            source: std::io::Error::new(std::io::ErrorKind::Other, e.to_string()),
        })?;

    reconciler.startup(&handle).await?;
    info!("desd startup reconciliation complete");

    let run_handle = tokio::spawn(Arc::clone(&reconciler).run(handle.clone(), work_rx));
    bound.run().await;

    reconciler.shutdown_token().cancel();
    let _ = run_handle.await;
    Ok(())
}
