// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Process-fatal and bootstrap errors: any of these terminates the process
//! with a non-zero exit.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("changing to base dir {path}: {source}")]
    BaseDir { path: PathBuf, #[source] source: std::io::Error },

    #[error("loading config {path}: {source}")]
    Config { path: PathBuf, #[source] source: desd_engine::ConfigError },

    #[error("binding control socket {path}: {source}")]
    ControlBind { path: PathBuf, #[source] source: std::io::Error },

    #[error("connecting to spawner at {0}: {1}")]
    SpawnerConnect(String, #[source] std::io::Error),

    #[error("fd-based --control handoff is not implemented; pass a socket path")]
    ControlFdUnsupported,

    #[error("startup reconciliation failed: {0}")]
    Startup(#[from] desd_engine::EngineError),

    #[error("installing signal handler for {0}: {1}")]
    SignalInstall(&'static str, #[source] std::io::Error),
}
