// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The reconciliation core: the spawner client, the kill-script runner, the
//! per-service action executor, the reconciler, and the configuration
//! facade that together turn observed spawner state into the declared goal
//! for every service.

#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

pub mod config;
pub mod error;
pub mod executor;
pub mod killscript;
pub mod reconciler;
pub mod signals;
pub mod spawner;

pub use config::{ConfigDiff, ConfigError, ConfigFacade, ConfigSnapshot};
pub use error::EngineError;
pub use executor::{ActionExecutor, ActionResult};
pub use killscript::{KillOutcome, KillScriptRunner, KillTarget, KillscriptDispatcher};
pub use reconciler::{Reconciler, ReconcilerHandle, WorkItem};
pub use signals::{SignalAction, SignalHandlers};
pub use spawner::{SpawnerClient, SpawnerEvent};
