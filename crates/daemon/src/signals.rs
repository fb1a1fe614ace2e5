// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wires real OS signals into the reconciler's work queue, using tokio's
//! own signal primitives rather than a hand-rolled sigaction wrapper.

use desd_core::SignalName;
use desd_engine::ReconcilerHandle;
use tokio::signal::unix::{signal, SignalKind};
use tracing::warn;

use crate::error::DaemonError;

/// Spawn one task per handled signal (SIGHUP, SIGINT, SIGTERM, SIGQUIT,
/// SIGUSR1, SIGUSR2), each forwarding onto the reconciler's work queue as
/// it arrives.
pub fn install(handle: ReconcilerHandle) -> Result<(), DaemonError> {
    for (kind, name) in [
        (SignalKind::hangup(), "SIGHUP"),
        (SignalKind::interrupt(), "SIGINT"),
        (SignalKind::terminate(), "SIGTERM"),
        (SignalKind::quit(), "SIGQUIT"),
        (SignalKind::user_defined1(), "SIGUSR1"),
        (SignalKind::user_defined2(), "SIGUSR2"),
    ] {
        let Ok(signal_name) = name.parse::<SignalName>() else {
            warn!(signal = name, "builtin signal name failed its own validator");
            continue;
        };
        let mut stream = signal(kind).map_err(|e| DaemonError::SignalInstall(name, e))?;
        let handle = handle.clone();
        tokio::spawn(async move {
            loop {
                if stream.recv().await.is_none() {
                    warn!(signal = name, "signal stream ended");
                    break;
                }
                handle.enqueue_signal(signal_name.clone());
            }
        });
    }
    Ok(())
}
