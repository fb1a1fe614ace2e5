// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Errors a control-socket call can fail with, carrying enough detail for
//! `main` to print something useful and pick an exit code.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("connecting to control socket {0}: {1}")]
    Connect(PathBuf, #[source] std::io::Error),

    #[error("control socket protocol error: {0}")]
    Protocol(#[from] desd_wire::ProtocolError),

    #[error("{0}")]
    Denied(String),

    #[error("{0}")]
    Rejected(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

/// Translate a terminal `ok|error` reply into a `Result`, the one place a
/// wire-level reply becomes a Rust error. An "error" reply carries a
/// reason word as its second field.
pub fn reply_to_result(mut fields: Vec<String>) -> Result<Vec<String>, CliError> {
    if fields.is_empty() {
        return Err(CliError::Rejected("empty reply".to_string()));
    }
    let verb = fields.remove(0);
    match verb.as_str() {
        "ok" => Ok(fields),
        "error" => {
            let reason = fields.first().cloned().unwrap_or_else(|| "failed".to_string());
            if reason == "denied" {
                Err(CliError::Denied("command denied".to_string()))
            } else {
                Err(CliError::Rejected(fields.join(" ")))
            }
        }
        other => Err(CliError::Rejected(format!("unrecognized reply verb {other}"))),
    }
}
