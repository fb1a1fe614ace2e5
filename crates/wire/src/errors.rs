// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Errors surfaced by the framing layer and protocol endpoint.

use thiserror::Error;

/// Errors from decoding/encoding frames or driving an endpoint.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// A line failed the framing contract: empty/non-numeric correlation id,
    /// too few fields, or a field somehow carrying a forbidden byte.
    #[error("invalid protocol formatting: {0}")]
    Framing(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The peer's connection was closed (reader hit EOF).
    #[error("connection closed")]
    ConnectionClosed,

    /// A pending command's promise was dropped without a terminal reply,
    /// e.g. because the endpoint was torn down.
    #[error("canceled")]
    Canceled,

    /// `async_send_msg` was called with a correlation id already in flight.
    #[error("correlation id {0} already in flight")]
    IdInUse(u64),

    /// `ServerEndpoint::run` was called more than once on the same endpoint.
    #[error("server endpoint is already running")]
    AlreadyRunning,
}

/// Map a handler exception's message to the common reply shape by error
/// substring: `/denied/` maps to `error denied`, otherwise `error failed`.
pub fn classify_error(message: &str) -> Vec<String> {
    if message.contains("denied") {
        vec!["error".to_string(), "denied".to_string()]
    } else {
        vec!["error".to_string(), "failed".to_string()]
    }
}
