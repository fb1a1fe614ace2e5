// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared error type for data-model construction and validation failures.

use thiserror::Error;

/// Errors raised while constructing or validating core domain types.
///
/// These are returned from fallible constructors (`ServiceName::parse`,
/// `KillScript::parse`, ...) rather than panicking, so callers — in
/// particular the framing layer, which must turn a bad field into an
/// `error invalid` reply rather than crash the endpoint — can recover.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("invalid service name: {0:?}")]
    InvalidServiceName(String),

    #[error("invalid action name: {0:?}")]
    InvalidActionName(String),

    #[error("invalid handle name: {0:?}")]
    InvalidHandleName(String),

    #[error("invalid signal name: {0:?}")]
    InvalidSignalName(String),

    #[error("invalid kill-script: {0:?}")]
    InvalidKillScript(String),

    #[error("invalid correlation id: {0:?}")]
    InvalidCorrelationId(String),

    #[error("unknown handle kind: {0:?}")]
    UnknownHandleKind(String),

    #[error("unknown goal: {0:?}")]
    UnknownGoal(String),
}
