// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The reconciliation core's error type: classified into the reply kinds
//! the control protocol understands plus a few engine-internal conditions
//! that never reach a wire reply directly.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("unknown service {0:?}")]
    UnknownService(String),

    #[error("unknown action {0:?} on service {1:?}")]
    UnknownAction(String, String),

    #[error("access denied: missing token {0:?}")]
    Denied(String),

    #[error("action invocation canceled")]
    Canceled,

    #[error("spawner request failed: {0}")]
    SpawnerFailed(String),

    #[error("service {0:?} is still running")]
    StillRunning(String),
}

impl EngineError {
    /// Render as the common `ok|error` reply tail the wire layer expects.
    /// Named kinds map to their own reason word; anything else falls back
    /// to substring classification over the error's own message.
    pub fn reply_fields(&self) -> Vec<String> {
        match self {
            EngineError::UnknownService(_) | EngineError::UnknownAction(..) => {
                vec!["error".to_string(), "invalid".to_string()]
            }
            EngineError::Denied(_) => vec!["error".to_string(), "denied".to_string()],
            EngineError::StillRunning(_) => vec!["error".to_string(), "still_running".to_string()],
            EngineError::Canceled | EngineError::SpawnerFailed(_) => {
                desd_wire::classify_error(&self.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_service_maps_to_invalid() {
        assert_eq!(EngineError::UnknownService("x".into()).reply_fields(), vec!["error", "invalid"]);
    }

    #[test]
    fn denied_maps_to_denied() {
        assert_eq!(
            EngineError::Denied("service_action:web:start".into()).reply_fields(),
            vec!["error", "denied"]
        );
    }

    #[test]
    fn still_running_maps_directly() {
        assert_eq!(EngineError::StillRunning("w".into()).reply_fields(), vec!["error", "still_running"]);
    }

    #[test]
    fn spawner_failed_falls_back_to_substring_classification() {
        assert_eq!(EngineError::SpawnerFailed("denied by spawner".into()).reply_fields(), vec!["error", "denied"]);
        assert_eq!(EngineError::SpawnerFailed("socket reset".into()).reply_fields(), vec!["error", "failed"]);
    }
}
