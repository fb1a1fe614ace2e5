// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Observed state — what the reconciler believes is actually true about a
//! service's run handle right now, mirrored from the spawner.

use std::time::Duration;

/// Whether a terminated run handle's final status came from a clean exit
/// or a delivered signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    Exit,
    Signal,
}

/// The reason and value of a run handle's most recent termination: an exit
/// code if `reason` is `Exit`, or a signal number if `Signal`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct LastExit {
    pub reason: ExitReason,
    pub value: i32,
}

impl LastExit {
    pub fn exit(code: i32) -> Self {
        Self { reason: ExitReason::Exit, value: code }
    }

    pub fn signal(signum: i32) -> Self {
        Self { reason: ExitReason::Signal, value: signum }
    }

    /// Whether the reconciler should treat this as a clean stop — exit
    /// code 0, not a signal.
    pub fn is_clean(&self) -> bool {
        matches!(self, LastExit { reason: ExitReason::Exit, value: 0 })
    }
}

/// Mirrored spawner state for a single service's run handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub struct ObservedState {
    pub running: bool,
    pub pid: Option<i32>,
    pub last_exit: Option<LastExit>,
    #[serde(with = "uptime_serde")]
    pub uptime: Option<Duration>,
}

impl ObservedState {
    pub fn not_running() -> Self {
        Self::default()
    }

    pub fn running(pid: i32, uptime: Duration) -> Self {
        Self { running: true, pid: Some(pid), last_exit: None, uptime: Some(uptime) }
    }
}

mod uptime_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(v: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        v.map(|d| d.as_secs_f64()).serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<f64>::deserialize(d)?.map(Duration::from_secs_f64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_exit_is_only_zero_code() {
        assert!(LastExit::exit(0).is_clean());
        assert!(!LastExit::exit(1).is_clean());
        assert!(!LastExit::signal(15).is_clean());
    }

    #[test]
    fn not_running_has_no_pid() {
        let state = ObservedState::not_running();
        assert!(!state.running);
        assert_eq!(state.pid, None);
    }

    #[test]
    fn running_carries_pid_and_uptime() {
        let state = ObservedState::running(42, Duration::from_secs(5));
        assert!(state.running);
        assert_eq!(state.pid, Some(42));
        assert_eq!(state.uptime, Some(Duration::from_secs(5)));
    }
}
