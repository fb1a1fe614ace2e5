// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Declared service goals — what the reconciler is steering toward.

use crate::error::CoreError;
use crate::simple_display;
use std::str::FromStr;

/// The desired disposition of a service, as declared by configuration or a
/// client's `service_action` command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Goal {
    /// Keep the service's run handle alive, restarting it on exit.
    Up,
    /// Keep the service's run handle stopped.
    Down,
    /// Run the service's run handle to completion exactly once, then settle at down.
    Once,
    /// Stop the current run (if any) and immediately start a fresh one.
    Cycle,
}

simple_display!(Goal {
    Up => "up",
    Down => "down",
    Once => "once",
    Cycle => "cycle",
});

impl FromStr for Goal {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "up" => Ok(Goal::Up),
            "down" => Ok(Goal::Down),
            "once" => Ok(Goal::Once),
            "cycle" => Ok(Goal::Cycle),
            other => Err(CoreError::UnknownGoal(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use yare::parameterized;

    #[parameterized(
        up = {"up", Goal::Up},
        down = {"down", Goal::Down},
        once = {"once", Goal::Once},
        cycle = {"cycle", Goal::Cycle},
    )]
    fn round_trips(s: &str, goal: Goal) {
        assert_eq!(s.parse::<Goal>().unwrap(), goal);
        assert_eq!(goal.to_string(), s);
    }

    #[test]
    fn rejects_unknown() {
        assert!("sideways".parse::<Goal>().is_err());
    }
}
