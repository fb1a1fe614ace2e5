// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `RunSpec` — what it means to actually start a service or run an action.

use crate::killscript::KillScript;
use indexmap::IndexMap;

/// One token of an argv entry: either a literal string, or a reference to
/// an environment variable resolved at spawn time. Kept as a
/// tagged variant, not a pre-expanded string, so expansion happens exactly
/// once, at the point the spawner is actually asked to exec.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArgToken {
    Literal(String),
    EnvRef(String),
}

impl ArgToken {
    pub fn literal(s: impl Into<String>) -> Self {
        ArgToken::Literal(s.into())
    }

    pub fn env_ref(name: impl Into<String>) -> Self {
        ArgToken::EnvRef(name.into())
    }

    /// Resolve this token against an environment map, producing the final
    /// argv string the spawner will see. A ref to an unset or explicitly
    /// deleted (`None`) variable resolves to the empty string.
    pub fn resolve(&self, env: &IndexMap<String, Option<String>>) -> String {
        match self {
            ArgToken::Literal(s) => s.clone(),
            ArgToken::EnvRef(name) => env.get(name).and_then(|v| v.clone()).unwrap_or_default(),
        }
    }
}

/// The closed set of operations Desd implements itself rather than
/// delegating to the spawner, dispatched by name as a closed tagged
/// variant. Each built-in action
/// name (`start`/`stop`/`restart`/`check`) defaults to one of these.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InternalOp {
    /// `start` default: exec the service's run spec unless already running.
    ExecUnlessRunning,
    /// `stop` default: drive a kill-script against the running handle.
    Killscript(KillScript),
    /// `restart` default: stop, then start again (paired with goal `cycle`).
    StopStart,
    /// `check` default: wait until the service has been up for `secs`.
    WaitForUptime(f64),
}

/// How to bring a service's run handle — or an action's transient child —
/// into existence.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunSpec {
    /// Ask the spawner to fork+exec `argv`, optionally overriding `argv[0]`
    /// for `exec`'s `argv0` parameter while keeping the displayed command
    /// name distinct from the process image path.
    Exec { argv: Vec<ArgToken>, argv0: Option<ArgToken> },
    /// Invoke a method Desd implements itself, with no spawner round trip
    /// needed to decide *whether* to run (the spawner is still asked to
    /// exec when the op itself starts a process, e.g. `exec_unless_running`).
    Internal(InternalOp),
}

impl RunSpec {
    pub fn exec(argv: Vec<ArgToken>) -> Self {
        RunSpec::Exec { argv, argv0: None }
    }

    pub fn exec_with_argv0(argv: Vec<ArgToken>, argv0: ArgToken) -> Self {
        RunSpec::Exec { argv, argv0: Some(argv0) }
    }

    pub fn internal(op: InternalOp) -> Self {
        RunSpec::Internal(op)
    }

    /// Whether resolving this spec always requires a round trip to the
    /// spawner, as opposed to being fully decidable within the action
    /// executor (e.g. `stop_start` and `wait_for_uptime` only inspect
    /// already-mirrored spawner state).
    pub fn is_exec(&self) -> bool {
        matches!(self, RunSpec::Exec { .. })
    }
}

/// The stock kill-script argument sequence for the `stop` built-in action:
/// escalate TERM, wait 30s while continuing the process, TERM
/// again, wait 20s, QUIT, wait 5s, then KILL and wait 20s for reap.
pub fn default_stop_killscript() -> KillScript {
    KillScript::parse("SIGTERM SIGCONT 30 SIGTERM 20 SIGQUIT 5 SIGKILL 20")
        .unwrap_or_else(|_| unreachable!("builtin stop killscript literal is always valid"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arg_token_resolves_literal() {
        let env = IndexMap::new();
        assert_eq!(ArgToken::literal("hello").resolve(&env), "hello");
    }

    #[test]
    fn arg_token_resolves_env_ref() {
        let mut env = IndexMap::new();
        env.insert("PORT".to_string(), Some("8080".to_string()));
        assert_eq!(ArgToken::env_ref("PORT").resolve(&env), "8080");
    }

    #[test]
    fn arg_token_unset_env_ref_resolves_empty() {
        let mut env = IndexMap::new();
        env.insert("PORT".to_string(), None);
        assert_eq!(ArgToken::env_ref("PORT").resolve(&env), "");
    }

    #[test]
    fn exec_spec_is_exec_internal_is_not() {
        let exec = RunSpec::exec(vec![ArgToken::literal("/bin/sh")]);
        assert!(exec.is_exec());

        let internal = RunSpec::internal(InternalOp::ExecUnlessRunning);
        assert!(!internal.is_exec());
    }

    #[test]
    fn default_stop_killscript_parses() {
        let script = default_stop_killscript();
        assert_eq!(script.serialize(), "SIGTERM SIGCONT 30 SIGTERM 20 SIGQUIT 5 SIGKILL 20");
    }
}
