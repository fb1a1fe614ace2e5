// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Kill scripts — a small space-delimited DSL for escalating shutdown.
//!
//! Grammar: a non-empty, space-separated sequence of
//! fields, each either a signal name (`SIG\w+`) or a duration in seconds
//! (`\d+(\.\d+)?`). The two kinds may appear in any order and repeat, so
//! parsing can't assume strict alternation — `SIGTERM 5 5 SIGKILL` is as
//! valid as `SIGTERM 5 SIGKILL`.

use crate::error::CoreError;
use crate::ids::SignalName;

/// One step of a kill script: send a signal, or wait `secs` before the next step.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum KillStep {
    Signal(SignalName),
    Wait(f64),
}

/// A parsed, validated kill script, ready for the kill-script runner to
/// execute step by step against a [`crate::handle::Handle`].
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct KillScript(Vec<KillStep>);

impl KillScript {
    pub fn steps(&self) -> &[KillStep] {
        &self.0
    }

    pub fn parse(s: &str) -> Result<Self, CoreError> {
        let fields: Vec<&str> = s.split(' ').filter(|f| !f.is_empty()).collect();
        if fields.is_empty() {
            return Err(CoreError::InvalidKillScript(s.to_string()));
        }

        let mut steps = Vec::with_capacity(fields.len());
        for field in fields {
            steps.push(parse_field(field).ok_or_else(|| CoreError::InvalidKillScript(s.to_string()))?);
        }
        Ok(Self(steps))
    }

    /// Render back to the canonical space-delimited wire form. Durations
    /// that were given as whole seconds round-trip without a trailing
    /// `.0` by formatting through `f64`'s default `Display`, which already
    /// drops it.
    pub fn serialize(&self) -> String {
        self.0
            .iter()
            .map(|step| match step {
                KillStep::Signal(name) => name.to_string(),
                KillStep::Wait(secs) => format_duration(*secs),
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

fn parse_field(field: &str) -> Option<KillStep> {
    if field.starts_with("SIG") {
        SignalName::parse(field).ok().map(KillStep::Signal)
    } else if is_duration(field) {
        field.parse::<f64>().ok().map(KillStep::Wait)
    } else {
        None
    }
}

fn is_duration(field: &str) -> bool {
    let mut parts = field.splitn(2, '.');
    let whole = parts.next().unwrap_or_default();
    if whole.is_empty() || !whole.bytes().all(|b| b.is_ascii_digit()) {
        return false;
    }
    match parts.next() {
        None => true,
        Some(frac) => !frac.is_empty() && frac.bytes().all(|b| b.is_ascii_digit()),
    }
}

fn format_duration(secs: f64) -> String {
    if secs.fract() == 0.0 {
        format!("{}", secs as i64)
    } else {
        let s = format!("{}", secs);
        s
    }
}

impl TryFrom<String> for KillScript {
    type Error = CoreError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<KillScript> for String {
    fn from(v: KillScript) -> String {
        v.serialize()
    }
}

impl std::fmt::Display for KillScript {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.serialize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use yare::parameterized;

    #[parameterized(
        single_signal = {"SIGTERM"},
        signal_then_wait = {"SIGTERM 5"},
        escalating = {"SIGTERM 5 SIGKILL"},
        repeated_waits = {"SIGTERM 5 5 SIGKILL"},
        fractional_wait = {"SIGTERM 0.5 SIGKILL"},
    )]
    fn parses_valid_scripts(s: &str) {
        assert!(KillScript::parse(s).is_ok());
    }

    #[parameterized(
        empty = {""},
        bad_signal = {"TERM"},
        bad_duration = {"SIGTERM abc"},
        leading_dot = {"SIGTERM .5"},
    )]
    fn rejects_invalid_scripts(s: &str) {
        assert!(KillScript::parse(s).is_err());
    }

    #[test]
    fn round_trips_through_serialize() {
        let script = KillScript::parse("SIGTERM 5 SIGKILL").unwrap();
        assert_eq!(script.serialize(), "SIGTERM 5 SIGKILL");
    }

    fn arb_step() -> impl Strategy<Value = KillStep> {
        prop_oneof![
            "[A-Z][A-Z0-9]{2,8}".prop_map(|s| KillStep::Signal(SignalName::parse(format!("SIG{s}")).unwrap())),
            (0u32..600).prop_map(|n| KillStep::Wait(n as f64)),
        ]
    }

    proptest! {
        #[test]
        fn parse_of_serialize_is_identity(steps in prop::collection::vec(arb_step(), 1..8)) {
            let script = KillScript(steps);
            let serialized = script.serialize();
            let reparsed = KillScript::parse(&serialized).unwrap();
            prop_assert_eq!(reparsed, script);
        }
    }
}
