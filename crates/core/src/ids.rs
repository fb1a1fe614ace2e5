// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Validated newtype identifiers for the wire protocol and data model.
//!
//! Each of these wraps a `String` but only ever holds a value that already
//! passed its name grammar — callers validate once at the
//! boundary (framing layer, config loader) instead of re-checking the
//! charset at every call site downstream.

use crate::error::CoreError;
use std::borrow::Borrow;
use std::fmt;
use std::str::FromStr;

fn is_name_start(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn is_name_rest(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '-'
}

/// Matches `\w[\w.-]*`: used for service and action names.
fn is_word_name(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if is_name_start(c) => {}
        _ => return false,
    }
    chars.all(is_name_rest)
}

macro_rules! validated_name {
    ($name:ident, $err:ident, $validator:path) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            pub fn parse(s: impl Into<String>) -> Result<Self, CoreError> {
                let s = s.into();
                if $validator(&s) {
                    Ok(Self(s))
                } else {
                    Err(CoreError::$err(s))
                }
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Build from a value the caller has already guaranteed is
            /// grammar-valid (a compiled-in constant), skipping the
            /// validator and its fallible `Result`.
            pub(crate) fn unchecked(s: impl Into<String>) -> Self {
                Self(s.into())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = CoreError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }

        impl TryFrom<String> for $name {
            type Error = CoreError;

            fn try_from(s: String) -> Result<Self, Self::Error> {
                Self::parse(s)
            }
        }

        impl From<$name> for String {
            fn from(v: $name) -> String {
                v.0
            }
        }

        impl Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

validated_name!(ServiceName, InvalidServiceName, is_word_name);
validated_name!(ActionName, InvalidActionName, is_word_name);

/// Matches `-|\w[\w.-]*`: a bare `-` (the null handle) or a word name.
fn is_handle_name(s: &str) -> bool {
    s == "-" || is_word_name(s)
}
validated_name!(HandleName, InvalidHandleName, is_handle_name);

/// Matches `SIG\w+` with the conventional all-caps-plus-digits POSIX style
/// (`SIGTERM`, `SIGUSR1`, ...). We don't validate against the fixed POSIX
/// signal table — the spawner, not Desd, is the one that actually delivers
/// the signal, and new platforms add names we shouldn't have to know about.
fn is_signal_name(s: &str) -> bool {
    match s.strip_prefix("SIG") {
        Some(rest) if !rest.is_empty() => {
            rest.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
        }
        _ => false,
    }
}
validated_name!(SignalName, InvalidSignalName, is_signal_name);

/// Correlation id on a protocol message. `ZERO` denotes synchronous
/// communication; any other value must be a positive integer, unique
/// while the command is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct CorrelationId(pub u64);

impl CorrelationId {
    pub const ZERO: CorrelationId = CorrelationId(0);

    pub fn is_sync(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for CorrelationId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(CoreError::InvalidCorrelationId(s.to_string()));
        }
        s.parse::<u64>()
            .map(CorrelationId)
            .map_err(|_| CoreError::InvalidCorrelationId(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use yare::parameterized;

    #[parameterized(
        plain = {"web"},
        dotted = {"web.v2"},
        dashed = {"web-worker"},
        underscored = {"_web"},
    )]
    fn service_name_accepts(s: &str) {
        assert!(ServiceName::parse(s).is_ok());
    }

    #[parameterized(
        empty = {""},
        leading_dash = {"-web"},
        leading_dot = {".web"},
        has_tab = {"we\tb"},
    )]
    fn service_name_rejects(s: &str) {
        assert!(ServiceName::parse(s).is_err());
    }

    #[test]
    fn handle_name_allows_bare_dash() {
        assert!(HandleName::parse("-").is_ok());
    }

    #[parameterized(
        term = {"SIGTERM"},
        usr1 = {"SIGUSR1"},
        kill = {"SIGKILL"},
    )]
    fn signal_name_accepts(s: &str) {
        assert!(SignalName::parse(s).is_ok());
    }

    #[parameterized(
        no_prefix = {"TERM"},
        lowercase = {"Sigterm"},
        empty_suffix = {"SIG"},
    )]
    fn signal_name_rejects(s: &str) {
        assert!(SignalName::parse(s).is_err());
    }

    #[test]
    fn correlation_id_parses_decimal() {
        assert_eq!("0".parse::<CorrelationId>().unwrap(), CorrelationId::ZERO);
        assert_eq!("42".parse::<CorrelationId>().unwrap(), CorrelationId(42));
    }

    #[parameterized(
        empty = {""},
        negative = {"-1"},
        non_numeric = {"abc"},
    )]
    fn correlation_id_rejects(s: &str) {
        assert!(s.parse::<CorrelationId>().is_err());
    }
}
