// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Signal handler registry: maps a signal name to the action the
//! reconciler should take on it. A small lookup table instead of a match
//! arm with side effects inlined, so tests can substitute handlers and the
//! default mapping can be overridden without touching the reconciler
//! itself.

use desd_core::SignalName;
use std::collections::HashMap;

/// What the reconciler should do in response to a signal the spawner
/// reported as pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalAction {
    ReloadConfig,
    ReloadState,
    GracefulShutdown,
    ImmediateShutdown,
    IncreaseVerbosity,
    DecreaseVerbosity,
}

pub struct SignalHandlers {
    handlers: HashMap<SignalName, SignalAction>,
}

impl SignalHandlers {
    /// The stock mapping: `SIGHUP`→reload config, `SIGINT`→reload state,
    /// `SIGTERM`→graceful shutdown, `SIGQUIT`→immediate shutdown,
    /// `SIGUSR1`→verbosity+1, `SIGUSR2`→verbosity-1.
    pub fn default_mapping() -> Self {
        let mut handlers = HashMap::new();
        handlers.insert(SignalName::parse("SIGHUP").unwrap_or_else(|_| unreachable!()), SignalAction::ReloadConfig);
        handlers.insert(SignalName::parse("SIGINT").unwrap_or_else(|_| unreachable!()), SignalAction::ReloadState);
        handlers.insert(SignalName::parse("SIGTERM").unwrap_or_else(|_| unreachable!()), SignalAction::GracefulShutdown);
        handlers.insert(SignalName::parse("SIGQUIT").unwrap_or_else(|_| unreachable!()), SignalAction::ImmediateShutdown);
        handlers.insert(SignalName::parse("SIGUSR1").unwrap_or_else(|_| unreachable!()), SignalAction::IncreaseVerbosity);
        handlers.insert(SignalName::parse("SIGUSR2").unwrap_or_else(|_| unreachable!()), SignalAction::DecreaseVerbosity);
        Self { handlers }
    }

    pub fn empty() -> Self {
        Self { handlers: HashMap::new() }
    }

    pub fn set(&mut self, signal: SignalName, action: SignalAction) {
        self.handlers.insert(signal, action);
    }

    pub fn lookup(&self, signal: &SignalName) -> Option<SignalAction> {
        self.handlers.get(signal).copied()
    }
}

impl Default for SignalHandlers {
    fn default() -> Self {
        Self::default_mapping()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use yare::parameterized;

    #[parameterized(
        hup = {"SIGHUP", SignalAction::ReloadConfig},
        int = {"SIGINT", SignalAction::ReloadState},
        term = {"SIGTERM", SignalAction::GracefulShutdown},
        quit = {"SIGQUIT", SignalAction::ImmediateShutdown},
        usr1 = {"SIGUSR1", SignalAction::IncreaseVerbosity},
        usr2 = {"SIGUSR2", SignalAction::DecreaseVerbosity},
    )]
    fn default_mapping_resolves(name: &str, expected: SignalAction) {
        let handlers = SignalHandlers::default_mapping();
        let signal = SignalName::parse(name).unwrap();
        assert_eq!(handlers.lookup(&signal), Some(expected));
    }

    #[test]
    fn unmapped_signal_yields_none() {
        let handlers = SignalHandlers::empty();
        let signal = SignalName::parse("SIGWINCH").unwrap();
        assert_eq!(handlers.lookup(&signal), None);
    }

    #[test]
    fn set_overrides_mapping() {
        let mut handlers = SignalHandlers::default_mapping();
        let signal = SignalName::parse("SIGHUP").unwrap();
        handlers.set(signal.clone(), SignalAction::ImmediateShutdown);
        assert_eq!(handlers.lookup(&signal), Some(SignalAction::ImmediateShutdown));
    }
}
