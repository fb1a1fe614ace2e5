// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `Service` — the unit the reconciler steers: a declared goal, its actions,
//! and the spawner-mirrored state observed for it.

use crate::action::{default_actions, Action};
use crate::goal::Goal;
use crate::ids::{ActionName, HandleName, ServiceName};
use crate::observed::ObservedState;
use indexmap::IndexMap;

/// A service's full declaration plus its live reconciliation state.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Service {
    pub name: ServiceName,
    /// Declared environment: `None` means explicitly unset, distinct from
    /// a variable simply not being present in the map.
    pub env: IndexMap<String, Option<String>>,
    /// Default IO handle list, in argv-adjacent order.
    pub io: Vec<HandleName>,
    pub goal: Goal,
    pub actions: IndexMap<ActionName, Action>,
    /// The one action currently dispatched, if any — a service has at most
    /// one active-action slot.
    pub active_action: Option<ActionName>,
    /// Pending action requests, oldest first, waiting for the active slot
    /// (or a compatible parallel slot) to free up.
    pub action_queue: Vec<ActionName>,
    pub observed: ObservedState,
}

impl Service {
    pub fn new(name: ServiceName, goal: Goal) -> Self {
        Self {
            name,
            env: IndexMap::new(),
            io: Vec::new(),
            goal,
            actions: default_actions(),
            active_action: None,
            action_queue: Vec::new(),
            observed: ObservedState::not_running(),
        }
    }

    pub fn action(&self, name: &str) -> Option<&Action> {
        self.actions.get(name)
    }

    /// Merge configuration-declared actions on top of the built-in set,
    /// overriding any built-in of the same name.
    pub fn with_actions(mut self, declared: impl IntoIterator<Item = Action>) -> Self {
        for action in declared {
            self.actions.insert(action.name.clone(), action);
        }
        self
    }

    pub fn is_action_active(&self) -> bool {
        self.active_action.is_some()
    }
}
