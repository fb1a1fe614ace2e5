// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Actions — named, one-shot operations a service exposes, distinct from
//! its own continuous run/stop cycle.

use crate::goal::Goal;
use crate::ids::ActionName;
use crate::runspec::{default_stop_killscript, InternalOp, RunSpec};
use std::collections::BTreeSet;
use indexmap::IndexMap;

/// The set of other actions on the same service this action may run
/// concurrently with. `All` is the `*` wildcard.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Parallelism {
    All,
    Named(BTreeSet<ActionName>),
}

impl Parallelism {
    pub fn none() -> Self {
        Parallelism::Named(BTreeSet::new())
    }

    /// Whether this action's declared parallelism set permits running
    /// alongside `other`.
    pub fn permits(&self, other: &ActionName) -> bool {
        match self {
            Parallelism::All => true,
            Parallelism::Named(set) => set.contains(other),
        }
    }

    /// Whether this action's parallelism set permits running alongside
    /// every action name in `others` — the action executor's admission
    /// check, which requires the requested action's parallelism set to
    /// cover every already-active action.
    pub fn permits_all<'a>(&self, others: impl Iterator<Item = &'a ActionName>) -> bool {
        others.into_iter().all(|other| self.permits(other))
    }
}

/// A named operation on a service. Identified together with its
/// owning service by a `(service_name, action_name)` pair, but the pair
/// itself isn't modeled here — [`crate::service::Service`] keys its actions
/// by [`ActionName`] alone since a service only ever holds its own actions.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Action {
    pub name: ActionName,
    pub run: RunSpec,
    /// Environment overlay applied on top of the service's own env for the
    /// duration of this action; `None` deletes the variable.
    pub env: IndexMap<String, Option<String>>,
    /// Goal to set before dispatch, if this action changes the service's
    /// declared goal. Always set before the run spec itself is dispatched.
    pub goal: Option<Goal>,
    pub parallelism: Parallelism,
    /// Opaque authorization tokens a caller's session must carry a member
    /// of to invoke this action via `service_action`. Empty means the
    /// default per-service-and-action token applies instead.
    pub tokens: BTreeSet<String>,
}

impl Action {
    pub fn new(name: ActionName, run: RunSpec) -> Self {
        Self { name, run, env: IndexMap::new(), goal: None, parallelism: Parallelism::none(), tokens: BTreeSet::new() }
    }

    pub fn with_goal(mut self, goal: Goal) -> Self {
        self.goal = Some(goal);
        self
    }

    pub fn with_parallelism(mut self, parallelism: Parallelism) -> Self {
        self.parallelism = parallelism;
        self
    }
}

/// The four built-in actions every service gets unless configuration
/// overrides them by name.
pub fn default_actions() -> IndexMap<ActionName, Action> {
    let mut actions = IndexMap::new();

    actions.insert(
        ActionName::unchecked("start"),
        Action::new(ActionName::unchecked("start"), RunSpec::internal(InternalOp::ExecUnlessRunning)),
    );
    actions.insert(
        ActionName::unchecked("stop"),
        Action::new(ActionName::unchecked("stop"), RunSpec::internal(InternalOp::Killscript(default_stop_killscript())))
            .with_goal(Goal::Down),
    );
    actions.insert(
        ActionName::unchecked("restart"),
        Action::new(ActionName::unchecked("restart"), RunSpec::internal(InternalOp::StopStart)).with_goal(Goal::Cycle),
    );
    actions.insert(
        ActionName::unchecked("check"),
        Action::new(ActionName::unchecked("check"), RunSpec::internal(InternalOp::WaitForUptime(3.0)))
            .with_parallelism(Parallelism::All),
    );

    actions
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_actions_has_the_four_builtins() {
        let actions = default_actions();
        for name in ["start", "stop", "restart", "check"] {
            assert!(actions.contains_key(name), "missing builtin action {name}");
        }
    }

    #[test]
    fn restart_defaults_to_cycle_goal() {
        let actions = default_actions();
        assert_eq!(actions["restart"].goal, Some(Goal::Cycle));
    }

    #[test]
    fn stop_defaults_to_down_goal() {
        let actions = default_actions();
        assert_eq!(actions["stop"].goal, Some(Goal::Down));
    }

    #[test]
    fn check_parallelism_is_all() {
        let actions = default_actions();
        assert_eq!(actions["check"].parallelism, Parallelism::All);
    }

    #[test]
    fn parallelism_named_permits_only_listed_actions() {
        let allowed = ActionName::parse("check").unwrap();
        let other = ActionName::parse("deploy").unwrap();
        let parallelism = Parallelism::Named(BTreeSet::from([allowed.clone()]));
        assert!(parallelism.permits(&allowed));
        assert!(!parallelism.permits(&other));
    }
}
