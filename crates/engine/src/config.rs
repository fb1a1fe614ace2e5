// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Configuration facade: a read-only snapshot of the declared world —
//! services, their actions, defaults merged, overlays resolved — frozen at
//! load or reload. The reconciler only ever reads through
//! [`ConfigFacade::current`]; reload swaps the whole snapshot atomically.

use desd_core::{Action, ArgToken, Goal, HandleName, InternalOp, Parallelism, RunSpec, Service, ServiceName};
use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading {path}: {source}")]
    Io { path: PathBuf, #[source] source: std::io::Error },

    #[error("parsing {path}: {source}")]
    Parse { path: PathBuf, #[source] source: serde_yaml::Error },

    #[error("invalid name or value in {path}: {source}")]
    Invalid { path: PathBuf, #[source] source: desd_core::CoreError },
}

/// On-disk shape: service goal/env/handles/actions, action
/// run/env/goal/parallelism. Deliberately minimal — this loader covers
/// exactly those shapes, not a full config-dialect normalization layer.
#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(default)]
    services: IndexMap<String, RawService>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct RawService {
    goal: Option<String>,
    env: IndexMap<String, Option<String>>,
    io: Vec<String>,
    actions: IndexMap<String, RawAction>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct RawAction {
    exec: Option<Vec<String>>,
    argv0: Option<String>,
    internal: Option<String>,
    internal_arg: Option<String>,
    env: IndexMap<String, Option<String>>,
    goal: Option<String>,
    parallelism: Option<Vec<String>>,
    parallelism_all: bool,
    tokens: BTreeSet<String>,
}

/// The resolved, immutable view the reconciler and action executor read.
/// Every enumeration, default, and overlay is already resolved by the time
/// a snapshot exists.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigSnapshot {
    pub services: IndexMap<ServiceName, Service>,
}

impl ConfigSnapshot {
    pub fn service(&self, name: &ServiceName) -> Option<&Service> {
        self.services.get(name)
    }

    fn from_raw(raw: RawConfig, path: &Path) -> Result<Self, ConfigError> {
        let mut services = IndexMap::new();
        for (name, raw_service) in raw.services {
            let service_name = ServiceName::parse(name).map_err(|e| ConfigError::Invalid { path: path.to_path_buf(), source: e })?;
            let goal = match raw_service.goal {
                Some(g) => g.parse::<Goal>().map_err(|e| ConfigError::Invalid { path: path.to_path_buf(), source: e })?,
                None => Goal::Up,
            };

            let mut service = Service::new(service_name, goal);
            service.env = raw_service.env;

            let mut io = Vec::with_capacity(raw_service.io.len());
            for h in raw_service.io {
                io.push(HandleName::parse(h).map_err(|e| ConfigError::Invalid { path: path.to_path_buf(), source: e })?);
            }
            service.io = io;

            let mut declared = Vec::with_capacity(raw_service.actions.len());
            for (action_name, raw_action) in raw_service.actions {
                declared.push(build_action(action_name, raw_action, path)?);
            }
            service = service.with_actions(declared);

            services.insert(service.name.clone(), service);
        }

        Ok(Self { services })
    }
}

fn build_action(name: String, raw: RawAction, path: &Path) -> Result<Action, ConfigError> {
    let action_name = desd_core::ActionName::parse(name).map_err(|e| ConfigError::Invalid { path: path.to_path_buf(), source: e })?;

    let run = if let Some(argv) = raw.exec {
        let argv = argv.into_iter().map(resolve_token).collect();
        match raw.argv0 {
            Some(a0) => RunSpec::exec_with_argv0(argv, resolve_token(a0)),
            None => RunSpec::exec(argv),
        }
    } else {
        match raw.internal.as_deref() {
            Some("exec_unless_running") | None => RunSpec::internal(InternalOp::ExecUnlessRunning),
            Some("killscript") => {
                let script = raw
                    .internal_arg
                    .as_deref()
                    .unwrap_or("SIGTERM SIGCONT 30 SIGTERM 20 SIGQUIT 5 SIGKILL 20");
                let script = desd_core::KillScript::parse(script)
                    .map_err(|e| ConfigError::Invalid { path: path.to_path_buf(), source: e })?;
                RunSpec::internal(InternalOp::Killscript(script))
            }
            Some("stop_start") => RunSpec::internal(InternalOp::StopStart),
            Some("wait_for_uptime") => {
                let secs = raw.internal_arg.as_deref().and_then(|s| s.parse::<f64>().ok()).unwrap_or(3.0);
                RunSpec::internal(InternalOp::WaitForUptime(secs))
            }
            Some(other) => {
                return Err(ConfigError::Invalid {
                    path: path.to_path_buf(),
                    source: desd_core::CoreError::InvalidActionName(other.to_string()),
                });
            }
        }
    };

    let mut action = Action::new(action_name, run);
    action.env = raw.env;
    if let Some(goal) = raw.goal {
        action.goal = Some(goal.parse::<Goal>().map_err(|e| ConfigError::Invalid { path: path.to_path_buf(), source: e })?);
    }
    action.parallelism = if raw.parallelism_all {
        Parallelism::All
    } else if let Some(names) = raw.parallelism {
        let mut set = BTreeSet::new();
        for n in names {
            set.insert(desd_core::ActionName::parse(n).map_err(|e| ConfigError::Invalid { path: path.to_path_buf(), source: e })?);
        }
        Parallelism::Named(set)
    } else {
        Parallelism::none()
    };
    action.tokens = raw.tokens;

    Ok(action)
}

fn resolve_token(raw: String) -> ArgToken {
    match raw.strip_prefix('$') {
        Some(var) => ArgToken::env_ref(var),
        None => ArgToken::literal(raw),
    }
}

/// Load a snapshot from `path`.
pub fn load(path: &Path) -> Result<ConfigSnapshot, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Io { path: path.to_path_buf(), source: e })?;
    let raw: RawConfig = serde_yaml::from_str(&text).map_err(|e| ConfigError::Parse { path: path.to_path_buf(), source: e })?;
    ConfigSnapshot::from_raw(raw, path)
}

/// The diff between two snapshots' service sets. A service present in both
/// old and new config with identical `run` and `io` counts as unchanged, so
/// the reconciler never re-issues `service.args`/`service.fds` for it. A
/// goal-only edit still reaches the reconciler (it's not dropped from the
/// enumeration entirely) but doesn't count as a config `changed` by itself —
/// the reconciler picks goal changes up on its own from the live snapshot.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ConfigDiff {
    pub added: Vec<ServiceName>,
    pub changed: Vec<ServiceName>,
    pub removed: Vec<ServiceName>,
}

fn service_unchanged(a: &Service, b: &Service) -> bool {
    a.io == b.io && a.actions.get("start").map(|s| &s.run) == b.actions.get("start").map(|s| &s.run)
}

fn diff_snapshots(old: &ConfigSnapshot, new: &ConfigSnapshot) -> ConfigDiff {
    let mut diff = ConfigDiff::default();
    for (name, new_service) in &new.services {
        match old.services.get(name) {
            None => diff.added.push(name.clone()),
            Some(old_service) => {
                if !service_unchanged(old_service, new_service) {
                    diff.changed.push(name.clone());
                }
            }
        }
    }
    for name in old.services.keys() {
        if !new.services.contains_key(name) {
            diff.removed.push(name.clone());
        }
    }
    diff
}

/// Owns the live snapshot behind a pointer-swap, atomic from the
/// single-threaded reconciler loop's perspective.
pub struct ConfigFacade {
    path: PathBuf,
    current: Mutex<Arc<ConfigSnapshot>>,
}

impl ConfigFacade {
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let snapshot = load(&path)?;
        Ok(Self { path, current: Mutex::new(Arc::new(snapshot)) })
    }

    pub fn current(&self) -> Arc<ConfigSnapshot> {
        Arc::clone(&self.current.lock())
    }

    /// Reload from disk, returning the diff against the prior snapshot.
    /// Services removed from config but still running are left running;
    /// services added or changed are reconciled.
    pub fn reload(&self) -> Result<ConfigDiff, ConfigError> {
        let new_snapshot = load(&self.path)?;
        let old_snapshot = self.current();
        let diff = diff_snapshots(&old_snapshot, &new_snapshot);
        *self.current.lock() = Arc::new(new_snapshot);
        Ok(diff)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_yaml(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn loads_a_minimal_service() {
        let file = write_yaml(
            r#"
services:
  web:
    goal: up
    io: ["-", "log"]
"#,
        );
        let snapshot = load(file.path()).unwrap();
        let web = snapshot.service(&ServiceName::parse("web").unwrap()).unwrap();
        assert_eq!(web.goal, Goal::Up);
        assert_eq!(web.io.len(), 2);
        assert!(web.action("start").is_some(), "built-in actions still present");
    }

    #[test]
    fn declared_action_overrides_builtin() {
        let file = write_yaml(
            r#"
services:
  web:
    actions:
      start:
        exec: ["/usr/bin/web", "--port", "$PORT"]
"#,
        );
        let snapshot = load(file.path()).unwrap();
        let web = snapshot.service(&ServiceName::parse("web").unwrap()).unwrap();
        assert!(web.action("start").unwrap().run.is_exec());
    }

    #[test]
    fn rejects_invalid_service_name() {
        let file = write_yaml(
            r#"
services:
  "-bad":
    goal: up
"#,
        );
        assert!(load(file.path()).is_err());
    }

    #[test]
    fn reload_diff_reports_added_changed_removed() {
        let file = write_yaml(
            r#"
services:
  web:
    goal: up
    io: ["-"]
  worker:
    goal: up
"#,
        );
        let facade = ConfigFacade::load(file.path()).unwrap();

        let file2 = write_yaml(
            r#"
services:
  web:
    goal: up
    io: ["-", "log"]
  queue:
    goal: up
"#,
        );
        std::fs::copy(file2.path(), file.path()).unwrap();

        let diff = facade.reload().unwrap();
        assert_eq!(diff.added, vec![ServiceName::parse("queue").unwrap()]);
        assert_eq!(diff.changed, vec![ServiceName::parse("web").unwrap()]);
        assert_eq!(diff.removed, vec![ServiceName::parse("worker").unwrap()]);
    }

    #[test]
    fn reload_diff_does_not_report_a_goal_only_edit_as_changed() {
        let file = write_yaml(
            r#"
services:
  web:
    goal: up
"#,
        );
        let facade = ConfigFacade::load(file.path()).unwrap();

        let file2 = write_yaml(
            r#"
services:
  web:
    goal: down
"#,
        );
        std::fs::copy(file2.path(), file.path()).unwrap();

        let diff = facade.reload().unwrap();
        assert!(diff.changed.is_empty());
    }
}
