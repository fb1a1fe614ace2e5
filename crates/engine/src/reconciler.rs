// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The reconciler: an event-driven convergence loop. For each dirty
//! `(signal, service)` entry pulled off the work queue, computes and
//! applies the next step toward the service's goal, dispatching at most one
//! action per item so the single loop never blocks waiting on a whole
//! action's lifetime.

use crate::config::ConfigFacade;
use crate::executor::{ActionExecutor, ActionResult};
use crate::killscript::{KillOutcome, KillScriptRunner, KillTarget};
use crate::signals::{SignalAction, SignalHandlers};
use crate::spawner::SpawnerClient;
use desd_core::{Action, ArgToken, Clock, Goal, HandleName, RunSpec, Service, ServiceName, SignalName, SystemClock};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// A unit of scheduled work enqueued by an event handler — the config
/// watcher, a signal listener, an action executor completion callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkItem {
    Service(ServiceName),
    Signal(SignalName),
}

/// A cheap, cloneable handle for enqueueing work from any task — the
/// spawner-event forwarder, the action executor's completion callback, a
/// signal listener.
#[derive(Clone)]
pub struct ReconcilerHandle {
    tx: mpsc::UnboundedSender<WorkItem>,
}

impl ReconcilerHandle {
    pub fn enqueue_service(&self, name: ServiceName) {
        let _ = self.tx.send(WorkItem::Service(name));
    }

    pub fn enqueue_signal(&self, name: SignalName) {
        let _ = self.tx.send(WorkItem::Signal(name));
    }
}

fn exec_argv(service: &Service, action_name: &str) -> Option<(Vec<String>, Option<String>)> {
    let action = service.action(action_name)?;
    match &action.run {
        RunSpec::Exec { argv, argv0 } => {
            let mut env = service.env.clone();
            for (k, v) in &action.env {
                env.insert(k.clone(), v.clone());
            }
            let resolved: Vec<String> = argv.iter().map(|t: &ArgToken| t.resolve(&env)).collect();
            let argv0 = argv0.as_ref().map(|t| t.resolve(&env));
            Some((resolved, argv0))
        }
        RunSpec::Internal(_) => None,
    }
}

/// The reconciliation core, parameterized over the spawner connection's
/// stream type and (for tests) an injectable clock.
pub struct Reconciler<S, C = SystemClock> {
    spawner: Arc<SpawnerClient<S>>,
    executor: Arc<ActionExecutor>,
    config: Arc<ConfigFacade>,
    signals: SignalHandlers,
    clock: C,
    goal_overrides: Mutex<HashMap<ServiceName, Goal>>,
    start_times: Mutex<HashMap<ServiceName, Instant>>,
    /// The `(argv, io)` pair last pushed to the spawner for each known
    /// service, so Step 3 of [`Reconciler::reconcile_service`] can tell a
    /// stale service (args/fds actually need re-pushing) from one that's
    /// merely being re-enqueued after an action completion or a config
    /// reload signal that didn't touch it.
    last_pushed: Mutex<HashMap<ServiceName, (Vec<String>, Vec<HandleName>)>>,
    shutdown: CancellationToken,
    verbosity: AtomicI64,
}

impl<S, C> Reconciler<S, C>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    C: Clock,
{
    pub fn new(
        spawner: Arc<SpawnerClient<S>>,
        executor: Arc<ActionExecutor>,
        config: Arc<ConfigFacade>,
        clock: C,
    ) -> (Arc<Self>, ReconcilerHandle, mpsc::UnboundedReceiver<WorkItem>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let this = Arc::new(Self {
            spawner,
            executor,
            config,
            signals: SignalHandlers::default_mapping(),
            clock,
            goal_overrides: Mutex::new(HashMap::new()),
            start_times: Mutex::new(HashMap::new()),
            last_pushed: Mutex::new(HashMap::new()),
            shutdown: CancellationToken::new(),
            verbosity: AtomicI64::new(0),
        });
        (this, ReconcilerHandle { tx }, rx)
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn verbosity(&self) -> i64 {
        self.verbosity.load(Ordering::SeqCst)
    }

    pub fn config(&self) -> Arc<ConfigFacade> {
        Arc::clone(&self.config)
    }

    pub fn spawner(&self) -> Arc<SpawnerClient<S>> {
        Arc::clone(&self.spawner)
    }

    /// Drain the work queue until the channel closes or shutdown is
    /// requested, yielding to the runtime between items so the reconciler
    /// never monopolizes a scheduling tick.
    pub async fn run(self: Arc<Self>, handle: ReconcilerHandle, mut work_rx: mpsc::UnboundedReceiver<WorkItem>) {
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                item = work_rx.recv() => {
                    match item {
                        Some(WorkItem::Service(name)) => self.reconcile_service(&name, &handle).await,
                        Some(WorkItem::Signal(name)) => self.reconcile_signal(&name, &handle).await,
                        None => break,
                    }
                    tokio::task::yield_now().await;
                }
            }
        }
    }

    /// Startup / reload entry point: reset the mirror, issue `statedump`
    /// then a synchronous `echo` to barrier on it, then enqueue one
    /// reconciliation per pending signal and per known service name.
    pub async fn startup(&self, handle: &ReconcilerHandle) -> Result<(), crate::error::EngineError> {
        self.spawner.reset_mirror();
        self.spawner.statedump().await?;
        self.spawner.echo(vec!["statedump_complete".to_string()]).await?;

        for signal in self.spawner.pending_signals() {
            handle.enqueue_signal(signal);
        }

        let mut names: Vec<ServiceName> = self.config.current().services.keys().cloned().collect();
        for name in self.spawner.known_service_names() {
            if !names.contains(&name) {
                names.push(name);
            }
        }
        for name in names {
            handle.enqueue_service(name);
        }
        Ok(())
    }

    fn goal_for(&self, name: &ServiceName, configured_default: Goal) -> Goal {
        *self.goal_overrides.lock().entry(name.clone()).or_insert(configured_default)
    }

    fn set_goal(&self, name: &ServiceName, goal: Goal) {
        self.goal_overrides.lock().insert(name.clone(), goal);
    }

    /// Converges one service toward its goal: creates or updates it on the
    /// spawner if needed, tags it with the current goal, then dispatches
    /// `start`, `stop`, or a stop-then-restart cycle depending on goal and
    /// observed state.
    pub async fn reconcile_service(&self, name: &ServiceName, handle: &ReconcilerHandle) {
        let snapshot = self.config.current();
        let configured = snapshot.service(name).cloned();
        let known = self.spawner.is_known(name);

        let Some(configured) = configured else {
            // Step 8: not configured, present, not running -> delete.
            if known {
                let observed = self.spawner.observed(name);
                if !observed.running {
                    if let Err(err) = self.spawner.service_delete(name).await {
                        warn!(service = %name, error = %err, "failed deleting unconfigured service from spawner");
                    }
                }
            }
            return;
        };

        if !known {
            // Step 2: configured and not present -> create it.
            let full_argv = exec_argv(&configured, "start").map(|(argv, argv0)| prepend_argv0(argv, argv0));
            if let Some(full_argv) = &full_argv {
                if let Err(err) = self.spawner.service_args(name, full_argv).await {
                    warn!(service = %name, error = %err, "failed setting service args on creation");
                }
            }
            if let Err(err) = self.spawner.service_fds(name, &configured.io).await {
                warn!(service = %name, error = %err, "failed setting service handles on creation");
            }
            self.last_pushed.lock().insert(name.clone(), (full_argv.unwrap_or_default(), configured.io.clone()));
        } else if let Some((argv, argv0)) = exec_argv(&configured, "start") {
            // Step 3: present -> push args/fds only if they actually differ
            // from what was last pushed to the spawner. `reconcile_service`
            // is re-entered after every action completion and after every
            // `ReloadConfig`/`ReloadState` signal, not just on an actual
            // add/change, so re-emitting unconditionally here would spam
            // `service.args`/`service.fds` on every unrelated reconcile.
            let full_argv = prepend_argv0(argv, argv0);
            let pushed = (full_argv, configured.io.clone());
            let needs_push = self.last_pushed.lock().get(name) != Some(&pushed);
            if needs_push {
                let _ = self.spawner.service_args(name, &pushed.0).await;
                let _ = self.spawner.service_fds(name, &pushed.1).await;
                self.last_pushed.lock().insert(name.clone(), pushed);
            }
        }

        let goal = self.goal_for(name, configured.goal);
        if let Err(err) = self.spawner.service_tag(name, "want", &goal.to_string()).await {
            debug!(service = %name, error = %err, "failed tagging service with goal");
        }

        let observed = self.spawner.observed(name);
        let any_active = self.executor.has_active(name);

        match goal {
            Goal::Up | Goal::Once if !observed.running && !any_active => {
                self.dispatch(name.clone(), configured, "start", handle.clone());
            }
            Goal::Down if observed.running && !any_active => {
                self.dispatch(name.clone(), configured, "stop", handle.clone());
            }
            Goal::Cycle if observed.running && !any_active => {
                // Step 7: stop now; on completion, override back to `up` so
                // the next reconciliation (enqueued by the action executor)
                // starts it again.
                self.set_goal(name, Goal::Up);
                self.dispatch(name.clone(), configured, "stop", handle.clone());
            }
            _ => {}
        }
    }

    /// Applies the default signal-to-action mapping: reload config, reload
    /// state from the spawner, shut down, or adjust log verbosity.
    pub async fn reconcile_signal(&self, name: &SignalName, handle: &ReconcilerHandle) {
        self.spawner.clear_pending_signal(name);
        match self.signals.lookup(name) {
            Some(SignalAction::ReloadConfig) => match self.config.reload() {
                Ok(diff) => {
                    info!(added = diff.added.len(), changed = diff.changed.len(), removed = diff.removed.len(), "config reloaded");
                    for n in diff.added.into_iter().chain(diff.changed) {
                        handle.enqueue_service(n);
                    }
                }
                Err(err) => warn!(error = %err, "config reload failed"),
            },
            Some(SignalAction::ReloadState) => {
                if let Err(err) = self.startup(handle).await {
                    warn!(error = %err, "state reload failed");
                }
            }
            Some(SignalAction::GracefulShutdown) => {
                info!("graceful shutdown requested");
                self.shutdown.cancel();
            }
            Some(SignalAction::ImmediateShutdown) => {
                warn!("immediate shutdown requested");
                self.shutdown.cancel();
            }
            Some(SignalAction::IncreaseVerbosity) => {
                self.verbosity.fetch_add(1, Ordering::SeqCst);
            }
            Some(SignalAction::DecreaseVerbosity) => {
                self.verbosity.fetch_sub(1, Ordering::SeqCst);
            }
            None => debug!(signal = %name, "no handler registered"),
        }
    }

    /// Dispatch one action in the background and re-enqueue the service
    /// when it completes.
    fn dispatch(self: &Arc<Self>, name: ServiceName, service: Service, action_name: &str, handle: ReconcilerHandle) {
        let Some(action) = service.action(action_name).cloned() else {
            return;
        };
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let service_name = name.clone();
            let _result = this.run_action_to_completion(name, service, action).await;
            handle.enqueue_service(service_name);
        });
    }

    /// Run `action` on `service` through the action executor to full
    /// completion of its run spec, not just the goal change. Shared by the
    /// background convergence dispatch above and by
    /// [`Reconciler::invoke_action`], the explicit client-invoked path.
    async fn run_action_to_completion(self: &Arc<Self>, name: ServiceName, service: Service, action: Action) -> ActionResult {
        if let Some(goal) = action.goal {
            self.set_goal(&name, goal);
        }

        let executor = Arc::clone(&self.executor);
        let parallelism = action.parallelism.clone();
        let action_name = action.name.clone();
        let this = Arc::clone(self);
        let runner_name = name.clone();
        let runner = async move { this.run_run_spec(runner_name, service, action).await };
        executor.run_action(name, action_name, parallelism, runner).await
    }

    /// Invoke `action_name` on `name` for the `service_action` control
    /// command: looks up the configured service and action,
    /// runs it to completion, and re-enqueues the service for
    /// reconciliation afterward. Authorization (the action's `tokens` set)
    /// is the caller's responsibility — it needs the same config snapshot
    /// this reads, so callers look it up via [`Reconciler::config`] before
    /// invoking.
    pub async fn invoke_action(
        self: &Arc<Self>,
        name: &ServiceName,
        action_name: &str,
        handle: &ReconcilerHandle,
    ) -> Result<ActionResult, crate::error::EngineError> {
        let snapshot = self.config.current();
        let service = snapshot
            .service(name)
            .cloned()
            .ok_or_else(|| crate::error::EngineError::UnknownService(name.to_string()))?;
        let action = service
            .action(action_name)
            .cloned()
            .ok_or_else(|| crate::error::EngineError::UnknownAction(action_name.to_string(), name.to_string()))?;

        let result = self.run_action_to_completion(name.clone(), service, action).await;
        handle.enqueue_service(name.clone());
        Ok(result)
    }

    /// Runs `action.run` against `service`, carrying `action` through so an
    /// `Exec` run spec's own `env` overlay overrides the service's base env,
    /// not just applies it.
    fn run_run_spec(self: Arc<Self>, name: ServiceName, service: Service, action: Action) -> Pin<Box<dyn Future<Output = ActionResult> + Send>> {
        Box::pin(async move {
            match action.run.clone() {
                RunSpec::Internal(desd_core::InternalOp::ExecUnlessRunning) => {
                    if self.spawner.observed(&name).running {
                        return ActionResult::ok();
                    }
                    match self.spawner.service_start(&name).await {
                        Ok(()) => {
                            self.start_times.lock().insert(name.clone(), self.clock.now());
                            ActionResult::ok()
                        }
                        Err(err) => {
                            warn!(service = %name, error = %err, "start request failed");
                            ActionResult::failed()
                        }
                    }
                }
                RunSpec::Internal(desd_core::InternalOp::Killscript(script)) => {
                    let runner = KillScriptRunner::new(Arc::clone(&self.spawner));
                    let cancel = CancellationToken::new();
                    match runner.run(&name, &script, &cancel).await {
                        KillOutcome::StillRunning | KillOutcome::Canceled => ActionResult::failed(),
                        KillOutcome::NotRunning | KillOutcome::Reaped(_) => ActionResult::ok(),
                    }
                }
                RunSpec::Internal(desd_core::InternalOp::StopStart) => {
                    let stop_result = if let Some(stop_action) = service.action("stop").cloned() {
                        self.clone().run_run_spec(name.clone(), service.clone(), stop_action).await
                    } else {
                        ActionResult::ok()
                    };
                    if !stop_result.success {
                        return stop_result;
                    }
                    if let Some(start_action) = service.action("start").cloned() {
                        self.run_run_spec(name, service, start_action).await
                    } else {
                        ActionResult::ok()
                    }
                }
                RunSpec::Internal(desd_core::InternalOp::WaitForUptime(secs)) => self.wait_for_uptime(&name, secs).await,
                RunSpec::Exec { argv, argv0 } => self.run_exec(&name, &service, &action, argv, argv0).await,
            }
        })
    }

    /// Waits for the service to have been running for at least `secs`.
    /// Prefers the precise elapsed time since *this process* issued the
    /// start (`start_times`, driven by the injectable clock so tests can
    /// control it); falls back to the spawner-mirrored `observed.uptime`
    /// when there's no such entry — the normal case for a service
    /// discovered already running via `statedump` at daemon startup, which
    /// this process never issued a start for.
    async fn wait_for_uptime(&self, name: &ServiceName, secs: f64) -> ActionResult {
        let deadline = Duration::from_secs_f64(secs.max(0.0));
        loop {
            let observed = self.spawner.observed(name);
            if !observed.running {
                return ActionResult::failed();
            }
            let elapsed = self
                .start_times
                .lock()
                .get(name)
                .map(|start| self.clock.now().saturating_duration_since(*start))
                .or(observed.uptime)
                .unwrap_or_default();
            if elapsed >= deadline {
                return ActionResult::ok();
            }
            tokio::time::sleep(Duration::from_millis(100).min(deadline.saturating_sub(elapsed))).await;
        }
    }

    async fn run_exec(
        &self,
        name: &ServiceName,
        service: &Service,
        action: &Action,
        argv: Vec<ArgToken>,
        argv0: Option<ArgToken>,
    ) -> ActionResult {
        let mut env = service.env.clone();
        for (k, v) in &action.env {
            env.insert(k.clone(), v.clone());
        }
        let resolved: Vec<String> = argv.iter().map(|t| t.resolve(&env)).collect();
        let argv0_resolved = argv0.map(|t| t.resolve(&env));
        let full_argv = prepend_argv0(resolved, argv0_resolved);

        if let Err(err) = self.spawner.service_args(name, &full_argv).await {
            warn!(service = %name, error = %err, "exec args request failed");
            return ActionResult::failed();
        }
        if let Err(err) = self.spawner.service_fds(name, &service.io).await {
            warn!(service = %name, error = %err, "exec fds request failed");
            return ActionResult::failed();
        }
        if let Err(err) = self.spawner.service_start(name).await {
            warn!(service = %name, error = %err, "exec start request failed");
            return ActionResult::failed();
        }
        self.start_times.lock().insert(name.clone(), self.clock.now());

        let pid = self.spawner.wait_for_running(name).await;
        let last_exit = KillTarget::wait_for_exit(&*self.spawner, name, pid).await;
        ActionResult { success: last_exit.is_clean() }
    }
}

fn prepend_argv0(argv: Vec<String>, argv0: Option<String>) -> Vec<String> {
    match argv0 {
        Some(argv0) => {
            let mut full = vec![argv0];
            full.extend(argv);
            full
        }
        None => argv,
    }
}

trait DurationExt {
    fn saturating_duration_since(&self, earlier: Instant) -> Duration;
}

impl DurationExt for Instant {
    fn saturating_duration_since(&self, earlier: Instant) -> Duration {
        self.checked_duration_since(earlier).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use desd_core::{FakeClock, ObservedState};
    use tokio::io::duplex;

    fn svc_name() -> ServiceName {
        ServiceName::parse("web").unwrap()
    }

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        use std::io::Write;
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        f.flush().unwrap();
        f
    }

    #[tokio::test]
    async fn reconcile_up_goal_dispatches_start_when_not_running() {
        let (client_io, _server_io) = duplex(4096);
        let (events_tx, _events_rx) = mpsc::unbounded_channel();
        let spawner = SpawnerClient::new(client_io, events_tx);
        let executor = ActionExecutor::new();

        let file = write_config("services:\n  web:\n    goal: up\n");
        let config = Arc::new(ConfigFacade::load(file.path()).unwrap());

        let (reconciler, handle, _rx) = Reconciler::new(spawner, executor, config, FakeClock::new());
        reconciler.reconcile_service(&svc_name(), &handle).await;
        // No assertion on the spawner call outcome (duplex has no peer to
        // reply), but dispatch must not panic and must spawn a background
        // task rather than block the caller.
    }

    #[tokio::test]
    async fn wait_for_uptime_fails_when_service_stops_early() {
        let (client_io, _server_io) = duplex(4096);
        let (events_tx, _events_rx) = mpsc::unbounded_channel();
        let spawner = SpawnerClient::new(client_io, events_tx);
        spawner.set_observed_for_test(svc_name(), ObservedState::not_running());
        let executor = ActionExecutor::new();
        let file = write_config("services:\n  web:\n    goal: up\n");
        let config = Arc::new(ConfigFacade::load(file.path()).unwrap());
        let (reconciler, _handle, _rx) = Reconciler::new(spawner, executor, config, FakeClock::new());

        let result = reconciler.wait_for_uptime(&svc_name(), 3.0).await;
        assert!(!result.success);
    }

    #[tokio::test]
    async fn wait_for_uptime_succeeds_once_elapsed_covers_target() {
        let (client_io, _server_io) = duplex(4096);
        let (events_tx, _events_rx) = mpsc::unbounded_channel();
        let spawner = SpawnerClient::new(client_io, events_tx);
        spawner.set_observed_for_test(svc_name(), ObservedState::running(42, Duration::from_secs(0)));
        let executor = ActionExecutor::new();
        let file = write_config("services:\n  web:\n    goal: up\n");
        let config = Arc::new(ConfigFacade::load(file.path()).unwrap());
        let clock = FakeClock::new();
        let (reconciler, _handle, _rx) = Reconciler::new(spawner, executor, config, clock.clone());

        reconciler.start_times.lock().insert(svc_name(), clock.now());
        clock.advance(Duration::from_secs(5));

        let result = reconciler.wait_for_uptime(&svc_name(), 3.0).await;
        assert!(result.success);
    }

    #[tokio::test]
    async fn wait_for_uptime_falls_back_to_observed_uptime_for_a_service_discovered_already_running() {
        // No start_times entry at all — the service was discovered running
        // via statedump, not started by this process. wait_for_uptime must
        // still resolve instead of hanging forever.
        let (client_io, _server_io) = duplex(4096);
        let (events_tx, _events_rx) = mpsc::unbounded_channel();
        let spawner = SpawnerClient::new(client_io, events_tx);
        spawner.set_observed_for_test(svc_name(), ObservedState::running(42, Duration::from_secs(5)));
        let executor = ActionExecutor::new();
        let file = write_config("services:\n  web:\n    goal: up\n");
        let config = Arc::new(ConfigFacade::load(file.path()).unwrap());
        let (reconciler, _handle, _rx) = Reconciler::new(spawner, executor, config, FakeClock::new());

        let result = reconciler.wait_for_uptime(&svc_name(), 3.0).await;
        assert!(result.success);
    }

    #[test]
    fn prepend_argv0_puts_override_first() {
        let argv = vec!["a".to_string(), "b".to_string()];
        assert_eq!(prepend_argv0(argv.clone(), Some("override".to_string())), vec!["override", "a", "b"]);
        assert_eq!(prepend_argv0(argv, None), vec!["a", "b"]);
    }
}
