// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The action executor: a per-service FIFO queue plus an
//! "active set" of running actions and their parallelism descriptors.
//! Serializes invocations of the same service's actions, admits compatible
//! concurrent actions immediately, and merges duplicate in-flight requests
//! for the same action name onto the invocation already running.

use desd_core::{ActionName, Parallelism, ServiceName};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::debug;

/// The observable result of one action invocation. For an `Exec` run spec,
/// success means the exit reason was a clean exit with code `0`; internal
/// ops report success analogously.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActionResult {
    pub success: bool,
}

impl ActionResult {
    pub const fn ok() -> Self {
        Self { success: true }
    }

    pub const fn failed() -> Self {
        Self { success: false }
    }
}

struct ActiveAction {
    parallelism: Parallelism,
    waiters: Vec<oneshot::Sender<ActionResult>>,
}

struct QueuedAction {
    name: ActionName,
    parallelism: Parallelism,
    waiters: Vec<oneshot::Sender<ActionResult>>,
    /// Signals the queued invocation's worker task that its turn has come
    /// and it may actually run its `runner` future.
    start_tx: Option<oneshot::Sender<()>>,
}

#[derive(Default)]
struct ServiceQueue {
    active: HashMap<ActionName, ActiveAction>,
    queue: VecDeque<QueuedAction>,
}

#[derive(Default)]
pub struct ActionExecutor {
    services: Mutex<HashMap<ServiceName, ServiceQueue>>,
}

impl ActionExecutor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Whether `name` is in the active set for `service` right now.
    pub fn is_active(&self, service: &ServiceName, name: &ActionName) -> bool {
        self.services
            .lock()
            .get(service)
            .map(|q| q.active.contains_key(name))
            .unwrap_or(false)
    }

    /// Whether `service` has any action in flight at all — the
    /// reconciler's "no action in flight" admission check.
    pub fn has_active(&self, service: &ServiceName) -> bool {
        self.services.lock().get(service).map(|q| !q.active.is_empty()).unwrap_or(false)
    }

    /// Run (or join an already in-flight invocation of) `name` on
    /// `service`. `runner` resolves its `RunSpec` — a killscript, an exec
    /// dispatch, whatever the action means — and is only ever polled by
    /// the one worker task that ends up owning this invocation's
    /// admission slot, even when several callers request the same action
    /// concurrently.
    pub async fn run_action<F>(
        self: &Arc<Self>,
        service: ServiceName,
        name: ActionName,
        parallelism: Parallelism,
        runner: F,
    ) -> ActionResult
    where
        F: Future<Output = ActionResult> + Send + 'static,
    {
        let (result_tx, result_rx) = oneshot::channel();

        enum Plan {
            Merged,
            RunNow,
            RunWhenStarted(oneshot::Receiver<()>),
        }

        let plan = {
            let mut services = self.services.lock();
            let state = services.entry(service.clone()).or_default();

            if let Some(active) = state.active.get_mut(&name) {
                active.waiters.push(result_tx);
                Plan::Merged
            } else if let Some(queued) = state.queue.iter_mut().find(|q| q.name == name) {
                queued.waiters.push(result_tx);
                Plan::Merged
            } else if admits(&state.active, &parallelism, &name) {
                state.active.insert(name.clone(), ActiveAction { parallelism: parallelism.clone(), waiters: vec![result_tx] });
                Plan::RunNow
            } else {
                let (start_tx, start_rx) = oneshot::channel();
                state.queue.push_back(QueuedAction {
                    name: name.clone(),
                    parallelism: parallelism.clone(),
                    waiters: vec![result_tx],
                    start_tx: Some(start_tx),
                });
                Plan::RunWhenStarted(start_rx)
            }
        };

        match plan {
            Plan::Merged => {}
            Plan::RunNow => self.spawn_worker(service, name, runner),
            Plan::RunWhenStarted(start_rx) => {
                let this = Arc::clone(self);
                let service = service.clone();
                let name = name.clone();
                tokio::spawn(async move {
                    if start_rx.await.is_err() {
                        return;
                    }
                    let result = runner.await;
                    this.complete(&service, &name, result);
                });
            }
        }

        result_rx.await.unwrap_or(ActionResult::failed())
    }

    fn spawn_worker<F>(self: &Arc<Self>, service: ServiceName, name: ActionName, runner: F)
    where
        F: Future<Output = ActionResult> + Send + 'static,
    {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let result = runner.await;
            this.complete(&service, &name, result);
        });
    }

    /// Remove `name` from the active set, notify its waiters, and admit as
    /// many queued invocations as now fit the active set.
    fn complete(self: &Arc<Self>, service: &ServiceName, name: &ActionName, result: ActionResult) {
        let mut services = self.services.lock();
        let Some(state) = services.get_mut(service) else {
            return;
        };

        if let Some(active) = state.active.remove(name) {
            for tx in active.waiters {
                let _ = tx.send(result);
            }
        } else {
            debug!(service = %service, action = %name, "action completion for an already-removed active entry");
        }

        loop {
            let can_admit = match state.queue.front() {
                None => break,
                Some(front) => admits(&state.active, &front.parallelism, &front.name),
            };
            if !can_admit {
                break;
            }
            let Some(mut queued) = state.queue.pop_front() else { break };
            let start_tx = queued.start_tx.take();
            state.active.insert(
                queued.name.clone(),
                ActiveAction { parallelism: queued.parallelism.clone(), waiters: std::mem::take(&mut queued.waiters) },
            );
            if let Some(tx) = start_tx {
                let _ = tx.send(());
            }
        }
    }
}

/// Admission test: the active set is empty, or every
/// active action permits `name` and `parallelism` permits every active
/// action — mutual compatibility, not just one-directional.
fn admits(active: &HashMap<ActionName, ActiveAction>, parallelism: &Parallelism, name: &ActionName) -> bool {
    active.is_empty() || (active.values().all(|a| a.parallelism.permits(name)) && parallelism.permits_all(active.keys()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Notify;

    fn svc() -> ServiceName {
        ServiceName::parse("web").unwrap()
    }

    fn action(s: &str) -> ActionName {
        ActionName::parse(s).unwrap()
    }

    #[tokio::test]
    async fn single_action_runs_and_resolves() {
        let exec = ActionExecutor::new();
        let result = exec.run_action(svc(), action("start"), Parallelism::none(), async { ActionResult::ok() }).await;
        assert_eq!(result, ActionResult::ok());
        assert!(!exec.is_active(&svc(), &action("start")));
    }

    #[tokio::test]
    async fn second_request_for_same_action_merges_onto_the_first() {
        let exec = ActionExecutor::new();
        let started = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let run_count = Arc::new(AtomicUsize::new(0));

        let s1 = Arc::clone(&started);
        let r1 = Arc::clone(&release);
        let c1 = Arc::clone(&run_count);
        let first = exec.clone().run_action(svc(), action("stop"), Parallelism::none(), async move {
            c1.fetch_add(1, Ordering::SeqCst);
            s1.notify_one();
            r1.notified().await;
            ActionResult::ok()
        });
        let first = tokio::spawn(first);

        started.notified().await;
        let second = exec.run_action(svc(), action("stop"), Parallelism::none(), async { ActionResult::failed() });
        let second = tokio::spawn(second);

        tokio::time::sleep(Duration::from_millis(5)).await;
        release.notify_one();

        let (r1, r2) = tokio::join!(first, second);
        assert_eq!(r1.unwrap(), ActionResult::ok());
        assert_eq!(r2.unwrap(), ActionResult::ok());
        assert_eq!(run_count.load(Ordering::SeqCst), 1, "merged request must not re-run the action");
    }

    #[tokio::test]
    async fn incompatible_action_queues_until_active_one_finishes() {
        let exec = ActionExecutor::new();
        let release = Arc::new(Notify::new());
        let order = Arc::new(Mutex::new(Vec::new()));

        let r1 = Arc::clone(&release);
        let o1 = Arc::clone(&order);
        let first = exec.clone().run_action(svc(), action("stop"), Parallelism::none(), async move {
            r1.notified().await;
            o1.lock().push("stop");
            ActionResult::ok()
        });
        let first = tokio::spawn(first);

        tokio::time::sleep(Duration::from_millis(5)).await;
        let o2 = Arc::clone(&order);
        let second = exec.run_action(svc(), action("start"), Parallelism::none(), async move {
            o2.lock().push("start");
            ActionResult::ok()
        });
        let second = tokio::spawn(second);

        tokio::time::sleep(Duration::from_millis(5)).await;
        release.notify_one();

        let (r1, r2) = tokio::join!(first, second);
        assert_eq!(r1.unwrap(), ActionResult::ok());
        assert_eq!(r2.unwrap(), ActionResult::ok());
        assert_eq!(*order.lock(), vec!["stop", "start"]);
    }

    #[tokio::test]
    async fn compatible_parallelism_runs_concurrently() {
        let exec = ActionExecutor::new();
        let barrier = Arc::new(tokio::sync::Barrier::new(2));

        let all = Parallelism::All;
        let b1 = Arc::clone(&barrier);
        let first = exec.clone().run_action(svc(), action("check"), all.clone(), async move {
            b1.wait().await;
            ActionResult::ok()
        });
        let b2 = Arc::clone(&barrier);
        let second = exec.run_action(svc(), action("diagnose"), all, async move {
            b2.wait().await;
            ActionResult::ok()
        });

        let (r1, r2) = tokio::join!(tokio::spawn(first), tokio::spawn(second));
        assert_eq!(r1.unwrap(), ActionResult::ok());
        assert_eq!(r2.unwrap(), ActionResult::ok());
    }
}
