// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The kill-script runner: drives an interruptible sequence of
//! `SEND signal` / `WAIT duration` steps against one service's run handle
//! until it exits or the script is exhausted.

use async_trait::async_trait;
use desd_core::{KillScript, KillStep, LastExit, ObservedState, ServiceName, SignalName};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::EngineError;

/// What the kill-script runner needs from whatever is actually watching the
/// service (the spawner client, in production; a fake in tests). Kept as a
/// trait so the timer/cancellation logic below can be exercised without a
/// real spawner connection.
#[async_trait]
pub trait KillTarget: Send + Sync {
    fn observed(&self, service: &ServiceName) -> ObservedState;

    async fn send_signal(&self, service: &ServiceName, signal: &SignalName) -> Result<(), EngineError>;

    /// Block until the service's run handle identified by `pid` either
    /// exits (returning its [`LastExit`]) or is replaced by a new
    /// invocation — in which case the script is aborted and the prior
    /// invocation's final exit is returned instead. Never returns `None` —
    /// it is meant to be raced against a timer by the caller.
    async fn wait_for_exit(&self, service: &ServiceName, pid: i32) -> LastExit;
}

/// Outcome of running a kill script to completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KillOutcome {
    NotRunning,
    Reaped(LastExit),
    StillRunning,
    Canceled,
}

/// Drives timer/reap races with [`tokio::time::sleep`], which respects
/// `#[tokio::test(start_paused = true)]` — the runner itself needs no
/// separate clock abstraction to be deterministically testable.
pub struct KillScriptRunner<T: KillTarget> {
    target: Arc<T>,
}

impl<T: KillTarget> KillScriptRunner<T> {
    pub fn new(target: Arc<T>) -> Self {
        Self { target }
    }

    /// Execute `script` against `service`, stopping early on `cancel`.
    pub async fn run(&self, service: &ServiceName, script: &KillScript, cancel: &CancellationToken) -> KillOutcome {
        let observed = self.target.observed(service);
        let Some(mut pid) = observed.running.then_some(observed.pid).flatten() else {
            return KillOutcome::NotRunning;
        };

        for step in script.steps() {
            if cancel.is_cancelled() {
                return KillOutcome::Canceled;
            }

            match step {
                KillStep::Signal(signal) => {
                    if let Err(err) = self.target.send_signal(service, signal).await {
                        debug!(service = %service, signal = %signal, error = %err, "kill-script signal delivery failed");
                    }

                    let now = self.target.observed(service);
                    match now.pid {
                        Some(new_pid) if new_pid != pid => {
                            // A new invocation has already started; the one
                            // we were killing is gone. Use its recorded exit.
                            if let Some(last) = now.last_exit {
                                return KillOutcome::Reaped(last);
                            }
                            pid = new_pid;
                        }
                        None => {
                            return match now.last_exit {
                                Some(last) => KillOutcome::Reaped(last),
                                None => KillOutcome::NotRunning,
                            };
                        }
                        _ => {}
                    }
                }
                KillStep::Wait(secs) => match self.await_wait(service, pid, *secs, cancel).await {
                    WaitOutcome::Reaped(last) => return KillOutcome::Reaped(last),
                    WaitOutcome::Canceled => return KillOutcome::Canceled,
                    WaitOutcome::TimedOut => continue,
                },
            }
        }

        KillOutcome::StillRunning
    }

    async fn await_wait(&self, service: &ServiceName, pid: i32, secs: f64, cancel: &CancellationToken) -> WaitOutcome {
        let timer = tokio::time::sleep(Duration::from_secs_f64(secs.max(0.0)));
        tokio::select! {
            last = self.target.wait_for_exit(service, pid) => WaitOutcome::Reaped(last),
            _ = timer => WaitOutcome::TimedOut,
            _ = cancel.cancelled() => WaitOutcome::Canceled,
        }
    }
}

enum WaitOutcome {
    Reaped(LastExit),
    TimedOut,
    Canceled,
}

/// Merges concurrent `killscript` control commands for the same service
/// onto a single in-flight run: two concurrent invocations against one
/// service are not permitted, so the later request attaches to the
/// in-flight one instead of starting a second run. Mirrors the action
/// executor's merge-onto-in-flight admission, minus the queue — a
/// killscript run is never deferred, only shared.
pub struct KillscriptDispatcher<T: KillTarget> {
    target: Arc<T>,
    inflight: Mutex<HashMap<ServiceName, Vec<oneshot::Sender<KillOutcome>>>>,
}

impl<T: KillTarget + 'static> KillscriptDispatcher<T> {
    pub fn new(target: Arc<T>) -> Arc<Self> {
        Arc::new(Self { target, inflight: Mutex::new(HashMap::new()) })
    }

    /// Run `script` against `service`, or attach to an already-running
    /// script for the same service and share its outcome.
    pub async fn run(self: &Arc<Self>, service: ServiceName, script: KillScript, cancel: CancellationToken) -> KillOutcome {
        let (tx, rx) = oneshot::channel();

        let should_start = {
            let mut inflight = self.inflight.lock();
            match inflight.get_mut(&service) {
                Some(waiters) => {
                    waiters.push(tx);
                    false
                }
                None => {
                    inflight.insert(service.clone(), vec![tx]);
                    true
                }
            }
        };

        if should_start {
            let this = Arc::clone(self);
            let svc = service.clone();
            tokio::spawn(async move {
                let runner = KillScriptRunner::new(Arc::clone(&this.target));
                let outcome = runner.run(&svc, &script, &cancel).await;
                let waiters = this.inflight.lock().remove(&svc).unwrap_or_default();
                for waiter in waiters {
                    let _ = waiter.send(outcome.clone());
                }
            });
        }

        rx.await.unwrap_or(KillOutcome::Canceled)
    }
}
