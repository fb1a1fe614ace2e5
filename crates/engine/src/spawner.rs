// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Spawner client: specializes the protocol endpoint
//! for the spawner host. Mirrors spawner-reported service state and the
//! set of pending signals, emits the directives the reconciler and action
//! executor need (`service.args`, `service.fds`, `service.auto_up`,
//! `service.start`, `service.signal`, `service.delete`, `service.tag`), and
//! turns the spawner's non-terminal event lines into [`SpawnerEvent`]s the
//! reconciler's work queue consumes.

use crate::error::EngineError;
use crate::killscript::KillTarget;
use async_trait::async_trait;
use desd_core::{ExitReason, HandleName, LastExit, ObservedState, ServiceName, SignalName};
use desd_wire::{ClientEndpoint, Frame, ProtocolError};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, Notify};
use tracing::{debug, warn};

/// A translated spawner event: the spawner's own lines come back as at
/// least `statedump_complete`, `service.state`, `service.exit`, and
/// `signal`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpawnerEvent {
    StatedumpComplete,
    ServiceState { name: ServiceName, running: bool, pid: Option<i32> },
    ServiceExit { name: ServiceName, last_exit: LastExit },
    Signal(SignalName),
}

fn parse_event(frame: &Frame) -> Option<SpawnerEvent> {
    let verb = frame.verb()?;
    let args = frame.args();
    match verb {
        "statedump_complete" => Some(SpawnerEvent::StatedumpComplete),
        "service.state" => {
            let name = ServiceName::parse(args.first()?.as_str()).ok()?;
            let running = args.get(1).map(String::as_str) == Some("UP");
            let pid = args.get(2).and_then(|s| s.parse::<i32>().ok());
            Some(SpawnerEvent::ServiceState { name, running, pid })
        }
        "service.exit" => {
            let name = ServiceName::parse(args.first()?.as_str()).ok()?;
            let reason = match args.get(1).map(String::as_str) {
                Some("exit") => ExitReason::Exit,
                Some("signal") => ExitReason::Signal,
                _ => return None,
            };
            let value = args.get(2).and_then(|s| s.parse::<i32>().ok())?;
            Some(SpawnerEvent::ServiceExit { name, last_exit: LastExit { reason, value } })
        }
        "signal" => {
            let name = SignalName::parse(args.first()?.as_str()).ok()?;
            Some(SpawnerEvent::Signal(name))
        }
        _ => {
            debug!(verb, "unrecognized spawner event, discarding");
            None
        }
    }
}

/// Per-service notification fired whenever mirrored state changes, so
/// [`SpawnerClient::wait_for_exit`] can wake promptly instead of polling.
#[derive(Default)]
struct MirrorState {
    observed: HashMap<ServiceName, ObservedState>,
    /// When the mirror first saw each currently-running service as running
    /// — the basis for the uptime `observed()` reports, so `wait_for_uptime`
    /// works the same whether Desd just issued the start or the service was
    /// already running when a `statedump` discovered it.
    started_at: HashMap<ServiceName, Instant>,
    pending_signals: HashSet<SignalName>,
    notify: HashMap<ServiceName, Arc<Notify>>,
}

impl MirrorState {
    fn notify_for(&mut self, name: &ServiceName) -> Arc<Notify> {
        self.notify.entry(name.clone()).or_insert_with(|| Arc::new(Notify::new())).clone()
    }
}

/// The spawner-facing client role.
pub struct SpawnerClient<S> {
    endpoint: Arc<ClientEndpoint<S>>,
    mirror: Mutex<MirrorState>,
}

impl<S> SpawnerClient<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    /// Wrap `stream` as a spawner connection, forwarding translated events
    /// onto `events_tx` (typically the reconciler's work-queue sender).
    pub fn new(stream: S, events_tx: mpsc::UnboundedSender<SpawnerEvent>) -> Arc<Self> {
        let endpoint = ClientEndpoint::new(stream);
        let client = Arc::new(Self { endpoint: Arc::clone(&endpoint), mirror: Mutex::new(MirrorState::default()) });

        let (raw_tx, mut raw_rx) = mpsc::unbounded_channel();
        endpoint.set_event_sink(raw_tx);

        let routed = Arc::clone(&client);
        tokio::spawn(async move {
            while let Some(frame) = raw_rx.recv().await {
                let Some(event) = parse_event(&frame) else { continue };
                routed.absorb(&event);
                if events_tx.send(event).is_err() {
                    break;
                }
            }
        });

        client
    }

    /// Update the mirror from an event before it's handed to the
    /// reconciler, so `observed`/`wait_for_exit` are always current by the
    /// time a reconciliation runs.
    fn absorb(&self, event: &SpawnerEvent) {
        let mut mirror = self.mirror.lock();
        match event {
            SpawnerEvent::StatedumpComplete => {}
            SpawnerEvent::ServiceState { name, running, pid } => {
                let entry = mirror.observed.entry(name.clone()).or_default();
                let was_running = entry.running;
                entry.running = *running;
                entry.pid = *pid;
                if *running {
                    if !was_running {
                        mirror.started_at.insert(name.clone(), Instant::now());
                    }
                } else {
                    mirror.started_at.remove(name);
                }
                if let Some(notify) = mirror.notify.get(name) {
                    notify.notify_waiters();
                }
            }
            SpawnerEvent::ServiceExit { name, last_exit } => {
                let entry = mirror.observed.entry(name.clone()).or_default();
                entry.running = false;
                entry.pid = None;
                entry.last_exit = Some(*last_exit);
                mirror.started_at.remove(name);
                if let Some(notify) = mirror.notify.get(name) {
                    notify.notify_waiters();
                }
            }
            SpawnerEvent::Signal(name) => {
                mirror.pending_signals.insert(name.clone());
            }
        }
    }

    /// Reset the mirror ahead of a fresh `statedump` on startup or reload.
    pub fn reset_mirror(&self) {
        let mut mirror = self.mirror.lock();
        mirror.observed.clear();
        mirror.started_at.clear();
        mirror.pending_signals.clear();
    }

    /// Current observed state, with `uptime` filled in from the moment the
    /// mirror first saw the service running — whether that was because
    /// Desd just started it or because a `statedump` discovered it already
    /// running at startup.
    pub fn observed(&self, service: &ServiceName) -> ObservedState {
        let mirror = self.mirror.lock();
        let mut state = mirror.observed.get(service).copied().unwrap_or_default();
        if state.running {
            state.uptime = mirror.started_at.get(service).map(Instant::elapsed);
        }
        state
    }

    pub fn pending_signals(&self) -> Vec<SignalName> {
        self.mirror.lock().pending_signals.iter().cloned().collect()
    }

    pub fn clear_pending_signal(&self, name: &SignalName) {
        self.mirror.lock().pending_signals.remove(name);
    }

    pub fn known_service_names(&self) -> Vec<ServiceName> {
        self.mirror.lock().observed.keys().cloned().collect()
    }

    #[cfg(test)]
    pub fn set_observed_for_test(&self, service: ServiceName, observed: ObservedState) {
        let mut mirror = self.mirror.lock();
        if observed.running {
            let uptime = observed.uptime.unwrap_or_default();
            mirror.started_at.insert(service.clone(), Instant::now() - uptime);
        } else {
            mirror.started_at.remove(&service);
        }
        mirror.observed.insert(service, observed);
    }

    /// Whether the spawner has ever reported state for `service` — false
    /// means it's configured but the spawner doesn't know about it yet.
    pub fn is_known(&self, service: &ServiceName) -> bool {
        self.mirror.lock().observed.contains_key(service)
    }

    /// Block until `service` is reported running with a PID, after issuing
    /// a `service.start` directive — the caller needs the PID before it can
    /// await the reap.
    pub async fn wait_for_running(&self, service: &ServiceName) -> i32 {
        loop {
            let notify = {
                let mut mirror = self.mirror.lock();
                let current = mirror.observed.get(service).copied().unwrap_or_default();
                if current.running {
                    if let Some(pid) = current.pid {
                        return pid;
                    }
                }
                mirror.notify_for(service)
            };
            notify.notified().await;
        }
    }

    async fn call(&self, fields: Vec<String>) -> Result<(), EngineError> {
        let reply = self.endpoint.send_msg(fields).await.map_err(protocol_to_engine)?;
        match reply.first().map(String::as_str) {
            Some("ok") => Ok(()),
            _ => Err(EngineError::SpawnerFailed(reply.join(" "))),
        }
    }

    pub async fn statedump(&self) -> Result<(), EngineError> {
        self.call(vec!["statedump".to_string()]).await
    }

    pub async fn echo(&self, args: Vec<String>) -> Result<(), EngineError> {
        let mut fields = vec!["echo".to_string()];
        fields.extend(args);
        self.call(fields).await
    }

    pub async fn service_args(&self, name: &ServiceName, argv: &[String]) -> Result<(), EngineError> {
        let mut fields = vec!["service.args".to_string(), name.to_string()];
        fields.extend(argv.iter().cloned());
        self.call(fields).await
    }

    pub async fn service_fds(&self, name: &ServiceName, handles: &[HandleName]) -> Result<(), EngineError> {
        let mut fields = vec!["service.fds".to_string(), name.to_string()];
        fields.extend(handles.iter().map(ToString::to_string));
        self.call(fields).await
    }

    pub async fn service_auto_up(&self, name: &ServiceName, enabled: bool, scope: &str) -> Result<(), EngineError> {
        self.call(vec![
            "service.auto_up".to_string(),
            name.to_string(),
            if enabled { "1".to_string() } else { "0".to_string() },
            scope.to_string(),
        ])
        .await
    }

    pub async fn service_start(&self, name: &ServiceName) -> Result<(), EngineError> {
        self.call(vec!["service.start".to_string(), name.to_string()]).await
    }

    pub async fn service_delete(&self, name: &ServiceName) -> Result<(), EngineError> {
        self.call(vec!["service.delete".to_string(), name.to_string()]).await
    }

    pub async fn service_tag(&self, name: &ServiceName, key: &str, value: &str) -> Result<(), EngineError> {
        self.call(vec!["service.tag".to_string(), name.to_string(), key.to_string(), value.to_string()]).await
    }
}

fn protocol_to_engine(err: ProtocolError) -> EngineError {
    EngineError::SpawnerFailed(err.to_string())
}

#[async_trait]
impl<S> KillTarget for SpawnerClient<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    fn observed(&self, service: &ServiceName) -> ObservedState {
        SpawnerClient::observed(self, service)
    }

    async fn send_signal(&self, service: &ServiceName, signal: &SignalName) -> Result<(), EngineError> {
        self.call(vec!["service.signal".to_string(), service.to_string(), signal.to_string()]).await
    }

    async fn wait_for_exit(&self, service: &ServiceName, pid: i32) -> LastExit {
        loop {
            let notify = {
                let mut mirror = self.mirror.lock();
                let current = mirror.observed.get(service).copied().unwrap_or_default();
                if current.pid != Some(pid) {
                    if let Some(last) = current.last_exit {
                        return last;
                    }
                }
                mirror.notify_for(service)
            };
            notify.notified().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::duplex;

    fn svc() -> ServiceName {
        ServiceName::parse("web").unwrap()
    }

    #[test]
    fn parses_service_state_event() {
        let frame = Frame::new(desd_core::CorrelationId(0), vec![
            "service.state".to_string(),
            "web".to_string(),
            "UP".to_string(),
            "42".to_string(),
        ]);
        let event = parse_event(&frame).unwrap();
        assert_eq!(event, SpawnerEvent::ServiceState { name: svc(), running: true, pid: Some(42) });
    }

    #[test]
    fn parses_service_exit_event() {
        let frame = Frame::new(desd_core::CorrelationId(0), vec![
            "service.exit".to_string(),
            "web".to_string(),
            "signal".to_string(),
            "15".to_string(),
        ]);
        let event = parse_event(&frame).unwrap();
        assert_eq!(event, SpawnerEvent::ServiceExit { name: svc(), last_exit: LastExit::signal(15) });
    }

    #[test]
    fn unrecognized_verb_yields_none() {
        let frame = Frame::new(desd_core::CorrelationId(0), vec!["mystery".to_string()]);
        assert!(parse_event(&frame).is_none());
    }

    #[tokio::test]
    async fn absorbed_state_updates_observed_mirror() {
        let (client_io, _server_io) = duplex(4096);
        let (tx, _rx) = mpsc::unbounded_channel();
        let client = SpawnerClient::new(client_io, tx);

        client.absorb(&SpawnerEvent::ServiceState { name: svc(), running: true, pid: Some(7) });
        let observed = client.observed(&svc());
        assert!(observed.running);
        assert_eq!(observed.pid, Some(7));
    }

    #[tokio::test]
    async fn uptime_accrues_from_first_observed_running_state() {
        let (client_io, _server_io) = duplex(4096);
        let (tx, _rx) = mpsc::unbounded_channel();
        let client = SpawnerClient::new(client_io, tx);

        // A statedump discovering a service already running, with no
        // start ever issued by this process, must still report a growing
        // uptime rather than none.
        client.absorb(&SpawnerEvent::ServiceState { name: svc(), running: true, pid: Some(7) });
        let first = client.observed(&svc()).uptime.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        let second = client.observed(&svc()).uptime.unwrap();
        assert!(second > first);
    }

    #[tokio::test]
    async fn uptime_resets_once_a_service_stops() {
        let (client_io, _server_io) = duplex(4096);
        let (tx, _rx) = mpsc::unbounded_channel();
        let client = SpawnerClient::new(client_io, tx);

        client.absorb(&SpawnerEvent::ServiceState { name: svc(), running: true, pid: Some(7) });
        client.absorb(&SpawnerEvent::ServiceState { name: svc(), running: false, pid: None });
        assert_eq!(client.observed(&svc()).uptime, None);
    }
}
