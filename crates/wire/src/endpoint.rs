// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Client and server endpoint roles composed onto a framed connection,
//! realized as two concrete types sharing a base via delegation rather
//! than a single endpoint type parameterized by an enum role.
//!
//! Both roles share the same wire: a [`crate::framing::LineCodec`] over an
//! `AsyncRead + AsyncWrite` stream, split into owned halves so the reader
//! can run as its own task while callers hold a handle to the writer half.

use crate::continuation::{drive, HandlerStep};
use crate::errors::ProtocolError;
use crate::framing::{Frame, LineCodec};
use crate::pending::PendingCommand;
use crate::registry::MessageRegistry;
use desd_core::CorrelationId;
use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, warn};

type PendingTable = Arc<std::sync::Mutex<HashMap<u64, PendingCommand>>>;
type EventSlot = Arc<std::sync::Mutex<Option<mpsc::UnboundedSender<Frame>>>>;

fn fail_all_pending(pending: &PendingTable) {
    let mut table = pending.lock().unwrap_or_else(|e| e.into_inner());
    for (_, cmd) in table.drain() {
        cmd.cancel();
    }
}

/// The client role: correlates outbound commands with monotonically
/// increasing ids, offers both the blocking `send_msg` (id `0`, always
/// synchronous) and the non-blocking `async_send_msg` (promise-returning)
/// call shapes.
pub struct ClientEndpoint<S> {
    writer: AsyncMutex<FramedWrite<tokio::io::WriteHalf<S>, LineCodec>>,
    next_id: AtomicU64,
    pending: PendingTable,
    /// Non-terminal inbound lines: delivered to an event callback if set,
    /// otherwise discarded.
    events: EventSlot,
    reader: JoinHandle<()>,
    /// A zero-id call is sent while holding this lock so id-`0` replies
    /// preserve total send order even if multiple synchronous calls race
    /// on the same endpoint.
    sync_gate: AsyncMutex<()>,
}

impl<S> ClientEndpoint<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(stream: S) -> Arc<Self> {
        let (read_half, write_half) = tokio::io::split(stream);
        let pending: PendingTable = Arc::new(std::sync::Mutex::new(HashMap::new()));
        let events: EventSlot = Arc::new(std::sync::Mutex::new(None));

        let reader_pending = Arc::clone(&pending);
        let reader_events = Arc::clone(&events);
        let reader = tokio::spawn(async move {
            let mut reader = FramedRead::new(read_half, LineCodec::new());
            loop {
                match reader.next().await {
                    Some(Ok(frame)) => route_inbound(frame, &reader_pending, &reader_events),
                    Some(Err(err)) => {
                        warn!(error = %err, "client endpoint framing error, dropping line");
                    }
                    None => break,
                }
            }
            fail_all_pending(&reader_pending);
        });

        Arc::new(Self {
            writer: AsyncMutex::new(FramedWrite::new(write_half, LineCodec::new())),
            next_id: AtomicU64::new(1),
            pending,
            events,
            reader,
            sync_gate: AsyncMutex::new(()),
        })
    }

    /// Register a sink for inbound lines that aren't a terminal reply to a
    /// pending command (events in the spawner-client sense, e.g.
    /// `service.exit`, `signal`).
    pub fn set_event_sink(&self, tx: mpsc::UnboundedSender<Frame>) {
        *self.events.lock().unwrap_or_else(|e| e.into_inner()) = Some(tx);
    }

    /// Synchronous call: send with correlation id `0`, block until the
    /// matching terminal `ok|error` arrives.
    pub async fn send_msg(&self, fields: Vec<String>) -> Result<Vec<String>, ProtocolError> {
        let _gate = self.sync_gate.lock().await;
        let (cmd, rx) = PendingCommand::new(CorrelationId::ZERO, fields.clone());
        {
            let mut table = self.pending.lock().unwrap_or_else(|e| e.into_inner());
            table.insert(0, cmd);
        }
        self.write_frame(CorrelationId::ZERO, fields).await?;
        rx.await.map_err(|_| ProtocolError::Canceled)
    }

    /// Asynchronous call: allocate a fresh id, send, and return a promise
    /// the caller can await independently of other in-flight commands on
    /// the same connection.
    pub async fn async_send_msg(
        &self,
        fields: Vec<String>,
    ) -> Result<oneshot::Receiver<Vec<String>>, ProtocolError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (cmd, rx) = PendingCommand::new(CorrelationId(id), fields.clone());
        {
            let mut table = self.pending.lock().unwrap_or_else(|e| e.into_inner());
            table.insert(id, cmd);
        }
        self.write_frame(CorrelationId(id), fields).await?;
        Ok(rx)
    }

    async fn write_frame(&self, id: CorrelationId, fields: Vec<String>) -> Result<(), ProtocolError> {
        let mut writer = self.writer.lock().await;
        writer.send(Frame::new(id, fields)).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Tear down: abort the reader task and fail every pending command with
    /// "canceled".
    pub fn shutdown(&self) {
        self.reader.abort();
        fail_all_pending(&self.pending);
    }
}

impl<S> Drop for ClientEndpoint<S> {
    fn drop(&mut self) {
        self.reader.abort();
        fail_all_pending(&self.pending);
    }
}

fn route_inbound(frame: Frame, pending: &PendingTable, events: &EventSlot) {
    let is_terminal = matches!(frame.verb(), Some("ok") | Some("error"));
    if is_terminal {
        let cmd = {
            let mut table = pending.lock().unwrap_or_else(|e| e.into_inner());
            table.remove(&frame.id.0)
        };
        if let Some(cmd) = cmd {
            cmd.resolve(frame.fields);
            return;
        }
        debug!(id = frame.id.0, "terminal reply for unknown/expired correlation id, discarding");
        return;
    }

    let sink = events.lock().unwrap_or_else(|e| e.into_inner()).clone();
    match sink {
        Some(tx) => {
            let _ = tx.send(frame);
        }
        None => debug!(id = frame.id.0, verb = ?frame.verb(), "non-terminal event with no sink, discarding"),
    }
}

/// Per-id bookkeeping while a handler runs: enough to log a slow command
/// and to cancel a stale handler if its id is reused before it replies.
struct CommandState {
    #[allow(dead_code)]
    message: Vec<String>,
    task: JoinHandle<()>,
}

/// The server role: looks up each inbound verb in a [`MessageRegistry`],
/// validates, dispatches, and drives the handler's continuation chain to
/// a terminal reply.
pub struct ServerEndpoint<S, Ctx> {
    writer: AsyncMutex<FramedWrite<tokio::io::WriteHalf<S>, LineCodec>>,
    reader: AsyncMutex<Option<FramedRead<tokio::io::ReadHalf<S>, LineCodec>>>,
    registry: Arc<MessageRegistry<Ctx>>,
    ctx: Arc<Ctx>,
    commands: std::sync::Mutex<HashMap<u64, CommandState>>,
}

impl<S, Ctx> ServerEndpoint<S, Ctx>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    Ctx: Send + Sync + 'static,
{
    pub fn new(stream: S, registry: Arc<MessageRegistry<Ctx>>, ctx: Arc<Ctx>) -> Arc<Self> {
        let (read_half, write_half) = tokio::io::split(stream);
        Arc::new(Self {
            writer: AsyncMutex::new(FramedWrite::new(write_half, LineCodec::new())),
            reader: AsyncMutex::new(Some(FramedRead::new(read_half, LineCodec::new()))),
            registry,
            ctx,
            commands: std::sync::Mutex::new(HashMap::new()),
        })
    }

    /// Drive the connection until the peer disconnects or a fatal I/O error
    /// occurs. Framing errors on individual lines are reported on
    /// correlation id `0` and do not terminate the loop.
    pub async fn run(self: &Arc<Self>) -> Result<(), ProtocolError> {
        let Some(mut reader) = self.reader.lock().await.take() else {
            return Err(ProtocolError::AlreadyRunning);
        };
        loop {
            match reader.next().await {
                Some(Ok(frame)) => self.dispatch(frame),
                Some(Err(ProtocolError::Framing(detail))) => {
                    warn!(detail, "framing error on inbound line");
                    let _ = self
                        .write_reply(CorrelationId::ZERO, vec!["error".into(), "invalid protocol formatting".into()])
                        .await;
                }
                Some(Err(other)) => return Err(other),
                None => break,
            }
        }
        self.shutdown();
        Ok(())
    }

    fn dispatch(self: &Arc<Self>, frame: Frame) {
        let id = frame.id.0;
        let Some(verb) = frame.verb().map(str::to_string) else {
            return;
        };
        let args = frame.args().to_vec();

        let Some(spec) = self.registry.get(&verb) else {
            self.spawn_reply(id, vec!["error".into(), "invalid".into(), format!("unknown message {verb}")]);
            return;
        };

        if !(spec.validator)(&args) {
            self.spawn_reply(id, vec!["error".into(), "invalid".into()]);
            return;
        }

        // Replacing an in-flight command on the same id: cancel the stale
        // handler before admitting the new one.
        if let Some(stale) = self.commands.lock().unwrap_or_else(|e| e.into_inner()).remove(&id) {
            warn!(id, "correlation id reused while a handler was in flight, canceling the stale one");
            stale.task.abort();
        }

        let handler = spec.handler.clone();
        let ctx = Arc::clone(&self.ctx);
        let this = Arc::clone(self);
        let sent = frame.fields.clone();
        let task = tokio::spawn(async move {
            let step: HandlerStep<Ctx> = (handler)(ctx.clone(), args);
            let reply = drive(ctx, step).await;
            this.commands.lock().unwrap_or_else(|e| e.into_inner()).remove(&id);
            this.spawn_reply_now(id, reply).await;
        });
        self.commands
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, CommandState { message: sent, task });
    }

    fn spawn_reply(self: &Arc<Self>, id: u64, fields: Vec<String>) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.spawn_reply_now(id, fields).await;
        });
    }

    async fn spawn_reply_now(&self, id: u64, fields: Vec<String>) {
        if let Err(err) = self.write_reply(CorrelationId(id), fields).await {
            warn!(id, error = %err, "failed writing terminal reply");
        }
    }

    async fn write_reply(&self, id: CorrelationId, fields: Vec<String>) -> Result<(), ProtocolError> {
        let mut writer = self.writer.lock().await;
        writer.send(Frame::new(id, fields)).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Cancel every in-flight handler: disarm first, then abort, so no
    /// handler's continuation can fire after teardown starts.
    pub fn shutdown(&self) {
        let mut table = self.commands.lock().unwrap_or_else(|e| e.into_inner());
        for (_, cmd) in table.drain() {
            cmd.task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::continuation::HandlerStep;
    use tokio::io::{duplex, split, AsyncWriteExt};

    struct NoCtx;

    fn always_valid(_: &[String]) -> bool {
        true
    }

    fn build_registry() -> Arc<MessageRegistry<NoCtx>> {
        Arc::new(
            MessageRegistry::builder()
                .register("echo", always_valid, |_ctx, args| {
                    let mut reply = vec!["ok".to_string()];
                    reply.extend(args);
                    HandlerStep::Done(reply)
                })
                .build(),
        )
    }

    #[tokio::test]
    async fn echo_round_trips_over_a_duplex_stream() {
        let (client_io, server_io) = duplex(4096);
        let server = ServerEndpoint::new(server_io, build_registry(), Arc::new(NoCtx));
        let server_task = tokio::spawn({
            let server = Arc::clone(&server);
            async move {
                let _ = server.run().await;
            }
        });

        let (mut read_half, mut write_half) = split(client_io);
        write_half.write_all(b"0\techo\thello\tworld\n").await.unwrap();

        let mut reader = FramedRead::new(&mut read_half, LineCodec::new());
        let frame = reader.next().await.unwrap().unwrap();
        assert_eq!(frame.id, CorrelationId::ZERO);
        assert_eq!(frame.fields, vec!["ok", "hello", "world"]);

        server.shutdown();
        server_task.abort();
    }

    #[tokio::test]
    async fn unknown_message_yields_error_invalid() {
        let (client_io, server_io) = duplex(4096);
        let server = ServerEndpoint::new(server_io, build_registry(), Arc::new(NoCtx));
        let server_task = tokio::spawn({
            let server = Arc::clone(&server);
            async move {
                let _ = server.run().await;
            }
        });

        let (mut read_half, mut write_half) = split(client_io);
        write_half.write_all(b"7\tfrobnicate\tx\n").await.unwrap();

        let mut reader = FramedRead::new(&mut read_half, LineCodec::new());
        let frame = reader.next().await.unwrap().unwrap();
        assert_eq!(frame.fields, vec!["error", "invalid", "unknown message frobnicate"]);

        server.shutdown();
        server_task.abort();
    }

    #[tokio::test]
    async fn client_send_msg_and_server_echo_round_trip() {
        let (client_io, server_io) = duplex(4096);
        let server = ServerEndpoint::new(server_io, build_registry(), Arc::new(NoCtx));
        let server_task = tokio::spawn({
            let server = Arc::clone(&server);
            async move {
                let _ = server.run().await;
            }
        });

        let client = ClientEndpoint::new(client_io);
        let reply = client.send_msg(vec!["echo".to_string(), "hi".to_string()]).await.unwrap();
        assert_eq!(reply, vec!["ok", "hi"]);

        client.shutdown();
        server.shutdown();
        server_task.abort();
    }

    #[tokio::test]
    async fn client_shutdown_cancels_pending_commands() {
        let (client_io, _server_io) = duplex(4096);
        let client = ClientEndpoint::new(client_io);
        let rx = client.async_send_msg(vec!["echo".to_string()]).await.unwrap();
        client.shutdown();
        assert!(rx.await.is_err());
    }
}
