// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `PendingCommand` — per-message in-flight bookkeeping.

use desd_core::CorrelationId;
use tokio::sync::oneshot;

/// A command awaiting its terminal reply. Held in a client endpoint's
/// pending table (keyed by correlation id) until a matching `ok`/`error`
/// line arrives, or the endpoint is torn down and every pending command is
/// failed with "canceled".
pub struct PendingCommand {
    pub id: CorrelationId,
    /// The original `[verb, arg...]` fields, kept for diagnostics/logging.
    pub sent_fields: Vec<String>,
    reply_tx: oneshot::Sender<Vec<String>>,
}

impl PendingCommand {
    pub fn new(id: CorrelationId, sent_fields: Vec<String>) -> (Self, oneshot::Receiver<Vec<String>>) {
        let (reply_tx, reply_rx) = oneshot::channel();
        (Self { id, sent_fields, reply_tx }, reply_rx)
    }

    /// Fulfill the promise with the terminal reply's `[verb, arg...]`.
    /// Consumes `self` since a command has exactly one terminal reply.
    pub fn resolve(self, reply: Vec<String>) {
        let _ = self.reply_tx.send(reply);
    }

    /// Fail the promise because the endpoint is tearing down or the id was
    /// reused by a newer command. The stale continuation is disarmed first
    /// to avoid reentrancy, then its promise fails.
    pub fn cancel(self) {
        drop(self.reply_tx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolve_delivers_reply() {
        let (cmd, rx) = PendingCommand::new(CorrelationId(1), vec!["echo".to_string()]);
        cmd.resolve(vec!["ok".to_string(), "hi".to_string()]);
        assert_eq!(rx.await.unwrap(), vec!["ok".to_string(), "hi".to_string()]);
    }

    #[tokio::test]
    async fn cancel_fails_the_receiver() {
        let (cmd, rx) = PendingCommand::new(CorrelationId(1), vec!["echo".to_string()]);
        cmd.cancel();
        assert!(rx.await.is_err());
    }
}
