// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Control-socket accept loop: bind once, spawn one task per accepted
//! connection, each driving its own [`ServerEndpoint`].

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use desd_engine::{KillscriptDispatcher, Reconciler, ReconcilerHandle, SpawnerClient, SystemClock};
use desd_wire::{MessageRegistry, ServerEndpoint};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{UnixListener, UnixStream};
use tracing::{info, warn};

use crate::commands::{build_registry, ServerCtx};

#[derive(Debug, Error)]
pub enum ListenError {
    #[error("binding control socket {path:?}: {source}")]
    Bind { path: PathBuf, #[source] source: std::io::Error },
}

/// Owns the control socket and the shared reconciliation core every
/// accepted connection's [`ServerCtx`] is built from.
pub struct Listener<SS> {
    inner: UnixListener,
    path: PathBuf,
    registry: Arc<MessageRegistry<ServerCtx<SS>>>,
    reconciler: Arc<Reconciler<SS, SystemClock>>,
    handle: ReconcilerHandle,
    killscripts: Arc<KillscriptDispatcher<SpawnerClient<SS>>>,
    tokens: HashSet<String>,
}

impl<SS> Listener<SS>
where
    SS: AsyncRead + AsyncWrite + Unpin + Send + Sync + 'static,
{
    pub fn bind(
        path: &Path,
        reconciler: Arc<Reconciler<SS, SystemClock>>,
        handle: ReconcilerHandle,
        killscripts: Arc<KillscriptDispatcher<SpawnerClient<SS>>>,
        tokens: HashSet<String>,
    ) -> Result<Self, ListenError> {
        if path.exists() {
            let _ = std::fs::remove_file(path);
        }
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let inner = UnixListener::bind(path).map_err(|e| ListenError::Bind { path: path.to_path_buf(), source: e })?;
        Ok(Self {
            inner,
            path: path.to_path_buf(),
            registry: Arc::new(build_registry()),
            reconciler,
            handle,
            killscripts,
            tokens,
        })
    }

    /// Accept connections until the reconciler's shutdown token fires.
    /// Each endpoint owns its socket; closing it is idempotent.
    pub async fn run(self) {
        info!(path = %self.path.display(), "control socket listening");
        let shutdown = self.reconciler.shutdown_token();
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = self.inner.accept() => {
                    match accepted {
                        Ok((stream, _addr)) => self.spawn_connection(stream),
                        Err(err) => warn!(error = %err, "control socket accept failed"),
                    }
                }
            }
        }
        let _ = std::fs::remove_file(&self.path);
    }

    fn spawn_connection(&self, stream: UnixStream) {
        let ctx = Arc::new(ServerCtx {
            reconciler: Arc::clone(&self.reconciler),
            handle: self.handle.clone(),
            killscripts: Arc::clone(&self.killscripts),
            tokens: self.tokens.clone(),
        });
        let registry = Arc::clone(&self.registry);
        tokio::spawn(async move {
            let endpoint = ServerEndpoint::new(stream, registry, ctx);
            if let Err(err) = endpoint.run().await {
                warn!(error = %err, "control connection ended");
            }
        });
    }
}
