// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Client-facing control commands, registered on a
//! [`desd_wire::ServerEndpoint`] bound to [`ServerCtx`].

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;

use desd_core::{Action, ActionName, ExitReason, KillScript, ServiceName, SystemClock};
use desd_engine::{EngineError, KillOutcome, KillscriptDispatcher, Reconciler, ReconcilerHandle, SpawnerClient};
use desd_wire::{AwaitResult, HandlerStep, MessageRegistry};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::info;

/// Per-connection handler context: the shared reconciliation core plus the
/// session tokens this connection's caller presents for authorization
/// checks — a fixed set granted at daemon startup, see
/// [`crate::cli::Cli::grant_tokens`].
pub struct ServerCtx<S> {
    pub reconciler: Arc<Reconciler<S, SystemClock>>,
    pub handle: ReconcilerHandle,
    pub killscripts: Arc<KillscriptDispatcher<SpawnerClient<S>>>,
    pub tokens: HashSet<String>,
}

impl<S> ServerCtx<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    /// `service_action SERVICE ACTION` authorization: the caller's session
    /// tokens must carry `service_action:SERVICE:ACTION`. When the action
    /// declares its own token set, that set replaces the default literal —
    /// it names the tokens a caller may present instead.
    fn authorize_service_action(&self, service: &ServiceName, action_name: &ActionName, action: &Action) -> bool {
        if action.tokens.is_empty() {
            let required = format!("service_action:{service}:{action_name}");
            self.tokens.contains(&required)
        } else {
            action.tokens.iter().any(|t| self.tokens.contains(t))
        }
    }

    /// `killscript SERVICE SCRIPT` authorization: requires
    /// `kill_service:SERVICE_NAME`.
    fn authorize_killscript(&self, service: &ServiceName) -> bool {
        self.tokens.contains(&format!("kill_service:{service}"))
    }
}

fn always_valid(_: &[String]) -> bool {
    true
}

fn service_action_valid(args: &[String]) -> bool {
    args.len() == 2 && ServiceName::parse(args[0].clone()).is_ok() && ActionName::parse(args[1].clone()).is_ok()
}

fn killscript_valid(args: &[String]) -> bool {
    args.len() == 2 && ServiceName::parse(args[0].clone()).is_ok() && KillScript::parse(&args[1]).is_ok()
}

/// Wrap an async handler body as a single `Await` step whose continuation
/// simply unwraps it into the terminal reply — handlers here never need a
/// second continuation, since each command resolves in one round trip to
/// the reconciler.
fn await_done<Ctx>(fut: impl Future<Output = Vec<String>> + Send + 'static) -> HandlerStep<Ctx> {
    HandlerStep::Await(
        Box::pin(async move { Ok(fut.await) }),
        Box::new(|_ctx, resolved: AwaitResult| {
            HandlerStep::Done(resolved.unwrap_or_else(|e| vec!["error".to_string(), "failed".to_string(), e]))
        }),
    )
}

fn invalid() -> Vec<String> {
    vec!["error".to_string(), "invalid".to_string()]
}

fn denied() -> Vec<String> {
    vec!["error".to_string(), "denied".to_string()]
}

/// Render a signal number back to its canonical `SIGNAME` form for the
/// `killscript` reply's `ok reaped signal SIGNAME` line. The mirrored
/// spawner events carry numeric signal values (see `desd_engine::spawner`);
/// this is the one place that translates back to a name.
fn signal_name(value: i32) -> String {
    nix::sys::signal::Signal::try_from(value)
        .map(|s| s.as_str().to_string())
        .unwrap_or_else(|_| format!("SIG{value}"))
}

fn echo_handler<S>(_ctx: Arc<ServerCtx<S>>, args: Vec<String>) -> HandlerStep<ServerCtx<S>>
where
    S: Send + Sync + 'static,
{
    let mut reply = vec!["ok".to_string()];
    reply.extend(args);
    HandlerStep::Done(reply)
}

fn service_action_handler<S>(ctx: Arc<ServerCtx<S>>, args: Vec<String>) -> HandlerStep<ServerCtx<S>>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + Sync + 'static,
{
    await_done(async move {
        let Ok(service) = ServiceName::parse(args[0].clone()) else {
            return invalid();
        };
        let Ok(action_name) = ActionName::parse(args[1].clone()) else {
            return invalid();
        };

        let snapshot = ctx.reconciler.config().current();
        let Some(service_cfg) = snapshot.service(&service) else {
            return EngineError::UnknownService(service.to_string()).reply_fields();
        };
        let Some(action) = service_cfg.action(action_name.as_str()) else {
            return EngineError::UnknownAction(action_name.to_string(), service.to_string()).reply_fields();
        };

        if !ctx.authorize_service_action(&service, &action_name, action) {
            return denied();
        }

        info!(service = %service, action = %action_name, "dispatching service action");
        match ctx.reconciler.invoke_action(&service, action_name.as_str(), &ctx.handle).await {
            Ok(_) => vec!["ok".to_string(), "complete".to_string()],
            Err(err) => err.reply_fields(),
        }
    })
}

fn killscript_handler<S>(ctx: Arc<ServerCtx<S>>, args: Vec<String>) -> HandlerStep<ServerCtx<S>>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + Sync + 'static,
{
    await_done(async move {
        let Ok(service) = ServiceName::parse(args[0].clone()) else {
            return invalid();
        };
        let Ok(script) = KillScript::parse(&args[1]) else {
            return invalid();
        };

        if !ctx.authorize_killscript(&service) {
            return denied();
        }

        info!(service = %service, script = %script.serialize(), "dispatching kill-script");
        let cancel = ctx.reconciler.shutdown_token().child_token();
        match ctx.killscripts.run(service, script, cancel).await {
            KillOutcome::NotRunning => vec!["ok".to_string(), "not_running".to_string()],
            KillOutcome::Reaped(last) => match last.reason {
                ExitReason::Exit => vec!["ok".to_string(), "reaped".to_string(), "exit".to_string(), last.value.to_string()],
                ExitReason::Signal => vec!["ok".to_string(), "reaped".to_string(), "signal".to_string(), signal_name(last.value)],
            },
            KillOutcome::StillRunning => vec!["error".to_string(), "still_running".to_string()],
            KillOutcome::Canceled => vec!["error".to_string(), "failed".to_string()],
        }
    })
}

/// Build the control socket's message registry: `echo`, `service_action`,
/// `killscript`. Extension points in the registry allow addition without
/// protocol redesign.
pub fn build_registry<S>() -> MessageRegistry<ServerCtx<S>>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + Sync + 'static,
{
    MessageRegistry::builder()
        .register("echo", always_valid, echo_handler)
        .register("service_action", service_action_valid, service_action_handler)
        .register("killscript", killscript_valid, killscript_handler)
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_action_validator_rejects_wrong_arity() {
        assert!(!service_action_valid(&["web".to_string()]));
    }

    #[test]
    fn service_action_validator_accepts_well_formed_names() {
        assert!(service_action_valid(&["web".to_string(), "start".to_string()]));
    }

    #[test]
    fn killscript_validator_rejects_malformed_script() {
        assert!(!killscript_valid(&["web".to_string(), "not a script".to_string()]));
    }

    #[test]
    fn signal_name_falls_back_when_unrecognized() {
        assert_eq!(signal_name(i32::MAX), format!("SIG{}", i32::MAX));
    }
}
