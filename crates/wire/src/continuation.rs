// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Promise + continuation state machine for multi-step command handlers.
//!
//! A handler either finishes immediately with a terminal reply, or asks to
//! await some future value and be resumed with it. [`drive`] advances that
//! chain iteratively so the call stack never grows with the number of
//! continuations a handler chains together.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// The resolved value of an awaited step: either the inner result fields,
/// or a reason the wait never produced one (e.g. the awaited promise was
/// canceled).
pub type AwaitResult = Result<Vec<String>, String>;

/// A boxed future a handler wants to await before continuing.
pub type BoxAwait = Pin<Box<dyn Future<Output = AwaitResult> + Send>>;

/// The function invoked once the awaited future resolves; it sees the
/// resolution and returns the next step (another `Await`, or `Done`).
pub type ContinuationFn<Ctx> = Box<dyn FnOnce(Arc<Ctx>, AwaitResult) -> HandlerStep<Ctx> + Send>;

/// A registered message's handler function.
pub type Handler<Ctx> = Arc<dyn Fn(Arc<Ctx>, Vec<String>) -> HandlerStep<Ctx> + Send + Sync>;

/// One step of a handler's execution.
pub enum HandlerStep<Ctx> {
    /// The handler is finished; these are the terminal reply's fields
    /// (verb + args), to be sent prefixed with the command's id.
    Done(Vec<String>),
    /// The handler needs the result of `future` before it can continue;
    /// `next` is invoked with that result to produce the following step.
    Await(BoxAwait, ContinuationFn<Ctx>),
}

/// Drive a `HandlerStep` chain to completion without growing the call
/// stack per continuation — each `Await` is polled to completion in this
/// loop, not via recursive `.await` chains inside the continuation
/// closures themselves.
pub async fn drive<Ctx>(ctx: Arc<Ctx>, mut step: HandlerStep<Ctx>) -> Vec<String> {
    loop {
        match step {
            HandlerStep::Done(reply) => return reply,
            HandlerStep::Await(future, next) => {
                let resolved = future.await;
                step = next(Arc::clone(&ctx), resolved);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoCtx;

    #[tokio::test]
    async fn done_resolves_immediately() {
        let reply = drive(Arc::new(NoCtx), HandlerStep::Done(vec!["ok".to_string()])).await;
        assert_eq!(reply, vec!["ok".to_string()]);
    }

    #[tokio::test]
    async fn single_await_chains_to_done() {
        let step = HandlerStep::Await(
            Box::pin(async { Ok(vec!["inner".to_string()]) }),
            Box::new(|_ctx, resolved| HandlerStep::Done(resolved.unwrap_or_default())),
        );
        let reply = drive(Arc::new(NoCtx), step).await;
        assert_eq!(reply, vec!["inner".to_string()]);
    }

    #[tokio::test]
    async fn chain_of_many_continuations_does_not_blow_the_stack() {
        fn step(remaining: u32) -> HandlerStep<NoCtx> {
            if remaining == 0 {
                return HandlerStep::Done(vec!["done".to_string()]);
            }
            HandlerStep::Await(
                Box::pin(async { Ok(vec![]) }),
                Box::new(move |_ctx, _resolved| step(remaining - 1)),
            )
        }

        let reply = drive(Arc::new(NoCtx), step(10_000)).await;
        assert_eq!(reply, vec!["done".to_string()]);
    }
}
