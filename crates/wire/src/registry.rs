// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Message registry — statically enumerated message names, their argument
//! validators, and handler dispatchers.

use crate::continuation::{Handler, HandlerStep};
use std::collections::HashMap;
use std::sync::Arc;

/// A validator checks the inbound argument list (verb already consumed)
/// for one message name; `false` means the server replies `error invalid`.
pub type Validator = fn(&[String]) -> bool;

/// One registered message: its argument validator and handler.
pub struct MessageSpec<Ctx> {
    pub validator: Validator,
    pub handler: Handler<Ctx>,
}

impl<Ctx> Clone for MessageSpec<Ctx> {
    fn clone(&self) -> Self {
        Self { validator: self.validator, handler: Arc::clone(&self.handler) }
    }
}

/// A flat, immutable map from message name to [`MessageSpec`], built once
/// at program start and shared by the endpoint: an explicit registry value
/// rather than a global mutable class registry, with extensions appended
/// before construction instead of at runtime.
pub struct MessageRegistry<Ctx> {
    entries: HashMap<&'static str, MessageSpec<Ctx>>,
}

impl<Ctx> Default for MessageRegistry<Ctx> {
    fn default() -> Self {
        Self { entries: HashMap::new() }
    }
}

impl<Ctx> MessageRegistry<Ctx> {
    pub fn builder() -> MessageRegistryBuilder<Ctx> {
        MessageRegistryBuilder { registry: Self::default() }
    }

    pub fn get(&self, name: &str) -> Option<&MessageSpec<Ctx>> {
        self.entries.get(name)
    }

    /// Overlay `other`'s entries onto `self`, `other` winning on conflicts —
    /// lookup returns the most-derived entry, realized here as
    /// last-write-wins in a flat map rather than a class hierarchy walk.
    pub fn extend(mut self, other: MessageRegistry<Ctx>) -> Self {
        self.entries.extend(other.entries);
        self
    }
}

pub struct MessageRegistryBuilder<Ctx> {
    registry: MessageRegistry<Ctx>,
}

impl<Ctx> MessageRegistryBuilder<Ctx> {
    pub fn register(
        mut self,
        name: &'static str,
        validator: Validator,
        handler: impl Fn(Arc<Ctx>, Vec<String>) -> HandlerStep<Ctx> + Send + Sync + 'static,
    ) -> Self {
        self.registry.entries.insert(name, MessageSpec { validator, handler: Arc::new(handler) });
        self
    }

    pub fn build(self) -> MessageRegistry<Ctx> {
        self.registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoCtx;

    fn always_valid(_: &[String]) -> bool {
        true
    }

    #[test]
    fn registers_and_looks_up_by_name() {
        let registry = MessageRegistry::<NoCtx>::builder()
            .register("echo", always_valid, |_ctx, args| HandlerStep::Done(args))
            .build();

        assert!(registry.get("echo").is_some());
        assert!(registry.get("unknown").is_none());
    }

    #[test]
    fn extend_lets_later_registry_win() {
        let base = MessageRegistry::<NoCtx>::builder()
            .register("echo", always_valid, |_ctx, _args| HandlerStep::Done(vec!["base".to_string()]))
            .build();
        let override_reg = MessageRegistry::<NoCtx>::builder()
            .register("echo", always_valid, |_ctx, _args| HandlerStep::Done(vec!["override".to_string()]))
            .build();

        let merged = base.extend(override_reg);
        let spec = merged.get("echo").unwrap();
        let HandlerStep::Done(reply) = (spec.handler)(Arc::new(NoCtx), vec![]) else {
            panic!("expected Done");
        };
        assert_eq!(reply, vec!["override".to_string()]);
    }
}
