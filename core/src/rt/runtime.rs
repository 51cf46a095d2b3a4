//! Top-level driver that owns one execution context and its activation stack.

use std::sync::Arc;

use anyhow::Result;
use tracing::debug;

use super::RuntimeConfig;
use crate::{
    error::RuntimeError,
    module::ModuleRegistry,
    val::{TableRef, Val},
    vm::{ActivationStack, ExecutionContext, Proto, RuntimeState, StateHandle, Unwind, View, closure, dispatch},
};

/// A single thread of control over shared [`RuntimeState`].
///
/// Several runtimes may share one state handle; each keeps its own result
/// channel and stack, so they can run on separate threads.
#[derive(Debug)]
pub struct Runtime {
    ctx: ExecutionContext,
    stack: ActivationStack,
}

impl Runtime {
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    pub fn with_config(config: RuntimeConfig) -> Self {
        Self::with_state(Arc::new(RuntimeState::new(config)))
    }

    pub fn with_state(state: StateHandle) -> Self {
        let stack = ActivationStack::with_capacity(state.config().initial_stack_slots);
        Runtime {
            ctx: ExecutionContext::new(state),
            stack,
        }
    }

    pub fn state(&self) -> &StateHandle {
        self.ctx.state()
    }

    pub fn config(&self) -> &RuntimeConfig {
        self.ctx.state().config()
    }

    pub fn globals(&self) -> &TableRef {
        self.ctx.globals()
    }

    pub fn set_global(&self, name: &str, value: impl Into<Val>) {
        self.ctx.globals().set_str(name, value.into());
    }

    pub fn get_global(&self, name: &str) -> Val {
        self.ctx.globals().get_str(name)
    }

    /// Run every enabled module of `registry` against this runtime's state.
    pub fn install(&mut self, registry: &ModuleRegistry) -> Result<()> {
        registry.install(self.ctx.state())
    }

    /// Validate `proto` and wrap it as a callable main function.
    pub fn load(&self, proto: Arc<Proto>) -> Result<Val, RuntimeError> {
        proto.validate()?;
        debug!(target: "tidal::vm::dispatch", name = %proto.name, slots = proto.slots, "load proto");
        Ok(closure(proto, Vec::new()))
    }

    /// Call `target` with `args` and collect every result.
    pub fn call(&mut self, target: &Val, args: &[Val]) -> Result<Vec<Val>, RuntimeError> {
        let Runtime { ctx, stack } = self;
        match dispatch::call_with(ctx, stack.view(), target, args) {
            Ok(()) => ctx.results_mut().take(),
            Err(Unwind::Error(err)) => Err(err),
            Err(Unwind::Suspend(_)) => Err(RuntimeError::contract("suspension reached the top-level driver")),
        }
    }

    /// [`Runtime::call`], keeping only the first result.
    pub fn call1(&mut self, target: &Val, args: &[Val]) -> Result<Val, RuntimeError> {
        Ok(self.call(target, args)?.into_iter().next().unwrap_or_default())
    }

    pub fn stack_capacity(&self) -> usize {
        self.stack.capacity()
    }

    /// Context and an empty root view, for hosts that drive dispatch directly.
    pub fn parts(&mut self) -> (&mut ExecutionContext, View<'_>) {
        (&mut self.ctx, self.stack.view())
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}
