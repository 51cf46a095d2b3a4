use std::sync::Arc;

use parking_lot::Mutex;

use super::{CoroutineRef, ResultChannel};
use crate::{
    error::RuntimeError,
    op::Event,
    rt::RuntimeConfig,
    val::{TableRef, Val, ValueKind},
};

/// Process-wide state reachable from every invocation: the global table and
/// the metatables registered for non-table types.
#[derive(Debug)]
pub struct RuntimeState {
    globals: TableRef,
    type_metatables: Mutex<[Option<TableRef>; ValueKind::COUNT]>,
    config: RuntimeConfig,
}

pub type StateHandle = Arc<RuntimeState>;

impl RuntimeState {
    pub fn new(config: RuntimeConfig) -> Self {
        RuntimeState {
            globals: TableRef::new(),
            type_metatables: Mutex::new(Default::default()),
            config,
        }
    }

    pub fn globals(&self) -> &TableRef {
        &self.globals
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn type_metatable(&self, kind: ValueKind) -> Option<TableRef> {
        self.type_metatables.lock()[kind.index()].clone()
    }

    pub fn set_type_metatable(&self, kind: ValueKind, metatable: Option<TableRef>) {
        self.type_metatables.lock()[kind.index()] = metatable;
    }

    pub fn metatable_of(&self, value: &Val) -> Option<TableRef> {
        match value {
            Val::Table(t) => t.metatable(),
            other => self.type_metatable(other.kind()),
        }
    }

    /// Non-nil `event` handler for `value`, if any.
    pub fn metamethod(&self, value: &Val, event: Event) -> Option<Val> {
        let mt = self.metatable_of(value)?;
        let handler = mt.get(event.key());
        (!handler.is_nil()).then_some(handler)
    }
}

impl Default for RuntimeState {
    fn default() -> Self {
        Self::new(RuntimeConfig::default())
    }
}

/// Handle threaded through every invocation on one thread of control.
#[derive(Debug)]
pub struct ExecutionContext {
    state: StateHandle,
    results: ResultChannel,
    coroutine: Option<CoroutineRef>,
    depth: usize,
    boundaries: usize,
}

impl ExecutionContext {
    pub fn new(state: StateHandle) -> Self {
        ExecutionContext {
            state,
            results: ResultChannel::with_capacity(8),
            coroutine: None,
            depth: 0,
            boundaries: 0,
        }
    }

    pub fn state(&self) -> &StateHandle {
        &self.state
    }

    pub fn globals(&self) -> &TableRef {
        self.state.globals()
    }

    pub fn results(&self) -> &ResultChannel {
        &self.results
    }

    pub fn results_mut(&mut self) -> &mut ResultChannel {
        &mut self.results
    }

    pub fn current_coroutine(&self) -> Option<&CoroutineRef> {
        self.coroutine.as_ref()
    }

    /// Inside a coroutine and not below a non-resumable native call.
    pub fn is_yieldable(&self) -> bool {
        self.coroutine.is_some() && self.boundaries == 0
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub(crate) fn enter(&mut self) -> Result<(), RuntimeError> {
        if self.depth >= self.state.config().max_call_depth {
            return Err(RuntimeError::StackOverflow { depth: self.depth });
        }
        self.depth += 1;
        Ok(())
    }

    pub(crate) fn leave(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    pub(crate) fn enter_boundary(&mut self) {
        self.boundaries += 1;
    }

    pub(crate) fn leave_boundary(&mut self) {
        self.boundaries = self.boundaries.saturating_sub(1);
    }

    /// Install `coroutine` as the running one; returns the previous one
    /// together with its boundary count.
    pub(crate) fn switch_coroutine(&mut self, coroutine: Option<CoroutineRef>, boundaries: usize) -> (Option<CoroutineRef>, usize) {
        let prev = std::mem::replace(&mut self.coroutine, coroutine);
        let prev_boundaries = std::mem::replace(&mut self.boundaries, boundaries);
        (prev, prev_boundaries)
    }
}
