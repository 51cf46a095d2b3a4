//! Adapter between generated bodies and the call/suspend machinery.
//!
//! A body is a state machine over numbered segments. [`Frame::index`] is 0 on
//! fresh entry; before any nested operation that may suspend the body stores
//! the index of the segment that consumes its outcome. [`Compiled`] does the
//! rest: argument shaping on entry, saving the frame when a suspension passes
//! through, and on resume restoring the frame and replaying the inner chain
//! so the body re-enters with the nested outcome already in the result
//! channel.

use std::{fmt, sync::Arc};

use super::{ExecutionContext, Flow, ResumeChain, ResumePoint, SavedFrame, Unwind, View, dispatch};
use crate::{
    error::RuntimeError,
    val::{Arity, FnRef, Function, Upvalue, Val},
};

/// Frame shape supplied by the front end for one function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    /// Fixed parameters, occupying slots `0..params`.
    pub params: usize,
    /// Whether arguments past `params` are kept as varargs.
    pub vararg: bool,
    /// Total slots the body addresses, parameters included.
    pub slots: usize,
}

impl Layout {
    pub fn new(params: usize, vararg: bool, slots: usize) -> Self {
        Layout {
            params,
            vararg,
            slots: slots.max(params),
        }
    }

    pub fn arity(&self) -> Arity {
        if self.vararg { Arity::Variadic } else { Arity::fixed(self.params) }
    }
}

/// A generated function body.
pub trait CompiledUnit: fmt::Debug + Send + Sync + 'static {
    fn name(&self) -> &str;

    fn layout(&self) -> Layout;

    /// Run from `frame.index()` until the body returns, requests a tail call
    /// or unwinds.
    fn run(&self, ctx: &mut ExecutionContext, frame: &mut Frame<'_>) -> Flow;

    fn upvalue_count(&self) -> usize {
        0
    }

    fn upvalue(&self, _index: usize) -> Option<(Arc<str>, Upvalue)> {
        None
    }

    fn replace_upvalue(&self, _index: usize, _cell: Upvalue) -> bool {
        false
    }
}

/// Live activation of a [`CompiledUnit`].
pub struct Frame<'s> {
    view: View<'s>,
    index: u32,
    slots: usize,
    varargs: Vec<Val>,
}

impl<'s> Frame<'s> {
    /// Resumption index of the segment to (re-)enter.
    #[inline]
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Persist the segment that consumes the next nested operation's outcome.
    #[inline]
    pub fn set_index(&mut self, index: u32) {
        self.index = index;
    }

    #[inline]
    pub fn get(&self, slot: usize) -> Val {
        self.view.get(slot)
    }

    #[inline]
    pub fn set(&mut self, slot: usize, value: Val) {
        self.view.set(slot, value);
    }

    pub fn view(&mut self) -> &mut View<'s> {
        &mut self.view
    }

    pub fn view_ref(&self) -> &View<'s> {
        &self.view
    }

    pub fn varargs(&self) -> &[Val] {
        &self.varargs
    }

    pub fn slot_count(&self) -> usize {
        self.slots
    }

    /// Window above the frame's slots for staging nested operations.
    pub fn scratch(&mut self) -> View<'_> {
        let mut scratch = self.view.from(self.slots);
        scratch.set_top(0);
        scratch
    }

    /// Persist `resume_at`, then call `target` with slots `base..base + nargs`
    /// as its argument window. The callee may overwrite slots from `base` on.
    pub fn call(&mut self, ctx: &mut ExecutionContext, resume_at: u32, target: &Val, base: usize, nargs: usize) -> Flow {
        self.index = resume_at;
        let mut window = self.view.from(base);
        window.set_top(nargs);
        dispatch::call(ctx, window, target)
    }

    /// Persist `resume_at`, then call `target` with `args` staged above the frame.
    pub fn call_with(&mut self, ctx: &mut ExecutionContext, resume_at: u32, target: &Val, args: &[Val]) -> Flow {
        self.index = resume_at;
        dispatch::call_with(ctx, self.scratch(), target, args)
    }

    fn save(self) -> SavedFrame {
        SavedFrame {
            slots: self.view.snapshot(self.slots),
            top: self.view.top(),
            varargs: self.varargs,
        }
    }
}

/// [`Function`] implementation shared by every generated body.
pub struct Compiled<U> {
    unit: U,
}

impl<U: CompiledUnit> Compiled<U> {
    pub fn new(unit: U) -> Arc<Self> {
        Arc::new(Compiled { unit })
    }

    pub fn into_value(unit: U) -> Val {
        let function: FnRef = Self::new(unit);
        Val::Function(function)
    }

    pub fn unit(&self) -> &U {
        &self.unit
    }

    fn drive(self: Arc<Self>, ctx: &mut ExecutionContext, mut frame: Frame<'_>) -> Flow {
        match self.unit.run(ctx, &mut frame) {
            Err(Unwind::Suspend(mut suspension)) => {
                let index = frame.index;
                suspension.push(ResumePoint::new(self, index, frame.save()));
                Err(Unwind::Suspend(suspension))
            }
            other => other,
        }
    }
}

impl<U: CompiledUnit> fmt::Debug for Compiled<U> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Compiled").field(&self.unit).finish()
    }
}

impl<U: CompiledUnit> Function for Compiled<U> {
    fn name(&self) -> &str {
        self.unit.name()
    }

    fn arity(&self) -> Arity {
        self.unit.layout().arity()
    }

    fn invoke(self: Arc<Self>, ctx: &mut ExecutionContext, mut args: View<'_>) -> Flow {
        let layout = self.unit.layout();
        let varargs = if layout.vararg { args.values_from(layout.params) } else { Vec::new() };
        args.fit(layout.params);
        args.clear_range(layout.params, layout.slots);
        let frame = Frame {
            view: args,
            index: 0,
            slots: layout.slots,
            varargs,
        };
        self.drive(ctx, frame)
    }

    fn resume(
        self: Arc<Self>,
        ctx: &mut ExecutionContext,
        mut view: View<'_>,
        index: u32,
        saved: SavedFrame,
        inner: ResumeChain,
    ) -> Flow {
        if index == 0 {
            return Err(RuntimeError::contract(format!("'{}' resumed into its entry segment", self.unit.name())).into());
        }
        let layout = self.unit.layout();
        let SavedFrame { slots, top, varargs } = saved;
        view.restore(slots);
        view.set_top(top);
        let mut frame = Frame {
            view,
            index,
            slots: layout.slots,
            varargs,
        };
        if let Err(unwind) = inner.replay(ctx, frame.scratch()) {
            return match unwind {
                Unwind::Suspend(mut suspension) => {
                    suspension.push(ResumePoint::new(self, index, frame.save()));
                    Err(Unwind::Suspend(suspension))
                }
                err => Err(err),
            };
        }
        self.drive(ctx, frame)
    }

    fn upvalue_count(&self) -> usize {
        self.unit.upvalue_count()
    }

    fn upvalue(&self, index: usize) -> Option<(Arc<str>, Upvalue)> {
        self.unit.upvalue(index)
    }

    fn replace_upvalue(&self, index: usize, cell: Upvalue) -> bool {
        self.unit.replace_upvalue(index, cell)
    }
}
