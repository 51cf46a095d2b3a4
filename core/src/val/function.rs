use std::{fmt, sync::Arc};

use super::Upvalue;
use crate::{
    error::RuntimeError,
    vm::{ExecutionContext, Flow, ResumeChain, SavedFrame, View},
};

/// Largest arity served by a direct fixed-arity entry.
pub const MAX_FIXED_ARITY: usize = 5;

/// Calling convention tag consulted by dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    /// Entry receives exactly `n` live argument slots: missing ones are nil,
    /// extra ones are dropped before the call.
    Fixed(u8),
    /// Entry receives the whole argument window.
    Variadic,
}

impl Arity {
    /// `Fixed(n)` when `n` fits a direct entry, `Variadic` otherwise.
    pub fn fixed(n: usize) -> Arity {
        if n <= MAX_FIXED_ARITY { Arity::Fixed(n as u8) } else { Arity::Variadic }
    }
}

/// Anything dispatch can invoke.
///
/// Arguments arrive in the live region of `args`; the callee may use the
/// slots past it as its own frame. Results go to the context's result
/// channel, either as values or as a tail-call request.
pub trait Function: fmt::Debug + Send + Sync {
    fn name(&self) -> &str {
        "?"
    }

    fn arity(&self) -> Arity;

    fn invoke(self: Arc<Self>, ctx: &mut ExecutionContext, args: View<'_>) -> Flow;

    /// Re-enter a suspended invocation at `index` with the slots it saved.
    ///
    /// `inner` holds the rest of the chain below this frame; replaying it
    /// yields the outcome of the nested operation that suspended.
    fn resume(
        self: Arc<Self>,
        _ctx: &mut ExecutionContext,
        _frame: View<'_>,
        index: u32,
        _saved: SavedFrame,
        _inner: ResumeChain,
    ) -> Flow {
        Err(RuntimeError::contract(format!("function '{}' cannot resume at index {index}", self.name())).into())
    }

    fn is_native(&self) -> bool {
        false
    }

    fn upvalue_count(&self) -> usize {
        0
    }

    fn upvalue(&self, _index: usize) -> Option<(Arc<str>, Upvalue)> {
        None
    }

    /// Re-point upvalue `index` at `cell`. Returns false when out of range.
    fn replace_upvalue(&self, _index: usize, _cell: Upvalue) -> bool {
        false
    }
}

pub type FnRef = Arc<dyn Function>;

/// Host function entry.
pub type NativeFn = fn(ctx: &mut ExecutionContext, args: View<'_>) -> Flow;

/// Stateless host function. Never resumable: a native that needs to survive
/// a suspension implements [`Function`] directly.
pub struct NativeFunction {
    name: &'static str,
    arity: Arity,
    func: NativeFn,
}

impl NativeFunction {
    pub fn new(name: &'static str, arity: Arity, func: NativeFn) -> Self {
        NativeFunction { name, arity, func }
    }
}

impl fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeFunction")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .finish()
    }
}

impl Function for NativeFunction {
    fn name(&self) -> &str {
        self.name
    }

    fn arity(&self) -> Arity {
        self.arity
    }

    fn invoke(self: Arc<Self>, ctx: &mut ExecutionContext, args: View<'_>) -> Flow {
        (self.func)(ctx, args)
    }

    fn is_native(&self) -> bool {
        true
    }
}
