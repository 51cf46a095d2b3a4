pub(super) use std::sync::Arc;

pub(super) use parking_lot::Mutex;

pub(super) use crate::{
    error::RuntimeError,
    op::{BinOp, UnOp},
    perf::{scenarios, units},
    rt::Runtime,
    val::{Arity, FnRef, Function, TableRef, Val},
    vm::{
        Capture, Compiled, CompiledUnit, Coroutine, CoroutineRef, CoroutineStatus, Count, ExecutionContext, Flow,
        Frame, Layout, Op, Proto, ProtoBuilder, ResumeChain, ResumeOutcome, ResumePoint, SavedFrame, Unwind, View,
        closure, coroutine, dispatch, native,
    },
};

pub(super) type Log = Arc<Mutex<Vec<String>>>;

/// Native that yields its arguments.
pub(super) fn yield_fn() -> Val {
    Val::native("yield", Arity::Variadic, |ctx, args| coroutine::yield_values(ctx, args.values_from(0)))
}

/// Resume `co` from the runtime's root and collect what it handed back.
pub(super) fn resume(
    runtime: &mut Runtime,
    co: &CoroutineRef,
    args: Vec<Val>,
) -> Result<(ResumeOutcome, Vec<Val>), RuntimeError> {
    let (ctx, view) = runtime.parts();
    let outcome = coroutine::resume(ctx, view, co, args)?;
    Ok((outcome, ctx.results().to_vec()?))
}

mod calls;
mod coroutines;
mod protos;
mod suspension;
