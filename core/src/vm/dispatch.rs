//! Call and operator dispatch.
//!
//! Every entry takes a scratch [`View`] positioned above the caller's live
//! slots; arguments are staged there and callees build their frames on top
//! of it. Fallbacks to metamethods go through [`call`], so any of these
//! operations may come back with `Err(Unwind::Suspend(..))`.

use tracing::{debug, trace};

use super::{ExecutionContext, Flow, Unwind, View};
use crate::{
    error::RuntimeError,
    op::{BinOp, Event, UnOp},
    val::{Arity, FnRef, Val},
};

/// Invoke `target` with the arguments live in `window` and drain every
/// tail call it requests. On success the result channel holds values.
pub fn call(ctx: &mut ExecutionContext, mut window: View<'_>, target: &Val) -> Flow {
    invoke(ctx, window.reborrow(), target.clone())?;
    drain_tail_calls(ctx, window)
}

/// [`call`] with the arguments copied into `window` first.
pub fn call_with(ctx: &mut ExecutionContext, mut window: View<'_>, target: &Val, args: &[Val]) -> Flow {
    window.load(args);
    call(ctx, window, target)
}

/// [`call`] for natives that cannot be re-entered: a yield below this point
/// fails instead of suspending.
pub fn call_nonresumable(ctx: &mut ExecutionContext, window: View<'_>, target: &Val, boundary: &str) -> Flow {
    ctx.enter_boundary();
    let outcome = call(ctx, window, target);
    ctx.leave_boundary();
    match outcome {
        Err(Unwind::Suspend(_)) => Err(RuntimeError::YieldAcrossBoundary(boundary.to_string()).into()),
        other => other,
    }
}

/// Trampoline: the channel's pending tail call is re-dispatched in place
/// until a call finishes with values.
pub(crate) fn drain_tail_calls(ctx: &mut ExecutionContext, mut window: View<'_>) -> Flow {
    while let Some(target) = ctx.results_mut().take_tail_call() {
        window.load(ctx.results().tail_args());
        trace!(
            target: "tidal::vm::trampoline",
            callee = target.type_name(),
            nargs = window.top(),
            "tail call"
        );
        invoke(ctx, window.reborrow(), target)?;
    }
    Ok(())
}

fn invoke(ctx: &mut ExecutionContext, mut window: View<'_>, target: Val) -> Flow {
    let function = resolve(ctx, &mut window, target)?;
    if let Arity::Fixed(n) = function.arity() {
        window.fit(n as usize);
    }
    trace!(
        target: "tidal::vm::dispatch",
        callee = function.name(),
        nargs = window.top(),
        depth = ctx.depth(),
        "invoke"
    );
    ctx.enter()?;
    let outcome = function.invoke(ctx, window);
    ctx.leave();
    outcome
}

/// Follow `__call` handlers until a function turns up. Each hop passes the
/// previous target as the new first argument. Like `__index` and
/// `__newindex`, at most `max_meta_chain` handlers are followed.
fn resolve(ctx: &ExecutionContext, window: &mut View<'_>, mut target: Val) -> Result<FnRef, RuntimeError> {
    let limit = ctx.state().config().max_meta_chain;
    for hop in 0..=limit {
        let handler = match &target {
            Val::Function(f) => return Ok(f.clone()),
            other => ctx
                .state()
                .metamethod(other, Event::Call)
                .ok_or(RuntimeError::NotCallable {
                    type_name: other.type_name(),
                })?,
        };
        if hop == limit {
            break;
        }
        debug!(
            target: "tidal::vm::slowpath",
            event = %Event::Call,
            operand = target.type_name(),
            "metamethod dispatch"
        );
        window.insert_front(target);
        target = handler;
    }
    Err(RuntimeError::user("'__call' chain too long; possible loop"))
}

fn call_meta(ctx: &mut ExecutionContext, mut window: View<'_>, handler: &Val, args: &[Val]) -> Flow<Val> {
    window.load(args);
    call(ctx, window, handler)?;
    Ok(ctx.results().get(0)?)
}

/// `object[key]`, raw for tables that hold the key, `__index` otherwise.
pub fn index(ctx: &mut ExecutionContext, mut scratch: View<'_>, object: &Val, key: &Val) -> Flow<Val> {
    let limit = ctx.state().config().max_meta_chain;
    let mut current = object.clone();
    for hop in 0..=limit {
        let handler = match &current {
            Val::Table(t) => {
                let value = t.get(key);
                if !value.is_nil() {
                    return Ok(value);
                }
                match t.metamethod(Event::Index) {
                    Some(handler) => handler,
                    None => return Ok(Val::Nil),
                }
            }
            other => ctx
                .state()
                .metamethod(other, Event::Index)
                .ok_or(RuntimeError::Index {
                    type_name: other.type_name(),
                })?,
        };
        if hop == limit {
            break;
        }
        debug!(
            target: "tidal::vm::slowpath",
            event = %Event::Index,
            object = current.type_name(),
            key = key.type_name(),
            "metamethod dispatch"
        );
        if let Val::Function(_) = handler {
            return call_meta(ctx, scratch.reborrow(), &handler, &[current, key.clone()]);
        }
        current = handler;
    }
    Err(RuntimeError::user("'__index' chain too long; possible loop").into())
}

/// `object[key] = value`, raw when the key is present or no `__newindex` exists.
pub fn newindex(ctx: &mut ExecutionContext, mut scratch: View<'_>, object: &Val, key: Val, value: Val) -> Flow {
    let limit = ctx.state().config().max_meta_chain;
    let mut current = object.clone();
    for hop in 0..=limit {
        let handler = match &current {
            Val::Table(t) => {
                if !t.get(&key).is_nil() {
                    t.set(key, value)?;
                    return Ok(());
                }
                match t.metamethod(Event::NewIndex) {
                    Some(handler) => handler,
                    None => {
                        t.set(key, value)?;
                        return Ok(());
                    }
                }
            }
            other => ctx
                .state()
                .metamethod(other, Event::NewIndex)
                .ok_or(RuntimeError::Index {
                    type_name: other.type_name(),
                })?,
        };
        if hop == limit {
            break;
        }
        debug!(
            target: "tidal::vm::slowpath",
            event = %Event::NewIndex,
            object = current.type_name(),
            key = key.type_name(),
            "metamethod dispatch"
        );
        if let Val::Function(_) = handler {
            scratch.load(&[current, key, value]);
            return call(ctx, scratch, &handler);
        }
        current = handler;
    }
    Err(RuntimeError::user("'__newindex' chain too long; possible loop").into())
}

/// Binary operator: intrinsic when the operands allow it, else the first
/// operand's handler, else the second's.
pub fn arith(ctx: &mut ExecutionContext, scratch: View<'_>, op: BinOp, lhs: &Val, rhs: &Val) -> Flow<Val> {
    if let Some(value) = op.apply(lhs, rhs)? {
        return Ok(value);
    }
    let event = op.event();
    let handler = ctx
        .state()
        .metamethod(lhs, event)
        .or_else(|| ctx.state().metamethod(rhs, event));
    let Some(handler) = handler else {
        return Ok(op.missing_handler(lhs, rhs)?);
    };
    debug!(
        target: "tidal::vm::slowpath",
        event = %event,
        lhs = lhs.type_name(),
        rhs = rhs.type_name(),
        "metamethod dispatch"
    );
    let raw = call_meta(ctx, scratch, &handler, &[lhs.clone(), rhs.clone()])?;
    Ok(op.finish_meta(raw))
}

pub fn unary(ctx: &mut ExecutionContext, scratch: View<'_>, op: UnOp, operand: &Val) -> Flow<Val> {
    if let Some(value) = op.apply(operand)? {
        return Ok(value);
    }
    let handler = op.event().and_then(|event| ctx.state().metamethod(operand, event));
    let Some(handler) = handler else {
        return Ok(op.missing_handler(operand)?);
    };
    debug!(
        target: "tidal::vm::slowpath",
        op = %op,
        operand = operand.type_name(),
        "metamethod dispatch"
    );
    call_meta(ctx, scratch, &handler, &[operand.clone(), operand.clone()])
}
