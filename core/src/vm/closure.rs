//! Interpreter for [`Proto`] bodies under the compiled-unit contract.
//!
//! The resumption index of the op at `pc` is `pc + 1`; index 0 stays the
//! entry segment. Resuming completes the interrupted op from the result
//! channel, exactly as the fresh path completes it, then continues.

use std::{fmt, sync::Arc};

use parking_lot::Mutex;

use super::{
    Compiled, CompiledUnit, ExecutionContext, Flow, Frame, Layout, Slot,
    bytecode::{Capture, Count, Op, Proto, Reg},
    dispatch,
};
use crate::{
    error::RuntimeError,
    op::UnOp,
    val::{TableRef, Upvalue, Val},
};

pub struct ProtoUnit {
    proto: Arc<Proto>,
    upvalues: Mutex<Vec<Upvalue>>,
}

/// Closure value over `proto` with the given captured cells.
pub fn closure(proto: Arc<Proto>, upvalues: Vec<Upvalue>) -> Val {
    Compiled::into_value(ProtoUnit::new(proto, upvalues))
}

impl ProtoUnit {
    /// Missing upvalues are filled with fresh nil cells.
    pub fn new(proto: Arc<Proto>, mut upvalues: Vec<Upvalue>) -> Self {
        upvalues.resize_with(proto.upvalues.len(), Upvalue::default);
        ProtoUnit {
            proto,
            upvalues: Mutex::new(upvalues),
        }
    }

    pub fn proto(&self) -> &Arc<Proto> {
        &self.proto
    }

    fn cell(&self, idx: u16) -> Result<Upvalue, RuntimeError> {
        self.upvalues.lock().get(idx as usize).cloned().ok_or_else(|| {
            RuntimeError::contract(format!("'{}' has no upvalue {idx}", self.proto.name))
        })
    }

    /// Resolve `count` values starting at `base` against the frame's live top.
    fn span(frame: &Frame<'_>, base: Reg, count: Count) -> (usize, usize) {
        let base = base as usize;
        match count {
            Count::Fixed(n) => (base, base + n as usize),
            Count::Open => (base, frame.view_ref().top().max(base)),
        }
    }

    fn make_closure(&self, frame: &Frame<'_>, idx: u16) -> Result<Val, RuntimeError> {
        let child = self.proto.protos.get(idx as usize).cloned().ok_or_else(|| {
            RuntimeError::contract(format!("'{}' has no nested proto {idx}", self.proto.name))
        })?;
        let mut cells = Vec::with_capacity(child.upvalues.len());
        for desc in &child.upvalues {
            let cell = match desc.capture {
                Capture::Slot(slot) => frame.view_ref().cell(slot as usize).ok_or_else(|| {
                    RuntimeError::contract(format!(
                        "'{}' captures slot {slot} of '{}', which was never reified",
                        child.name, self.proto.name
                    ))
                })?,
                Capture::Upvalue(i) => self.cell(i)?,
            };
            cells.push(cell);
        }
        Ok(closure(child, cells))
    }

    /// Store the outcome of the op at `pc`, which has just finished with its
    /// results in the channel.
    fn complete(&self, ctx: &mut ExecutionContext, frame: &mut Frame<'_>, pc: usize) -> Flow {
        let op = self.proto.code.get(pc).copied().ok_or_else(|| {
            RuntimeError::contract(format!("'{}' resumed past its code at pc {pc}", self.proto.name))
        })?;
        match op {
            Op::Call { func, results, .. } => {
                let func = func as usize;
                match results {
                    Count::Fixed(n) => {
                        for i in 0..n as usize {
                            frame.set(func + i, ctx.results().get(i)?);
                        }
                    }
                    Count::Open => {
                        let values = ctx.results().values()?;
                        for (i, value) in values.iter().enumerate() {
                            frame.set(func + i, value.clone());
                        }
                        frame.view().set_top(func + values.len());
                    }
                }
            }
            Op::Binary { op, dst, .. } => {
                let raw = ctx.results().get(0)?;
                frame.set(dst as usize, op.finish_meta(raw));
            }
            Op::Unary { op, dst, .. } if op != UnOp::Not => frame.set(dst as usize, ctx.results().get(0)?),
            Op::Index { dst, .. } | Op::GetGlobal { dst, .. } => frame.set(dst as usize, ctx.results().get(0)?),
            Op::NewIndex { .. } | Op::SetGlobal { .. } => {}
            other => {
                return Err(RuntimeError::contract(format!(
                    "'{}' resumed at pc {pc} into {other:?}, which cannot suspend",
                    self.proto.name
                ))
                .into());
            }
        }
        Ok(())
    }
}

impl fmt::Debug for ProtoUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProtoUnit")
            .field("name", &self.proto.name)
            .field("upvalues", &self.proto.upvalues.len())
            .finish()
    }
}

impl CompiledUnit for ProtoUnit {
    fn name(&self) -> &str {
        &self.proto.name
    }

    fn layout(&self) -> Layout {
        self.proto.layout()
    }

    fn run(&self, ctx: &mut ExecutionContext, frame: &mut Frame<'_>) -> Flow {
        let proto = &*self.proto;
        let mut pc = match frame.index() {
            0 => {
                for slot in 0..proto.params {
                    if proto.is_reified(slot) {
                        frame.view().reify(slot);
                    }
                }
                0
            }
            index => {
                let at = index as usize - 1;
                self.complete(ctx, frame, at)?;
                at + 1
            }
        };

        loop {
            let Some(&op) = proto.code.get(pc) else {
                // falling off the end returns nothing
                ctx.results_mut().clear();
                return Ok(());
            };
            pc += 1;
            match op {
                Op::Nil { dst } => frame.set(dst as usize, Val::Nil),
                Op::Bool { dst, value } => frame.set(dst as usize, Val::Bool(value)),
                Op::Const { dst, idx } => {
                    let value = proto.constants.get(idx as usize).cloned().unwrap_or_default();
                    frame.set(dst as usize, value);
                }
                Op::Move { dst, src } => {
                    let value = frame.get(src as usize);
                    frame.set(dst as usize, value);
                }
                Op::VarInit { var, src } => {
                    let value = frame.get(src as usize);
                    frame.view().set_slot(var as usize, Slot::Cell(Upvalue::new(value)));
                }
                Op::VarStore { var, src } => {
                    let value = frame.get(src as usize);
                    frame.view().store(var as usize, value);
                }
                Op::GetUpval { dst, idx } => {
                    let value = self.cell(idx)?.get();
                    frame.set(dst as usize, value);
                }
                Op::SetUpval { idx, src } => self.cell(idx)?.set(frame.get(src as usize)),
                Op::Closure { dst, proto: idx } => {
                    let value = self.make_closure(frame, idx)?;
                    frame.set(dst as usize, value);
                }
                Op::NewTable { dst } => frame.set(dst as usize, Val::Table(TableRef::new())),
                Op::Append { table, base, count, first } => {
                    let Val::Table(t) = frame.get(table as usize) else {
                        return Err(RuntimeError::contract(format!(
                            "'{}' pc {}: append target is not a table",
                            proto.name,
                            pc - 1
                        ))
                        .into());
                    };
                    let (start, end) = Self::span(frame, base, count);
                    t.set_list(first as i64, frame.view_ref().values(start, end))?;
                }
                Op::GetGlobal { dst, name } => {
                    let key = proto.constants.get(name as usize).cloned().unwrap_or_default();
                    let globals = Val::Table(ctx.globals().clone());
                    frame.set_index(pc as u32);
                    let value = dispatch::index(ctx, frame.scratch(), &globals, &key)?;
                    frame.set(dst as usize, value);
                }
                Op::SetGlobal { name, src } => {
                    let key = proto.constants.get(name as usize).cloned().unwrap_or_default();
                    let globals = Val::Table(ctx.globals().clone());
                    let value = frame.get(src as usize);
                    frame.set_index(pc as u32);
                    dispatch::newindex(ctx, frame.scratch(), &globals, key, value)?;
                }
                Op::Index { dst, object, key } => {
                    let (object, key) = (frame.get(object as usize), frame.get(key as usize));
                    frame.set_index(pc as u32);
                    let value = dispatch::index(ctx, frame.scratch(), &object, &key)?;
                    frame.set(dst as usize, value);
                }
                Op::NewIndex { object, key, value } => {
                    let object = frame.get(object as usize);
                    let (key, value) = (frame.get(key as usize), frame.get(value as usize));
                    frame.set_index(pc as u32);
                    dispatch::newindex(ctx, frame.scratch(), &object, key, value)?;
                }
                Op::Binary { op, dst, lhs, rhs } => {
                    let (lhs, rhs) = (frame.get(lhs as usize), frame.get(rhs as usize));
                    frame.set_index(pc as u32);
                    let value = dispatch::arith(ctx, frame.scratch(), op, &lhs, &rhs)?;
                    frame.set(dst as usize, value);
                }
                Op::Unary { op: UnOp::Not, dst, src } => {
                    let value = !frame.get(src as usize).truthy();
                    frame.set(dst as usize, Val::Bool(value));
                }
                Op::Unary { op, dst, src } => {
                    let operand = frame.get(src as usize);
                    frame.set_index(pc as u32);
                    let value = dispatch::unary(ctx, frame.scratch(), op, &operand)?;
                    frame.set(dst as usize, value);
                }
                Op::Jump { to } => pc = to as usize,
                Op::Test { cond, when, to } => {
                    if frame.get(cond as usize).truthy() == when {
                        pc = to as usize;
                    }
                }
                Op::Call { func, args, .. } => {
                    let target = frame.get(func as usize);
                    let (start, end) = Self::span(frame, func + 1, args);
                    frame.call(ctx, pc as u32, &target, start, end - start)?;
                    self.complete(ctx, frame, pc - 1)?;
                }
                Op::TailCall { func, args } => {
                    let target = frame.get(func as usize);
                    let (start, end) = Self::span(frame, func + 1, args);
                    ctx.results_mut().request_tail_call(target, frame.view_ref().values(start, end));
                    return Ok(());
                }
                Op::Return { base, count } => {
                    let (start, end) = Self::span(frame, base, count);
                    ctx.results_mut().set(frame.view_ref().values(start, end));
                    return Ok(());
                }
                Op::Vararg { dst, count } => {
                    let dst = dst as usize;
                    match count {
                        Count::Fixed(n) => {
                            for i in 0..n as usize {
                                let value = frame.varargs().get(i).cloned().unwrap_or_default();
                                frame.set(dst + i, value);
                            }
                        }
                        Count::Open => {
                            let values = frame.varargs().to_vec();
                            let len = values.len();
                            for (i, value) in values.into_iter().enumerate() {
                                frame.set(dst + i, value);
                            }
                            frame.view().set_top(dst + len);
                        }
                    }
                }
            }
        }
    }

    fn upvalue_count(&self) -> usize {
        self.proto.upvalues.len()
    }

    fn upvalue(&self, index: usize) -> Option<(Arc<str>, Upvalue)> {
        let name = self.proto.upvalues.get(index)?.name.clone();
        let cell = self.upvalues.lock().get(index)?.clone();
        Some((name, cell))
    }

    fn replace_upvalue(&self, index: usize, cell: Upvalue) -> bool {
        match self.upvalues.lock().get_mut(index) {
            Some(slot) => {
                *slot = cell;
                true
            }
            None => false,
        }
    }
}
