//! Register-machine form of a compiled function, as produced by the front end.
//!
//! Registers are frame slots. Ops that may reach a metamethod (or call
//! anything) are suspension points; an interpreted frame persists `pc + 1`
//! as its resumption index before each of them.

use std::sync::Arc;

use super::Layout;
use crate::{
    error::RuntimeError,
    op::{BinOp, UnOp},
    val::Val,
};

pub type Reg = u16;

/// Value count of a multi-value operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Count {
    Fixed(u16),
    /// Up to the frame's live top, as left by the preceding `Call` or
    /// `Vararg` with `Open` results. Nothing that may suspend sits between
    /// such a producer and its consumer.
    Open,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Op {
    Nil { dst: Reg },
    Bool { dst: Reg, value: bool },
    Const { dst: Reg, idx: u16 },
    /// Flat copy; reading a reified slot reads its cell.
    Move { dst: Reg, src: Reg },
    /// Give `var` a fresh cell holding the value of `src`.
    VarInit { var: Reg, src: Reg },
    /// Write through the cell of `var`.
    VarStore { var: Reg, src: Reg },
    GetUpval { dst: Reg, idx: u16 },
    SetUpval { idx: u16, src: Reg },
    Closure { dst: Reg, proto: u16 },
    NewTable { dst: Reg },
    /// Raw `table[first + i] = R[base + i]`.
    Append { table: Reg, base: Reg, count: Count, first: u32 },
    GetGlobal { dst: Reg, name: u16 },
    SetGlobal { name: u16, src: Reg },
    Index { dst: Reg, object: Reg, key: Reg },
    NewIndex { object: Reg, key: Reg, value: Reg },
    Binary { op: BinOp, dst: Reg, lhs: Reg, rhs: Reg },
    Unary { op: UnOp, dst: Reg, src: Reg },
    Jump { to: u32 },
    /// Jump when the truthiness of `cond` equals `when`.
    Test { cond: Reg, when: bool, to: u32 },
    /// Call `R[func]` with arguments from `func + 1`; results land from `func`.
    Call { func: Reg, args: Count, results: Count },
    TailCall { func: Reg, args: Count },
    Return { base: Reg, count: Count },
    Vararg { dst: Reg, count: Count },
}

impl Op {
    pub fn may_suspend(&self) -> bool {
        match self {
            Op::GetGlobal { .. } | Op::SetGlobal { .. } | Op::Index { .. } | Op::NewIndex { .. } => true,
            Op::Binary { .. } | Op::Call { .. } => true,
            Op::Unary { op, .. } => *op != UnOp::Not,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capture {
    /// Reified slot of the enclosing frame.
    Slot(Reg),
    /// Upvalue of the enclosing function.
    Upvalue(u16),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpvalueDesc {
    pub name: Arc<str>,
    pub capture: Capture,
}

#[derive(Debug, Clone, Default)]
pub struct Proto {
    pub name: Arc<str>,
    pub params: usize,
    pub vararg: bool,
    pub slots: usize,
    /// Per-slot flag: captured by a nested closure.
    pub reified: Vec<bool>,
    pub constants: Vec<Val>,
    pub code: Vec<Op>,
    pub protos: Vec<Arc<Proto>>,
    pub upvalues: Vec<UpvalueDesc>,
}

impl Proto {
    pub fn layout(&self) -> Layout {
        Layout::new(self.params, self.vararg, self.slots)
    }

    pub fn is_reified(&self, slot: usize) -> bool {
        self.reified.get(slot).copied().unwrap_or(false)
    }

    /// Check every operand against the declared frame shape.
    pub fn validate(&self) -> Result<(), RuntimeError> {
        let bad = |pc: usize, what: &str| RuntimeError::contract(format!("'{}' pc {pc}: {what}", self.name));
        let reg = |pc: usize, r: Reg| {
            if (r as usize) < self.slots { Ok(()) } else { Err(bad(pc, &format!("register {r} out of range"))) }
        };
        let span = |pc: usize, base: Reg, count: Count| match count {
            Count::Fixed(n) if base as usize + n as usize > self.slots => {
                Err(bad(pc, &format!("registers {base}..{} out of range", base as usize + n as usize)))
            }
            _ if base as usize > self.slots => Err(bad(pc, &format!("register {base} out of range"))),
            _ => Ok(()),
        };
        let constant = |pc: usize, idx: u16| {
            if (idx as usize) < self.constants.len() { Ok(()) } else { Err(bad(pc, &format!("constant {idx} out of range"))) }
        };
        let name = |pc: usize, idx: u16| match self.constants.get(idx as usize) {
            Some(Val::Str(_)) => Ok(()),
            _ => Err(bad(pc, &format!("constant {idx} is not a string"))),
        };
        let upvalue = |pc: usize, idx: u16| {
            if (idx as usize) < self.upvalues.len() { Ok(()) } else { Err(bad(pc, &format!("upvalue {idx} out of range"))) }
        };
        let target = |pc: usize, to: u32| {
            if (to as usize) <= self.code.len() { Ok(()) } else { Err(bad(pc, &format!("jump target {to} out of range"))) }
        };

        if self.params > self.slots {
            return Err(RuntimeError::contract(format!(
                "'{}' declares {} params in {} slots",
                self.name, self.params, self.slots
            )));
        }

        for (pc, op) in self.code.iter().enumerate() {
            match *op {
                Op::Nil { dst } | Op::Bool { dst, .. } | Op::NewTable { dst } => reg(pc, dst)?,
                Op::Const { dst, idx } => {
                    reg(pc, dst)?;
                    constant(pc, idx)?;
                }
                Op::Move { dst, src } => {
                    reg(pc, dst)?;
                    reg(pc, src)?;
                }
                Op::VarInit { var, src } | Op::VarStore { var, src } => {
                    reg(pc, var)?;
                    reg(pc, src)?;
                    if !self.is_reified(var as usize) {
                        return Err(bad(pc, &format!("slot {var} is not reified")));
                    }
                }
                Op::GetUpval { dst, idx } => {
                    reg(pc, dst)?;
                    upvalue(pc, idx)?;
                }
                Op::SetUpval { idx, src } => {
                    reg(pc, src)?;
                    upvalue(pc, idx)?;
                }
                Op::Closure { dst, proto } => {
                    reg(pc, dst)?;
                    let child = self
                        .protos
                        .get(proto as usize)
                        .ok_or_else(|| bad(pc, &format!("proto {proto} out of range")))?;
                    for desc in &child.upvalues {
                        match desc.capture {
                            Capture::Slot(slot) => {
                                reg(pc, slot)?;
                                if !self.is_reified(slot as usize) {
                                    return Err(bad(pc, &format!("captured slot {slot} is not reified")));
                                }
                            }
                            Capture::Upvalue(idx) => upvalue(pc, idx)?,
                        }
                    }
                }
                Op::Append { table, base, count, .. } => {
                    reg(pc, table)?;
                    span(pc, base, count)?;
                }
                Op::GetGlobal { dst, name: idx } => {
                    reg(pc, dst)?;
                    name(pc, idx)?;
                }
                Op::SetGlobal { name: idx, src } => {
                    reg(pc, src)?;
                    name(pc, idx)?;
                }
                Op::Index { dst, object, key } => {
                    reg(pc, dst)?;
                    reg(pc, object)?;
                    reg(pc, key)?;
                }
                Op::NewIndex { object, key, value } => {
                    reg(pc, object)?;
                    reg(pc, key)?;
                    reg(pc, value)?;
                }
                Op::Binary { dst, lhs, rhs, .. } => {
                    reg(pc, dst)?;
                    reg(pc, lhs)?;
                    reg(pc, rhs)?;
                }
                Op::Unary { dst, src, .. } => {
                    reg(pc, dst)?;
                    reg(pc, src)?;
                }
                Op::Jump { to } => target(pc, to)?,
                Op::Test { cond, to, .. } => {
                    reg(pc, cond)?;
                    target(pc, to)?;
                }
                Op::Call { func, args, results } => {
                    reg(pc, func)?;
                    span(pc, func + 1, args)?;
                    span(pc, func, results)?;
                }
                Op::TailCall { func, args } => {
                    reg(pc, func)?;
                    span(pc, func + 1, args)?;
                }
                Op::Return { base, count } => span(pc, base, count)?,
                Op::Vararg { dst, count } => {
                    if !self.vararg {
                        return Err(bad(pc, "vararg access in a fixed-arity function"));
                    }
                    span(pc, dst, count)?;
                }
            }
        }
        self.protos.iter().try_for_each(|child| child.validate())
    }
}

/// Incremental construction of a [`Proto`], validated on [`ProtoBuilder::build`].
#[derive(Debug, Default)]
pub struct ProtoBuilder {
    proto: Proto,
}

impl ProtoBuilder {
    pub fn new(name: &str) -> Self {
        ProtoBuilder {
            proto: Proto {
                name: name.into(),
                ..Proto::default()
            },
        }
    }

    pub fn params(&mut self, params: usize) -> &mut Self {
        self.proto.params = params;
        self
    }

    pub fn vararg(&mut self) -> &mut Self {
        self.proto.vararg = true;
        self
    }

    pub fn slots(&mut self, slots: usize) -> &mut Self {
        self.proto.slots = slots;
        self
    }

    /// Mark `slot` as captured by a nested closure.
    pub fn reify(&mut self, slot: usize) -> &mut Self {
        if self.proto.reified.len() <= slot {
            self.proto.reified.resize(slot + 1, false);
        }
        self.proto.reified[slot] = true;
        self
    }

    pub fn capture(&mut self, name: &str, capture: Capture) -> &mut Self {
        self.proto.upvalues.push(UpvalueDesc {
            name: name.into(),
            capture,
        });
        self
    }

    /// Index of the new constant. Past `u16::MAX` the index wraps and
    /// [`ProtoBuilder::build`] rejects the proto.
    pub fn constant(&mut self, value: impl Into<Val>) -> u16 {
        self.proto.constants.push(value.into());
        (self.proto.constants.len() - 1) as u16
    }

    pub fn child(&mut self, proto: Arc<Proto>) -> u16 {
        self.proto.protos.push(proto);
        (self.proto.protos.len() - 1) as u16
    }

    /// Append `op`, returning its pc.
    pub fn emit(&mut self, op: Op) -> u32 {
        self.proto.code.push(op);
        (self.proto.code.len() - 1) as u32
    }

    /// pc of the next op to be emitted.
    pub fn here(&self) -> u32 {
        self.proto.code.len() as u32
    }

    /// Point the `Jump`/`Test` at `at` to `to`.
    pub fn patch(&mut self, at: u32, to: u32) {
        match self.proto.code.get_mut(at as usize) {
            Some(Op::Jump { to: target }) | Some(Op::Test { to: target, .. }) => *target = to,
            _ => {}
        }
    }

    pub fn build(self) -> Result<Arc<Proto>, RuntimeError> {
        const ADDRESSABLE: usize = u16::MAX as usize + 1;
        let tables = [
            ("constants", self.proto.constants.len()),
            ("nested protos", self.proto.protos.len()),
            ("upvalues", self.proto.upvalues.len()),
        ];
        if let Some((what, len)) = tables.into_iter().find(|&(_, len)| len > ADDRESSABLE) {
            return Err(RuntimeError::contract(format!(
                "'{}' has {len} {what}, more than {ADDRESSABLE} addressable",
                self.proto.name
            )));
        }
        self.proto.validate()?;
        Ok(Arc::new(self.proto))
    }
}
