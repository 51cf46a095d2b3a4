//! Hand-written compiled units for the call/return workloads.

use crate::{
    error::RuntimeError,
    op::BinOp,
    val::{Arity, Val},
    vm::{CompiledUnit, ExecutionContext, Flow, Frame, Layout, coroutine},
};

fn int(value: &Val, unit: &str) -> Result<i64, RuntimeError> {
    value.as_int().ok_or_else(|| {
        RuntimeError::contract(format!("'{unit}' expected an integer, got {}", value.type_name()))
    })
}

fn plus_one(value: &Val) -> Result<Val, RuntimeError> {
    BinOp::Add
        .apply(value, &Val::Int(1))?
        .ok_or_else(|| RuntimeError::Operand {
            action: "perform arithmetic on",
            type_name: value.type_name(),
        })
}

fn bad_index(unit: &str, index: u32) -> RuntimeError {
    RuntimeError::contract(format!("'{unit}' has no segment {index}"))
}

/// `f(self, n)`: `100` when `n == 0`, else `1 + self(self, n - 1)`.
///
/// The packed variant declares no fixed parameters and reads both
/// arguments from its varargs.
#[derive(Debug, Clone, Copy)]
pub struct Recurse {
    pub packed: bool,
}

impl CompiledUnit for Recurse {
    fn name(&self) -> &str {
        if self.packed { "recurse_packed" } else { "recurse_fixed" }
    }

    fn layout(&self) -> Layout {
        if self.packed { Layout::new(0, true, 0) } else { Layout::new(2, false, 2) }
    }

    fn run(&self, ctx: &mut ExecutionContext, frame: &mut Frame<'_>) -> Flow {
        if frame.index() == 0 {
            let (me, n) = if self.packed {
                let args = frame.varargs();
                (args.first().cloned().unwrap_or_default(), args.get(1).cloned().unwrap_or_default())
            } else {
                (frame.get(0), frame.get(1))
            };
            let n = int(&n, self.name())?;
            if n == 0 {
                ctx.results_mut().set_one(Val::Int(100));
                return Ok(());
            }
            frame.call_with(ctx, 1, &me, &[me.clone(), Val::Int(n - 1)])?;
        } else if frame.index() != 1 {
            return Err(bad_index(self.name(), frame.index()).into());
        }
        let inner = ctx.results().get(0)?;
        ctx.results_mut().set_one(plus_one(&inner)?);
        Ok(())
    }
}

/// `step(self, n, acc)`: tail-calls itself down to `n == 0`, returning `acc`.
#[derive(Debug, Clone, Copy)]
pub struct TailStep;

impl CompiledUnit for TailStep {
    fn name(&self) -> &str {
        "tail_step"
    }

    fn layout(&self) -> Layout {
        Layout::new(3, false, 3)
    }

    fn run(&self, ctx: &mut ExecutionContext, frame: &mut Frame<'_>) -> Flow {
        let me = frame.get(0);
        let n = int(&frame.get(1), self.name())?;
        if n == 0 {
            ctx.results_mut().set_one(frame.get(2));
            return Ok(());
        }
        let acc = plus_one(&frame.get(2))?;
        ctx.results_mut().request_tail_call(me.clone(), [me, Val::Int(n - 1), acc]);
        Ok(())
    }
}

/// `bounce(self, other, n, acc)`: tail-calls `other(other, self, n - 1, acc + 1)`.
#[derive(Debug, Clone, Copy)]
pub struct Bounce;

impl CompiledUnit for Bounce {
    fn name(&self) -> &str {
        "bounce"
    }

    fn layout(&self) -> Layout {
        Layout::new(4, false, 4)
    }

    fn run(&self, ctx: &mut ExecutionContext, frame: &mut Frame<'_>) -> Flow {
        let n = int(&frame.get(2), self.name())?;
        if n == 0 {
            ctx.results_mut().set_one(frame.get(3));
            return Ok(());
        }
        let (me, other) = (frame.get(0), frame.get(1));
        let acc = plus_one(&frame.get(3))?;
        ctx.results_mut().request_tail_call(other.clone(), [other, me, Val::Int(n - 1), acc]);
        Ok(())
    }
}

/// `sum(n)`: adds `acc + i + 1` for `i` in `0..n` by staging each call's
/// arguments directly in its own slots.
///
/// Slots: `0` n, `1` i, `2` acc, `3..6` the callee window.
#[derive(Debug, Clone)]
pub struct SharedSum {
    pub add3: Val,
}

impl CompiledUnit for SharedSum {
    fn name(&self) -> &str {
        "shared_sum"
    }

    fn layout(&self) -> Layout {
        Layout::new(1, false, 6)
    }

    fn run(&self, ctx: &mut ExecutionContext, frame: &mut Frame<'_>) -> Flow {
        match frame.index() {
            0 => {
                frame.set(1, Val::Int(0));
                frame.set(2, Val::Int(0));
            }
            1 => {
                let sum = ctx.results().get(0)?;
                let i = int(&frame.get(1), self.name())?;
                frame.set(2, sum);
                frame.set(1, Val::Int(i + 1));
            }
            other => return Err(bad_index(self.name(), other).into()),
        }
        let n = int(&frame.get(0), self.name())?;
        loop {
            let i = int(&frame.get(1), self.name())?;
            if i >= n {
                ctx.results_mut().set_one(frame.get(2));
                return Ok(());
            }
            let acc = frame.get(2);
            frame.set(3, acc);
            frame.set(4, Val::Int(i));
            frame.set(5, Val::Int(1));
            frame.call(ctx, 1, &self.add3, 3, 3)?;
            let sum = ctx.results().get(0)?;
            frame.set(2, sum);
            frame.set(1, Val::Int(i + 1));
        }
    }
}

/// Native `add3(a, b, c)` over integers.
pub fn add3() -> Val {
    Val::native("add3", Arity::fixed(3), |ctx, args| {
        let mut sum = 0i64;
        for i in 0..3 {
            sum += int(&args.get(i), "add3")?;
        }
        ctx.results_mut().set_one(Val::Int(sum));
        Ok(())
    })
}

/// Coroutine body that yields `v + 1` for every `v` it receives, forever.
#[derive(Debug, Clone, Copy)]
pub struct Echo;

impl CompiledUnit for Echo {
    fn name(&self) -> &str {
        "echo"
    }

    fn layout(&self) -> Layout {
        Layout::new(1, false, 1)
    }

    fn run(&self, ctx: &mut ExecutionContext, frame: &mut Frame<'_>) -> Flow {
        let value = match frame.index() {
            0 => frame.get(0),
            1 => ctx.results().get(0)?,
            other => return Err(bad_index(self.name(), other).into()),
        };
        let next = plus_one(&value)?;
        frame.set_index(1);
        coroutine::yield_values(ctx, vec![next])
    }
}
