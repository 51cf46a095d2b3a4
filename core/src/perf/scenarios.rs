use std::sync::Arc;

use anyhow::{Context, Result, anyhow};

use super::units::{Bounce, Echo, Recurse, SharedSum, TailStep, add3};
use crate::{
    op::{BinOp, Event},
    rt::{Runtime, RuntimeConfig},
    val::{Arity, TableRef, Val},
    vm::{Compiled, Coroutine, Count, Op, Proto, ProtoBuilder, closure, coroutine, native},
};

pub struct ScenarioOutcome {
    pub value: Val,
    /// Activation stack capacity after the run.
    pub stack_slots: usize,
}

#[derive(Clone, Debug)]
pub struct PreparedScenario {
    scenario: &'static Scenario,
    workload: Workload,
    config: RuntimeConfig,
}

impl PreparedScenario {
    pub fn key(&self) -> &'static str {
        self.scenario.key
    }

    pub fn title(&self) -> &'static str {
        self.scenario.title
    }

    pub fn bench_case_name(&self) -> String {
        format!("{}_call", self.scenario.key)
    }

    pub fn run(&self) -> Result<ScenarioOutcome> {
        let mut runtime = Runtime::with_config(self.config.clone());
        self.run_with(&mut runtime)
    }

    pub fn run_with(&self, runtime: &mut Runtime) -> Result<ScenarioOutcome> {
        let value = self
            .workload
            .execute(runtime)
            .with_context(|| format!("scenario '{}' failed", self.scenario.key))?;
        self.scenario.expected.verify(&value)?;
        Ok(ScenarioOutcome {
            value,
            stack_slots: runtime.stack_capacity(),
        })
    }
}

#[derive(Clone, Debug)]
enum Workload {
    Call {
        target: Val,
        args: Vec<Val>,
        globals: Vec<(&'static str, Val)>,
    },
    /// Resume a coroutine over `body` `rounds` times, feeding each yielded
    /// value back in.
    PingPong { body: Val, rounds: i64 },
}

impl Workload {
    fn execute(&self, runtime: &mut Runtime) -> Result<Val> {
        match self {
            Workload::Call { target, args, globals } => {
                for (name, value) in globals {
                    runtime.set_global(name, value.clone());
                }
                Ok(runtime.call1(target, args)?)
            }
            Workload::PingPong { body, rounds } => {
                let co = Coroutine::new(body.clone());
                let (ctx, mut view) = runtime.parts();
                let mut value = Val::Int(0);
                for _ in 0..*rounds {
                    coroutine::resume(ctx, view.reborrow(), &co, vec![value])?;
                    value = ctx.results().get(0)?;
                }
                Ok(value)
            }
        }
    }
}

#[derive(Debug)]
struct Scenario {
    key: &'static str,
    title: &'static str,
    expected: ExpectedValue,
    prepare: fn() -> Result<Workload>,
}

#[derive(Clone, Copy, Debug)]
enum ExpectedValue {
    Int(i64),
}

impl ExpectedValue {
    fn verify(&self, actual: &Val) -> Result<()> {
        let ExpectedValue::Int(v) = *self;
        if actual == &Val::Int(v) {
            Ok(())
        } else {
            Err(anyhow!("expected {:?} but observed {:?}", self, actual))
        }
    }
}

const RECURSION_DEPTH: i64 = 20;
const TAIL_ITERATIONS: i64 = 100_000;
const TAIL_CHAIN_DEPTH: i64 = 1_000_000;
const SHARED_STACK_CALLS: i64 = 1_000;
const PING_PONG_ROUNDS: i64 = 10_000;
const META_ADD_ITERATIONS: i64 = 1_000;

static SCENARIOS: &[Scenario] = &[
    Scenario {
        key: "recurse_fixed",
        title: "Recursive call, fixed-arity entry",
        expected: ExpectedValue::Int(100 + RECURSION_DEPTH),
        prepare: prepare_recurse_fixed,
    },
    Scenario {
        key: "recurse_packed",
        title: "Recursive call, packed-argument entry",
        expected: ExpectedValue::Int(100 + RECURSION_DEPTH),
        prepare: prepare_recurse_packed,
    },
    Scenario {
        key: "recurse_proto",
        title: "Recursive call through interpreted bytecode",
        expected: ExpectedValue::Int(100 + RECURSION_DEPTH),
        prepare: prepare_recurse_proto,
    },
    Scenario {
        key: "tail_call",
        title: "Mutual tail calls (n -> acc)",
        expected: ExpectedValue::Int(TAIL_ITERATIONS),
        prepare: prepare_tail_call,
    },
    Scenario {
        key: "self_tail_call",
        title: "Self-recursive tail call through a global",
        expected: ExpectedValue::Int(TAIL_ITERATIONS),
        prepare: prepare_self_tail_call,
    },
    Scenario {
        key: "tail_chain",
        title: "One million chained tail calls",
        expected: ExpectedValue::Int(TAIL_CHAIN_DEPTH),
        prepare: prepare_tail_chain,
    },
    Scenario {
        key: "shared_stack",
        title: "Arguments staged in place on the shared stack",
        expected: ExpectedValue::Int(SHARED_STACK_CALLS * (SHARED_STACK_CALLS + 1) / 2),
        prepare: prepare_shared_stack,
    },
    Scenario {
        key: "coroutine_ping_pong",
        title: "Coroutine resume/yield round trips",
        expected: ExpectedValue::Int(PING_PONG_ROUNDS),
        prepare: prepare_ping_pong,
    },
    Scenario {
        key: "meta_add",
        title: "Arithmetic dispatched to __add",
        expected: ExpectedValue::Int(META_ADD_ITERATIONS),
        prepare: prepare_meta_add,
    },
];

fn prepare_recurse_fixed() -> Result<Workload> {
    Ok(self_call(Compiled::into_value(Recurse { packed: false }), RECURSION_DEPTH))
}

fn prepare_recurse_packed() -> Result<Workload> {
    Ok(self_call(Compiled::into_value(Recurse { packed: true }), RECURSION_DEPTH))
}

fn prepare_recurse_proto() -> Result<Workload> {
    Ok(self_call(closure(recurse_proto()?, Vec::new()), RECURSION_DEPTH))
}

fn prepare_tail_call() -> Result<Workload> {
    let (ping, pong) = (Compiled::into_value(Bounce), Compiled::into_value(Bounce));
    Ok(Workload::Call {
        target: ping.clone(),
        args: vec![ping, pong, Val::Int(TAIL_ITERATIONS), Val::Int(0)],
        globals: Vec::new(),
    })
}

fn prepare_self_tail_call() -> Result<Workload> {
    let count = closure(count_proto()?, Vec::new());
    Ok(Workload::Call {
        target: count.clone(),
        args: vec![Val::Int(TAIL_ITERATIONS), Val::Int(0)],
        globals: vec![("count", count)],
    })
}

fn prepare_tail_chain() -> Result<Workload> {
    let step = Compiled::into_value(TailStep);
    Ok(Workload::Call {
        target: step.clone(),
        args: vec![step, Val::Int(TAIL_CHAIN_DEPTH), Val::Int(0)],
        globals: Vec::new(),
    })
}

fn prepare_shared_stack() -> Result<Workload> {
    Ok(Workload::Call {
        target: Compiled::into_value(SharedSum { add3: add3() }),
        args: vec![Val::Int(SHARED_STACK_CALLS)],
        globals: Vec::new(),
    })
}

fn prepare_ping_pong() -> Result<Workload> {
    Ok(Workload::PingPong {
        body: Compiled::into_value(Echo),
        rounds: PING_PONG_ROUNDS,
    })
}

fn prepare_meta_add() -> Result<Workload> {
    Ok(Workload::Call {
        target: closure(meta_add_proto()?, Vec::new()),
        args: vec![Val::Int(META_ADD_ITERATIONS)],
        globals: vec![("counter", counter_object())],
    })
}

fn self_call(function: Val, n: i64) -> Workload {
    Workload::Call {
        target: function.clone(),
        args: vec![function, Val::Int(n)],
        globals: Vec::new(),
    }
}

/// `f(self, n)` as bytecode: `if n == 0 then return 100 end return self(self, n - 1) + 1`.
pub fn recurse_proto() -> Result<Arc<Proto>> {
    let mut b = ProtoBuilder::new("recurse_proto");
    b.params(2).slots(5);
    let zero = b.constant(0);
    let hundred = b.constant(100);
    let one = b.constant(1);
    b.emit(Op::Const { dst: 2, idx: zero });
    b.emit(Op::Binary { op: BinOp::Eq, dst: 2, lhs: 1, rhs: 2 });
    let test = b.emit(Op::Test { cond: 2, when: false, to: 0 });
    b.emit(Op::Const { dst: 2, idx: hundred });
    b.emit(Op::Return { base: 2, count: Count::Fixed(1) });
    let recurse = b.here();
    b.patch(test, recurse);
    b.emit(Op::Move { dst: 2, src: 0 });
    b.emit(Op::Move { dst: 3, src: 0 });
    b.emit(Op::Const { dst: 4, idx: one });
    b.emit(Op::Binary { op: BinOp::Sub, dst: 4, lhs: 1, rhs: 4 });
    b.emit(Op::Call { func: 2, args: Count::Fixed(2), results: Count::Fixed(1) });
    b.emit(Op::Const { dst: 3, idx: one });
    b.emit(Op::Binary { op: BinOp::Add, dst: 2, lhs: 2, rhs: 3 });
    b.emit(Op::Return { base: 2, count: Count::Fixed(1) });
    b.build().context("build recurse_proto")
}

/// `count(n, acc)`: `if n == 0 then return acc end return count(n - 1, acc + 1)`.
pub fn count_proto() -> Result<Arc<Proto>> {
    let mut b = ProtoBuilder::new("count");
    b.params(2).slots(5);
    let zero = b.constant(0);
    let one = b.constant(1);
    let name = b.constant("count");
    b.emit(Op::Const { dst: 2, idx: zero });
    b.emit(Op::Binary { op: BinOp::Eq, dst: 2, lhs: 0, rhs: 2 });
    let test = b.emit(Op::Test { cond: 2, when: false, to: 0 });
    b.emit(Op::Return { base: 1, count: Count::Fixed(1) });
    let recurse = b.here();
    b.patch(test, recurse);
    b.emit(Op::GetGlobal { dst: 2, name });
    b.emit(Op::Const { dst: 4, idx: one });
    b.emit(Op::Binary { op: BinOp::Sub, dst: 3, lhs: 0, rhs: 4 });
    b.emit(Op::Binary { op: BinOp::Add, dst: 4, lhs: 1, rhs: 4 });
    b.emit(Op::TailCall { func: 2, args: Count::Fixed(2) });
    b.build().context("build count")
}

/// `run(n)`: adds the global `counter` to an accumulator `n` times.
pub fn meta_add_proto() -> Result<Arc<Proto>> {
    let mut b = ProtoBuilder::new("meta_add");
    b.params(1).slots(5);
    let zero = b.constant(0);
    let one = b.constant(1);
    let name = b.constant("counter");
    b.emit(Op::GetGlobal { dst: 1, name });
    b.emit(Op::Const { dst: 2, idx: zero });
    b.emit(Op::Const { dst: 3, idx: zero });
    let head = b.emit(Op::Binary { op: BinOp::Lt, dst: 4, lhs: 3, rhs: 0 });
    let exit = b.emit(Op::Test { cond: 4, when: false, to: 0 });
    b.emit(Op::Binary { op: BinOp::Add, dst: 2, lhs: 1, rhs: 2 });
    b.emit(Op::Const { dst: 4, idx: one });
    b.emit(Op::Binary { op: BinOp::Add, dst: 3, lhs: 3, rhs: 4 });
    b.emit(Op::Jump { to: head });
    let done = b.here();
    b.patch(exit, done);
    b.emit(Op::Return { base: 2, count: Count::Fixed(1) });
    b.build().context("build meta_add")
}

/// Table whose `__add` returns the other operand plus one.
pub fn counter_object() -> Val {
    let meta = TableRef::new();
    meta.set_str(
        Event::Add.name(),
        Val::native("counter_add", Arity::fixed(2), |ctx, args| {
            let acc = native::check_int(&args, 2, "__add")?;
            ctx.results_mut().set_one(Val::Int(acc + 1));
            Ok(())
        }),
    );
    let counter = TableRef::new();
    counter.set_metatable(Some(meta));
    Val::Table(counter)
}

pub fn prepare_scenarios(config: &RuntimeConfig) -> Result<Vec<PreparedScenario>> {
    SCENARIOS
        .iter()
        .map(|scenario| {
            let workload = (scenario.prepare)().with_context(|| format!("prepare scenario '{}'", scenario.key))?;
            Ok(PreparedScenario {
                scenario,
                workload,
                config: config.clone(),
            })
        })
        .collect()
}

/// Every scenario key, in run order.
pub fn scenario_keys() -> Vec<&'static str> {
    SCENARIOS.iter().map(|s| s.key).collect()
}
