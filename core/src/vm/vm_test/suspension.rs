use super::*;

/// Resumable native that calls `next` and logs every entry and exit.
#[derive(Debug)]
struct Relay {
    name: &'static str,
    next: Val,
    log: Log,
}

impl Relay {
    fn value(name: &'static str, next: Val, log: &Log) -> Val {
        let relay: FnRef = Arc::new(Relay {
            name,
            next,
            log: log.clone(),
        });
        Val::Function(relay)
    }

    fn note(&self, event: &str) {
        self.log.lock().push(format!("{event} {}", self.name));
    }

    fn settle(self: Arc<Self>, flow: Flow) -> Flow {
        match flow {
            Err(Unwind::Suspend(mut suspension)) => {
                suspension.push(ResumePoint::new(self, 1, SavedFrame::empty()));
                Err(Unwind::Suspend(suspension))
            }
            Err(err) => Err(err),
            Ok(()) => {
                self.note("finish");
                Ok(())
            }
        }
    }
}

impl Function for Relay {
    fn name(&self) -> &str {
        self.name
    }

    fn arity(&self) -> Arity {
        Arity::Variadic
    }

    fn invoke(self: Arc<Self>, ctx: &mut ExecutionContext, mut args: View<'_>) -> Flow {
        self.note("enter");
        let values = args.values_from(0);
        let flow = dispatch::call_with(ctx, args.reborrow(), &self.next, &values);
        self.settle(flow)
    }

    fn resume(
        self: Arc<Self>,
        ctx: &mut ExecutionContext,
        mut frame: View<'_>,
        index: u32,
        _saved: SavedFrame,
        inner: ResumeChain,
    ) -> Flow {
        assert_eq!(index, 1);
        self.note("replay");
        let flow = inner.replay(ctx, frame.reborrow());
        self.settle(flow)
    }
}

#[test]
fn test_chain_replays_outer_to_inner_once() -> anyhow::Result<()> {
    let log = Log::default();
    let inner = Relay::value("inner", yield_fn(), &log);
    let middle = Relay::value("middle", inner, &log);
    let outer = Relay::value("outer", middle, &log);

    let mut runtime = Runtime::new();
    let co = Coroutine::new(outer);
    let (outcome, values) = resume(&mut runtime, &co, vec![Val::Int(1)])?;
    assert_eq!(outcome, ResumeOutcome::Yielded);
    assert_eq!(values, vec![Val::Int(1)]);
    assert_eq!(co.suspended_depth(), 3);
    assert_eq!(*log.lock(), ["enter outer", "enter middle", "enter inner"]);

    log.lock().clear();
    let (outcome, values) = resume(&mut runtime, &co, vec![Val::from("back")])?;
    assert_eq!(outcome, ResumeOutcome::Returned);
    assert_eq!(values, vec![Val::from("back")]);
    assert_eq!(
        *log.lock(),
        [
            "replay outer",
            "replay middle",
            "replay inner",
            "finish inner",
            "finish middle",
            "finish outer"
        ]
    );
    assert_eq!(co.status(), CoroutineStatus::Dead);
    Ok(())
}

/// Compiled body: logs its entry, calls `next(name)`, then returns what came back.
#[derive(Debug)]
struct Stage {
    name: &'static str,
    next: Val,
    log: Log,
}

impl CompiledUnit for Stage {
    fn name(&self) -> &str {
        self.name
    }

    fn layout(&self) -> Layout {
        Layout::new(0, false, 1)
    }

    fn run(&self, ctx: &mut ExecutionContext, frame: &mut Frame<'_>) -> Flow {
        match frame.index() {
            0 => {
                self.log.lock().push(format!("enter {}", self.name));
                // slot survives the suspension
                frame.set(0, Val::from(self.name));
                frame.call_with(ctx, 1, &self.next, &[Val::from(self.name)])?;
            }
            1 => {}
            other => return Err(RuntimeError::contract(format!("no segment {other}")).into()),
        }
        let saved = frame.get(0);
        self.log.lock().push(format!("finish {}", saved.as_str().unwrap_or("?")));
        let got = ctx.results().get(0)?;
        ctx.results_mut().set([got, saved]);
        Ok(())
    }
}

#[test]
fn test_compiled_frames_restore_slots_and_skip_entry() -> anyhow::Result<()> {
    let log = Log::default();
    let inner = Compiled::into_value(Stage {
        name: "inner",
        next: yield_fn(),
        log: log.clone(),
    });
    let outer = Compiled::into_value(Stage {
        name: "outer",
        next: inner,
        log: log.clone(),
    });

    let mut runtime = Runtime::new();
    let co = Coroutine::new(outer);
    let (_, yielded) = resume(&mut runtime, &co, vec![])?;
    assert_eq!(yielded, vec![Val::from("inner")]);
    assert_eq!(co.suspended_depth(), 2);

    let (outcome, values) = resume(&mut runtime, &co, vec![Val::Int(9)])?;
    assert_eq!(outcome, ResumeOutcome::Returned);
    // outer sees inner's (9, "inner") truncated to its first value
    assert_eq!(values, vec![Val::Int(9), Val::from("outer")]);
    assert_eq!(*log.lock(), ["enter outer", "enter inner", "finish inner", "finish outer"]);
    Ok(())
}

/// Yields `step` and `step + 1`, returning the sum of both replies.
#[derive(Debug)]
struct TwoYields;

impl CompiledUnit for TwoYields {
    fn name(&self) -> &str {
        "two_yields"
    }

    fn layout(&self) -> Layout {
        Layout::new(1, false, 2)
    }

    fn run(&self, ctx: &mut ExecutionContext, frame: &mut Frame<'_>) -> Flow {
        let step = native::check_int(frame.view_ref(), 1, "two_yields")?;
        if frame.index() == 0 {
            frame.call_with(ctx, 1, &yield_fn(), &[Val::Int(step)])?;
        }
        if frame.index() == 1 {
            frame.set(1, ctx.results().get(0)?);
            frame.call_with(ctx, 2, &yield_fn(), &[Val::Int(step + 1)])?;
        }
        let first = frame.get(1);
        let second = ctx.results().get(0)?;
        let sum = BinOp::Add.apply(&first, &second)?.unwrap_or_default();
        ctx.results_mut().set_one(sum);
        Ok(())
    }
}

#[test]
fn test_resumed_frame_can_suspend_again() -> anyhow::Result<()> {
    let log = Log::default();
    let body = Relay::value("wrapper", Compiled::into_value(TwoYields), &log);
    let mut runtime = Runtime::new();
    let co = Coroutine::new(body);

    assert_eq!(resume(&mut runtime, &co, vec![Val::Int(10)])?.1, vec![Val::Int(10)]);
    assert_eq!(resume(&mut runtime, &co, vec![Val::Int(1)])?.1, vec![Val::Int(11)]);
    assert_eq!(co.suspended_depth(), 2);
    let (outcome, values) = resume(&mut runtime, &co, vec![Val::Int(2)])?;
    assert_eq!(outcome, ResumeOutcome::Returned);
    assert_eq!(values, vec![Val::Int(3)]);
    Ok(())
}

/// `f(x)`: `y = yield(2 * x); return y + 1`.
#[derive(Debug)]
struct Doubler;

impl CompiledUnit for Doubler {
    fn name(&self) -> &str {
        "doubler"
    }

    fn layout(&self) -> Layout {
        Layout::new(1, false, 1)
    }

    fn run(&self, ctx: &mut ExecutionContext, frame: &mut Frame<'_>) -> Flow {
        match frame.index() {
            0 => {
                let x = native::check_int(frame.view_ref(), 1, "doubler")?;
                frame.call_with(ctx, 1, &yield_fn(), &[Val::Int(x * 2)])?;
            }
            1 => {}
            other => return Err(RuntimeError::contract(format!("no segment {other}")).into()),
        }
        let y = ctx.results().get(0)?;
        let next = BinOp::Add.apply(&y, &Val::Int(1))?.unwrap_or_default();
        ctx.results_mut().set_one(next);
        Ok(())
    }
}

#[test]
fn test_doubling_coroutine() -> anyhow::Result<()> {
    let mut runtime = Runtime::new();
    let co = Coroutine::new(Compiled::into_value(Doubler));

    assert_eq!(resume(&mut runtime, &co, vec![Val::Int(5)])?, (ResumeOutcome::Yielded, vec![Val::Int(10)]));
    assert_eq!(co.status(), CoroutineStatus::Suspended);
    assert_eq!(resume(&mut runtime, &co, vec![Val::Int(100)])?, (ResumeOutcome::Returned, vec![Val::Int(101)]));
    assert_eq!(co.status(), CoroutineStatus::Dead);
    Ok(())
}

#[test]
fn test_resume_values_become_yield_results() -> anyhow::Result<()> {
    let mut runtime = Runtime::new();
    let co = Coroutine::new(Relay::value("identity", yield_fn(), &Log::default()));
    let (_, first) = resume(&mut runtime, &co, vec![Val::Int(1), Val::Int(2)])?;
    assert_eq!(first, vec![Val::Int(1), Val::Int(2)]);
    let sent = vec![Val::from("a"), Val::Nil, Val::Bool(true)];
    let (_, back) = resume(&mut runtime, &co, sent.clone())?;
    assert_eq!(back, sent);
    Ok(())
}

#[test]
fn test_echo_round_trips() -> anyhow::Result<()> {
    let mut runtime = Runtime::new();
    let co = Coroutine::new(Compiled::into_value(units::Echo));
    let mut value = Val::Int(0);
    for _ in 0..100 {
        value = resume(&mut runtime, &co, vec![value])?.1[0].clone();
    }
    assert_eq!(value, Val::Int(100));
    assert_eq!(co.suspended_depth(), 1);
    Ok(())
}

#[derive(Debug)]
struct Stuck;

impl CompiledUnit for Stuck {
    fn name(&self) -> &str {
        "stuck"
    }

    fn layout(&self) -> Layout {
        Layout::new(0, false, 0)
    }

    fn run(&self, _ctx: &mut ExecutionContext, _frame: &mut Frame<'_>) -> Flow {
        Ok(())
    }
}

fn replay_point(function: Val, index: u32) -> Result<(), RuntimeError> {
    let mut runtime = Runtime::new();
    let (ctx, view) = runtime.parts();
    let Val::Function(f) = function else {
        return Err(RuntimeError::contract("not a function"));
    };
    let chain = ResumeChain::new(vec![ResumePoint::new(f, index, SavedFrame::empty())], Vec::new());
    match chain.replay(ctx, view) {
        Ok(()) => Ok(()),
        Err(Unwind::Error(err)) => Err(err),
        Err(Unwind::Suspend(_)) => Err(RuntimeError::contract("unexpected suspension")),
    }
}

#[test]
fn test_invalid_resumption_is_a_contract_violation() {
    let entry = replay_point(Compiled::into_value(Stuck), 0).unwrap_err();
    assert!(matches!(&entry, RuntimeError::ContractViolation(msg) if msg.contains("entry segment")));

    let unknown = replay_point(Compiled::into_value(units::Echo), 7).unwrap_err();
    assert!(matches!(&unknown, RuntimeError::ContractViolation(msg) if msg.contains("no segment 7")));

    let native = replay_point(units::add3(), 1).unwrap_err();
    assert!(matches!(&native, RuntimeError::ContractViolation(msg) if msg.contains("cannot resume")));
    assert!(!native.is_catchable());
}
