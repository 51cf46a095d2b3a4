use super::*;

fn self_call(runtime: &mut Runtime, f: &Val, n: i64) -> Result<Val, RuntimeError> {
    runtime.call1(f, &[f.clone(), Val::Int(n)])
}

#[test]
fn test_recursion_agrees_across_entry_paths() -> anyhow::Result<()> {
    let mut runtime = Runtime::new();
    let fixed = Compiled::into_value(units::Recurse { packed: false });
    let packed = Compiled::into_value(units::Recurse { packed: true });
    let proto = closure(scenarios::recurse_proto()?, Vec::new());

    assert_eq!(fixed.as_function().map(|f| f.arity()), Some(Arity::Fixed(2)));
    assert_eq!(packed.as_function().map(|f| f.arity()), Some(Arity::Variadic));
    for f in [&fixed, &packed, &proto] {
        assert_eq!(self_call(&mut runtime, f, 20)?, Val::Int(120));
        assert_eq!(self_call(&mut runtime, f, 0)?, Val::Int(100));
    }
    Ok(())
}

#[test]
fn test_proto_arguments_are_fitted_to_params() -> anyhow::Result<()> {
    let mut runtime = Runtime::new();
    let mut b = ProtoBuilder::new("pair");
    b.params(2).slots(2);
    b.emit(Op::Return { base: 0, count: Count::Fixed(2) });
    let pair = runtime.load(b.build()?)?;

    assert_eq!(runtime.call(&pair, &[Val::Int(1)])?, vec![Val::Int(1), Val::Nil]);
    assert_eq!(
        runtime.call(&pair, &[Val::Int(1), Val::Int(2), Val::Int(3)])?,
        vec![Val::Int(1), Val::Int(2)]
    );
    Ok(())
}

#[test]
fn test_varargs_follow_fixed_params() -> anyhow::Result<()> {
    let mut runtime = Runtime::new();
    let mut b = ProtoBuilder::new("rest");
    b.params(1).vararg().slots(1);
    b.emit(Op::Vararg { dst: 0, count: Count::Open });
    b.emit(Op::Return { base: 0, count: Count::Open });
    let rest = runtime.load(b.build()?)?;

    let args: Vec<Val> = (1..=8).map(Val::from).collect();
    assert_eq!(runtime.call(&rest, &args)?, args[1..].to_vec());
    assert!(runtime.call(&rest, &[Val::Int(1)])?.is_empty());
    Ok(())
}

#[test]
fn test_wide_fixed_layout_dispatches_variadic() -> anyhow::Result<()> {
    let mut runtime = Runtime::new();
    let mut b = ProtoBuilder::new("wide");
    b.params(7).slots(7);
    b.emit(Op::Return { base: 6, count: Count::Fixed(1) });
    let wide = runtime.load(b.build()?)?;
    assert_eq!(wide.as_function().map(|f| f.arity()), Some(Arity::Variadic));

    let args: Vec<Val> = (1..=9).map(Val::from).collect();
    assert_eq!(runtime.call1(&wide, &args)?, Val::Int(7));
    assert_eq!(runtime.call1(&wide, &args[..3])?, Val::Nil);
    Ok(())
}

/// `plain(n, acc)`: the non-tail twin of `count`, calling the global `plain`.
fn plain_proto() -> anyhow::Result<Val> {
    let mut b = ProtoBuilder::new("plain");
    b.params(2).slots(5);
    let zero = b.constant(0);
    let one = b.constant(1);
    let name = b.constant("plain");
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
    b.emit(Op::Call { func: 2, args: Count::Fixed(2), results: Count::Fixed(1) });
    b.emit(Op::Return { base: 2, count: Count::Fixed(1) });
    Ok(closure(b.build()?, Vec::new()))
}

#[test]
fn test_tail_and_plain_recursion_agree() -> anyhow::Result<()> {
    let mut runtime = Runtime::new();
    let count = closure(scenarios::count_proto()?, Vec::new());
    let plain = plain_proto()?;
    runtime.set_global("count", count.clone());
    runtime.set_global("plain", plain.clone());

    for n in 0..30 {
        let args = [Val::Int(n), Val::Int(5)];
        let tail = runtime.call1(&count, &args)?;
        assert_eq!(tail, runtime.call1(&plain, &args)?);
        assert_eq!(tail, Val::Int(n + 5));
    }
    Ok(())
}

#[test]
fn test_plain_recursion_hits_depth_limit_but_tail_does_not() -> anyhow::Result<()> {
    let mut runtime = Runtime::new();
    let limit = runtime.config().max_call_depth as i64;
    let count = closure(scenarios::count_proto()?, Vec::new());
    let plain = plain_proto()?;
    runtime.set_global("count", count.clone());
    runtime.set_global("plain", plain.clone());

    let args = [Val::Int(limit * 10), Val::Int(0)];
    assert_eq!(runtime.call1(&count, &args)?, Val::Int(limit * 10));
    let err = runtime.call1(&plain, &args).unwrap_err();
    assert!(matches!(err, RuntimeError::StackOverflow { .. }));
    Ok(())
}

#[test]
fn test_mutual_tail_calls_run_in_constant_depth() -> anyhow::Result<()> {
    let mut runtime = Runtime::new();
    let a = Compiled::into_value(units::Bounce);
    let b = Compiled::into_value(units::Bounce);
    let out = runtime.call1(&a, &[a.clone(), b, Val::Int(50_000), Val::Int(0)])?;
    assert_eq!(out, Val::Int(50_000));
    Ok(())
}

#[test]
fn test_callee_reuses_caller_staged_slots() -> anyhow::Result<()> {
    let mut runtime = Runtime::new();
    let sum = Compiled::into_value(units::SharedSum { add3: units::add3() });
    assert_eq!(runtime.call1(&sum, &[Val::Int(10)])?, Val::Int(55));
    assert_eq!(runtime.call1(&sum, &[Val::Int(0)])?, Val::Int(0));
    Ok(())
}

#[test]
fn test_tail_call_through_call_metamethod() -> anyhow::Result<()> {
    let mut runtime = Runtime::new();
    let meta = TableRef::new();
    meta.set_str(
        "__call",
        Val::native("count_args", Arity::Variadic, |ctx, args| {
            ctx.results_mut().set_one(Val::from(args.top()));
            Ok(())
        }),
    );
    let callable = TableRef::new();
    callable.set_metatable(Some(meta));

    let mut b = ProtoBuilder::new("forward");
    b.params(1).slots(3);
    b.emit(Op::Move { dst: 1, src: 0 });
    b.emit(Op::Move { dst: 2, src: 0 });
    b.emit(Op::TailCall { func: 1, args: Count::Fixed(1) });
    let forward = runtime.load(b.build()?)?;

    // the callable itself arrives as the first argument
    assert_eq!(runtime.call1(&forward, &[Val::Table(callable)])?, Val::Int(2));
    Ok(())
}

#[test]
fn test_calling_a_non_function_fails() -> anyhow::Result<()> {
    let mut runtime = Runtime::new();
    let mut b = ProtoBuilder::new("bad_call");
    b.slots(1);
    b.emit(Op::Nil { dst: 0 });
    b.emit(Op::Call { func: 0, args: Count::Fixed(0), results: Count::Fixed(0) });
    let main = runtime.load(b.build()?)?;
    let err = runtime.call(&main, &[]).unwrap_err();
    assert_eq!(err.to_string(), "attempt to call a nil value");
    Ok(())
}
