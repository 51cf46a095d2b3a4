use super::*;

/// `make()` returns `inc, get` sharing one captured local `n = 0`.
fn counter_factory() -> anyhow::Result<Val> {
    let mut inc = ProtoBuilder::new("inc");
    inc.slots(2).capture("n", Capture::Slot(0));
    let one = inc.constant(1);
    inc.emit(Op::GetUpval { dst: 0, idx: 0 });
    inc.emit(Op::Const { dst: 1, idx: one });
    inc.emit(Op::Binary { op: BinOp::Add, dst: 0, lhs: 0, rhs: 1 });
    inc.emit(Op::SetUpval { idx: 0, src: 0 });
    inc.emit(Op::Return { base: 0, count: Count::Fixed(1) });

    let mut get = ProtoBuilder::new("get");
    get.slots(1).capture("n", Capture::Slot(0));
    get.emit(Op::GetUpval { dst: 0, idx: 0 });
    get.emit(Op::Return { base: 0, count: Count::Fixed(1) });

    let mut make = ProtoBuilder::new("make");
    make.slots(3).reify(0);
    let zero = make.constant(0);
    let inc = make.child(inc.build()?);
    let get = make.child(get.build()?);
    make.emit(Op::Const { dst: 1, idx: zero });
    make.emit(Op::VarInit { var: 0, src: 1 });
    make.emit(Op::Closure { dst: 1, proto: inc });
    make.emit(Op::Closure { dst: 2, proto: get });
    make.emit(Op::Return { base: 1, count: Count::Fixed(2) });
    Ok(closure(make.build()?, Vec::new()))
}

#[test]
fn test_closures_share_captured_cell() -> anyhow::Result<()> {
    let mut runtime = Runtime::new();
    let make = counter_factory()?;
    let pair = runtime.call(&make, &[])?;
    let (inc, get) = (pair[0].clone(), pair[1].clone());

    assert_eq!(runtime.call1(&inc, &[])?, Val::Int(1));
    assert_eq!(runtime.call1(&inc, &[])?, Val::Int(2));
    assert_eq!(runtime.call1(&get, &[])?, Val::Int(2));

    // a second activation captures a fresh cell
    let other = runtime.call(&make, &[])?;
    assert_eq!(runtime.call1(&other[1], &[])?, Val::Int(0));
    assert_eq!(runtime.call1(&get, &[])?, Val::Int(2));

    let (_, a) = inc.as_function().and_then(|f| f.upvalue(0)).expect("inc upvalue");
    let (name, b) = get.as_function().and_then(|f| f.upvalue(0)).expect("get upvalue");
    assert!(a.ptr_eq(&b));
    assert_eq!(&*name, "n");
    Ok(())
}

#[test]
fn test_parent_writes_reach_closure() -> anyhow::Result<()> {
    // local x = 1; local f = function() return x end; x = 5; return f()
    let mut child = ProtoBuilder::new("read_x");
    child.slots(1).capture("x", Capture::Slot(0));
    child.emit(Op::GetUpval { dst: 0, idx: 0 });
    child.emit(Op::Return { base: 0, count: Count::Fixed(1) });

    let mut main = ProtoBuilder::new("main");
    main.slots(3).reify(0);
    let one = main.constant(1);
    let five = main.constant(5);
    let f = main.child(child.build()?);
    main.emit(Op::Const { dst: 1, idx: one });
    main.emit(Op::VarInit { var: 0, src: 1 });
    main.emit(Op::Closure { dst: 1, proto: f });
    main.emit(Op::Const { dst: 2, idx: five });
    main.emit(Op::VarStore { var: 0, src: 2 });
    main.emit(Op::Call { func: 1, args: Count::Fixed(0), results: Count::Fixed(1) });
    main.emit(Op::Move { dst: 2, src: 0 });
    main.emit(Op::Return { base: 1, count: Count::Fixed(2) });

    let mut runtime = Runtime::new();
    let main = runtime.load(main.build()?)?;
    assert_eq!(runtime.call(&main, &[])?, vec![Val::Int(5), Val::Int(5)]);
    Ok(())
}

#[test]
fn test_nested_closure_captures_enclosing_upvalue() -> anyhow::Result<()> {
    // function outer(p) return function() return function() return p end end end
    let mut innermost = ProtoBuilder::new("innermost");
    innermost.slots(1).capture("p", Capture::Upvalue(0));
    innermost.emit(Op::GetUpval { dst: 0, idx: 0 });
    innermost.emit(Op::Return { base: 0, count: Count::Fixed(1) });

    let mut middle = ProtoBuilder::new("middle");
    middle.slots(1).capture("p", Capture::Slot(0));
    let innermost = middle.child(innermost.build()?);
    middle.emit(Op::Closure { dst: 0, proto: innermost });
    middle.emit(Op::Return { base: 0, count: Count::Fixed(1) });

    let mut outer = ProtoBuilder::new("outer");
    outer.params(1).slots(2).reify(0);
    let middle = outer.child(middle.build()?);
    outer.emit(Op::Closure { dst: 1, proto: middle });
    outer.emit(Op::Return { base: 1, count: Count::Fixed(1) });

    let mut runtime = Runtime::new();
    let outer = runtime.load(outer.build()?)?;
    let middle = runtime.call1(&outer, &[Val::from("kept")])?;
    let innermost = runtime.call1(&middle, &[])?;
    assert_eq!(runtime.call1(&innermost, &[])?, Val::from("kept"));
    Ok(())
}

#[test]
fn test_capturing_a_slot_never_given_a_cell_fails() -> anyhow::Result<()> {
    let mut child = ProtoBuilder::new("child");
    child.slots(1).capture("x", Capture::Slot(1));
    child.emit(Op::GetUpval { dst: 0, idx: 0 });

    // slot 1 is flagged but neither a parameter nor initialised with VarInit
    let mut main = ProtoBuilder::new("main");
    main.slots(2).reify(1);
    let child = main.child(child.build()?);
    main.emit(Op::Closure { dst: 0, proto: child });
    main.emit(Op::Return { base: 0, count: Count::Fixed(1) });

    let mut runtime = Runtime::new();
    let main = runtime.load(main.build()?)?;
    let err = runtime.call(&main, &[]).unwrap_err();
    assert!(matches!(&err, RuntimeError::ContractViolation(msg) if msg.contains("never reified")));
    Ok(())
}

/// `body(a)`: `local s = a + a; local v = a.key; return s, v`.
fn metamethod_body() -> anyhow::Result<Val> {
    let mut b = ProtoBuilder::new("meta_body");
    b.params(1).slots(4);
    let key = b.constant("key");
    b.emit(Op::Binary { op: BinOp::Add, dst: 1, lhs: 0, rhs: 0 });
    b.emit(Op::Const { dst: 3, idx: key });
    b.emit(Op::Index { dst: 2, object: 0, key: 3 });
    b.emit(Op::Return { base: 1, count: Count::Fixed(2) });
    Ok(closure(b.build()?, Vec::new()))
}

#[test]
fn test_metamethods_may_yield() -> anyhow::Result<()> {
    let meta = TableRef::new();
    meta.set_str("__add", yield_fn());
    meta.set_str("__index", yield_fn());
    let object = TableRef::new();
    object.set_metatable(Some(meta));
    let object = Val::Table(object);

    let mut runtime = Runtime::new();
    let co = Coroutine::new(metamethod_body()?);

    let (_, operands) = resume(&mut runtime, &co, vec![object.clone()])?;
    assert_eq!(operands, vec![object.clone(), object.clone()]);
    let (_, index_args) = resume(&mut runtime, &co, vec![Val::Int(7)])?;
    assert_eq!(index_args, vec![object, Val::from("key")]);
    let (outcome, values) = resume(&mut runtime, &co, vec![Val::from("found"), Val::Int(0)])?;
    assert_eq!(outcome, ResumeOutcome::Returned);
    assert_eq!(values, vec![Val::Int(7), Val::from("found")]);
    Ok(())
}

#[test]
fn test_comparison_metamethod_result_normalized_after_resume() -> anyhow::Result<()> {
    let mut b = ProtoBuilder::new("less");
    b.params(2).slots(3);
    b.emit(Op::Binary { op: BinOp::Lt, dst: 2, lhs: 0, rhs: 1 });
    b.emit(Op::Return { base: 2, count: Count::Fixed(1) });
    let less = closure(b.build()?, Vec::new());

    let meta = TableRef::new();
    meta.set_str("__lt", yield_fn());
    let (a, c) = (TableRef::new(), TableRef::new());
    a.set_metatable(Some(meta));

    let mut runtime = Runtime::new();
    let co = Coroutine::new(less);
    resume(&mut runtime, &co, vec![Val::Table(a), Val::Table(c)])?;
    let (_, out) = resume(&mut runtime, &co, vec![Val::from("truthy")])?;
    assert_eq!(out, vec![Val::Bool(true)]);
    Ok(())
}

#[test]
fn test_yield_through_open_call_returns_every_value() -> anyhow::Result<()> {
    // function(...) return yield(...) end
    let mut b = ProtoBuilder::new("relay");
    b.vararg().slots(1);
    let name = b.constant("yield");
    b.emit(Op::GetGlobal { dst: 0, name });
    b.emit(Op::Vararg { dst: 1, count: Count::Open });
    b.emit(Op::Call { func: 0, args: Count::Open, results: Count::Open });
    b.emit(Op::Return { base: 0, count: Count::Open });

    let mut runtime = Runtime::new();
    runtime.set_global("yield", yield_fn());
    let co = Coroutine::new(runtime.load(b.build()?)?);
    let (_, out) = resume(&mut runtime, &co, vec![Val::Int(1), Val::Int(2), Val::Int(3)])?;
    assert_eq!(out, vec![Val::Int(1), Val::Int(2), Val::Int(3)]);
    let (outcome, back) = resume(&mut runtime, &co, vec![Val::from("x"), Val::from("y")])?;
    assert_eq!(outcome, ResumeOutcome::Returned);
    assert_eq!(back, vec![Val::from("x"), Val::from("y")]);
    Ok(())
}

#[test]
fn test_suspended_global_lookup_completes_on_resume() -> anyhow::Result<()> {
    let mut b = ProtoBuilder::new("global");
    b.slots(1);
    let name = b.constant("missing");
    b.emit(Op::GetGlobal { dst: 0, name });
    b.emit(Op::Return { base: 0, count: Count::Fixed(1) });

    let mut runtime = Runtime::new();
    let meta = TableRef::new();
    meta.set_str("__index", yield_fn());
    runtime.globals().set_metatable(Some(meta));

    let co = Coroutine::new(runtime.load(b.build()?)?);
    let (_, asked) = resume(&mut runtime, &co, vec![])?;
    assert_eq!(asked[1], Val::from("missing"));
    let (_, out) = resume(&mut runtime, &co, vec![Val::Int(3)])?;
    assert_eq!(out, vec![Val::Int(3)]);
    Ok(())
}

/// `function(...) local t = {...}; obj.k = #t; return 8, #t, t end`
fn collect_then_store() -> anyhow::Result<Arc<Proto>> {
    let mut b = ProtoBuilder::new("collect");
    b.vararg().slots(5);
    let obj = b.constant("obj");
    let k = b.constant("k");
    let eight = b.constant(8);
    b.emit(Op::NewTable { dst: 0 });
    b.emit(Op::Vararg { dst: 1, count: Count::Open });
    b.emit(Op::Append { table: 0, base: 1, count: Count::Open, first: 1 });
    b.emit(Op::Unary { op: UnOp::Len, dst: 1, src: 0 });
    b.emit(Op::GetGlobal { dst: 2, name: obj });
    b.emit(Op::Const { dst: 3, idx: k });
    b.emit(Op::NewIndex { object: 2, key: 3, value: 1 });
    b.emit(Op::Const { dst: 2, idx: eight });
    b.emit(Op::Move { dst: 3, src: 1 });
    b.emit(Op::Move { dst: 4, src: 0 });
    b.emit(Op::Return { base: 2, count: Count::Fixed(3) });
    Ok(b.build()?)
}

#[test]
fn test_suspended_table_store_continues_after_resume() -> anyhow::Result<()> {
    let meta = TableRef::new();
    meta.set_str("__newindex", yield_fn());
    let object = TableRef::new();
    object.set_metatable(Some(meta));

    let mut runtime = Runtime::new();
    runtime.set_global("obj", Val::Table(object.clone()));
    let co = Coroutine::new(runtime.load(collect_then_store()?)?);

    let args = vec![Val::from("a"), Val::from("b"), Val::from("c")];
    let (outcome, stored) = resume(&mut runtime, &co, args)?;
    assert_eq!(outcome, ResumeOutcome::Yielded);
    assert_eq!(stored, vec![Val::Table(object.clone()), Val::from("k"), Val::Int(3)]);

    let (outcome, out) = resume(&mut runtime, &co, vec![Val::from("ignored")])?;
    assert_eq!(outcome, ResumeOutcome::Returned);
    assert_eq!(out[..2], [Val::Int(8), Val::Int(3)]);
    let Some(t) = out[2].as_table() else { panic!("expected the collected table, got {:?}", out[2]) };
    assert_eq!(t.get(&Val::Int(1)), Val::from("a"));
    assert_eq!(t.get(&Val::Int(3)), Val::from("c"));
    assert!(object.get_str("k").is_nil());
    Ok(())
}

#[test]
fn test_table_constructor_without_varargs_is_empty() -> anyhow::Result<()> {
    let mut runtime = Runtime::new();
    runtime.set_global("obj", Val::Table(TableRef::new()));
    let collect = runtime.load(collect_then_store()?)?;
    let out = runtime.call(&collect, &[])?;
    assert_eq!(out[..2], [Val::Int(8), Val::Int(0)]);
    let obj = runtime.get_global("obj");
    assert_eq!(obj.as_table().map(|t| t.get_str("k")), Some(Val::Int(0)));
    Ok(())
}

#[test]
fn test_suspended_global_store_continues_after_resume() -> anyhow::Result<()> {
    // function(v) g = v; return "done" end
    let mut b = ProtoBuilder::new("store_global");
    b.params(1).slots(1);
    let g = b.constant("g");
    let done = b.constant("done");
    b.emit(Op::SetGlobal { name: g, src: 0 });
    b.emit(Op::Const { dst: 0, idx: done });
    b.emit(Op::Return { base: 0, count: Count::Fixed(1) });

    let mut runtime = Runtime::new();
    let meta = TableRef::new();
    meta.set_str("__newindex", yield_fn());
    runtime.globals().set_metatable(Some(meta));

    let co = Coroutine::new(runtime.load(b.build()?)?);
    let (_, stored) = resume(&mut runtime, &co, vec![Val::Int(5)])?;
    assert_eq!(stored, vec![Val::Table(runtime.globals().clone()), Val::from("g"), Val::Int(5)]);
    let (outcome, out) = resume(&mut runtime, &co, vec![])?;
    assert_eq!(outcome, ResumeOutcome::Returned);
    assert_eq!(out, vec![Val::from("done")]);
    assert!(runtime.get_global("g").is_nil());
    Ok(())
}

#[test]
fn test_upvalues_can_be_rebound() -> anyhow::Result<()> {
    let mut runtime = Runtime::new();
    let make = counter_factory()?;
    let first = runtime.call(&make, &[])?;
    let second = runtime.call(&make, &[])?;
    let inc = first[0].as_function().cloned().expect("function");
    let (_, cell) = second[1].as_function().and_then(|f| f.upvalue(0)).expect("upvalue");

    assert!(inc.replace_upvalue(0, cell));
    assert!(!inc.replace_upvalue(3, crate::val::Upvalue::default()));
    runtime.call(&first[0], &[])?;
    assert_eq!(runtime.call1(&second[1], &[])?, Val::Int(1));
    assert_eq!(runtime.call1(&first[1], &[])?, Val::Int(0));
    Ok(())
}

#[test]
fn test_resuming_into_a_non_suspending_op_is_rejected() -> anyhow::Result<()> {
    let mut b = ProtoBuilder::new("plain_ops");
    b.slots(1);
    b.emit(Op::Nil { dst: 0 });
    b.emit(Op::Return { base: 0, count: Count::Fixed(1) });
    let Val::Function(f) = closure(b.build()?, Vec::new()) else {
        anyhow::bail!("closure is not a function");
    };

    let mut runtime = Runtime::new();
    let (ctx, view) = runtime.parts();
    let chain = ResumeChain::new(vec![ResumePoint::new(f, 1, SavedFrame::empty())], Vec::new());
    match chain.replay(ctx, view) {
        Err(Unwind::Error(RuntimeError::ContractViolation(msg))) => assert!(msg.contains("cannot suspend")),
        other => panic!("expected a contract violation, got {other:?}"),
    }
    Ok(())
}
