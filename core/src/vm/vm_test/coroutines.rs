use super::*;

fn status_of_current() -> Val {
    Val::native("status_of_current", Arity::fixed(0), |ctx, _| {
        let status = ctx.current_coroutine().map(|co| co.status().name()).unwrap_or("none");
        ctx.results_mut().set_one(Val::from(status));
        Ok(())
    })
}

#[test]
fn test_status_follows_lifecycle() -> anyhow::Result<()> {
    let mut runtime = Runtime::new();
    let co = Coroutine::new(status_of_current());
    assert_eq!(co.status(), CoroutineStatus::Suspended);

    let (outcome, values) = resume(&mut runtime, &co, vec![])?;
    assert_eq!(outcome, ResumeOutcome::Returned);
    assert_eq!(values, vec![Val::from("running")]);
    assert_eq!(co.status(), CoroutineStatus::Dead);

    let err = resume(&mut runtime, &co, vec![]).unwrap_err();
    assert_eq!(err.to_string(), "cannot resume dead coroutine");
    Ok(())
}

#[test]
fn test_resumer_is_normal_while_inner_runs() -> anyhow::Result<()> {
    // outer body: resume(inner, outer) and return what inner reported
    let outer_body = Val::native("outer_body", Arity::fixed(2), |ctx, mut args| {
        let inner = native::check_coroutine(&args, 1, "outer_body")?;
        let me = ctx.current_coroutine().cloned().map(Val::Coroutine).unwrap_or_default();
        coroutine::resume(ctx, args.from(2), &inner, vec![me])?;
        Ok(())
    });
    let inner_body = Val::native("inner_body", Arity::fixed(1), |ctx, args| {
        let outer = native::check_coroutine(&args, 1, "inner_body")?;
        ctx.results_mut().set_one(Val::from(outer.status().name()));
        Ok(())
    });

    let mut runtime = Runtime::new();
    let inner = Coroutine::new(inner_body);
    let outer = Coroutine::new(outer_body);
    let (_, values) = resume(&mut runtime, &outer, vec![Val::Coroutine(inner.clone())])?;
    assert_eq!(values, vec![Val::from("normal")]);
    assert_eq!(inner.status(), CoroutineStatus::Dead);
    assert_eq!(outer.status(), CoroutineStatus::Dead);
    Ok(())
}

#[test]
fn test_running_coroutine_cannot_be_resumed() {
    let body = Val::native("self_resume", Arity::fixed(0), |ctx, mut args| {
        let me = ctx
            .current_coroutine()
            .cloned()
            .ok_or_else(|| RuntimeError::contract("no running coroutine"))?;
        coroutine::resume(ctx, args.from(0), &me, Vec::new())?;
        Ok(())
    });
    let mut runtime = Runtime::new();
    let co = Coroutine::new(body);
    let err = resume(&mut runtime, &co, vec![]).unwrap_err();
    assert_eq!(err.to_string(), "cannot resume non-suspended coroutine");
    assert_eq!(co.status(), CoroutineStatus::Dead);
}

#[test]
fn test_error_in_body_kills_coroutine() -> anyhow::Result<()> {
    let body = Val::native("fails", Arity::fixed(0), |_, _| Err(RuntimeError::user("boom").into()));
    let mut runtime = Runtime::new();
    let co = Coroutine::new(body);
    let err = resume(&mut runtime, &co, vec![]).unwrap_err();
    assert_eq!(err.to_value(), Val::from("boom"));
    assert_eq!(co.status(), CoroutineStatus::Dead);

    // the context is usable afterwards
    let next = Coroutine::new(yield_fn());
    assert_eq!(resume(&mut runtime, &next, vec![Val::Int(1)])?.0, ResumeOutcome::Yielded);
    Ok(())
}

#[test]
fn test_yield_below_nonresumable_call_fails() -> anyhow::Result<()> {
    let guarded = Val::native("guarded", Arity::Variadic, |ctx, args| {
        assert!(ctx.is_yieldable());
        dispatch::call_nonresumable(ctx, args, &yield_fn(), "guarded")
    });
    let mut runtime = Runtime::new();
    let co = Coroutine::new(guarded);
    let err = resume(&mut runtime, &co, vec![Val::Int(1)]).unwrap_err();
    assert!(matches!(&err, RuntimeError::YieldAcrossBoundary(at) if at == "native call"));
    assert_eq!(co.status(), CoroutineStatus::Dead);

    let (ctx, _) = runtime.parts();
    assert!(!ctx.is_yieldable());
    assert!(ctx.current_coroutine().is_none());
    Ok(())
}

#[test]
fn test_nonresumable_call_passes_results_through() -> anyhow::Result<()> {
    let wrapper = Val::native("wrapper", Arity::Variadic, |ctx, args| {
        dispatch::call_nonresumable(ctx, args, &units::add3(), "wrapper")
    });
    let mut runtime = Runtime::new();
    let out = runtime.call(&wrapper, &[Val::Int(1), Val::Int(2), Val::Int(3)])?;
    assert_eq!(out, vec![Val::Int(6)]);
    Ok(())
}

#[test]
fn test_yield_outside_coroutine() {
    let mut runtime = Runtime::new();
    let err = runtime.call(&yield_fn(), &[Val::Int(1)]).unwrap_err();
    assert!(matches!(err, RuntimeError::YieldOutsideCoroutine));
    assert!(err.is_catchable());
}

#[test]
fn test_resumes_on_separate_runtimes_share_nothing_but_state() -> anyhow::Result<()> {
    let co = Coroutine::new(Compiled::into_value(units::Echo));
    let mut first = Runtime::new();
    let mut second = Runtime::with_state(first.state().clone());
    assert_eq!(resume(&mut first, &co, vec![Val::Int(1)])?.1, vec![Val::Int(2)]);
    // a suspended coroutine may be resumed from another runtime
    assert_eq!(resume(&mut second, &co, vec![Val::Int(10)])?.1, vec![Val::Int(11)]);
    Ok(())
}

#[test]
fn test_coroutines_resume_across_threads() -> anyhow::Result<()> {
    let co = Coroutine::new(Compiled::into_value(units::Echo));
    let mut runtime = Runtime::new();
    resume(&mut runtime, &co, vec![Val::Int(0)])?;

    let handle = {
        let co = co.clone();
        let state = runtime.state().clone();
        std::thread::spawn(move || {
            let mut runtime = Runtime::with_state(state);
            resume(&mut runtime, &co, vec![Val::Int(41)]).map(|(_, values)| values)
        })
    };
    let values = handle.join().expect("thread panicked")?;
    assert_eq!(values, vec![Val::Int(42)]);
    Ok(())
}
