use std::sync::Arc;

use tidal_core::{
    module::Module,
    val::{Arity, FnRef, Function, Val},
    vm::{Coroutine, CoroutineRef, ExecutionContext, Flow, View, coroutine, native},
};

#[derive(Debug)]
pub struct CoroutineModule {
    functions: Vec<(&'static str, Val)>,
}

impl Default for CoroutineModule {
    fn default() -> Self {
        Self::new()
    }
}

impl CoroutineModule {
    pub fn new() -> Self {
        let functions = vec![
            ("create", Val::native("create", Arity::fixed(1), Self::create)),
            ("resume", Val::native("resume", Arity::Variadic, Self::resume)),
            ("yield", Val::native("yield", Arity::Variadic, Self::yield_)),
            ("status", Val::native("status", Arity::fixed(1), Self::status)),
            ("running", Val::native("running", Arity::fixed(0), Self::running)),
            ("isyieldable", Val::native("isyieldable", Arity::fixed(0), Self::isyieldable)),
            ("wrap", Val::native("wrap", Arity::fixed(1), Self::wrap)),
        ];
        Self { functions }
    }

    fn create(ctx: &mut ExecutionContext, args: View<'_>) -> Flow {
        let body = native::check_function(&args, 1, "create")?;
        ctx.results_mut().set_one(Val::Coroutine(Coroutine::new(Val::Function(body))));
        Ok(())
    }

    /// `true` plus the yielded or returned values, or `false` plus the error.
    fn resume(ctx: &mut ExecutionContext, mut args: View<'_>) -> Flow {
        let co = native::check_coroutine(&args, 1, "resume")?;
        let values = args.values_from(1);
        let top = args.top();
        match coroutine::resume(ctx, args.from(top), &co, values) {
            Ok(_) => ctx.results_mut().prepend(Val::Bool(true))?,
            Err(err) if err.is_catchable() => ctx.results_mut().set([Val::Bool(false), err.to_value()]),
            Err(err) => return Err(err.into()),
        }
        Ok(())
    }

    fn yield_(ctx: &mut ExecutionContext, args: View<'_>) -> Flow {
        coroutine::yield_values(ctx, args.values_from(0))
    }

    fn status(ctx: &mut ExecutionContext, args: View<'_>) -> Flow {
        let co = native::check_coroutine(&args, 1, "status")?;
        ctx.results_mut().set_one(Val::from(co.status().name()));
        Ok(())
    }

    /// The running coroutine and `false`, or `nil, true` on the main thread.
    fn running(ctx: &mut ExecutionContext, _args: View<'_>) -> Flow {
        let results = match ctx.current_coroutine() {
            Some(co) => [Val::Coroutine(co.clone()), Val::Bool(false)],
            None => [Val::Nil, Val::Bool(true)],
        };
        ctx.results_mut().set(results);
        Ok(())
    }

    fn isyieldable(ctx: &mut ExecutionContext, _args: View<'_>) -> Flow {
        let yieldable = ctx.is_yieldable();
        ctx.results_mut().set_one(Val::Bool(yieldable));
        Ok(())
    }

    fn wrap(ctx: &mut ExecutionContext, args: View<'_>) -> Flow {
        let body = native::check_function(&args, 1, "wrap")?;
        let wrapped: FnRef = Arc::new(Wrapped {
            co: Coroutine::new(Val::Function(body)),
        });
        ctx.results_mut().set_one(Val::Function(wrapped));
        Ok(())
    }
}

impl Module for CoroutineModule {
    fn name(&self) -> &str {
        "coroutine"
    }

    fn description(&self) -> &str {
        "coroutine creation and control"
    }

    fn exports(&self) -> Vec<(&'static str, Val)> {
        self.functions.clone()
    }
}

/// Function returned by `coroutine.wrap`: each call resumes the coroutine
/// and raises its errors instead of returning them.
#[derive(Debug)]
struct Wrapped {
    co: CoroutineRef,
}

impl Function for Wrapped {
    fn name(&self) -> &str {
        "wrap"
    }

    fn arity(&self) -> Arity {
        Arity::Variadic
    }

    fn is_native(&self) -> bool {
        true
    }

    fn invoke(self: Arc<Self>, ctx: &mut ExecutionContext, mut args: View<'_>) -> Flow {
        let values = args.values_from(0);
        let top = args.top();
        coroutine::resume(ctx, args.from(top), &self.co, values)?;
        Ok(())
    }
}
