//! Base library, installed straight into the global table.

use std::{io::Write, sync::Arc};

use anyhow::Result;
use tidal_core::{
    error::RuntimeError,
    module::Module,
    op::Event,
    val::{Arity, FnRef, Function, Val},
    vm::{
        ExecutionContext, Flow, ResumeChain, ResumePoint, RuntimeState, SavedFrame, Unwind, View, dispatch,
        native,
    },
};
use tracing::debug;

#[derive(Debug)]
pub struct BaseModule {
    functions: Vec<(&'static str, Val)>,
}

impl Default for BaseModule {
    fn default() -> Self {
        Self::new()
    }
}

impl BaseModule {
    pub fn new() -> Self {
        let functions = vec![
            ("assert", Val::native("assert", Arity::Variadic, Self::assert)),
            ("error", Val::native("error", Arity::fixed(2), Self::error)),
            ("pcall", ProtectedCall::value(Protection::Plain)),
            ("xpcall", ProtectedCall::value(Protection::Handler)),
            ("select", Val::native("select", Arity::Variadic, Self::select)),
            ("type", Val::native("type", Arity::Variadic, Self::type_of)),
            ("tostring", Val::native("tostring", Arity::Variadic, Self::tostring)),
            ("print", Val::native("print", Arity::Variadic, Self::print)),
            ("rawequal", Val::native("rawequal", Arity::Variadic, Self::rawequal)),
            ("rawget", Val::native("rawget", Arity::fixed(2), Self::rawget)),
            ("rawset", Val::native("rawset", Arity::Variadic, Self::rawset)),
            ("rawlen", Val::native("rawlen", Arity::fixed(1), Self::rawlen)),
            ("getmetatable", Val::native("getmetatable", Arity::Variadic, Self::getmetatable)),
            ("setmetatable", Val::native("setmetatable", Arity::Variadic, Self::setmetatable)),
        ];
        Self { functions }
    }

    fn assert(ctx: &mut ExecutionContext, args: View<'_>) -> Flow {
        let value = native::check_any(&args, 1, "assert")?;
        if value.truthy() {
            ctx.results_mut().set(args.values_from(0));
            return Ok(());
        }
        match native::arg(&args, 2) {
            Val::Nil => Err(RuntimeError::user("assertion failed!").into()),
            message => Err(RuntimeError::User(message).into()),
        }
    }

    /// The level must be an integer; it selects no position since values carry none.
    fn error(_ctx: &mut ExecutionContext, args: View<'_>) -> Flow {
        native::opt_int(&args, 2, "error", 1)?;
        Err(RuntimeError::User(native::arg(&args, 1)).into())
    }

    fn select(ctx: &mut ExecutionContext, args: View<'_>) -> Flow {
        let count = args.top().saturating_sub(1);
        if native::arg(&args, 1).as_str() == Some("#") {
            ctx.results_mut().set_one(Val::from(count));
            return Ok(());
        }
        let n = native::check_int(&args, 1, "select")?;
        let skip = match n {
            n if n < 0 => {
                let back = n.unsigned_abs() as usize;
                if back > count {
                    return Err(RuntimeError::argument(1, "select", "index out of range").into());
                }
                count - back
            }
            0 => return Err(RuntimeError::argument(1, "select", "index out of range").into()),
            n => (n as usize - 1).min(count),
        };
        ctx.results_mut().set(args.values_from(1 + skip));
        Ok(())
    }

    fn type_of(ctx: &mut ExecutionContext, args: View<'_>) -> Flow {
        let value = native::check_any(&args, 1, "type")?;
        ctx.results_mut().set_one(Val::from(value.type_name()));
        Ok(())
    }

    fn tostring(ctx: &mut ExecutionContext, mut args: View<'_>) -> Flow {
        let value = native::check_any(&args, 1, "tostring")?;
        let text = to_display(ctx, args.from(1), &value)?;
        ctx.results_mut().set_one(Val::from(text));
        Ok(())
    }

    fn print(ctx: &mut ExecutionContext, mut args: View<'_>) -> Flow {
        let values = args.values_from(0);
        let mut line = String::new();
        for (i, value) in values.iter().enumerate() {
            if i > 0 {
                line.push('\t');
            }
            line.push_str(&to_display(ctx, args.from(values.len()), value)?);
        }
        let mut out = std::io::stdout().lock();
        writeln!(out, "{line}").map_err(|err| RuntimeError::user(format!("print: {err}")))?;
        ctx.results_mut().clear();
        Ok(())
    }

    fn rawequal(ctx: &mut ExecutionContext, args: View<'_>) -> Flow {
        let a = native::check_any(&args, 1, "rawequal")?;
        let b = native::check_any(&args, 2, "rawequal")?;
        ctx.results_mut().set_one(Val::Bool(a.raw_eq(&b)));
        Ok(())
    }

    fn rawget(ctx: &mut ExecutionContext, args: View<'_>) -> Flow {
        let table = native::check_table(&args, 1, "rawget")?;
        let value = table.get(&native::arg(&args, 2));
        ctx.results_mut().set_one(value);
        Ok(())
    }

    fn rawset(ctx: &mut ExecutionContext, args: View<'_>) -> Flow {
        let table = native::check_table(&args, 1, "rawset")?;
        let key = native::check_any(&args, 2, "rawset")?;
        table.set(key, native::arg(&args, 3))?;
        ctx.results_mut().set_one(Val::Table(table));
        Ok(())
    }

    fn rawlen(ctx: &mut ExecutionContext, args: View<'_>) -> Flow {
        let len = match native::arg(&args, 1) {
            Val::Table(t) => t.len(),
            Val::Str(s) => s.len(),
            _ => return Err(RuntimeError::argument(1, "rawlen", "table or string expected").into()),
        };
        ctx.results_mut().set_one(Val::from(len));
        Ok(())
    }

    fn getmetatable(ctx: &mut ExecutionContext, args: View<'_>) -> Flow {
        let value = native::check_any(&args, 1, "getmetatable")?;
        let result = match ctx.state().metatable_of(&value) {
            None => Val::Nil,
            Some(mt) => match mt.get(Event::Metatable.key()) {
                Val::Nil => Val::Table(mt),
                protected => protected,
            },
        };
        ctx.results_mut().set_one(result);
        Ok(())
    }

    fn setmetatable(ctx: &mut ExecutionContext, args: View<'_>) -> Flow {
        let table = native::check_table(&args, 1, "setmetatable")?;
        let metatable = native::check_opt_table(&args, 2, "setmetatable")?;
        let protected = table
            .metatable()
            .is_some_and(|mt| !mt.get(Event::Metatable.key()).is_nil());
        if protected {
            return Err(RuntimeError::user("cannot change a protected metatable").into());
        }
        table.set_metatable(metatable);
        ctx.results_mut().set_one(Val::Table(table));
        Ok(())
    }
}

impl Module for BaseModule {
    fn name(&self) -> &str {
        "_G"
    }

    fn description(&self) -> &str {
        "base functions, installed as globals"
    }

    fn exports(&self) -> Vec<(&'static str, Val)> {
        self.functions.clone()
    }

    fn register(&self, state: &RuntimeState) -> Result<()> {
        let globals = state.globals();
        for (name, value) in self.exports() {
            globals.set_str(name, value);
        }
        globals.set_str("_G", Val::Table(globals.clone()));
        Ok(())
    }
}

/// String form of `value`, honoring `__tostring` and `__name`.
///
/// `__tostring` runs as a non-resumable call staged in `scratch`.
pub fn to_display(ctx: &mut ExecutionContext, mut scratch: View<'_>, value: &Val) -> Flow<String> {
    if let Some(handler) = ctx.state().metamethod(value, Event::ToString) {
        scratch.load(std::slice::from_ref(value));
        dispatch::call_nonresumable(ctx, scratch, &handler, "__tostring")?;
        return match ctx.results().get(0)? {
            Val::Str(s) => Ok(s.to_string()),
            _ => Err(RuntimeError::user("'__tostring' must return a string").into()),
        };
    }
    let name = ctx
        .state()
        .metatable_of(value)
        .map(|mt| mt.get(Event::Name.key()));
    if let (Some(Val::Str(name)), Some(addr)) = (name, value.addr()) {
        return Ok(format!("{name}: {addr:#x}"));
    }
    Ok(value.to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Protection {
    Plain,
    /// Catchable errors pass through a message handler first.
    Handler,
}

/// `pcall` / `xpcall`. Re-enterable, so the protected callee may yield.
#[derive(Debug)]
struct ProtectedCall {
    protection: Protection,
}

impl ProtectedCall {
    fn value(protection: Protection) -> Val {
        let function: FnRef = Arc::new(ProtectedCall { protection });
        Val::Function(function)
    }

    fn label(&self) -> &'static str {
        match self.protection {
            Protection::Plain => "pcall",
            Protection::Handler => "xpcall",
        }
    }

    fn settle(self: Arc<Self>, ctx: &mut ExecutionContext, mut window: View<'_>, handler: Val, flow: Flow) -> Flow {
        match flow {
            Ok(()) => {
                ctx.results_mut().prepend(Val::Bool(true))?;
                Ok(())
            }
            Err(Unwind::Suspend(mut suspension)) => {
                let saved = SavedFrame {
                    varargs: vec![handler],
                    ..SavedFrame::empty()
                };
                suspension.push(ResumePoint::new(self, 1, saved));
                Err(Unwind::Suspend(suspension))
            }
            Err(Unwind::Error(err)) if err.is_catchable() => {
                debug!(function = self.label(), error = %err, "caught error");
                let mut value = err.to_value();
                if self.protection == Protection::Handler {
                    window.load(std::slice::from_ref(&value));
                    match dispatch::call_nonresumable(ctx, window, &handler, "xpcall handler") {
                        Ok(()) => value = ctx.results().get(0)?,
                        Err(Unwind::Error(err)) if err.is_catchable() => value = err.to_value(),
                        Err(other) => return Err(other),
                    }
                }
                ctx.results_mut().set([Val::Bool(false), value]);
                Ok(())
            }
            Err(other) => Err(other),
        }
    }
}

impl Function for ProtectedCall {
    fn name(&self) -> &str {
        self.label()
    }

    fn arity(&self) -> Arity {
        Arity::Variadic
    }

    fn is_native(&self) -> bool {
        true
    }

    fn invoke(self: Arc<Self>, ctx: &mut ExecutionContext, mut args: View<'_>) -> Flow {
        let name = self.label();
        let target = native::check_any(&args, 1, name)?;
        let (handler, first) = match self.protection {
            Protection::Plain => (Val::Nil, 1),
            Protection::Handler => (native::check_any(&args, 2, name)?, 2),
        };
        let mut window = args.from(first);
        let flow = dispatch::call(ctx, window.reborrow(), &target);
        self.settle(ctx, window, handler, flow)
    }

    fn resume(
        self: Arc<Self>,
        ctx: &mut ExecutionContext,
        mut frame: View<'_>,
        index: u32,
        saved: SavedFrame,
        inner: ResumeChain,
    ) -> Flow {
        if index != 1 {
            return Err(RuntimeError::contract(format!("'{}' has no segment {index}", self.label())).into());
        }
        let handler = saved.varargs.into_iter().next().unwrap_or_default();
        let flow = inner.replay(ctx, frame.reborrow());
        self.settle(ctx, frame, handler, flow)
    }
}
