//! Raw metatable access and upvalue introspection. Upvalue indices are 1-based.

use tidal_core::{
    error::RuntimeError,
    module::Module,
    val::{Arity, FnRef, Upvalue, Val},
    vm::{ExecutionContext, Flow, View, native},
};

#[derive(Debug)]
pub struct DebugModule {
    functions: Vec<(&'static str, Val)>,
}

impl Default for DebugModule {
    fn default() -> Self {
        Self::new()
    }
}

fn upvalue_at(function: &FnRef, n: i64) -> Option<(std::sync::Arc<str>, Upvalue)> {
    let index = usize::try_from(n).ok()?.checked_sub(1)?;
    function.upvalue(index)
}

fn checked_upvalue(
    args: &View<'_>,
    position: usize,
    function_name: &str,
) -> Result<(FnRef, usize, Upvalue), RuntimeError> {
    let function = native::check_function(args, position, function_name)?;
    let n = native::check_int(args, position + 1, function_name)?;
    let (_, cell) = upvalue_at(&function, n)
        .ok_or_else(|| RuntimeError::argument(position + 1, function_name, "invalid upvalue index"))?;
    Ok((function, n as usize - 1, cell))
}

impl DebugModule {
    pub fn new() -> Self {
        let functions = vec![
            ("getmetatable", Val::native("getmetatable", Arity::fixed(1), Self::getmetatable)),
            ("setmetatable", Val::native("setmetatable", Arity::fixed(2), Self::setmetatable)),
            ("getupvalue", Val::native("getupvalue", Arity::fixed(2), Self::getupvalue)),
            ("setupvalue", Val::native("setupvalue", Arity::fixed(3), Self::setupvalue)),
            ("upvalueid", Val::native("upvalueid", Arity::fixed(2), Self::upvalueid)),
            ("upvaluejoin", Val::native("upvaluejoin", Arity::fixed(4), Self::upvaluejoin)),
        ];
        Self { functions }
    }

    /// Ignores `__metatable`.
    fn getmetatable(ctx: &mut ExecutionContext, args: View<'_>) -> Flow {
        let value = native::arg(&args, 1);
        let result = ctx.state().metatable_of(&value).map(Val::Table).unwrap_or_default();
        ctx.results_mut().set_one(result);
        Ok(())
    }

    /// Tables get their own metatable; any other value sets its type's.
    fn setmetatable(ctx: &mut ExecutionContext, args: View<'_>) -> Flow {
        let value = native::arg(&args, 1);
        let metatable = native::check_opt_table(&args, 2, "setmetatable")?;
        match &value {
            Val::Table(t) => t.set_metatable(metatable),
            other => ctx.state().set_type_metatable(other.kind(), metatable),
        }
        ctx.results_mut().set_one(value);
        Ok(())
    }

    fn getupvalue(ctx: &mut ExecutionContext, args: View<'_>) -> Flow {
        let function = native::check_function(&args, 1, "getupvalue")?;
        let n = native::check_int(&args, 2, "getupvalue")?;
        match upvalue_at(&function, n) {
            Some((name, cell)) => ctx.results_mut().set([Val::from(name), cell.get()]),
            None => ctx.results_mut().clear(),
        }
        Ok(())
    }

    fn setupvalue(ctx: &mut ExecutionContext, args: View<'_>) -> Flow {
        let function = native::check_function(&args, 1, "setupvalue")?;
        let n = native::check_int(&args, 2, "setupvalue")?;
        match upvalue_at(&function, n) {
            Some((name, cell)) => {
                cell.set(native::arg(&args, 3));
                ctx.results_mut().set_one(Val::from(name));
            }
            None => ctx.results_mut().clear(),
        }
        Ok(())
    }

    fn upvalueid(ctx: &mut ExecutionContext, args: View<'_>) -> Flow {
        let (_, _, cell) = checked_upvalue(&args, 1, "upvalueid")?;
        ctx.results_mut().set_one(Val::from(cell.id()));
        Ok(())
    }

    /// Make upvalue `n1` of `f1` refer to upvalue `n2` of `f2`.
    fn upvaluejoin(ctx: &mut ExecutionContext, args: View<'_>) -> Flow {
        let (target, index, _) = checked_upvalue(&args, 1, "upvaluejoin")?;
        let (_, _, cell) = checked_upvalue(&args, 3, "upvaluejoin")?;
        if !target.replace_upvalue(index, cell) {
            return Err(RuntimeError::argument(2, "upvaluejoin", "invalid upvalue index").into());
        }
        ctx.results_mut().clear();
        Ok(())
    }
}

impl Module for DebugModule {
    fn name(&self) -> &str {
        "debug"
    }

    fn description(&self) -> &str {
        "raw metatables and upvalue access"
    }

    fn exports(&self) -> Vec<(&'static str, Val)> {
        self.functions.clone()
    }
}
