//! Argument checks for native functions. Positions are 1-based.

use super::{CoroutineRef, View};
use crate::{
    error::RuntimeError,
    val::{FnRef, TableRef, Val},
};

fn expected(args: &View<'_>, position: usize, function: &str, what: &str) -> RuntimeError {
    let got = if position > args.top() { "no value" } else { arg(args, position).type_name() };
    RuntimeError::argument(position, function, format!("{what} expected, got {got}"))
}

/// Argument at `position`, nil when absent.
#[inline]
pub fn arg(args: &View<'_>, position: usize) -> Val {
    if position == 0 || position > args.top() { Val::Nil } else { args.get(position - 1) }
}

pub fn check_any(args: &View<'_>, position: usize, function: &str) -> Result<Val, RuntimeError> {
    if position > args.top() {
        return Err(RuntimeError::argument(position, function, "value expected"));
    }
    Ok(arg(args, position))
}

pub fn check_table(args: &View<'_>, position: usize, function: &str) -> Result<TableRef, RuntimeError> {
    match arg(args, position) {
        Val::Table(t) => Ok(t),
        _ => Err(expected(args, position, function, "table")),
    }
}

pub fn check_function(args: &View<'_>, position: usize, function: &str) -> Result<FnRef, RuntimeError> {
    match arg(args, position) {
        Val::Function(f) => Ok(f),
        _ => Err(expected(args, position, function, "function")),
    }
}

pub fn check_coroutine(args: &View<'_>, position: usize, function: &str) -> Result<CoroutineRef, RuntimeError> {
    match arg(args, position) {
        Val::Coroutine(co) => Ok(co),
        _ => Err(expected(args, position, function, "coroutine")),
    }
}

pub fn check_int(args: &View<'_>, position: usize, function: &str) -> Result<i64, RuntimeError> {
    let value = arg(args, position);
    match value {
        Val::Int(i) => Ok(i),
        Val::Float(_) => value
            .as_int()
            .ok_or_else(|| RuntimeError::argument(position, function, "number has no integer representation")),
        _ => Err(expected(args, position, function, "number")),
    }
}

pub fn opt_int(args: &View<'_>, position: usize, function: &str, default: i64) -> Result<i64, RuntimeError> {
    if arg(args, position).is_nil() { Ok(default) } else { check_int(args, position, function) }
}

/// `nil` or a table; anything else is an argument error.
pub fn check_opt_table(args: &View<'_>, position: usize, function: &str) -> Result<Option<TableRef>, RuntimeError> {
    match arg(args, position) {
        Val::Nil => Ok(None),
        Val::Table(t) => Ok(Some(t)),
        _ => Err(expected(args, position, function, "nil or table")),
    }
}
