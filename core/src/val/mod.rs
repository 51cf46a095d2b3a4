//! Universal value type shared by every compiled unit.

use std::{fmt, sync::Arc};

mod function;
mod table;
mod upvalue;

pub use function::{Arity, FnRef, Function, MAX_FIXED_ARITY, NativeFn, NativeFunction};
pub use table::{Table, TableRef};
pub use upvalue::Upvalue;

use crate::vm::CoroutineRef;

/// Coarse value classification used for type names and per-type metatables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Nil,
    Boolean,
    Number,
    String,
    Table,
    Function,
    Thread,
}

impl ValueKind {
    pub const COUNT: usize = 7;

    pub const fn index(self) -> usize {
        self as usize
    }

    pub const fn name(self) -> &'static str {
        match self {
            ValueKind::Nil => "nil",
            ValueKind::Boolean => "boolean",
            ValueKind::Number => "number",
            ValueKind::String => "string",
            ValueKind::Table => "table",
            ValueKind::Function => "function",
            ValueKind::Thread => "thread",
        }
    }
}

#[derive(Clone, Default)]
pub enum Val {
    #[default]
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    /// Immutable string, cheap to clone
    Str(Arc<str>),
    /// Shared mutable table, compared by identity
    Table(TableRef),
    Function(FnRef),
    Coroutine(CoroutineRef),
}

impl Val {
    pub fn kind(&self) -> ValueKind {
        match self {
            Val::Nil => ValueKind::Nil,
            Val::Bool(_) => ValueKind::Boolean,
            Val::Int(_) | Val::Float(_) => ValueKind::Number,
            Val::Str(_) => ValueKind::String,
            Val::Table(_) => ValueKind::Table,
            Val::Function(_) => ValueKind::Function,
            Val::Coroutine(_) => ValueKind::Thread,
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.kind().name()
    }

    #[inline]
    pub fn is_nil(&self) -> bool {
        matches!(self, Val::Nil)
    }

    /// Everything except `nil` and `false` is true.
    #[inline]
    pub fn truthy(&self) -> bool {
        !matches!(self, Val::Nil | Val::Bool(false))
    }

    /// Integer view of a number; floats qualify only when they hold an exact integer.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Val::Int(i) => Some(*i),
            Val::Float(f) => float_to_int(*f),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Val::Int(i) => Some(*i as f64),
            Val::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Val::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_table(&self) -> Option<&TableRef> {
        match self {
            Val::Table(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<&FnRef> {
        match self {
            Val::Function(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_coroutine(&self) -> Option<&CoroutineRef> {
        match self {
            Val::Coroutine(co) => Some(co),
            _ => None,
        }
    }

    /// Heap address of reference values.
    pub fn addr(&self) -> Option<usize> {
        match self {
            Val::Table(t) => Some(t.addr()),
            Val::Function(f) => Some(Arc::as_ptr(f) as *const () as usize),
            Val::Coroutine(co) => Some(Arc::as_ptr(co) as usize),
            _ => None,
        }
    }

    /// Primitive equality: numbers by value, strings by content, references by identity.
    pub fn raw_eq(&self, other: &Val) -> bool {
        match (self, other) {
            (Val::Nil, Val::Nil) => true,
            (Val::Bool(a), Val::Bool(b)) => a == b,
            (Val::Int(a), Val::Int(b)) => a == b,
            (Val::Float(a), Val::Float(b)) => a == b,
            (Val::Int(a), Val::Float(b)) | (Val::Float(b), Val::Int(a)) => (*a as f64) == *b,
            (Val::Str(a), Val::Str(b)) => a == b,
            (Val::Table(a), Val::Table(b)) => a.ptr_eq(b),
            (Val::Function(a), Val::Function(b)) => std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b)),
            (Val::Coroutine(a), Val::Coroutine(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Plain rendering without consulting `__tostring`.
    pub fn to_display_string(&self) -> String {
        self.to_string()
    }

    pub fn native(name: &'static str, arity: Arity, func: NativeFn) -> Val {
        Val::Function(Arc::new(NativeFunction::new(name, arity, func)))
    }

    pub fn function<F: Function + 'static>(function: F) -> Val {
        Val::Function(Arc::new(function))
    }
}

pub(crate) fn float_to_int(f: f64) -> Option<i64> {
    if f.fract() == 0.0 && (-9_223_372_036_854_775_808.0..9_223_372_036_854_775_808.0).contains(&f) {
        Some(f as i64)
    } else {
        None
    }
}

pub(crate) fn format_float(f: f64) -> String {
    if f.is_nan() {
        return if f.is_sign_negative() { "-nan".into() } else { "nan".into() };
    }
    if f.is_infinite() {
        return if f > 0.0 { "inf".into() } else { "-inf".into() };
    }
    if f.fract() == 0.0 && f.abs() < 1e16 {
        return format!("{f:.1}");
    }
    let mut buf = ryu::Buffer::new();
    buf.format_finite(f).to_string()
}

impl PartialEq for Val {
    fn eq(&self, other: &Self) -> bool {
        self.raw_eq(other)
    }
}

impl fmt::Display for Val {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Val::Nil => f.write_str("nil"),
            Val::Bool(b) => write!(f, "{b}"),
            Val::Int(i) => {
                let mut buf = itoa::Buffer::new();
                f.write_str(buf.format(*i))
            }
            Val::Float(x) => f.write_str(&format_float(*x)),
            Val::Str(s) => f.write_str(s),
            Val::Table(t) => write!(f, "table: {:#x}", t.addr()),
            Val::Function(func) => {
                let addr = Arc::as_ptr(func) as *const () as usize;
                if func.is_native() {
                    write!(f, "function: builtin: {addr:#x}")
                } else {
                    write!(f, "function: {addr:#x}")
                }
            }
            Val::Coroutine(co) => write!(f, "thread: {:#x}", Arc::as_ptr(co) as usize),
        }
    }
}

impl fmt::Debug for Val {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Val::Str(s) => write!(f, "{s:?}"),
            Val::Function(func) => write!(f, "function<{}>", func.name()),
            other => fmt::Display::fmt(other, f),
        }
    }
}

impl From<bool> for Val {
    fn from(value: bool) -> Self {
        Val::Bool(value)
    }
}

impl From<i64> for Val {
    fn from(value: i64) -> Self {
        Val::Int(value)
    }
}

impl From<i32> for Val {
    fn from(value: i32) -> Self {
        Val::Int(value as i64)
    }
}

impl From<usize> for Val {
    fn from(value: usize) -> Self {
        Val::Int(value as i64)
    }
}

impl From<f64> for Val {
    fn from(value: f64) -> Self {
        Val::Float(value)
    }
}

impl From<&str> for Val {
    fn from(value: &str) -> Self {
        Val::Str(value.into())
    }
}

impl From<String> for Val {
    fn from(value: String) -> Self {
        Val::Str(value.into())
    }
}

impl From<Arc<str>> for Val {
    fn from(value: Arc<str>) -> Self {
        Val::Str(value)
    }
}

impl From<TableRef> for Val {
    fn from(value: TableRef) -> Self {
        Val::Table(value)
    }
}

impl From<FnRef> for Val {
    fn from(value: FnRef) -> Self {
        Val::Function(value)
    }
}

impl From<CoroutineRef> for Val {
    fn from(value: CoroutineRef) -> Self {
        Val::Coroutine(value)
    }
}

impl<T: Into<Val>> From<Option<T>> for Val {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Val::Nil)
    }
}
