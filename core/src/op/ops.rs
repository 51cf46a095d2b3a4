use std::cmp::Ordering;
use std::fmt::{self, Display};

use once_cell::sync::Lazy;

use crate::{error::RuntimeError, val::Val};

/// Metatable entries consulted by dispatch and the base library.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Event {
    Index,
    NewIndex,
    Call,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    IDiv,
    BAnd,
    BOr,
    BXor,
    Shl,
    Shr,
    Concat,
    Unm,
    BNot,
    Len,
    Eq,
    Lt,
    Le,
    ToString,
    Name,
    Metatable,
}

const EVENT_NAMES: [&str; 25] = [
    "__index",
    "__newindex",
    "__call",
    "__add",
    "__sub",
    "__mul",
    "__div",
    "__mod",
    "__pow",
    "__idiv",
    "__band",
    "__bor",
    "__bxor",
    "__shl",
    "__shr",
    "__concat",
    "__unm",
    "__bnot",
    "__len",
    "__eq",
    "__lt",
    "__le",
    "__tostring",
    "__name",
    "__metatable",
];

// Interned once so metatable lookups never allocate.
static EVENT_KEYS: Lazy<Vec<Val>> = Lazy::new(|| EVENT_NAMES.iter().map(|name| Val::from(*name)).collect());

impl Event {
    pub fn name(self) -> &'static str {
        EVENT_NAMES[self as usize]
    }

    pub fn key(self) -> &'static Val {
        &EVENT_KEYS[self as usize]
    }
}

impl Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    IDiv,
    BAnd,
    BOr,
    BXor,
    Shl,
    Shr,
    Concat,
    Eq,
    Ne,
    Lt,
    Le,
}

impl BinOp {
    pub fn event(self) -> Event {
        match self {
            BinOp::Add => Event::Add,
            BinOp::Sub => Event::Sub,
            BinOp::Mul => Event::Mul,
            BinOp::Div => Event::Div,
            BinOp::Mod => Event::Mod,
            BinOp::Pow => Event::Pow,
            BinOp::IDiv => Event::IDiv,
            BinOp::BAnd => Event::BAnd,
            BinOp::BOr => Event::BOr,
            BinOp::BXor => Event::BXor,
            BinOp::Shl => Event::Shl,
            BinOp::Shr => Event::Shr,
            BinOp::Concat => Event::Concat,
            BinOp::Eq | BinOp::Ne => Event::Eq,
            BinOp::Lt => Event::Lt,
            BinOp::Le => Event::Le,
        }
    }

    pub fn is_bitwise(self) -> bool {
        matches!(self, BinOp::BAnd | BinOp::BOr | BinOp::BXor | BinOp::Shl | BinOp::Shr)
    }

    pub fn is_comparison(self) -> bool {
        matches!(self, BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le)
    }

    /// Intrinsic evaluation. `Ok(None)` means the operands need a metamethod.
    pub fn apply(self, lhs: &Val, rhs: &Val) -> Result<Option<Val>, RuntimeError> {
        match self {
            BinOp::Add => Ok(arith(lhs, rhs, i64::wrapping_add, |a, b| a + b)),
            BinOp::Sub => Ok(arith(lhs, rhs, i64::wrapping_sub, |a, b| a - b)),
            BinOp::Mul => Ok(arith(lhs, rhs, i64::wrapping_mul, |a, b| a * b)),
            BinOp::Div => Ok(float_arith(lhs, rhs, |a, b| a / b)),
            BinOp::Pow => Ok(float_arith(lhs, rhs, f64::powf)),
            BinOp::Mod => match (lhs, rhs) {
                (Val::Int(_), Val::Int(0)) => Err(RuntimeError::Arithmetic("attempt to perform 'n%0'".into())),
                (Val::Int(a), Val::Int(b)) => Ok(Some(Val::Int(int_mod(*a, *b)))),
                _ => Ok(float_arith(lhs, rhs, float_mod)),
            },
            BinOp::IDiv => match (lhs, rhs) {
                (Val::Int(_), Val::Int(0)) => Err(RuntimeError::Arithmetic("attempt to perform 'n//0'".into())),
                (Val::Int(a), Val::Int(b)) => Ok(Some(Val::Int(int_floor_div(*a, *b)))),
                _ => Ok(float_arith(lhs, rhs, |a, b| (a / b).floor())),
            },
            BinOp::BAnd | BinOp::BOr | BinOp::BXor | BinOp::Shl | BinOp::Shr => {
                let (Some(_), Some(_)) = (lhs.as_float(), rhs.as_float()) else {
                    return Ok(None);
                };
                let (Some(a), Some(b)) = (lhs.as_int(), rhs.as_int()) else {
                    return Err(RuntimeError::Arithmetic("number has no integer representation".into()));
                };
                let v = match self {
                    BinOp::BAnd => a & b,
                    BinOp::BOr => a | b,
                    BinOp::BXor => a ^ b,
                    BinOp::Shl => shift_left(a, b),
                    _ => shift_left(a, b.wrapping_neg()),
                };
                Ok(Some(Val::Int(v)))
            }
            BinOp::Concat => match (lhs, rhs) {
                (Val::Str(_) | Val::Int(_) | Val::Float(_), Val::Str(_) | Val::Int(_) | Val::Float(_)) => {
                    let mut out = lhs.to_string();
                    out.push_str(&rhs.to_string());
                    Ok(Some(Val::from(out)))
                }
                _ => Ok(None),
            },
            BinOp::Eq | BinOp::Ne => {
                let eq = if lhs.raw_eq(rhs) {
                    true
                } else if matches!((lhs, rhs), (Val::Table(_), Val::Table(_))) {
                    return Ok(None);
                } else {
                    false
                };
                Ok(Some(Val::Bool(if self == BinOp::Eq { eq } else { !eq })))
            }
            BinOp::Lt => Ok(compare(lhs, rhs).map(|o| Val::Bool(o == Ordering::Less))),
            BinOp::Le => Ok(compare(lhs, rhs).map(|o| Val::Bool(o != Ordering::Greater))),
        }
    }

    /// Normalize a metamethod's first result.
    pub fn finish_meta(self, raw: Val) -> Val {
        match self {
            BinOp::Eq | BinOp::Lt | BinOp::Le => Val::Bool(raw.truthy()),
            BinOp::Ne => Val::Bool(!raw.truthy()),
            _ => raw,
        }
    }

    /// Outcome when neither operand provides a handler.
    pub fn missing_handler(self, lhs: &Val, rhs: &Val) -> Result<Val, RuntimeError> {
        match self {
            BinOp::Eq => Ok(Val::Bool(false)),
            BinOp::Ne => Ok(Val::Bool(true)),
            BinOp::Lt | BinOp::Le => Err(RuntimeError::Compare {
                lhs: lhs.type_name(),
                rhs: rhs.type_name(),
            }),
            BinOp::Concat => {
                let bad = if matches!(lhs, Val::Str(_) | Val::Int(_) | Val::Float(_)) { rhs } else { lhs };
                Err(RuntimeError::Operand {
                    action: "concatenate",
                    type_name: bad.type_name(),
                })
            }
            op => {
                let bad = if lhs.as_float().is_some() { rhs } else { lhs };
                let action = if op.is_bitwise() {
                    "perform bitwise operation on"
                } else {
                    "perform arithmetic on"
                };
                Err(RuntimeError::Operand {
                    action,
                    type_name: bad.type_name(),
                })
            }
        }
    }
}

impl Display for BinOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Mod => "%",
            BinOp::Pow => "^",
            BinOp::IDiv => "//",
            BinOp::BAnd => "&",
            BinOp::BOr => "|",
            BinOp::BXor => "~",
            BinOp::Shl => "<<",
            BinOp::Shr => ">>",
            BinOp::Concat => "..",
            BinOp::Eq => "==",
            BinOp::Ne => "~=",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
        };
        f.write_str(symbol)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    Neg,
    BNot,
    Len,
    Not,
}

impl UnOp {
    pub fn event(self) -> Option<Event> {
        match self {
            UnOp::Neg => Some(Event::Unm),
            UnOp::BNot => Some(Event::BNot),
            UnOp::Len => Some(Event::Len),
            UnOp::Not => None,
        }
    }

    /// Intrinsic evaluation. Tables report `None` for `Len` so their
    /// `__len` gets a chance before the raw border.
    pub fn apply(self, operand: &Val) -> Result<Option<Val>, RuntimeError> {
        match self {
            UnOp::Not => Ok(Some(Val::Bool(!operand.truthy()))),
            UnOp::Neg => Ok(match operand {
                Val::Int(i) => Some(Val::Int(i.wrapping_neg())),
                Val::Float(f) => Some(Val::Float(-f)),
                _ => None,
            }),
            UnOp::BNot => match operand {
                Val::Int(_) | Val::Float(_) => match operand.as_int() {
                    Some(i) => Ok(Some(Val::Int(!i))),
                    None => Err(RuntimeError::Arithmetic("number has no integer representation".into())),
                },
                _ => Ok(None),
            },
            UnOp::Len => Ok(match operand {
                Val::Str(s) => Some(Val::Int(s.len() as i64)),
                _ => None,
            }),
        }
    }

    pub fn missing_handler(self, operand: &Val) -> Result<Val, RuntimeError> {
        match (self, operand) {
            (UnOp::Len, Val::Table(t)) => Ok(Val::Int(t.len() as i64)),
            (UnOp::Len, other) => Err(RuntimeError::Operand {
                action: "get length of",
                type_name: other.type_name(),
            }),
            (UnOp::BNot, other) => Err(RuntimeError::Operand {
                action: "perform bitwise operation on",
                type_name: other.type_name(),
            }),
            (_, other) => Err(RuntimeError::Operand {
                action: "perform arithmetic on",
                type_name: other.type_name(),
            }),
        }
    }
}

impl Display for UnOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            UnOp::Neg => "-",
            UnOp::BNot => "~",
            UnOp::Len => "#",
            UnOp::Not => "not",
        };
        f.write_str(symbol)
    }
}

fn arith(lhs: &Val, rhs: &Val, int: fn(i64, i64) -> i64, float: fn(f64, f64) -> f64) -> Option<Val> {
    match (lhs, rhs) {
        (Val::Int(a), Val::Int(b)) => Some(Val::Int(int(*a, *b))),
        _ => float_arith(lhs, rhs, float),
    }
}

fn float_arith(lhs: &Val, rhs: &Val, float: fn(f64, f64) -> f64) -> Option<Val> {
    Some(Val::Float(float(lhs.as_float()?, rhs.as_float()?)))
}

fn int_mod(a: i64, b: i64) -> i64 {
    let r = a.wrapping_rem(b);
    if r != 0 && (r ^ b) < 0 { r + b } else { r }
}

fn int_floor_div(a: i64, b: i64) -> i64 {
    let q = a.wrapping_div(b);
    if a.wrapping_rem(b) != 0 && (a ^ b) < 0 { q - 1 } else { q }
}

fn float_mod(a: f64, b: f64) -> f64 {
    let r = a % b;
    if r != 0.0 && (r < 0.0) != (b < 0.0) { r + b } else { r }
}

fn shift_left(a: i64, n: i64) -> i64 {
    if n <= -64 || n >= 64 {
        0
    } else if n >= 0 {
        ((a as u64) << n) as i64
    } else {
        ((a as u64) >> (-n)) as i64
    }
}

fn compare(lhs: &Val, rhs: &Val) -> Option<Ordering> {
    match (lhs, rhs) {
        (Val::Int(a), Val::Int(b)) => Some(a.cmp(b)),
        (Val::Str(a), Val::Str(b)) => Some(a.as_bytes().cmp(b.as_bytes())),
        _ => {
            let (a, b) = (lhs.as_float()?, rhs.as_float()?);
            // NaN compares false both ways
            Some(a.partial_cmp(&b).unwrap_or(Ordering::Greater))
        }
    }
}
