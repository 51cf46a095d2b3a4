use thiserror::Error;

use crate::val::Val;

/// Errors raised while executing compiled units.
///
/// Everything except [`RuntimeError::ContractViolation`] is a language-level
/// failure and can be caught by a protected call.
#[derive(Debug, Clone, Error)]
pub enum RuntimeError {
    #[error("attempt to call a {type_name} value")]
    NotCallable { type_name: &'static str },

    #[error("internal contract violation: {0}")]
    ContractViolation(String),

    #[error("{}", .0.to_display_string())]
    User(Val),

    #[error("attempt to {action} a {type_name} value")]
    Operand { action: &'static str, type_name: &'static str },

    #[error("attempt to compare {}", compare_operands(.lhs, .rhs))]
    Compare { lhs: &'static str, rhs: &'static str },

    #[error("attempt to index a {type_name} value")]
    Index { type_name: &'static str },

    #[error("table index is {0}")]
    InvalidKey(&'static str),

    #[error("{0}")]
    Arithmetic(String),

    #[error("bad argument #{position} to '{function}' ({message})")]
    Argument {
        position: usize,
        function: String,
        message: String,
    },

    #[error("{0}")]
    Coroutine(String),

    #[error("attempt to yield from outside a coroutine")]
    YieldOutsideCoroutine,

    #[error("attempt to yield across a non-resumable call boundary ({0})")]
    YieldAcrossBoundary(String),

    #[error("stack overflow (call depth {depth})")]
    StackOverflow { depth: usize },
}

fn compare_operands(lhs: &str, rhs: &str) -> String {
    if lhs == rhs {
        format!("two {lhs} values")
    } else {
        format!("{lhs} with {rhs}")
    }
}

impl RuntimeError {
    pub fn contract(message: impl Into<String>) -> Self {
        RuntimeError::ContractViolation(message.into())
    }

    pub fn user(value: impl Into<Val>) -> Self {
        RuntimeError::User(value.into())
    }

    pub fn argument(position: usize, function: impl Into<String>, message: impl Into<String>) -> Self {
        RuntimeError::Argument {
            position,
            function: function.into(),
            message: message.into(),
        }
    }

    /// Whether a protected call may convert this error into a result.
    pub fn is_catchable(&self) -> bool {
        !matches!(self, RuntimeError::ContractViolation(_))
    }

    /// The value a protected call hands back to the script.
    pub fn to_value(&self) -> Val {
        match self {
            RuntimeError::User(value) => value.clone(),
            other => Val::from(other.to_string()),
        }
    }
}
