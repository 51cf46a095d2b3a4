//! Operator semantics: intrinsic fast paths plus the metamethod events
//! dispatch falls back to.

mod ops;

pub use ops::{BinOp, Event, UnOp};
