//! Execution core: activation storage, the result channel, call dispatch with
//! its tail-call trampoline, and the suspend/resume protocol shared by every
//! compiled body.

mod bytecode;
mod closure;
mod context;
pub mod coroutine;
pub mod dispatch;
pub mod native;
mod results;
mod stack;
mod unit;
mod unwind;

pub use bytecode::{Capture, Count, Op, Proto, ProtoBuilder, Reg, UpvalueDesc};
pub use closure::{ProtoUnit, closure};
pub use context::{ExecutionContext, RuntimeState, StateHandle};
pub use coroutine::{Coroutine, CoroutineRef, CoroutineStatus, ResumeOutcome};
pub use results::ResultChannel;
pub use stack::{ActivationStack, Slot, View};
pub use unit::{Compiled, CompiledUnit, Frame, Layout};
pub use unwind::{Flow, ResumeChain, ResumePoint, SavedFrame, Suspension, Unwind};

#[cfg(test)]
mod vm_test;
