use std::{fmt, sync::Arc};

use parking_lot::Mutex;
use tracing::debug;

use super::{ExecutionContext, Flow, ResumeChain, ResumePoint, Suspension, Unwind, View, dispatch};
use crate::{error::RuntimeError, val::Val};

pub type CoroutineRef = Arc<Coroutine>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoroutineStatus {
    Suspended,
    Running,
    /// Alive but currently resuming another coroutine.
    Normal,
    Dead,
}

impl CoroutineStatus {
    pub fn name(self) -> &'static str {
        match self {
            CoroutineStatus::Suspended => "suspended",
            CoroutineStatus::Running => "running",
            CoroutineStatus::Normal => "normal",
            CoroutineStatus::Dead => "dead",
        }
    }
}

enum State {
    /// Created, body not entered yet.
    Fresh(Val),
    /// Frames collected by the last yield, innermost first.
    Suspended(Vec<ResumePoint>),
    Running,
    Normal,
    Dead,
}

impl State {
    fn status(&self) -> CoroutineStatus {
        match self {
            State::Fresh(_) | State::Suspended(_) => CoroutineStatus::Suspended,
            State::Running => CoroutineStatus::Running,
            State::Normal => CoroutineStatus::Normal,
            State::Dead => CoroutineStatus::Dead,
        }
    }
}

/// How a resume handed control back. The values are in the result channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeOutcome {
    Yielded,
    Returned,
}

pub struct Coroutine {
    state: Mutex<State>,
}

impl Coroutine {
    pub fn new(body: Val) -> CoroutineRef {
        Arc::new(Coroutine {
            state: Mutex::new(State::Fresh(body)),
        })
    }

    pub fn status(&self) -> CoroutineStatus {
        self.state.lock().status()
    }

    /// Chain length of a suspended coroutine; zero otherwise.
    pub fn suspended_depth(&self) -> usize {
        match &*self.state.lock() {
            State::Suspended(chain) => chain.len(),
            _ => 0,
        }
    }

    fn transition(&self, next: State) {
        let mut state = self.state.lock();
        debug!(
            target: "tidal::vm::coroutine",
            coroutine = self as *const Coroutine as usize,
            from = state.status().name(),
            to = next.status().name(),
            "status change"
        );
        *state = next;
    }
}

impl fmt::Debug for Coroutine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Coroutine").field("status", &self.status()).finish()
    }
}

/// Run `co` until it yields, returns or fails.
///
/// A fresh coroutine calls its body with `args`; a suspended one replays its
/// chain and `args` become the results of the pending yield. Either way the
/// values handed back are left in the result channel.
pub fn resume(
    ctx: &mut ExecutionContext,
    mut window: View<'_>,
    co: &CoroutineRef,
    args: Vec<Val>,
) -> Result<ResumeOutcome, RuntimeError> {
    let prior = {
        let mut state = co.state.lock();
        match state.status() {
            CoroutineStatus::Dead => return Err(RuntimeError::Coroutine("cannot resume dead coroutine".into())),
            CoroutineStatus::Running | CoroutineStatus::Normal => {
                return Err(RuntimeError::Coroutine("cannot resume non-suspended coroutine".into()));
            }
            CoroutineStatus::Suspended => std::mem::replace(&mut *state, State::Running),
        }
    };
    debug!(target: "tidal::vm::coroutine", nargs = args.len(), "resume");

    let (outer, outer_boundaries) = ctx.switch_coroutine(Some(co.clone()), 0);
    if let Some(outer) = &outer {
        outer.transition(State::Normal);
    }

    let flow: Flow = match prior {
        State::Fresh(body) => dispatch::call_with(ctx, window.reborrow(), &body, &args),
        State::Suspended(links) => ResumeChain::new(links, args).replay(ctx, window.reborrow()),
        _ => Err(RuntimeError::contract("coroutine state changed during resume").into()),
    };

    ctx.switch_coroutine(outer.clone(), outer_boundaries);
    if let Some(outer) = &outer {
        outer.transition(State::Running);
    }

    match flow {
        Ok(()) => {
            co.transition(State::Dead);
            Ok(ResumeOutcome::Returned)
        }
        Err(Unwind::Suspend(suspension)) => {
            let (values, chain) = suspension.into_parts();
            co.transition(State::Suspended(chain));
            ctx.results_mut().set(values);
            Ok(ResumeOutcome::Yielded)
        }
        Err(Unwind::Error(err)) => {
            co.transition(State::Dead);
            Err(err)
        }
    }
}

/// Start a suspension carrying `values` out of the running coroutine.
pub fn yield_values(ctx: &ExecutionContext, values: Vec<Val>) -> Flow {
    if ctx.current_coroutine().is_none() {
        return Err(RuntimeError::YieldOutsideCoroutine.into());
    }
    if !ctx.is_yieldable() {
        return Err(RuntimeError::YieldAcrossBoundary("native call".into()).into());
    }
    Err(Unwind::Suspend(Suspension::new(values)))
}
