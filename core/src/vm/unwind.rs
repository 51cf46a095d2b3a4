//! Unwind signal and resumption chain.
//!
//! A suspension travels outward as `Err(Unwind::Suspend(..))`. Every frame
//! it passes through pushes a [`ResumePoint`], so the chain is ordered
//! innermost first. Errors travel the same way but collect nothing.

use tracing::trace;

use super::{ExecutionContext, View, dispatch, stack::Slot};
use crate::{
    error::RuntimeError,
    val::{FnRef, Val},
};

pub type Flow<T = ()> = Result<T, Unwind>;

#[derive(Debug)]
pub enum Unwind {
    Suspend(Suspension),
    Error(RuntimeError),
}

impl From<RuntimeError> for Unwind {
    fn from(err: RuntimeError) -> Self {
        Unwind::Error(err)
    }
}

/// Slots a frame needs to continue after a resume.
#[derive(Debug, Default)]
pub struct SavedFrame {
    pub slots: Vec<Slot>,
    pub top: usize,
    pub varargs: Vec<Val>,
}

impl SavedFrame {
    pub fn empty() -> Self {
        Self::default()
    }
}

/// One suspended frame: who to re-enter, where, and with what.
#[derive(Debug)]
pub struct ResumePoint {
    function: FnRef,
    index: u32,
    saved: SavedFrame,
}

impl ResumePoint {
    pub fn new(function: FnRef, index: u32, saved: SavedFrame) -> Self {
        ResumePoint { function, index, saved }
    }

    pub fn function(&self) -> &FnRef {
        &self.function
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn saved(&self) -> &SavedFrame {
        &self.saved
    }
}

/// Payload of a propagating suspend: the yielded values plus the frames
/// collected so far.
#[derive(Debug, Default)]
pub struct Suspension {
    values: Vec<Val>,
    chain: Vec<ResumePoint>,
}

impl Suspension {
    pub fn new(values: Vec<Val>) -> Self {
        Suspension {
            values,
            chain: Vec::new(),
        }
    }

    /// Register the frame being unwound. Called once per frame, on the way out.
    pub fn push(&mut self, point: ResumePoint) {
        trace!(
            target: "tidal::vm::suspend",
            function = point.function.name(),
            index = point.index,
            depth = self.chain.len() + 1,
            "frame suspended"
        );
        self.chain.push(point);
    }

    pub fn values(&self) -> &[Val] {
        &self.values
    }

    /// Frames collected so far, innermost first.
    pub fn chain(&self) -> &[ResumePoint] {
        &self.chain
    }

    pub fn into_parts(self) -> (Vec<Val>, Vec<ResumePoint>) {
        (self.values, self.chain)
    }
}

/// Frames still to be replayed below the current one, plus the values the
/// innermost suspension point receives.
#[derive(Debug, Default)]
pub struct ResumeChain {
    links: Vec<ResumePoint>,
    values: Vec<Val>,
}

impl ResumeChain {
    /// `links` is innermost first, as collected by [`Suspension`].
    pub fn new(links: Vec<ResumePoint>, values: Vec<Val>) -> Self {
        ResumeChain { links, values }
    }

    pub fn depth(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// Re-enter the outermost remaining link, handing it the rest of the chain.
    ///
    /// With no links left this is the suspension point itself: the resume
    /// values become its results. On success the result channel holds the
    /// outcome of the replayed operation, with tail calls already drained.
    pub fn replay(mut self, ctx: &mut ExecutionContext, mut window: View<'_>) -> Flow {
        let Some(point) = self.links.pop() else {
            ctx.results_mut().set(self.values);
            return Ok(());
        };
        let ResumePoint { function, index, saved } = point;
        trace!(
            target: "tidal::vm::suspend",
            function = function.name(),
            index,
            remaining = self.links.len(),
            "replay link"
        );
        ctx.enter()?;
        let outcome = function.resume(ctx, window.reborrow(), index, saved, self);
        ctx.leave();
        outcome?;
        dispatch::drain_tail_calls(ctx, window)
    }
}
