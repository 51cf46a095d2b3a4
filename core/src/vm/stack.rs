use tracing::trace;

use crate::val::{Upvalue, Val};

/// One activation slot: a flat value or the cell of a reified local.
#[derive(Debug, Clone)]
pub enum Slot {
    Value(Val),
    Cell(Upvalue),
}

impl Default for Slot {
    fn default() -> Self {
        Slot::Value(Val::Nil)
    }
}

impl Slot {
    pub fn value(&self) -> Val {
        match self {
            Slot::Value(v) => v.clone(),
            Slot::Cell(cell) => cell.get(),
        }
    }
}

/// Growable backing store shared by every frame of one call chain.
#[derive(Debug, Default)]
pub struct ActivationStack {
    slots: Vec<Slot>,
}

impl ActivationStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, Slot::default);
        ActivationStack { slots }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn get(&self, index: usize) -> Val {
        self.slots.get(index).map(Slot::value).unwrap_or_default()
    }

    pub fn set(&mut self, index: usize, value: Val) {
        self.grow_to(index + 1);
        self.slots[index] = Slot::Value(value);
    }

    /// Extend the backing to at least `len` slots. Never shrinks.
    pub fn grow_to(&mut self, len: usize) {
        if len > self.slots.len() {
            let target = len.max(self.slots.len() * 2).max(16);
            trace!(target: "tidal::vm::stack", from = self.slots.len(), to = target, "grow activation stack");
            self.slots.resize_with(target, Slot::default);
        }
    }

    /// View over the whole backing with nothing live.
    pub fn view(&mut self) -> View<'_> {
        View {
            stack: self,
            base: 0,
            top: 0,
        }
    }
}

/// Window over an [`ActivationStack`]: a base offset plus a live count.
///
/// Slot indices are relative to the base. Child views from [`View::from`]
/// borrow the same backing, so writes through either side are visible to
/// the other.
#[derive(Debug)]
pub struct View<'s> {
    stack: &'s mut ActivationStack,
    base: usize,
    top: usize,
}

impl<'s> View<'s> {
    #[inline]
    pub fn base(&self) -> usize {
        self.base
    }

    /// Number of leading live slots.
    #[inline]
    pub fn top(&self) -> usize {
        self.top
    }

    /// Mark the first `top` slots live without touching their contents.
    pub fn set_top(&mut self, top: usize) {
        self.stack.grow_to(self.base + top);
        self.top = top;
    }

    /// Adapt the live region to exactly `n` slots: newly exposed slots are
    /// cleared to nil, slots past `n` stop being live.
    pub fn fit(&mut self, n: usize) {
        if self.top < n {
            self.stack.grow_to(self.base + n);
            for slot in &mut self.stack.slots[self.base + self.top..self.base + n] {
                *slot = Slot::default();
            }
        }
        self.top = n;
    }

    #[inline]
    pub fn get(&self, index: usize) -> Val {
        self.stack.get(self.base + index)
    }

    pub fn slot(&self, index: usize) -> Slot {
        self.stack.slots.get(self.base + index).cloned().unwrap_or_default()
    }

    /// Raw write; replaces a reified slot's cell.
    #[inline]
    pub fn set(&mut self, index: usize, value: Val) {
        self.stack.set(self.base + index, value);
    }

    pub fn set_slot(&mut self, index: usize, slot: Slot) {
        self.grow_to(index + 1);
        self.stack.slots[self.base + index] = slot;
    }

    /// Write through the cell when the slot is reified.
    pub fn store(&mut self, index: usize, value: Val) {
        match self.stack.slots.get(self.base + index) {
            Some(Slot::Cell(cell)) => cell.set(value),
            _ => self.set(index, value),
        }
    }

    /// Replace slot `index` with a fresh cell holding its current value.
    pub fn reify(&mut self, index: usize) -> Upvalue {
        let cell = Upvalue::new(self.get(index));
        self.set_slot(index, Slot::Cell(cell.clone()));
        cell
    }

    pub fn cell(&self, index: usize) -> Option<Upvalue> {
        match self.stack.slots.get(self.base + index) {
            Some(Slot::Cell(cell)) => Some(cell.clone()),
            _ => None,
        }
    }

    /// Ensure `len` slots are addressable from the base.
    pub fn grow_to(&mut self, len: usize) {
        self.stack.grow_to(self.base + len);
    }

    /// Reset `start..end` to nil flat slots.
    pub fn clear_range(&mut self, start: usize, end: usize) {
        if start >= end {
            return;
        }
        self.grow_to(end);
        for slot in &mut self.stack.slots[self.base + start..self.base + end] {
            *slot = Slot::default();
        }
    }

    /// Child view starting `offset` slots past this base.
    pub fn from(&mut self, offset: usize) -> View<'_> {
        View {
            base: self.base + offset,
            top: self.top.saturating_sub(offset),
            stack: &mut *self.stack,
        }
    }

    /// Same window, borrowed again.
    pub fn reborrow(&mut self) -> View<'_> {
        View {
            base: self.base,
            top: self.top,
            stack: &mut *self.stack,
        }
    }

    /// Copy `values` into the leading slots and make exactly them live.
    pub fn load(&mut self, values: &[Val]) {
        self.grow_to(values.len());
        for (i, value) in values.iter().enumerate() {
            self.stack.slots[self.base + i] = Slot::Value(value.clone());
        }
        self.top = values.len();
    }

    /// Shift the live region right by one and put `value` in slot 0.
    pub fn insert_front(&mut self, value: Val) {
        let top = self.top;
        self.grow_to(top + 1);
        let start = self.base;
        self.stack.slots[start..=start + top].rotate_right(1);
        self.stack.slots[start] = Slot::Value(value);
        self.top = top + 1;
    }

    /// Values of the live slots `start..top`.
    pub fn values_from(&self, start: usize) -> Vec<Val> {
        (start..self.top).map(|i| self.get(i)).collect()
    }

    /// Values of `start..end`.
    pub fn values(&self, start: usize, end: usize) -> impl Iterator<Item = Val> + '_ {
        (start..end).map(move |i| self.get(i))
    }

    /// Copy of the first `len` slots, cells kept shared.
    pub fn snapshot(&self, len: usize) -> Vec<Slot> {
        (0..len).map(|i| self.slot(i)).collect()
    }

    pub fn restore(&mut self, slots: Vec<Slot>) {
        self.grow_to(slots.len());
        let base = self.base;
        for (i, slot) in slots.into_iter().enumerate() {
            self.stack.slots[base + i] = slot;
        }
    }
}
