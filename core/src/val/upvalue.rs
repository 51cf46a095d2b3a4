use std::{fmt, sync::Arc};

use parking_lot::Mutex;

use super::Val;

/// Heap cell backing a reified local.
///
/// The defining frame and every capturing closure hold clones of the same
/// cell; reads and writes always go through it.
#[derive(Clone, Default)]
pub struct Upvalue(Arc<Mutex<Val>>);

impl Upvalue {
    pub fn new(value: Val) -> Self {
        Upvalue(Arc::new(Mutex::new(value)))
    }

    pub fn get(&self) -> Val {
        self.0.lock().clone()
    }

    pub fn set(&self, value: Val) {
        *self.0.lock() = value;
    }

    pub fn ptr_eq(&self, other: &Upvalue) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Stable identity of the cell, shared by every holder.
    pub fn id(&self) -> usize {
        Arc::as_ptr(&self.0) as usize
    }
}

impl fmt::Debug for Upvalue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "upvalue({:#x})", self.id())
    }
}
