use std::{
    fmt,
    hash::{Hash, Hasher},
    sync::Arc,
};

use parking_lot::{Mutex, MutexGuard};
use rustc_hash::FxHashMap;

use super::{Val, float_to_int};
use crate::{error::RuntimeError, op::Event};

/// Hash-part key. Floats holding an exact integer are stored as integers so
/// `t[1]` and `t[1.0]` name the same entry.
#[derive(Clone)]
struct Key(Val);

impl Key {
    fn for_insert(key: Val) -> Result<Key, RuntimeError> {
        match key {
            Val::Nil => Err(RuntimeError::InvalidKey("nil")),
            Val::Float(f) if f.is_nan() => Err(RuntimeError::InvalidKey("NaN")),
            Val::Float(f) => Ok(Key(float_to_int(f).map(Val::Int).unwrap_or(Val::Float(f)))),
            other => Ok(Key(other)),
        }
    }

    fn for_lookup(key: &Val) -> Option<Key> {
        match key {
            Val::Nil => None,
            Val::Float(f) if f.is_nan() => None,
            Val::Float(f) => Some(Key(float_to_int(*f).map(Val::Int).unwrap_or(Val::Float(*f)))),
            other => Some(Key(other.clone())),
        }
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        self.0.raw_eq(&other.0)
    }
}

impl Eq for Key {}

impl Hash for Key {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match &self.0 {
            Val::Nil => 0u8.hash(state),
            Val::Bool(b) => {
                1u8.hash(state);
                b.hash(state);
            }
            Val::Int(i) => {
                2u8.hash(state);
                i.hash(state);
            }
            Val::Float(f) => {
                3u8.hash(state);
                f.to_bits().hash(state);
            }
            Val::Str(s) => {
                4u8.hash(state);
                s.hash(state);
            }
            other => {
                5u8.hash(state);
                other.addr().hash(state);
            }
        }
    }
}

/// Array part for the `1..=n` prefix plus a hash part for everything else.
///
/// The last array element is never nil, so `array.len()` is always a border.
#[derive(Default)]
pub struct Table {
    array: Vec<Val>,
    hash: FxHashMap<Key, Val>,
    metatable: Option<TableRef>,
}

impl Table {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &Val) -> Val {
        if let Some(i) = array_index(key, self.array.len()) {
            return self.array[i].clone();
        }
        match Key::for_lookup(key) {
            Some(k) => self.hash.get(&k).cloned().unwrap_or_default(),
            None => Val::Nil,
        }
    }

    pub fn get_str(&self, key: &str) -> Val {
        self.get(&Val::Str(key.into()))
    }

    pub fn set(&mut self, key: Val, value: Val) -> Result<(), RuntimeError> {
        let key = Key::for_insert(key)?;
        if let Val::Int(i) = key.0 {
            let len = self.array.len() as i64;
            if i >= 1 && i <= len {
                self.array[(i - 1) as usize] = value;
                if i == len {
                    self.trim();
                }
                return Ok(());
            }
            if i == len + 1 && !value.is_nil() {
                self.hash.remove(&key);
                self.array.push(value);
                self.migrate();
                return Ok(());
            }
        }
        if value.is_nil() {
            self.hash.remove(&key);
        } else {
            self.hash.insert(key, value);
        }
        Ok(())
    }

    /// Border of the sequence part.
    pub fn len(&self) -> usize {
        self.array.len()
    }

    pub fn is_empty(&self) -> bool {
        self.array.is_empty() && self.hash.is_empty()
    }

    pub fn metatable(&self) -> Option<&TableRef> {
        self.metatable.as_ref()
    }

    fn trim(&mut self) {
        while self.array.last().is_some_and(Val::is_nil) {
            self.array.pop();
        }
    }

    fn migrate(&mut self) {
        loop {
            let next = Key(Val::Int(self.array.len() as i64 + 1));
            match self.hash.remove(&next) {
                Some(v) => self.array.push(v),
                None => break,
            }
        }
    }
}

fn array_index(key: &Val, len: usize) -> Option<usize> {
    let i = match key {
        Val::Int(i) => *i,
        Val::Float(f) => float_to_int(*f)?,
        _ => return None,
    };
    if i >= 1 && (i as u64) <= len as u64 {
        Some((i - 1) as usize)
    } else {
        None
    }
}

/// Shared handle to a [`Table`].
///
/// Every method takes the lock for the duration of a single primitive
/// operation only, so no lock is ever held across a call into user code.
#[derive(Clone, Default)]
pub struct TableRef(Arc<Mutex<Table>>);

impl TableRef {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &Val) -> Val {
        self.0.lock().get(key)
    }

    pub fn get_str(&self, key: &str) -> Val {
        self.0.lock().get_str(key)
    }

    pub fn set(&self, key: Val, value: Val) -> Result<(), RuntimeError> {
        self.0.lock().set(key, value)
    }

    pub fn set_str(&self, key: &str, value: Val) {
        // string keys are always valid
        let _ = self.0.lock().set(Val::Str(key.into()), value);
    }

    /// Raw store of `values` at consecutive indices starting from `first`.
    pub fn set_list(&self, first: i64, values: impl IntoIterator<Item = Val>) -> Result<(), RuntimeError> {
        let mut table = self.0.lock();
        for (offset, value) in values.into_iter().enumerate() {
            table.set(Val::Int(first + offset as i64), value)?;
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.0.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.lock().is_empty()
    }

    pub fn metatable(&self) -> Option<TableRef> {
        self.0.lock().metatable.clone()
    }

    pub fn set_metatable(&self, metatable: Option<TableRef>) {
        self.0.lock().metatable = metatable;
    }

    /// Non-nil `event` entry of this table's metatable.
    pub fn metamethod(&self, event: Event) -> Option<Val> {
        let mt = self.metatable()?;
        let handler = mt.get(event.key());
        (!handler.is_nil()).then_some(handler)
    }

    pub fn lock(&self) -> MutexGuard<'_, Table> {
        self.0.lock()
    }

    pub fn ptr_eq(&self, other: &TableRef) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub fn addr(&self) -> usize {
        Arc::as_ptr(&self.0) as usize
    }
}

impl fmt::Debug for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "table: {:#x}", self.addr())
    }
}
