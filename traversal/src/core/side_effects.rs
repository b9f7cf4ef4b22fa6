//! Shared side-effect context for one pipeline invocation.
//!
//! Every traverser descended from the same invocation holds a handle to the
//! same context: loop-body iterations and split copies included. Handles are
//! cheap clones of one `Rc<RefCell<..>>`, so a write through any handle is
//! visible through all of them.
//!
//! The context is unsynchronized. It is only valid while a single caller
//! drives the pipeline; it is deliberately `!Send`.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use serde_json::Value;

/// Name-to-value mapping shared by reference between traversers.
#[derive(Debug, Clone, Default)]
pub struct SideEffects {
    entries: Rc<RefCell<BTreeMap<String, Value>>>,
}

impl SideEffects {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return a copy of the value stored under `key`.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.entries.borrow().get(key).cloned()
    }

    pub fn set(&self, key: impl Into<String>, value: Value) {
        self.entries.borrow_mut().insert(key.into(), value);
    }

    /// Read-modify-write of a single entry. Returns the stored value.
    ///
    /// The entry is taken out before `f` runs, so `f` may itself read the
    /// context without tripping the `RefCell`.
    pub fn update<F>(&self, key: impl Into<String>, f: F) -> Value
    where
        F: FnOnce(Option<Value>) -> Value,
    {
        let key = key.into();
        let current = self.entries.borrow_mut().remove(&key);
        let next = f(current);
        self.entries.borrow_mut().insert(key, next.clone());
        next
    }

    /// Copy of every entry, for reporting.
    pub fn snapshot(&self) -> BTreeMap<String, Value> {
        self.entries.borrow().clone()
    }

    /// True if both handles point at the same context.
    pub fn shares_with(&self, other: &SideEffects) -> bool {
        Rc::ptr_eq(&self.entries, &other.entries)
    }

    /// Copy entries from `other` that this context does not hold yet.
    ///
    /// Existing entries win. A no-op when both handles already share a context.
    pub fn absorb(&self, other: &SideEffects) {
        if self.shares_with(other) {
            return;
        }
        let incoming = other.snapshot();
        let mut entries = self.entries.borrow_mut();
        for (key, value) in incoming {
            entries.entry(key).or_insert(value);
        }
    }
}
