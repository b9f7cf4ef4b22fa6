//! Values in flight through a pipeline.

use crate::core::side_effects::SideEffects;

/// A value in flight, with a loop counter and a handle to the invocation's
/// side-effect context.
///
/// Traversers are not `Clone`: the only way to duplicate one is [`split`],
/// which makes the new lineage explicit.
///
/// [`split`]: Traverser::split
#[derive(Debug)]
pub struct Traverser<T> {
    value: T,
    loops: u32,
    side_effects: SideEffects,
}

impl<T> Traverser<T> {
    /// Create a traverser with `loops == 0`.
    pub fn new(value: T, side_effects: SideEffects) -> Self {
        Self {
            value,
            loops: 0,
            side_effects,
        }
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    pub fn into_value(self) -> T {
        self.value
    }

    pub fn loops(&self) -> u32 {
        self.loops
    }

    pub fn incr_loops(&mut self) {
        self.loops = self.loops.saturating_add(1);
    }

    pub fn reset_loops(&mut self) {
        self.loops = 0;
    }

    pub fn side_effects(&self) -> &SideEffects {
        &self.side_effects
    }

    /// Replace the value in place; loop counter and context carry over.
    pub fn map_value<F>(self, f: F) -> Self
    where
        F: FnOnce(T) -> T,
    {
        Self {
            value: f(self.value),
            loops: self.loops,
            side_effects: self.side_effects,
        }
    }

    /// Start a new lineage at `value`, keeping this traverser's loop count
    /// and context.
    pub fn split_with(&self, value: T) -> Self {
        Self {
            value,
            loops: self.loops,
            side_effects: self.side_effects.clone(),
        }
    }
}

impl<T: Clone> Traverser<T> {
    /// Independent copy: same value, same loop count, same context handle.
    /// Loop counters evolve separately from here on.
    pub fn split(&self) -> Self {
        self.split_with(self.value.clone())
    }
}
