//! Traverser predicates and the `until`/`emit` slots of a repeat step.
//!
//! A predicate is any capability that maps a traverser's observable state
//! (value, loop count, context) to a boolean. Closures, the built-in
//! [`LoopPredicate`], and user types all fit the same [`Predicate`] trait.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::traverser::Traverser;
use crate::error::Result;

/// Test applied to a traverser. Failures propagate to the caller of `next`.
pub trait Predicate<T> {
    fn test(&self, traverser: &Traverser<T>) -> Result<bool>;

    /// Short label used in diagnostic strings.
    fn describe(&self) -> String {
        "predicate".to_string()
    }
}

impl<T, P: Predicate<T> + ?Sized> Predicate<T> for Box<P> {
    fn test(&self, traverser: &Traverser<T>) -> Result<bool> {
        (**self).test(traverser)
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

/// Holds once a traverser has completed at least `max_loops` iterations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopPredicate {
    max_loops: u32,
}

impl LoopPredicate {
    pub fn new(max_loops: u32) -> Self {
        Self { max_loops }
    }

    pub fn max_loops(&self) -> u32 {
        self.max_loops
    }
}

impl<T> Predicate<T> for LoopPredicate {
    fn test(&self, traverser: &Traverser<T>) -> Result<bool> {
        Ok(traverser.loops() >= self.max_loops)
    }

    fn describe(&self) -> String {
        format!("loops>={}", self.max_loops)
    }
}

/// Predicate backed by an infallible closure.
pub struct FnPredicate<F> {
    label: String,
    test: F,
}

impl<T, F> Predicate<T> for FnPredicate<F>
where
    F: Fn(&Traverser<T>) -> bool,
{
    fn test(&self, traverser: &Traverser<T>) -> Result<bool> {
        Ok((self.test)(traverser))
    }

    fn describe(&self) -> String {
        self.label.clone()
    }
}

/// Predicate backed by a closure that may fail. Its error surfaces unchanged
/// from `next`.
pub struct TryFnPredicate<F> {
    label: String,
    test: F,
}

impl<T, F> Predicate<T> for TryFnPredicate<F>
where
    F: Fn(&Traverser<T>) -> anyhow::Result<bool>,
{
    fn test(&self, traverser: &Traverser<T>) -> Result<bool> {
        Ok((self.test)(traverser)?)
    }

    fn describe(&self) -> String {
        self.label.clone()
    }
}

pub fn from_fn<T, F>(label: impl Into<String>, test: F) -> FnPredicate<F>
where
    F: Fn(&Traverser<T>) -> bool,
{
    FnPredicate {
        label: label.into(),
        test,
    }
}

pub fn try_from_fn<T, F>(label: impl Into<String>, test: F) -> TryFnPredicate<F>
where
    F: Fn(&Traverser<T>) -> anyhow::Result<bool>,
{
    TryFnPredicate {
        label: label.into(),
        test,
    }
}

/// When a slot's predicate is consulted.
///
/// - `First`: checked against the freshly-arrived traverser before any
///   iteration, and after every iteration as well.
/// - `AfterEach`: checked only after every iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredicateMode {
    First,
    #[default]
    AfterEach,
}

impl fmt::Display for PredicateMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PredicateMode::First => f.write_str("first"),
            PredicateMode::AfterEach => f.write_str("after_each"),
        }
    }
}

/// One of the two predicate slots (`until`, `emit`) on a repeat step.
///
/// An empty slot evaluates to its `fallback` (`true` for `until`, `false` for
/// `emit`) and reports [`PredicateMode::First`].
pub struct PredicateSlot<T> {
    predicate: Option<Box<dyn Predicate<T>>>,
    mode: PredicateMode,
    fallback: bool,
}

impl<T> PredicateSlot<T> {
    /// Empty `until` slot: terminates every traverser before its first iteration.
    pub fn until() -> Self {
        Self {
            predicate: None,
            mode: PredicateMode::First,
            fallback: true,
        }
    }

    /// Empty `emit` slot: never emits.
    pub fn emit() -> Self {
        Self {
            predicate: None,
            mode: PredicateMode::First,
            fallback: false,
        }
    }

    /// Replace the predicate and its mode. Last write wins.
    pub fn set(&mut self, predicate: Box<dyn Predicate<T>>, mode: PredicateMode) {
        self.predicate = Some(predicate);
        self.mode = mode;
    }

    pub fn is_attached(&self) -> bool {
        self.predicate.is_some()
    }

    pub fn mode(&self) -> PredicateMode {
        if self.predicate.is_some() {
            self.mode
        } else {
            PredicateMode::First
        }
    }

    pub fn is_first(&self) -> bool {
        self.mode() == PredicateMode::First
    }

    pub fn predicate(&self) -> Option<&dyn Predicate<T>> {
        self.predicate.as_deref()
    }

    pub fn evaluate(&self, traverser: &Traverser<T>) -> Result<bool> {
        match &self.predicate {
            Some(predicate) => predicate.test(traverser),
            None => Ok(self.fallback),
        }
    }

    /// `loops>=3@after_each`, or `none` for an empty slot.
    pub fn describe(&self) -> String {
        match &self.predicate {
            Some(predicate) => format!("{}@{}", predicate.describe(), self.mode),
            None => "none".to_string(),
        }
    }
}

impl<T> fmt::Debug for PredicateSlot<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PredicateSlot")
            .field("predicate", &self.describe())
            .field("fallback", &self.fallback)
            .finish()
    }
}
