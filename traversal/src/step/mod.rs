//! Pull protocol shared by every pipeline stage.
//!
//! A step answers two questions: is another traverser available
//! ([`Step::has_next`]) and what is it ([`Step::next`]). Exhaustion is
//! `Ok(None)`, never an error.
//!
//! `has_next` may do work (and fail) to find out, so it takes `&mut self`.
//! It must not lose the element it found: the following `next` returns it.

pub mod feed;
pub mod repeat;
pub mod transform;

use crate::core::traverser::Traverser;
use crate::error::Result;

pub use feed::{FeedHandle, FeedStep, SourceStep};
pub use repeat::RepeatStep;
pub use transform::{FlatMapStep, MapStep, SideEffectStep, Transform, TransformStep};

/// A pipeline stage speaking the pull protocol.
pub trait Step<T> {
    /// Non-consuming availability check.
    fn has_next(&mut self) -> Result<bool>;

    /// Consume the next traverser, or `Ok(None)` when nothing is available.
    fn next(&mut self) -> Result<Option<Traverser<T>>>;

    /// Label used in diagnostic strings.
    fn label(&self) -> String;
}

impl<T, S: Step<T> + ?Sized> Step<T> for Box<S> {
    fn has_next(&mut self) -> Result<bool> {
        (**self).has_next()
    }

    fn next(&mut self) -> Result<Option<Traverser<T>>> {
        (**self).next()
    }

    fn label(&self) -> String {
        (**self).label()
    }
}

/// Iterate a step until it is exhausted or fails.
pub fn iter<T, S>(step: &mut S) -> impl Iterator<Item = Result<Traverser<T>>> + '_
where
    S: Step<T> + ?Sized,
{
    std::iter::from_fn(move || step.next().transpose())
}

/// Pull every remaining traverser.
pub fn drain<T, S>(step: &mut S) -> Result<Vec<Traverser<T>>>
where
    S: Step<T> + ?Sized,
{
    iter(step).collect()
}
