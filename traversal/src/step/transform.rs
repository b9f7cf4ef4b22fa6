//! Per-element steps.
//!
//! A [`Transform`] turns one traverser into zero or more; [`TransformStep`]
//! adapts it to the pull protocol by pulling from its upstream until the
//! transform has produced something.

use std::collections::VecDeque;

use tracing::trace;

use crate::core::traverser::Traverser;
use crate::error::Result;
use crate::step::Step;

/// Element-wise logic of a step.
pub trait Transform<T> {
    /// Process one traverser, appending any results to `out`.
    fn apply(&mut self, traverser: Traverser<T>, out: &mut VecDeque<Traverser<T>>) -> Result<()>;

    fn label(&self) -> String;
}

/// Pulls from `upstream` and runs each traverser through a [`Transform`].
pub struct TransformStep<T> {
    upstream: Box<dyn Step<T>>,
    transform: Box<dyn Transform<T>>,
    buffer: VecDeque<Traverser<T>>,
}

impl<T> TransformStep<T> {
    pub fn new(upstream: Box<dyn Step<T>>, transform: Box<dyn Transform<T>>) -> Self {
        Self {
            upstream,
            transform,
            buffer: VecDeque::new(),
        }
    }
}

impl<T> Step<T> for TransformStep<T> {
    fn has_next(&mut self) -> Result<bool> {
        // Not latched: a refilled upstream makes this step available again.
        while self.buffer.is_empty() {
            match self.upstream.next()? {
                Some(traverser) => self.transform.apply(traverser, &mut self.buffer)?,
                None => return Ok(false),
            }
        }
        Ok(true)
    }

    fn next(&mut self) -> Result<Option<Traverser<T>>> {
        if !self.has_next()? {
            return Ok(None);
        }
        let next = self.buffer.pop_front();
        trace!(step = %self.transform.label(), "transform step yielded traverser");
        Ok(next)
    }

    fn label(&self) -> String {
        self.transform.label()
    }
}

/// One-to-one value rewrite.
pub struct MapStep<F> {
    label: String,
    f: F,
}

impl<F> MapStep<F> {
    pub fn new<T>(label: impl Into<String>, f: F) -> Self
    where
        F: FnMut(&Traverser<T>) -> anyhow::Result<T>,
    {
        Self {
            label: label.into(),
            f,
        }
    }
}

impl<T, F> Transform<T> for MapStep<F>
where
    F: FnMut(&Traverser<T>) -> anyhow::Result<T>,
{
    fn apply(&mut self, traverser: Traverser<T>, out: &mut VecDeque<Traverser<T>>) -> Result<()> {
        let value = (self.f)(&traverser)?;
        out.push_back(traverser.map_value(|_| value));
        Ok(())
    }

    fn label(&self) -> String {
        self.label.clone()
    }
}

/// One-to-many expansion. Every result after the first is a split, so each
/// output owns an independent loop counter.
pub struct FlatMapStep<F> {
    label: String,
    f: F,
}

impl<F> FlatMapStep<F> {
    pub fn new<T>(label: impl Into<String>, f: F) -> Self
    where
        F: FnMut(&Traverser<T>) -> anyhow::Result<Vec<T>>,
    {
        Self {
            label: label.into(),
            f,
        }
    }
}

impl<T, F> Transform<T> for FlatMapStep<F>
where
    F: FnMut(&Traverser<T>) -> anyhow::Result<Vec<T>>,
{
    fn apply(&mut self, traverser: Traverser<T>, out: &mut VecDeque<Traverser<T>>) -> Result<()> {
        let mut values = (self.f)(&traverser)?.into_iter();
        let Some(first) = values.next() else {
            return Ok(());
        };
        let splits: Vec<_> = values.map(|value| traverser.split_with(value)).collect();
        out.push_back(traverser.map_value(|_| first));
        out.extend(splits);
        Ok(())
    }

    fn label(&self) -> String {
        self.label.clone()
    }
}

/// Identity step that runs `f` for its effect on the traverser's context.
pub struct SideEffectStep<F> {
    label: String,
    f: F,
}

impl<F> SideEffectStep<F> {
    pub fn new<T>(label: impl Into<String>, f: F) -> Self
    where
        F: FnMut(&Traverser<T>) -> anyhow::Result<()>,
    {
        Self {
            label: label.into(),
            f,
        }
    }
}

impl<T, F> Transform<T> for SideEffectStep<F>
where
    F: FnMut(&Traverser<T>) -> anyhow::Result<()>,
{
    fn apply(&mut self, traverser: Traverser<T>, out: &mut VecDeque<Traverser<T>>) -> Result<()> {
        (self.f)(&traverser)?;
        out.push_back(traverser);
        Ok(())
    }

    fn label(&self) -> String {
        self.label.clone()
    }
}
