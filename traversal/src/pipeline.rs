//! Pipelines: an owned feed queue followed by an ordered list of steps.
//!
//! A pipeline is both a top-level query and the loop body of a
//! [`RepeatStep`]. Callers push traversers into its start with
//! [`Pipeline::add_start`] and pull results from its end through the
//! [`Step`] protocol. Feeding and pulling are explicit calls on an owned
//! value, so a repeat step re-feeding its own output never forms a cycle
//! between steps.
//!
//! Steps are collected unlinked. The chain is linked into a single end step
//! on first use and cached; after that the pipeline's structure is frozen.

use std::fmt;

use tracing::debug;

use crate::core::side_effects::SideEffects;
use crate::core::traverser::Traverser;
use crate::error::{Result, StepError};
use crate::step::{
    FeedHandle, FeedStep, FlatMapStep, MapStep, RepeatStep, SideEffectStep, Step, Transform,
    TransformStep,
};

enum Stage<T> {
    Transform(Box<dyn Transform<T>>),
    Repeat(Box<RepeatStep<T>>),
}

/// Ordered sequence of steps with its own start and end.
pub struct Pipeline<T> {
    side_effects: SideEffects,
    feed: FeedHandle<T>,
    stages: Vec<Stage<T>>,
    labels: Vec<String>,
    end: Option<Box<dyn Step<T>>>,
}

impl<T: Clone + 'static> Pipeline<T> {
    /// Empty pipeline with a fresh side-effect context.
    pub fn new() -> Self {
        Self::with_side_effects(SideEffects::new())
    }

    pub fn with_side_effects(side_effects: SideEffects) -> Self {
        Self {
            side_effects,
            feed: FeedHandle::new(),
            stages: Vec::new(),
            labels: Vec::new(),
            end: None,
        }
    }

    /// Append a per-element step.
    pub fn add_transform<X>(&mut self, transform: X) -> Result<&mut Self>
    where
        X: Transform<T> + 'static,
    {
        self.ensure_unlinked()?;
        self.labels.push(transform.label());
        self.stages.push(Stage::Transform(Box::new(transform)));
        Ok(self)
    }

    /// Append a repeat step. It pulls from everything added before it.
    pub fn add_repeat(&mut self, repeat: RepeatStep<T>) -> Result<&mut Self> {
        self.ensure_unlinked()?;
        self.labels.push(repeat.to_string());
        self.stages.push(Stage::Repeat(Box::new(repeat)));
        Ok(self)
    }

    pub fn map<F>(&mut self, label: impl Into<String>, f: F) -> Result<&mut Self>
    where
        F: FnMut(&Traverser<T>) -> anyhow::Result<T> + 'static,
    {
        self.add_transform(MapStep::new(label, f))
    }

    pub fn flat_map<F>(&mut self, label: impl Into<String>, f: F) -> Result<&mut Self>
    where
        F: FnMut(&Traverser<T>) -> anyhow::Result<Vec<T>> + 'static,
    {
        self.add_transform(FlatMapStep::new(label, f))
    }

    pub fn side_effect<F>(&mut self, label: impl Into<String>, f: F) -> Result<&mut Self>
    where
        F: FnMut(&Traverser<T>) -> anyhow::Result<()> + 'static,
    {
        self.add_transform(SideEffectStep::new(label, f))
    }

    /// Feed a traverser into the pipeline's start.
    pub fn add_start(&mut self, traverser: Traverser<T>) {
        self.feed.push(traverser);
    }

    /// Feed a plain value, bound to this pipeline's context.
    pub fn add_start_value(&mut self, value: T) {
        self.feed.push(Traverser::new(value, self.side_effects.clone()));
    }

    pub fn side_effects(&self) -> &SideEffects {
        &self.side_effects
    }

    /// Share `parent`'s context from now on. Entries only this pipeline held
    /// are copied into the parent first. A one-time merge, not a sync.
    pub fn merge_side_effects(&mut self, parent: &SideEffects) {
        parent.absorb(&self.side_effects);
        self.side_effects = parent.clone();
    }

    /// Labels of the steps after the feed, in order.
    pub fn step_labels(&self) -> &[String] {
        &self.labels
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn is_linked(&self) -> bool {
        self.end.is_some()
    }

    /// The last step of the linked chain. Links on first call.
    pub fn end_step(&mut self) -> &mut dyn Step<T> {
        let end = match self.end.take() {
            Some(end) => end,
            None => self.link(),
        };
        &mut **self.end.insert(end)
    }

    fn link(&mut self) -> Box<dyn Step<T>> {
        debug!(pipeline = %self, "linking pipeline");
        let mut current: Box<dyn Step<T>> = Box::new(FeedStep::new(self.feed.clone()));
        for stage in self.stages.drain(..) {
            current = match stage {
                Stage::Transform(transform) => Box::new(TransformStep::new(current, transform)),
                Stage::Repeat(mut repeat) => {
                    repeat.add_starts(current);
                    repeat
                }
            };
        }
        current
    }

    fn ensure_unlinked(&self) -> Result<()> {
        if self.is_linked() {
            return Err(StepError::PipelineLinked {
                pipeline: self.to_string(),
            });
        }
        Ok(())
    }
}

impl<T: Clone + 'static> Default for Pipeline<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + 'static> Step<T> for Pipeline<T> {
    fn has_next(&mut self) -> Result<bool> {
        self.end_step().has_next()
    }

    fn next(&mut self) -> Result<Option<Traverser<T>>> {
        self.end_step().next()
    }

    fn label(&self) -> String {
        self.to_string()
    }
}

impl<T> fmt::Display for Pipeline<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.labels.join(", "))
    }
}

impl<T> fmt::Debug for Pipeline<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("steps", &self.labels)
            .field("queued", &self.feed.len())
            .field("linked", &self.end.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::drain;
    use serde_json::json;

    fn doubling() -> Pipeline<i64> {
        let mut pipeline = Pipeline::new();
        pipeline
            .map("x2", |t: &Traverser<i64>| Ok(t.value() * 2))
            .expect("map");
        pipeline
    }

    #[test]
    fn empty_pipeline_is_identity() {
        let mut pipeline = Pipeline::<i64>::new();
        pipeline.add_start_value(4);
        let out = drain(&mut pipeline).expect("drain");
        assert_eq!(out.len(), 1);
        assert_eq!(*out[0].value(), 4);
    }

    #[test]
    fn links_lazily_and_only_once() {
        let mut pipeline = doubling();
        assert!(!pipeline.is_linked());
        assert!(!pipeline.has_next().expect("has_next"));
        assert!(pipeline.is_linked());

        let err = pipeline
            .map("late", |t: &Traverser<i64>| Ok(*t.value()))
            .expect_err("linked pipeline rejects steps");
        assert!(matches!(err, StepError::PipelineLinked { .. }));
        assert_eq!(pipeline.step_labels(), ["x2"]);
    }

    #[test]
    fn can_be_fed_after_draining() {
        let mut pipeline = doubling();
        pipeline.add_start_value(1);
        assert_eq!(drain(&mut pipeline).expect("drain").len(), 1);

        pipeline.add_start_value(5);
        let out = pipeline.next().expect("next").expect("refilled");
        assert_eq!(*out.value(), 10);
    }

    #[test]
    fn fed_traversers_keep_their_own_context() {
        let mut pipeline = doubling();
        let other = SideEffects::new();
        pipeline.add_start(Traverser::new(3, other.clone()));
        let out = pipeline.next().expect("next").expect("out");
        assert!(out.side_effects().shares_with(&other));
        assert!(!out.side_effects().shares_with(pipeline.side_effects()));
    }

    #[test]
    fn merge_shares_parent_context_and_keeps_body_entries() {
        let parent = SideEffects::new();
        parent.set("limit", json!(3));
        let mut body = doubling();
        body.side_effects().set("seed", json!("body"));

        body.merge_side_effects(&parent);

        assert!(body.side_effects().shares_with(&parent));
        assert_eq!(parent.get("seed"), Some(json!("body")));
        assert_eq!(body.side_effects().get("limit"), Some(json!(3)));
    }

    #[test]
    fn display_lists_step_labels() {
        let mut pipeline = doubling();
        pipeline
            .side_effect("count", |_: &Traverser<i64>| Ok(()))
            .expect("side effect");
        assert_eq!(pipeline.to_string(), "[x2, count]");
        assert_eq!(pipeline.len(), 2);
    }
}
