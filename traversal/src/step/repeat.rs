//! The repeat step: runs each traverser through a loop body zero or more
//! times.
//!
//! # Configuration
//!
//! A repeat step owns one loop body ([`Pipeline`]), bound once with
//! [`RepeatStep::attach_loop_body`], and two predicate slots:
//!
//! - `until`: when it holds, the traverser leaves the loop.
//! - `emit`: when it holds, a split copy of the traverser is surfaced
//!   downstream while the original keeps looping.
//!
//! Each slot has a [`PredicateMode`]. `attach_until`/`attach_emit` infer it
//! from call order: attached before the loop body means `First`, after means
//! `AfterEach`. The `*_with_mode` variants take it explicitly.
//!
//! An empty `until` slot always holds and counts as `First`, so a repeat step
//! with no `until` returns every traverser untouched without entering the
//! loop body. An empty `emit` slot never holds.
//!
//! # Evaluation
//!
//! Every pull first drains the loop body's end. Each traverser coming out has
//! its loop counter incremented, then:
//!
//! 1. `until` holds: loops reset, the traverser is returned.
//! 2. otherwise it is fed back into the loop body, and if `emit` holds a split
//!    with reset loops is returned.
//!
//! When the loop body has nothing pending, one traverser is pulled from
//! upstream. A `First` `until` that holds returns it untouched; otherwise it
//! enters the loop body, and a `First` `emit` that holds returns a split.
//!
//! `until` is always checked before `emit`, so one iteration never yields both
//! a terminal traverser and an emitted copy. Everything returned has
//! `loops == 0`.
//!
//! The step never latches exhaustion. It reports exhaustion whenever upstream
//! and the loop body are both dry, which keeps it usable inside another repeat
//! step's loop body, where upstream is refilled between pulls. Repeated pulls
//! after exhaustion keep returning `None` only while upstream stays exhausted:
//! pushing new traversers into a drained upstream makes the step produce again.

use std::fmt;

use tracing::{debug, trace};

use crate::core::predicate::{LoopPredicate, Predicate, PredicateMode, PredicateSlot};
use crate::core::side_effects::SideEffects;
use crate::core::traverser::Traverser;
use crate::error::{Result, StepError};
use crate::pipeline::Pipeline;
use crate::step::Step;

const STEP_NAME: &str = "RepeatStep";

pub struct RepeatStep<T> {
    side_effects: SideEffects,
    starts: Option<Box<dyn Step<T>>>,
    loop_body: Option<Pipeline<T>>,
    until: PredicateSlot<T>,
    emit: PredicateSlot<T>,
    lookahead: Option<Traverser<T>>,
}

impl<T: Clone + 'static> RepeatStep<T> {
    /// A repeat step inside a pipeline whose context is `side_effects`.
    pub fn new(side_effects: &SideEffects) -> Self {
        Self {
            side_effects: side_effects.clone(),
            starts: None,
            loop_body: None,
            until: PredicateSlot::until(),
            emit: PredicateSlot::emit(),
            lookahead: None,
        }
    }

    /// Set the step's upstream. Without one the step has nothing to pull.
    pub fn add_starts(&mut self, starts: Box<dyn Step<T>>) {
        self.starts = Some(starts);
    }

    /// Bind the loop body. The body adopts this step's context.
    ///
    /// Fails if a loop body is already attached.
    pub fn attach_loop_body(&mut self, mut loop_body: Pipeline<T>) -> Result<&mut Self> {
        if self.loop_body.is_some() {
            return Err(StepError::LoopBodyAlreadyAttached {
                step: STEP_NAME.to_string(),
            });
        }
        loop_body.merge_side_effects(&self.side_effects);
        debug!(loop_body = %loop_body, "attached loop body");
        self.loop_body = Some(loop_body);
        Ok(self)
    }

    pub fn attach_until<P>(&mut self, predicate: P) -> &mut Self
    where
        P: Predicate<T> + 'static,
    {
        let mode = self.inferred_mode();
        self.attach_until_with_mode(predicate, mode)
    }

    pub fn attach_until_with_mode<P>(&mut self, predicate: P, mode: PredicateMode) -> &mut Self
    where
        P: Predicate<T> + 'static,
    {
        self.until.set(Box::new(predicate), mode);
        debug!(until = %self.until.describe(), "attached until predicate");
        self
    }

    pub fn attach_emit<P>(&mut self, predicate: P) -> &mut Self
    where
        P: Predicate<T> + 'static,
    {
        let mode = self.inferred_mode();
        self.attach_emit_with_mode(predicate, mode)
    }

    pub fn attach_emit_with_mode<P>(&mut self, predicate: P, mode: PredicateMode) -> &mut Self
    where
        P: Predicate<T> + 'static,
    {
        self.emit.set(Box::new(predicate), mode);
        debug!(emit = %self.emit.describe(), "attached emit predicate");
        self
    }

    /// Loop exactly `loops` times: an after-each `until` of `loops >= n`.
    pub fn times(&mut self, loops: u32) -> &mut Self {
        self.attach_until_with_mode(LoopPredicate::new(loops), PredicateMode::AfterEach)
    }

    pub fn loop_body(&self) -> Option<&Pipeline<T>> {
        self.loop_body.as_ref()
    }

    pub fn until(&self) -> Option<&dyn Predicate<T>> {
        self.until.predicate()
    }

    pub fn emit(&self) -> Option<&dyn Predicate<T>> {
        self.emit.predicate()
    }

    pub fn until_mode(&self) -> PredicateMode {
        self.until.mode()
    }

    pub fn emit_mode(&self) -> PredicateMode {
        self.emit.mode()
    }

    pub fn is_until_first(&self) -> bool {
        self.until.is_first()
    }

    pub fn is_emit_first(&self) -> bool {
        self.emit.is_first()
    }

    fn inferred_mode(&self) -> PredicateMode {
        if self.loop_body.is_some() {
            PredicateMode::AfterEach
        } else {
            PredicateMode::First
        }
    }

    fn process_next_start(&mut self) -> Result<Option<Traverser<T>>> {
        let loop_body = self
            .loop_body
            .as_mut()
            .ok_or_else(|| StepError::LoopBodyNotAttached {
                step: STEP_NAME.to_string(),
            })?;

        loop {
            let end = loop_body.end_step();
            if end.has_next()? {
                let Some(mut traverser) = end.next()? else {
                    continue;
                };
                traverser.incr_loops();

                if self.until.evaluate(&traverser)? {
                    debug!(loops = traverser.loops(), "until satisfied, leaving loop");
                    traverser.reset_loops();
                    return Ok(Some(traverser));
                }

                let candidate = self.emit.is_attached().then(|| traverser.split());
                trace!(loops = traverser.loops(), "re-entering loop body");
                loop_body.add_start(traverser);
                if let Some(emitted) = Self::emitted(&self.emit, candidate)? {
                    debug!(loops = emitted.loops(), "emitting split mid-loop");
                    return Ok(Some(Self::exit(emitted)));
                }
            } else {
                let Some(starts) = self.starts.as_mut() else {
                    return Ok(None);
                };
                let Some(mut traverser) = starts.next()? else {
                    trace!("upstream exhausted");
                    return Ok(None);
                };

                if self.until.is_first() && self.until.evaluate(&traverser)? {
                    debug!("until satisfied before first iteration");
                    traverser.reset_loops();
                    return Ok(Some(traverser));
                }

                let candidate =
                    (self.emit.is_attached() && self.emit.is_first()).then(|| traverser.split());
                trace!("entering loop body");
                loop_body.add_start(traverser);
                if let Some(emitted) = Self::emitted(&self.emit, candidate)? {
                    debug!("emitting split before first iteration");
                    return Ok(Some(Self::exit(emitted)));
                }
            }
        }
    }

    /// Evaluate `emit` against a split taken before the original was fed back.
    fn emitted(
        emit: &PredicateSlot<T>,
        candidate: Option<Traverser<T>>,
    ) -> Result<Option<Traverser<T>>> {
        match candidate {
            Some(split) if emit.evaluate(&split)? => Ok(Some(split)),
            _ => Ok(None),
        }
    }

    fn exit(mut traverser: Traverser<T>) -> Traverser<T> {
        traverser.reset_loops();
        traverser
    }
}

impl<T: Clone + 'static> Step<T> for RepeatStep<T> {
    fn has_next(&mut self) -> Result<bool> {
        if self.lookahead.is_none() {
            self.lookahead = self.process_next_start()?;
        }
        Ok(self.lookahead.is_some())
    }

    fn next(&mut self) -> Result<Option<Traverser<T>>> {
        match self.lookahead.take() {
            Some(traverser) => Ok(Some(traverser)),
            None => self.process_next_start(),
        }
    }

    fn label(&self) -> String {
        self.to_string()
    }
}

impl<T> fmt::Display for RepeatStep<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let body = match &self.loop_body {
            Some(loop_body) => loop_body.to_string(),
            None => "unbound".to_string(),
        };
        write!(
            f,
            "{STEP_NAME}({body}, until={}, emit={})",
            self.until.describe(),
            self.emit.describe()
        )
    }
}

impl<T> fmt::Debug for RepeatStep<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RepeatStep")
            .field("loop_body", &self.loop_body)
            .field("until", &self.until)
            .field("emit", &self.emit)
            .field("has_starts", &self.starts.is_some())
            .field("lookahead", &self.lookahead.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::predicate::{from_fn, try_from_fn};
    use crate::step::{FeedHandle, FeedStep, SourceStep, drain};
    use crate::test_support::{counting_body, doubling_body, failing_at, outputs, repeat_over};
    use anyhow::anyhow;
    use serde_json::json;

    #[test]
    fn no_until_passes_traversers_through_untouched() {
        let (mut repeat, _) = repeat_over(vec![1, 2, 3]);
        repeat.attach_loop_body(doubling_body()).expect("body");
        assert_eq!(outputs(&mut repeat), vec![(1, 0), (2, 0), (3, 0)]);
    }

    #[test]
    fn bounded_loop_runs_body_until_satisfied() {
        let (mut repeat, _) = repeat_over(vec![1]);
        repeat.attach_loop_body(doubling_body()).expect("body");
        repeat.attach_until(LoopPredicate::new(3));
        assert_eq!(repeat.until_mode(), PredicateMode::AfterEach);
        assert_eq!(outputs(&mut repeat), vec![(8, 0)]);
    }

    #[test]
    fn after_each_emit_surfaces_every_intermediate_value() {
        let (mut repeat, _) = repeat_over(vec![1]);
        repeat.attach_loop_body(doubling_body()).expect("body");
        repeat.attach_until(LoopPredicate::new(3));
        repeat.attach_emit(LoopPredicate::new(1));
        assert_eq!(outputs(&mut repeat), vec![(2, 0), (4, 0), (8, 0)]);
    }

    #[test]
    fn first_mode_until_short_circuits() {
        let (mut repeat, _) = repeat_over(vec![5, 6]);
        repeat.attach_until(LoopPredicate::new(0));
        repeat.attach_loop_body(doubling_body()).expect("body");
        assert!(repeat.is_until_first());
        assert_eq!(outputs(&mut repeat), vec![(5, 0), (6, 0)]);
    }

    #[test]
    fn first_mode_until_still_checks_after_each_iteration() {
        let (mut repeat, _) = repeat_over(vec![3, 100]);
        repeat.attach_until(from_fn("value>=50", |t: &Traverser<i64>| *t.value() >= 50));
        repeat.attach_loop_body(doubling_body()).expect("body");
        // 3 -> 6 -> 12 -> 24 -> 48 -> 96; 100 never enters the body.
        assert_eq!(outputs(&mut repeat), vec![(96, 0), (100, 0)]);
    }

    #[test]
    fn first_mode_emit_surfaces_the_input_before_iterating() {
        let (mut repeat, _) = repeat_over(vec![1]);
        repeat.attach_emit(LoopPredicate::new(0));
        repeat.attach_loop_body(doubling_body()).expect("body");
        repeat.times(2);
        assert!(repeat.is_emit_first());
        // entry emit, then after-each emit at loop 1, then terminal at loop 2.
        assert_eq!(outputs(&mut repeat), vec![(1, 0), (2, 0), (4, 0)]);
    }

    #[test]
    fn until_wins_over_emit_on_the_same_iteration() {
        let (mut repeat, _) = repeat_over(vec![1]);
        repeat.attach_loop_body(doubling_body()).expect("body");
        repeat.times(2);
        repeat.attach_emit(from_fn("always", |_: &Traverser<i64>| true));
        assert_eq!(outputs(&mut repeat), vec![(2, 0), (4, 0)]);
    }

    #[test]
    fn emitted_splits_do_not_disturb_the_looping_original() {
        let (mut repeat, _) = repeat_over(vec![1, 10]);
        repeat.attach_loop_body(doubling_body()).expect("body");
        repeat.times(2);
        repeat.attach_emit(LoopPredicate::new(1));
        assert_eq!(
            outputs(&mut repeat),
            vec![(2, 0), (4, 0), (20, 0), (40, 0)]
        );
    }

    #[test]
    fn exhaustion_is_stable() {
        let (mut repeat, _) = repeat_over(vec![1]);
        repeat.attach_loop_body(doubling_body()).expect("body");
        repeat.times(1);
        assert_eq!(outputs(&mut repeat), vec![(2, 0)]);
        for _ in 0..3 {
            assert!(!repeat.has_next().expect("has_next"));
            assert!(repeat.next().expect("next").is_none());
        }
    }

    #[test]
    fn has_next_does_not_lose_elements() {
        let (mut repeat, _) = repeat_over(vec![1, 2]);
        repeat.attach_loop_body(doubling_body()).expect("body");
        repeat.times(1);
        assert!(repeat.has_next().expect("has_next"));
        assert!(repeat.has_next().expect("has_next again"));
        assert_eq!(outputs(&mut repeat), vec![(2, 0), (4, 0)]);
    }

    #[test]
    fn pulling_without_loop_body_is_a_configuration_error() {
        let (mut repeat, _) = repeat_over(vec![1]);
        let err = repeat.next().expect_err("no loop body");
        assert!(matches!(err, StepError::LoopBodyNotAttached { .. }));
        assert!(err.is_configuration());

        let err = repeat.has_next().expect_err("still no loop body");
        assert!(matches!(err, StepError::LoopBodyNotAttached { .. }));
    }

    #[test]
    fn loop_body_cannot_be_reassigned() {
        let (mut repeat, _) = repeat_over(vec![1]);
        repeat.attach_loop_body(doubling_body()).expect("body");
        let err = repeat
            .attach_loop_body(Pipeline::new())
            .expect_err("second body");
        assert!(matches!(err, StepError::LoopBodyAlreadyAttached { .. }));
        assert_eq!(repeat.loop_body().map(Pipeline::len), Some(1));
        assert!(format!("{repeat:?}").starts_with("RepeatStep {"));
    }

    #[test]
    fn predicate_failures_abort_the_pull() {
        let (mut repeat, _) = repeat_over(vec![1]);
        repeat.attach_loop_body(doubling_body()).expect("body");
        repeat.attach_until(failing_at(3));
        let err = repeat.next().expect_err("predicate failure");
        assert!(!err.is_configuration());
        assert_eq!(err.to_string(), "predicate failed at 4");
    }

    #[test]
    fn emit_failures_abort_the_pull() {
        let (mut repeat, _) = repeat_over(vec![1]);
        repeat.attach_loop_body(doubling_body()).expect("body");
        repeat.times(5);
        repeat.attach_emit(try_from_fn("odd-check", |t: &Traverser<i64>| {
            if *t.value() == 4 {
                Err(anyhow!("cannot classify {}", t.value()))
            } else {
                Ok(false)
            }
        }));
        let err = repeat.next().expect_err("emit failure");
        assert_eq!(err.to_string(), "cannot classify 4");
    }

    #[test]
    fn first_mode_until_failure_aborts_before_entering_the_body() {
        let (mut repeat, ctx) = repeat_over(vec![1]);
        repeat.attach_until(failing_at(0));
        repeat
            .attach_loop_body(counting_body("body_calls"))
            .expect("body");
        assert!(repeat.is_until_first());

        let err = repeat.next().expect_err("entry failure");
        assert_eq!(err.to_string(), "predicate failed at 1");
        assert_eq!(ctx.get("body_calls"), None);
    }

    #[test]
    fn pull_after_emit_failure_resumes_the_looping_original() {
        let (mut repeat, _) = repeat_over(vec![1]);
        repeat.attach_loop_body(doubling_body()).expect("body");
        repeat.times(3);
        repeat.attach_emit(try_from_fn("fails-at-4", |t: &Traverser<i64>| {
            if *t.value() == 4 {
                Err(anyhow!("cannot classify 4"))
            } else {
                Ok(false)
            }
        }));

        let err = repeat.next().expect_err("emit failure");
        assert_eq!(err.to_string(), "cannot classify 4");
        // 4 was already back in the loop body; it finishes as 8, once.
        assert_eq!(outputs(&mut repeat), vec![(8, 0)]);
    }

    #[test]
    fn refilled_upstream_produces_again_after_exhaustion() {
        let ctx = SideEffects::new();
        let feed = FeedHandle::new();
        let mut repeat = RepeatStep::new(&ctx);
        repeat.add_starts(Box::new(FeedStep::new(feed.clone())));
        repeat.attach_loop_body(doubling_body()).expect("body");
        repeat.times(1);

        feed.push(Traverser::new(1_i64, ctx.clone()));
        assert_eq!(outputs(&mut repeat), vec![(2, 0)]);
        assert!(repeat.next().expect("next").is_none());

        feed.push(Traverser::new(5, ctx.clone()));
        assert_eq!(outputs(&mut repeat), vec![(10, 0)]);
    }

    #[test]
    fn missing_upstream_is_exhaustion() {
        let mut repeat = RepeatStep::<i64>::new(&SideEffects::new());
        repeat.attach_loop_body(doubling_body()).expect("body");
        assert!(repeat.next().expect("next").is_none());
    }

    #[test]
    fn loop_body_shares_the_parent_context() {
        let (mut repeat, ctx) = repeat_over(vec![1, 2]);
        repeat
            .attach_loop_body(counting_body("iterations"))
            .expect("body");
        repeat.times(3);

        let out = drain(&mut repeat).expect("drain");
        assert_eq!(out.len(), 2);
        assert_eq!(ctx.get("iterations"), Some(json!(6)));
        assert!(
            repeat
                .loop_body()
                .expect("body")
                .side_effects()
                .shares_with(&ctx)
        );
    }

    #[test]
    fn nested_repeat_runs_inside_a_loop_body() {
        let ctx = SideEffects::new();
        let mut inner_body = Pipeline::new();
        inner_body
            .map("+1", |t: &Traverser<i64>| Ok(t.value() + 1))
            .expect("map");
        let mut inner = RepeatStep::new(&ctx);
        inner.attach_loop_body(inner_body).expect("inner body");
        inner.attach_until(from_fn("multiple-of-5", |t: &Traverser<i64>| {
            t.value() % 5 == 0
        }));
        let mut outer_body = Pipeline::with_side_effects(ctx.clone());
        outer_body.add_repeat(inner).expect("inner repeat");

        let mut outer = RepeatStep::new(&ctx);
        outer.add_starts(Box::new(SourceStep::new(vec![1_i64, 21], &ctx)));
        outer.attach_loop_body(outer_body).expect("outer body");
        outer.attach_until(from_fn("at-least-20", |t: &Traverser<i64>| *t.value() >= 20));

        // The inner loop rounds up to the next multiple of 5 on every outer pass.
        assert_eq!(outputs(&mut outer), vec![(20, 0), (25, 0)]);
    }

    #[test]
    fn nested_repeat_resets_the_shared_loop_counter() {
        let ctx = SideEffects::new();
        let mut inner = RepeatStep::new(&ctx);
        inner.attach_loop_body(doubling_body()).expect("inner body");
        inner.times(1);
        let mut outer_body = Pipeline::with_side_effects(ctx.clone());
        outer_body.add_repeat(inner).expect("inner repeat");

        let mut outer = RepeatStep::new(&ctx);
        outer.add_starts(Box::new(SourceStep::new(vec![1_i64], &ctx)));
        outer.attach_loop_body(outer_body).expect("outer body");
        outer.attach_until(from_fn("loops-seen", |t: &Traverser<i64>| {
            t.side_effects().update("outer_loops", |_| json!(t.loops()));
            *t.value() >= 8
        }));

        assert_eq!(outputs(&mut outer), vec![(8, 0)]);
        // One traverser, one counter: the inner exit resets it every pass.
        assert_eq!(ctx.get("outer_loops"), Some(json!(1)));
    }

    #[test]
    fn display_describes_configuration() {
        let (mut repeat, _) = repeat_over(vec![]);
        assert_eq!(repeat.to_string(), "RepeatStep(unbound, until=none, emit=none)");
        repeat.attach_emit(LoopPredicate::new(1));
        repeat.attach_loop_body(doubling_body()).expect("body");
        repeat.times(3);
        assert_eq!(
            repeat.to_string(),
            "RepeatStep([x2], until=loops>=3@after_each, emit=loops>=1@first)"
        );
    }
}
