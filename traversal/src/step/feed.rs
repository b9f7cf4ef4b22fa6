//! Entry points of a pipeline: the feed queue and iterator sources.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::iter::{Fuse, Peekable};
use std::rc::Rc;

use tracing::trace;

use crate::core::side_effects::SideEffects;
use crate::core::traverser::Traverser;
use crate::error::Result;
use crate::step::Step;

/// Producer side of a pipeline's feed queue.
///
/// The owning pipeline keeps one handle to push into; its [`FeedStep`] holds
/// another to pull from. Both see the same queue.
pub struct FeedHandle<T> {
    queue: Rc<RefCell<VecDeque<Traverser<T>>>>,
}

impl<T> FeedHandle<T> {
    pub fn new() -> Self {
        Self {
            queue: Rc::new(RefCell::new(VecDeque::new())),
        }
    }

    pub fn push(&self, traverser: Traverser<T>) {
        self.queue.borrow_mut().push_back(traverser);
    }

    pub fn len(&self) -> usize {
        self.queue.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.borrow().is_empty()
    }

    fn pop(&self) -> Option<Traverser<T>> {
        self.queue.borrow_mut().pop_front()
    }
}

impl<T> Clone for FeedHandle<T> {
    fn clone(&self) -> Self {
        Self {
            queue: Rc::clone(&self.queue),
        }
    }
}

impl<T> Default for FeedHandle<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// First step of every pipeline: yields whatever was pushed into the feed,
/// in FIFO order.
///
/// Running dry is not final. Pushing again makes the step available again,
/// which is what lets a loop body be fed repeatedly.
pub struct FeedStep<T> {
    feed: FeedHandle<T>,
}

impl<T> FeedStep<T> {
    pub fn new(feed: FeedHandle<T>) -> Self {
        Self { feed }
    }
}

impl<T> Step<T> for FeedStep<T> {
    fn has_next(&mut self) -> Result<bool> {
        Ok(!self.feed.is_empty())
    }

    fn next(&mut self) -> Result<Option<Traverser<T>>> {
        let next = self.feed.pop();
        if next.is_some() {
            trace!(queued = self.feed.len(), "feed step yielded traverser");
        }
        Ok(next)
    }

    fn label(&self) -> String {
        "FeedStep".to_string()
    }
}

/// Upstream built from an iterator of plain values.
///
/// Each value becomes a fresh traverser bound to the source's context. The
/// iterator is fused, so once exhausted the source stays exhausted.
pub struct SourceStep<I: Iterator> {
    values: Peekable<Fuse<I>>,
    side_effects: SideEffects,
}

impl<I: Iterator> SourceStep<I> {
    pub fn new<V>(values: V, side_effects: &SideEffects) -> Self
    where
        V: IntoIterator<IntoIter = I>,
    {
        Self {
            values: values.into_iter().fuse().peekable(),
            side_effects: side_effects.clone(),
        }
    }
}

impl<I: Iterator> Step<I::Item> for SourceStep<I> {
    fn has_next(&mut self) -> Result<bool> {
        Ok(self.values.peek().is_some())
    }

    fn next(&mut self) -> Result<Option<Traverser<I::Item>>> {
        Ok(self
            .values
            .next()
            .map(|value| Traverser::new(value, self.side_effects.clone())))
    }

    fn label(&self) -> String {
        "SourceStep".to_string()
    }
}
