//! Workflow definition
//!
//! A workflow is the fixed, ordered list of steps every request walks.
//! It is built once and shared read-only by every exchange; cloning a
//! workflow or taking a `skip_before` view only bumps a reference count.
//!
//! ```ignore
//! use flowgate::{Step, Workflow};
//!
//! let workflow = Workflow::init(Step::io("parse", parse))
//!     .next(Step::compute("score", score))
//!     .next(Step::async_step("fetch", fetch))
//!     .build();
//! ```

use std::fmt;
use std::sync::Arc;

use flowgate_core::error::StepResult;
use flowgate_core::state::StepKind;

use crate::completion::Completion;
use crate::exchange::Exchange;

/// Synchronous step handler (COMPUTE, IO and BLOCK)
pub type Handler<S> = Arc<dyn Fn(&mut Exchange<S>) -> StepResult + Send + Sync>;

/// Async step handler: starts the work and hands `Completion` to whoever finishes it
pub type AsyncHandler<S> =
    Arc<dyn Fn(&mut Exchange<S>, Completion<S>) -> StepResult + Send + Sync>;

/// Handler tagged with how it is executed
pub enum StepAction<S> {
    Compute(Handler<S>),
    Io(Handler<S>),
    Block(Handler<S>),
    Async(AsyncHandler<S>),
}

impl<S> Clone for StepAction<S> {
    fn clone(&self) -> Self {
        match self {
            StepAction::Compute(h) => StepAction::Compute(Arc::clone(h)),
            StepAction::Io(h) => StepAction::Io(Arc::clone(h)),
            StepAction::Block(h) => StepAction::Block(Arc::clone(h)),
            StepAction::Async(h) => StepAction::Async(Arc::clone(h)),
        }
    }
}

/// One named stage of a workflow
pub struct Step<S> {
    name: Arc<str>,
    action: StepAction<S>,
}

impl<S> Step<S> {
    /// CPU-bound step, run on a compute worker
    pub fn compute<F>(name: &str, handler: F) -> Self
    where
        F: Fn(&mut Exchange<S>) -> StepResult + Send + Sync + 'static,
    {
        Self::new(name, StepAction::Compute(Arc::new(handler)))
    }

    /// Short non-blocking step, run on whichever thread owns the exchange
    pub fn io<F>(name: &str, handler: F) -> Self
    where
        F: Fn(&mut Exchange<S>) -> StepResult + Send + Sync + 'static,
    {
        Self::new(name, StepAction::Io(Arc::new(handler)))
    }

    /// Blocking step, moved off I/O threads onto the blocking pool
    pub fn block<F>(name: &str, handler: F) -> Self
    where
        F: Fn(&mut Exchange<S>) -> StepResult + Send + Sync + 'static,
    {
        Self::new(name, StepAction::Block(Arc::new(handler)))
    }

    /// Callback step: the exchange suspends until the `Completion` resolves
    pub fn async_step<F>(name: &str, handler: F) -> Self
    where
        F: Fn(&mut Exchange<S>, Completion<S>) -> StepResult + Send + Sync + 'static,
    {
        Self::new(name, StepAction::Async(Arc::new(handler)))
    }

    pub fn new(name: &str, action: StepAction<S>) -> Self {
        Self {
            name: Arc::from(name),
            action,
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn action(&self) -> &StepAction<S> {
        &self.action
    }

    pub fn kind(&self) -> StepKind {
        match self.action {
            StepAction::Compute(_) => StepKind::Compute,
            StepAction::Io(_) => StepKind::Io,
            StepAction::Block(_) => StepKind::Block,
            StepAction::Async(_) => StepKind::Async,
        }
    }

    /// Whether `other` is the same step (same handler, not just same name)
    pub fn same_as(&self, other: &Step<S>) -> bool {
        let handler_ptr = |s: &Step<S>| match &s.action {
            StepAction::Compute(h) | StepAction::Io(h) | StepAction::Block(h) => {
                Arc::as_ptr(h) as *const ()
            }
            StepAction::Async(h) => Arc::as_ptr(h) as *const (),
        };
        std::ptr::eq(handler_ptr(self), handler_ptr(other))
    }
}

impl<S> Clone for Step<S> {
    fn clone(&self) -> Self {
        Self {
            name: Arc::clone(&self.name),
            action: self.action.clone(),
        }
    }
}

impl<S> fmt::Debug for Step<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.kind(), self.name)
    }
}

/// Immutable ordered list of steps
pub struct Workflow<S> {
    steps: Arc<[Step<S>]>,
    start: usize,
}

impl<S> Workflow<S> {
    /// Start a builder with `step` first
    pub fn init(step: Step<S>) -> WorkflowBuilder<S> {
        WorkflowBuilder { steps: vec![step] }
    }

    /// Builder with no steps yet
    pub fn builder() -> WorkflowBuilder<S> {
        WorkflowBuilder { steps: Vec::new() }
    }

    /// Workflow that completes immediately
    pub fn empty() -> Self {
        Self::builder().build()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.steps.len() - self.start
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Step at `index` within this view
    #[inline]
    pub fn get(&self, index: usize) -> Option<&Step<S>> {
        self.steps[self.start..].get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Step<S>> {
        self.steps[self.start..].iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.iter().map(Step::name).collect()
    }

    /// View starting at the first step matching `pred`
    ///
    /// Steps are shared with `self`, not copied. If nothing matches the
    /// view is empty, so an exchange driven through it completes at once.
    pub fn skip_before<P>(&self, pred: P) -> Self
    where
        P: Fn(&Step<S>) -> bool,
    {
        let offset = self.iter().position(pred).unwrap_or(self.len());
        Self {
            steps: Arc::clone(&self.steps),
            start: self.start + offset,
        }
    }
}

impl<S> Clone for Workflow<S> {
    fn clone(&self) -> Self {
        Self {
            steps: Arc::clone(&self.steps),
            start: self.start,
        }
    }
}

impl<S> fmt::Debug for Workflow<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

impl<'a, S> IntoIterator for &'a Workflow<S> {
    type Item = &'a Step<S>;
    type IntoIter = std::slice::Iter<'a, Step<S>>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Accumulates steps until `build`
pub struct WorkflowBuilder<S> {
    steps: Vec<Step<S>>,
}

impl<S> WorkflowBuilder<S> {
    /// Append `step`
    pub fn next(mut self, step: Step<S>) -> Self {
        self.steps.push(step);
        self
    }

    pub fn build(self) -> Workflow<S> {
        Workflow {
            steps: self.steps.into(),
            start: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(name: &str) -> Step<()> {
        Step::compute(name, |_| Ok(()))
    }

    #[test]
    fn test_build_preserves_order() {
        let wf = Workflow::init(noop("a"))
            .next(Step::io("b", |_| Ok(())))
            .next(Step::block("c", |_| Ok(())))
            .next(Step::async_step("d", |_, _| Ok(())))
            .build();

        assert_eq!(wf.names(), vec!["a", "b", "c", "d"]);
        let kinds: Vec<StepKind> = wf.iter().map(Step::kind).collect();
        assert_eq!(
            kinds,
            vec![StepKind::Compute, StepKind::Io, StepKind::Block, StepKind::Async]
        );
        assert_eq!(format!("{wf:?}"), "[COMPUTE(a), IO(b), BLOCK(c), ASYNC(d)]");
    }

    #[test]
    fn test_empty_workflow() {
        let wf: Workflow<()> = Workflow::empty();
        assert!(wf.is_empty());
        assert!(wf.get(0).is_none());
    }

    #[test]
    fn test_skip_before_shares_steps() {
        let wf = Workflow::init(noop("a")).next(noop("b")).next(noop("c")).build();

        let view = wf.skip_before(|s| s.name() == "b");
        assert_eq!(view.names(), vec!["b", "c"]);
        assert!(view.get(0).unwrap().same_as(wf.get(1).unwrap()));
        assert!(!view.get(0).unwrap().same_as(wf.get(0).unwrap()));

        // Views compose relative to their own start
        let tail = view.skip_before(|s| s.name() == "c");
        assert_eq!(tail.names(), vec!["c"]);

        let none = wf.skip_before(|s| s.name() == "zzz");
        assert!(none.is_empty());
        assert_eq!(wf.len(), 3);
    }

    #[test]
    fn test_skip_before_by_identity() {
        let target = noop("dup");
        let wf = Workflow::init(noop("dup")).next(target.clone()).next(noop("z")).build();

        let view = wf.skip_before(|s| s.same_as(&target));
        assert_eq!(view.len(), 2);
        assert!(view.get(0).unwrap().same_as(&target));
    }
}
