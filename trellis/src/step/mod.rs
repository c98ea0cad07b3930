//! The step abstraction — typed async transformations and their combinators.
//!
//! A [`Step`] is the unit of composition: an asynchronous transformation
//! from an input value to an output value. Steps are value-like, freely
//! cloneable, and carry no identity; determinism is the author's
//! responsibility.
//!
//! Composition is generic wherever types are known statically, and erased
//! behind [`AnyStep`] at collection boundaries (the children of
//! [`Parallel`](parallel::Parallel) and [`Race`](race::Race)).

pub mod loops;
pub mod map;
pub mod parallel;
pub mod pipeline;
pub mod primitive;
pub mod race;
pub mod supervise;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;

use crate::error::{Error, Result};

pub use loops::Loop;
pub use map::{Map, Reduce};
pub use parallel::Parallel;
pub use pipeline::{Pipeline, PipelineBuilder, Then};
pub use primitive::{EmptyStep, Gate, GateDecision, Generate, Transform};
pub use race::Race;
pub use supervise::{EmittingStep, MapErrorStep, Monitor, RetryStep, TimeoutStep, TracedStep};

/// An asynchronous typed transformation.
///
/// The engine depends on nothing but [`run`](Step::run). Both the input and
/// output types must be safe to move between concurrent contexts.
pub trait Step: Send + Sync {
    /// The value consumed by this step.
    type Input: Send + 'static;
    /// The value produced by this step.
    type Output: Send + 'static;

    /// Execute the transformation.
    fn run(&self, input: Self::Input) -> impl Future<Output = Result<Self::Output>> + Send;
}

/// Object-safe mirror of [`Step`] used for type erasure.
trait DynStep<I, O>: Send + Sync {
    fn run_dyn(&self, input: I) -> BoxFuture<'_, Result<O>>;
}

impl<S: Step> DynStep<S::Input, S::Output> for S {
    fn run_dyn(&self, input: S::Input) -> BoxFuture<'_, Result<S::Output>> {
        Box::pin(self.run(input))
    }
}

/// A uniform boxed step.
///
/// Used wherever a heterogeneous collection of steps sharing only their
/// input and output types must be stored. Cloning shares the wrapped step.
pub struct AnyStep<I, O> {
    inner: Arc<dyn DynStep<I, O>>,
}

impl<I, O> Clone for AnyStep<I, O> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<I: Send + 'static, O: Send + 'static> AnyStep<I, O> {
    /// Erase a concrete step.
    #[must_use]
    pub fn new<S>(step: S) -> Self
    where
        S: Step<Input = I, Output = O> + 'static,
    {
        Self {
            inner: Arc::new(step),
        }
    }
}

impl<I: Send + 'static, O: Send + 'static> Step for AnyStep<I, O> {
    type Input = I;
    type Output = O;

    fn run(&self, input: I) -> impl Future<Output = Result<O>> + Send {
        self.inner.run_dyn(input)
    }
}

impl<I, O> std::fmt::Debug for AnyStep<I, O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnyStep").finish_non_exhaustive()
    }
}

/// Combinator methods available on every step.
pub trait StepExt: Step + Sized {
    /// Run `next` on this step's output.
    fn then<N>(self, next: N) -> Then<Self, N>
    where
        N: Step<Input = Self::Output>,
    {
        Then::new(self, next)
    }

    /// Fail with a `timeout` error if execution exceeds `duration`.
    fn timeout(self, duration: Duration) -> TimeoutStep<Self> {
        TimeoutStep::new(self, duration)
    }

    /// Retry on failure, up to `attempts` total attempts.
    fn retry(self, attempts: usize) -> RetryStep<Self>
    where
        Self::Input: Clone + Sync,
    {
        RetryStep::new(self, attempts)
    }

    /// Translate errors through `f`; successes pass through untouched.
    fn map_error<F>(self, f: F) -> MapErrorStep<Self, F>
    where
        F: Fn(Error) -> Error + Send + Sync,
    {
        MapErrorStep::new(self, f)
    }

    /// Observe execution without altering values or errors.
    fn monitor(self) -> Monitor<Self> {
        Monitor::new(self)
    }

    /// Wrap execution in a tracing span named after the step's type.
    fn traced(self) -> TracedStep<Self> {
        TracedStep::new(self)
    }

    /// Emit events to the ambient bus around execution.
    fn emitting(self) -> EmittingStep<Self> {
        EmittingStep::new(self)
    }

    /// Erase this step into an [`AnyStep`].
    fn boxed(self) -> AnyStep<Self::Input, Self::Output>
    where
        Self: 'static,
    {
        AnyStep::new(self)
    }
}

impl<S: Step> StepExt for S {}
