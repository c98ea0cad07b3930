//! Sequential composition.
//!
//! [`Then`] chains two steps with matching adjacent types; a
//! [`PipelineBuilder`] folds a declared sequence of steps into one body;
//! [`Pipeline`] names the resulting composite. Execution is strictly
//! sequential and fail-fast: the first child error propagates and later
//! children never run.

use crate::error::Result;
use crate::step::Step;

/// Two steps run one after the other.
#[derive(Debug, Clone)]
pub struct Then<A, B> {
    first: A,
    second: B,
}

impl<A, B> Then<A, B> {
    /// Compose `first` with `second`.
    #[must_use]
    pub const fn new(first: A, second: B) -> Self {
        Self { first, second }
    }
}

impl<A, B> Step for Then<A, B>
where
    A: Step,
    B: Step<Input = A::Output>,
{
    type Input = A::Input;
    type Output = B::Output;

    async fn run(&self, input: A::Input) -> Result<B::Output> {
        let intermediate = self.first.run(input).await?;
        self.second.run(intermediate).await
    }
}

/// A named sequential composite whose `run` is its body's `run`.
#[derive(Debug, Clone)]
pub struct Pipeline<S> {
    body: S,
}

impl<S: Step> Pipeline<S> {
    /// Wrap a body step.
    #[must_use]
    pub const fn new(body: S) -> Self {
        Self { body }
    }

    /// Start a builder from the first step of the sequence.
    #[must_use]
    pub const fn builder(first: S) -> PipelineBuilder<S> {
        PipelineBuilder { body: first }
    }
}

impl<S: Step> Step for Pipeline<S> {
    type Input = S::Input;
    type Output = S::Output;

    fn run(&self, input: S::Input) -> impl Future<Output = Result<S::Output>> + Send {
        self.body.run(input)
    }
}

/// Type-state builder composing a sequence of steps into a single body.
///
/// Each [`then`](PipelineBuilder::then) call requires the next step's input
/// type to match the accumulated output type, so mismatches fail at compile
/// time.
#[derive(Debug, Clone)]
pub struct PipelineBuilder<S> {
    body: S,
}

impl<S: Step> PipelineBuilder<S> {
    /// Append a step to the sequence.
    #[must_use]
    pub fn then<N>(self, next: N) -> PipelineBuilder<Then<S, N>>
    where
        N: Step<Input = S::Output>,
    {
        PipelineBuilder {
            body: Then::new(self.body, next),
        }
    }

    /// Finish the sequence.
    #[must_use]
    pub fn build(self) -> Pipeline<S> {
        Pipeline::new(self.body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::step::Transform;

    fn trim() -> impl Step<Input = String, Output = String> {
        Transform::new(|text: String| async move { Ok(text.trim().to_string()) })
    }

    fn upper() -> impl Step<Input = String, Output = String> {
        Transform::new(|text: String| async move { Ok(text.to_uppercase()) })
    }

    #[tokio::test]
    async fn pipeline_runs_children_in_order() {
        let pipeline = Pipeline::builder(trim()).then(upper()).build();
        assert_eq!(pipeline.run("  hi  ".into()).await.expect("run"), "HI");
    }

    #[tokio::test]
    async fn pipeline_is_fail_fast() {
        use std::sync::Arc;
        use std::sync::atomic::{AtomicBool, Ordering};

        let second_ran = Arc::new(AtomicBool::new(false));
        let witness = Arc::clone(&second_ran);

        let failing = Transform::new(|_text: String| async move {
            Err::<String, _>(Error::generation_failed("boom"))
        });
        let recording = Transform::new(move |text: String| {
            let witness = Arc::clone(&witness);
            async move {
                witness.store(true, Ordering::SeqCst);
                Ok(text)
            }
        });

        let pipeline = Pipeline::builder(failing).then(recording).build();
        assert!(pipeline.run("input".into()).await.is_err());
        assert!(!second_ran.load(Ordering::SeqCst));
    }
}
