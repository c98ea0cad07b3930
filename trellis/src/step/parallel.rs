//! Best-effort concurrent composition.

use futures::StreamExt as _;
use futures::stream::FuturesUnordered;

use crate::error::{Error, Result};
use crate::step::{AnyStep, Step};

/// Runs every child concurrently and keeps the successes.
///
/// Children are launched together; results arrive in completion order,
/// which is not deterministic. If at least one child succeeds the successes
/// are returned and child failures are dropped; if every child fails the
/// child errors are aggregated. An empty child list is an error.
///
/// Children run as concurrent futures of the parent's task, so dropping the
/// parent's future cancels all of them and ambient context stays visible to
/// each child.
#[derive(Debug, Clone)]
pub struct Parallel<I, O> {
    steps: Vec<AnyStep<I, O>>,
}

impl<I, O> Parallel<I, O> {
    /// Compose the given children.
    #[must_use]
    pub fn new(steps: Vec<AnyStep<I, O>>) -> Self {
        Self { steps }
    }
}

impl<I, O> Step for Parallel<I, O>
where
    I: Clone + Send + Sync + 'static,
    O: Send + 'static,
{
    type Input = I;
    type Output = Vec<O>;

    async fn run(&self, input: I) -> Result<Vec<O>> {
        if self.steps.is_empty() {
            return Err(Error::NoResults);
        }

        let mut running: FuturesUnordered<_> = self
            .steps
            .iter()
            .map(|step| step.run(input.clone()))
            .collect();

        let mut successes = Vec::new();
        let mut failures = Vec::new();
        while let Some(outcome) = running.next().await {
            match outcome {
                Ok(value) => successes.push(value),
                Err(error) => failures.push(error),
            }
        }

        if successes.is_empty() {
            return Err(Error::AllStepsFailed { errors: failures });
        }
        Ok(successes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::{StepExt as _, Transform};
    use std::time::Duration;

    fn ok_after(ms: u64, value: i32) -> AnyStep<i32, i32> {
        Transform::new(move |_input: i32| async move {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            Ok(value)
        })
        .boxed()
    }

    fn failing(reason: &'static str) -> AnyStep<i32, i32> {
        Transform::new(move |_input: i32| async move {
            Err::<i32, _>(Error::generation_failed(reason))
        })
        .boxed()
    }

    #[tokio::test]
    async fn successes_survive_a_failing_sibling() {
        let parallel = Parallel::new(vec![ok_after(5, 1), failing("one down"), ok_after(1, 2)]);

        let mut results = parallel.run(0).await.expect("run");
        results.sort_unstable();
        assert_eq!(results, vec![1, 2]);
    }

    #[tokio::test]
    async fn all_failures_aggregate() {
        let parallel = Parallel::new(vec![failing("a"), failing("b")]);

        match parallel.run(0).await {
            Err(Error::AllStepsFailed { errors }) => assert_eq!(errors.len(), 2),
            other => panic!("expected aggregated failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_children_is_an_error() {
        let parallel = Parallel::<i32, i32>::new(Vec::new());
        assert!(matches!(parallel.run(0).await, Err(Error::NoResults)));
    }
}
