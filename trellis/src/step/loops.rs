//! Bounded and unbounded iteration.

use crate::context::{CancellationKey, current};
use crate::error::{Error, Result};
use crate::step::{AnyStep, Step};

/// Runs a body step repeatedly over a value of one type.
///
/// Bounded loops run at most `max_iterations` times (at least one); an
/// unbounded loop runs until its `until` predicate fires or the ambient
/// cancellation token is cancelled. After each iteration the optional
/// `until` step is evaluated on the body's output; `true` terminates the
/// loop with the current value. A bounded loop that exhausts its iterations
/// without the predicate firing fails with `condition_not_met`.
///
/// There is no implicit delay between iterations; the body is expected to
/// block or yield.
pub struct Loop<S: Step> {
    body: S,
    until: Option<AnyStep<S::Output, bool>>,
    max_iterations: Option<usize>,
}

impl<T, S> Loop<S>
where
    T: Clone + Send + Sync + 'static,
    S: Step<Input = T, Output = T>,
{
    /// Run `body` at most `max_iterations` times.
    #[must_use]
    pub const fn bounded(max_iterations: usize, body: S) -> Self {
        Self {
            body,
            until: None,
            max_iterations: Some(max_iterations),
        }
    }

    /// Run `body` until the predicate fires or the task is cancelled.
    #[must_use]
    pub const fn unbounded(body: S) -> Self {
        Self {
            body,
            until: None,
            max_iterations: None,
        }
    }

    /// Terminate once `predicate` returns `true` for the body's output.
    #[must_use]
    pub fn until<C>(mut self, predicate: C) -> Self
    where
        C: Step<Input = T, Output = bool> + 'static,
    {
        self.until = Some(AnyStep::new(predicate));
        self
    }
}

impl<T, S> Step for Loop<S>
where
    T: Clone + Send + Sync + 'static,
    S: Step<Input = T, Output = T>,
{
    type Input = T;
    type Output = T;

    async fn run(&self, input: T) -> Result<T> {
        if self.max_iterations == Some(0) {
            return Err(Error::invalid_configuration(
                "max_iterations",
                "a bounded loop requires at least one iteration",
            ));
        }

        let cancellation = current::<CancellationKey>();
        let mut value = input;
        let mut iterations = 0;

        loop {
            if let Some(max) = self.max_iterations
                && iterations >= max
            {
                return Err(Error::ConditionNotMet { iterations });
            }
            if cancellation.is_cancelled() {
                return Err(Error::Cancelled);
            }

            value = self.body.run(value).await?;
            iterations += 1;

            if let Some(until) = &self.until
                && until.run(value.clone()).await?
            {
                return Ok(value);
            }
        }
    }
}

impl<S: Step> std::fmt::Debug for Loop<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Loop")
            .field("max_iterations", &self.max_iterations)
            .field("has_until", &self.until.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::with_cancellation;
    use crate::step::Transform;
    use tokio_util::sync::CancellationToken;

    fn increment() -> impl Step<Input = i32, Output = i32> {
        Transform::new(|value: i32| async move { Ok(value + 1) })
    }

    fn at_least_ten() -> impl Step<Input = i32, Output = bool> {
        Transform::new(|value: i32| async move { Ok(value >= 10) })
    }

    #[tokio::test]
    async fn bounded_exhaustion_fails() {
        let looped = Loop::bounded(3, increment()).until(at_least_ten());
        assert!(matches!(
            looped.run(0).await,
            Err(Error::ConditionNotMet { iterations: 3 })
        ));
    }

    #[tokio::test]
    async fn bounded_loop_terminates_on_condition() {
        let looped = Loop::bounded(20, increment()).until(at_least_ten());
        assert_eq!(looped.run(0).await.expect("run"), 10);
    }

    #[tokio::test]
    async fn condition_on_first_output_runs_body_once() {
        use std::sync::Arc;
        use std::sync::atomic::{AtomicUsize, Ordering};

        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        let body = Transform::new(move |value: i32| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(value + 100)
            }
        });

        let looped = Loop::bounded(5, body).until(at_least_ten());
        assert_eq!(looped.run(0).await.expect("run"), 100);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn zero_iterations_is_invalid() {
        let looped = Loop::bounded(0, increment());
        assert!(matches!(
            looped.run(0).await,
            Err(Error::InvalidConfiguration { .. })
        ));
    }

    #[tokio::test]
    async fn unbounded_loop_stops_on_cancellation() {
        let token = CancellationToken::new();
        let body = Transform::new(|value: i32| async move {
            tokio::task::yield_now().await;
            Ok(value + 1)
        });
        let looped = Loop::unbounded(body);

        token.cancel();
        let outcome = with_cancellation(token, looped.run(0)).await;
        assert!(matches!(outcome, Err(Error::Cancelled)));
    }
}
