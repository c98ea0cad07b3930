//! First-success concurrent composition.

use std::time::Duration;

use futures::StreamExt as _;
use futures::stream::FuturesUnordered;

use crate::error::{Error, Result};
use crate::step::{AnyStep, Step};

/// Runs every child concurrently and returns the first success.
///
/// Errors never win: a failing child is recorded and the race continues.
/// When the first child returns `Ok` the remaining children are cancelled
/// by dropping their futures. If every child fails, the last observed error
/// is returned with its original kind. An optional timeout bounds the whole
/// race; on elapse the result is a `timeout` error and all children are
/// cancelled.
#[derive(Debug, Clone)]
pub struct Race<I, O> {
    steps: Vec<AnyStep<I, O>>,
    timeout: Option<Duration>,
}

impl<I, O> Race<I, O> {
    /// Compose the given children with no timeout.
    #[must_use]
    pub fn new(steps: Vec<AnyStep<I, O>>) -> Self {
        Self {
            steps,
            timeout: None,
        }
    }

    /// Bound the whole race by `duration`.
    #[must_use]
    pub const fn with_timeout(mut self, duration: Duration) -> Self {
        self.timeout = Some(duration);
        self
    }
}

impl<I, O> Step for Race<I, O>
where
    I: Clone + Send + Sync + 'static,
    O: Send + 'static,
{
    type Input = I;
    type Output = O;

    async fn run(&self, input: I) -> Result<O> {
        if self.steps.is_empty() {
            return Err(Error::NoSuccessfulResults);
        }

        let contest = async {
            let mut running: FuturesUnordered<_> = self
                .steps
                .iter()
                .map(|step| step.run(input.clone()))
                .collect();

            let mut last_error = None;
            while let Some(outcome) = running.next().await {
                match outcome {
                    Ok(value) => return Ok(value),
                    Err(error) => last_error = Some(error),
                }
            }
            Err(last_error.unwrap_or(Error::NoSuccessfulResults))
        };

        match self.timeout {
            None => contest.await,
            Some(duration) => tokio::time::timeout(duration, contest)
                .await
                .unwrap_or(Err(Error::Timeout { elapsed: duration })),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::{StepExt as _, Transform};

    fn ok_after(ms: u64, value: &'static str) -> AnyStep<i32, &'static str> {
        Transform::new(move |_input: i32| async move {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            Ok(value)
        })
        .boxed()
    }

    fn failing() -> AnyStep<i32, &'static str> {
        Transform::new(|_input: i32| async move {
            Err::<&'static str, _>(Error::generation_failed("unlucky"))
        })
        .boxed()
    }

    #[tokio::test]
    async fn fastest_success_wins() {
        let race = Race::new(vec![ok_after(100, "A"), ok_after(10, "B"), failing()]);
        assert_eq!(race.run(0).await.expect("run"), "B");
    }

    #[tokio::test]
    async fn errors_do_not_win() {
        let race = Race::new(vec![failing(), ok_after(20, "slow but sure")]);
        assert_eq!(race.run(0).await.expect("run"), "slow but sure");
    }

    #[tokio::test]
    async fn all_failures_surface_the_last_error() {
        // The slower failure is observed last and must win.
        let late_blocked: AnyStep<i32, &'static str> =
            Transform::new(|_input: i32| async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                Err::<&'static str, _>(Error::blocked("gate said no"))
            })
            .boxed();

        let race = Race::new(vec![failing(), late_blocked]);
        assert!(matches!(race.run(0).await, Err(Error::Blocked { .. })));
    }

    #[tokio::test]
    async fn timeout_beats_slow_children() {
        let race =
            Race::new(vec![ok_after(200, "too slow")]).with_timeout(Duration::from_millis(10));
        assert!(matches!(race.run(0).await, Err(Error::Timeout { .. })));
    }

    #[tokio::test]
    async fn empty_children_is_an_error() {
        let race = Race::<i32, i32>::new(Vec::new());
        assert!(matches!(race.run(0).await, Err(Error::NoSuccessfulResults)));
    }
}
