//! Supervisory wrappers — timeout, retry, error mapping, observation.
//!
//! Each wrapper encloses one step and is itself a step with the same input
//! and output types. None of them masks the root cause of a failure except
//! where that is the point: [`MapErrorStep`] deliberately translates and
//! [`TimeoutStep`] deliberately replaces.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::Instrument as _;

use crate::context::current;
use crate::error::{Error, Result};
use crate::event::{Event, EventBusKey};
use crate::step::Step;

/// Fails with a `timeout` error when the inner step runs too long.
///
/// On elapse the inner step's future is dropped, cancelling its in-flight
/// work.
#[derive(Debug, Clone)]
pub struct TimeoutStep<S> {
    inner: S,
    duration: Duration,
}

impl<S> TimeoutStep<S> {
    /// Bound `inner` by `duration`.
    #[must_use]
    pub const fn new(inner: S, duration: Duration) -> Self {
        Self { inner, duration }
    }
}

impl<S: Step> Step for TimeoutStep<S> {
    type Input = S::Input;
    type Output = S::Output;

    async fn run(&self, input: S::Input) -> Result<S::Output> {
        tokio::time::timeout(self.duration, self.inner.run(input))
            .await
            .unwrap_or(Err(Error::Timeout {
                elapsed: self.duration,
            }))
    }
}

/// Retries the inner step on failure.
///
/// Runs up to `attempts` total attempts (at least one), sleeping `delay`
/// between attempts when configured. The first success is returned; when
/// every attempt fails, the last error surfaces. Idempotency of the inner
/// step is the caller's responsibility.
#[derive(Debug, Clone)]
pub struct RetryStep<S> {
    inner: S,
    attempts: usize,
    delay: Option<Duration>,
}

impl<S> RetryStep<S> {
    /// Retry `inner` up to `attempts` total attempts.
    #[must_use]
    pub const fn new(inner: S, attempts: usize) -> Self {
        Self {
            inner,
            attempts,
            delay: None,
        }
    }

    /// Sleep `delay` between attempts.
    #[must_use]
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

impl<S> Step for RetryStep<S>
where
    S: Step,
    S::Input: Clone + Sync,
{
    type Input = S::Input;
    type Output = S::Output;

    async fn run(&self, input: S::Input) -> Result<S::Output> {
        if self.attempts == 0 {
            return Err(Error::invalid_configuration(
                "attempts",
                "retry requires at least one attempt",
            ));
        }

        let mut last_error = None;
        for attempt in 1..=self.attempts {
            match self.inner.run(input.clone()).await {
                Ok(value) => return Ok(value),
                Err(error) => {
                    tracing::debug!(attempt, total = self.attempts, error = %error, "attempt failed");
                    last_error = Some(error);
                }
            }
            if attempt < self.attempts
                && let Some(delay) = self.delay
            {
                tokio::time::sleep(delay).await;
            }
        }
        Err(last_error.unwrap_or(Error::NoSuccessfulResults))
    }
}

/// Translates errors through a function; successes pass through.
#[derive(Debug, Clone)]
pub struct MapErrorStep<S, F> {
    inner: S,
    map: F,
}

impl<S, F> MapErrorStep<S, F> {
    /// Translate `inner`'s errors through `map`.
    #[must_use]
    pub const fn new(inner: S, map: F) -> Self {
        Self { inner, map }
    }
}

impl<S, F> Step for MapErrorStep<S, F>
where
    S: Step,
    F: Fn(Error) -> Error + Send + Sync,
{
    type Input = S::Input;
    type Output = S::Output;

    async fn run(&self, input: S::Input) -> Result<S::Output> {
        self.inner.run(input).await.map_err(&self.map)
    }
}

type ValueHook<T> = Arc<dyn Fn(&T) + Send + Sync>;
type ErrorHook = Arc<dyn Fn(&Error) + Send + Sync>;
type CompleteHook = Arc<dyn Fn(Duration) + Send + Sync>;

/// Observes execution through optional callbacks.
///
/// Callbacks never alter values or errors: the wrapped step's result is
/// returned exactly as produced.
#[derive(Clone)]
pub struct Monitor<S: Step> {
    inner: S,
    on_input: Option<ValueHook<S::Input>>,
    on_output: Option<ValueHook<S::Output>>,
    on_error: Option<ErrorHook>,
    on_complete: Option<CompleteHook>,
}

impl<S: Step> Monitor<S> {
    /// Wrap `inner` with no callbacks.
    #[must_use]
    pub const fn new(inner: S) -> Self {
        Self {
            inner,
            on_input: None,
            on_output: None,
            on_error: None,
            on_complete: None,
        }
    }

    /// Observe each input before execution.
    #[must_use]
    pub fn on_input(mut self, f: impl Fn(&S::Input) + Send + Sync + 'static) -> Self {
        self.on_input = Some(Arc::new(f));
        self
    }

    /// Observe each output after successful execution.
    #[must_use]
    pub fn on_output(mut self, f: impl Fn(&S::Output) + Send + Sync + 'static) -> Self {
        self.on_output = Some(Arc::new(f));
        self
    }

    /// Observe each error.
    #[must_use]
    pub fn on_error(mut self, f: impl Fn(&Error) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(f));
        self
    }

    /// Observe the duration of each run, success or failure.
    #[must_use]
    pub fn on_complete(mut self, f: impl Fn(Duration) + Send + Sync + 'static) -> Self {
        self.on_complete = Some(Arc::new(f));
        self
    }
}

impl<S: Step> Step for Monitor<S> {
    type Input = S::Input;
    type Output = S::Output;

    async fn run(&self, input: S::Input) -> Result<S::Output> {
        if let Some(hook) = &self.on_input {
            hook(&input);
        }
        let started = Instant::now();
        let outcome = self.inner.run(input).await;
        if let Some(hook) = &self.on_complete {
            hook(started.elapsed());
        }
        match &outcome {
            Ok(value) => {
                if let Some(hook) = &self.on_output {
                    hook(value);
                }
            }
            Err(error) => {
                if let Some(hook) = &self.on_error {
                    hook(error);
                }
            }
        }
        outcome
    }
}

impl<S: Step> std::fmt::Debug for Monitor<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Monitor").finish_non_exhaustive()
    }
}

/// Wraps execution in a tracing span named after the step's type.
#[derive(Debug, Clone)]
pub struct TracedStep<S> {
    inner: S,
}

impl<S> TracedStep<S> {
    /// Trace `inner`.
    #[must_use]
    pub const fn new(inner: S) -> Self {
        Self { inner }
    }
}

fn short_type_name<T>() -> &'static str {
    let full = std::any::type_name::<T>();
    full.split('<')
        .next()
        .unwrap_or(full)
        .rsplit("::")
        .next()
        .unwrap_or(full)
}

impl<S: Step> Step for TracedStep<S> {
    type Input = S::Input;
    type Output = S::Output;

    async fn run(&self, input: S::Input) -> Result<S::Output> {
        let span = tracing::info_span!("step", step_type = short_type_name::<S>());
        async {
            tracing::debug!("step started");
            match self.inner.run(input).await {
                Ok(value) => {
                    tracing::debug!("step completed");
                    Ok(value)
                }
                Err(error) => {
                    tracing::warn!(error = %error, "step failed");
                    Err(error)
                }
            }
        }
        .instrument(span)
        .await
    }
}

type EventBuilder<T> = Arc<dyn Fn(&T) -> Event + Send + Sync>;

/// Emits events to the ambient [`EventBus`](crate::event::EventBus) around
/// execution.
///
/// Before-builders see the input and run before the inner step; after-
/// builders see the output and run only on success.
#[derive(Clone)]
pub struct EmittingStep<S: Step> {
    inner: S,
    before: Vec<EventBuilder<S::Input>>,
    after: Vec<EventBuilder<S::Output>>,
}

impl<S: Step> EmittingStep<S> {
    /// Wrap `inner` with no event builders.
    #[must_use]
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            before: Vec::new(),
            after: Vec::new(),
        }
    }

    /// Emit an event built from the input before execution.
    #[must_use]
    pub fn before(mut self, build: impl Fn(&S::Input) -> Event + Send + Sync + 'static) -> Self {
        self.before.push(Arc::new(build));
        self
    }

    /// Emit an event built from the output after successful execution.
    #[must_use]
    pub fn after(mut self, build: impl Fn(&S::Output) -> Event + Send + Sync + 'static) -> Self {
        self.after.push(Arc::new(build));
        self
    }
}

impl<S> Step for EmittingStep<S>
where
    S: Step,
    S::Input: Sync,
    S::Output: Sync,
{
    type Input = S::Input;
    type Output = S::Output;

    async fn run(&self, input: S::Input) -> Result<S::Output> {
        let bus = current::<EventBusKey>();
        for build in &self.before {
            bus.emit(build(&input)).await;
        }
        let output = self.inner.run(input).await?;
        for build in &self.after {
            bus.emit(build(&output)).await;
        }
        Ok(output)
    }
}

impl<S: Step> std::fmt::Debug for EmittingStep<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmittingStep")
            .field("before", &self.before.len())
            .field("after", &self.after.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::with_value;
    use crate::event::EventBus;
    use crate::step::{StepExt as _, Transform};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn slow(ms: u64) -> impl Step<Input = i32, Output = i32> {
        Transform::new(move |value: i32| async move {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            Ok(value)
        })
    }

    #[tokio::test]
    async fn timeout_replaces_slow_results() {
        let bounded = slow(200).timeout(Duration::from_millis(10));
        assert!(matches!(bounded.run(1).await, Err(Error::Timeout { .. })));

        let fast = slow(1).timeout(Duration::from_millis(500));
        assert_eq!(fast.run(1).await.expect("run"), 1);
    }

    #[tokio::test]
    async fn retry_returns_first_success() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let flaky = Transform::new(move |value: i32| {
            let counter = Arc::clone(&counter);
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(Error::generation_failed("flaky"))
                } else {
                    Ok(value)
                }
            }
        });

        assert_eq!(flaky.retry(5).run(7).await.expect("run"), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retry_surfaces_the_last_error_after_exhaustion() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let doomed = Transform::new(move |_value: i32| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<i32, _>(Error::blocked("always"))
            }
        });

        assert!(matches!(
            doomed.retry(3).run(0).await,
            Err(Error::Blocked { .. })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn map_error_translates() {
        let failing =
            Transform::new(|_value: i32| async move { Err::<i32, _>(Error::blocked("inner")) });
        let mapped = failing.map_error(|_error| Error::generation_failed("translated"));

        assert!(matches!(
            mapped.run(0).await,
            Err(Error::GenerationFailed { .. })
        ));
    }

    #[tokio::test]
    async fn monitor_observes_without_altering() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let inputs = Arc::clone(&seen);
        let outputs = Arc::clone(&seen);

        let doubled = Transform::new(|value: i32| async move { Ok(value * 2) })
            .monitor()
            .on_input(move |value| inputs.lock().expect("lock").push(*value))
            .on_output(move |value| outputs.lock().expect("lock").push(*value));

        assert_eq!(doubled.run(4).await.expect("run"), 8);
        assert_eq!(*seen.lock().expect("lock"), vec![4, 8]);
    }

    #[tokio::test]
    async fn emitting_step_reaches_the_ambient_bus() {
        let bus = EventBus::new();
        let names = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&names);
        bus.on("stage", move |event| {
            let sink = Arc::clone(&sink);
            async move {
                sink.lock().expect("lock").push(
                    event
                        .payload
                        .and_then(|p| p.as_str().map(str::to_string))
                        .unwrap_or_default(),
                );
            }
        });

        let step = Transform::new(|value: i32| async move { Ok(value + 1) })
            .emitting()
            .before(|input| Event::step("stage").with_payload(format!("in:{input}").into()))
            .after(|output| Event::step("stage").with_payload(format!("out:{output}").into()));

        let result = with_value::<EventBusKey, _>(bus, step.run(1)).await;
        assert_eq!(result.expect("run"), 2);
        assert_eq!(*names.lock().expect("lock"), vec!["in:1", "out:2"]);
    }

    #[test]
    fn short_type_name_strips_path_and_generics() {
        assert_eq!(short_type_name::<Vec<String>>(), "Vec");
    }
}
