//! General-purpose tool middleware: logging, timeout, retry.

use std::time::Duration;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::tool::{Next, ToolContext, ToolMiddleware};

/// Logs start, finish, and error of every invocation with its duration.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingMiddleware;

impl LoggingMiddleware {
    /// Create a logging middleware.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ToolMiddleware for LoggingMiddleware {
    async fn handle(&self, ctx: ToolContext, next: Next<'_>) -> Result<Value> {
        let tool = ctx.tool_name.clone();
        tracing::debug!(tool = %tool, "tool call started");
        let started = Instant::now();
        let outcome = next.run(ctx).await;
        let elapsed = started.elapsed();
        match &outcome {
            Ok(_) => tracing::debug!(tool = %tool, ?elapsed, "tool call finished"),
            Err(error) => {
                tracing::warn!(tool = %tool, ?elapsed, error = %error, "tool call failed");
            }
        }
        outcome
    }
}

/// Fails an invocation with a `timeout` error when it runs too long.
///
/// On elapse the continuation's future is dropped, cancelling the work in
/// flight.
#[derive(Debug, Clone, Copy)]
pub struct TimeoutMiddleware {
    duration: Duration,
}

impl TimeoutMiddleware {
    /// Bound every invocation by `duration`.
    #[must_use]
    pub const fn new(duration: Duration) -> Self {
        Self { duration }
    }
}

#[async_trait]
impl ToolMiddleware for TimeoutMiddleware {
    async fn handle(&self, ctx: ToolContext, next: Next<'_>) -> Result<Value> {
        tokio::time::timeout(self.duration, next.run(ctx))
            .await
            .unwrap_or(Err(Error::Timeout {
                elapsed: self.duration,
            }))
    }
}

/// Retries the rest of the chain on failure.
///
/// Runs up to `attempts` total attempts, sleeping `backoff` between them
/// when configured. The first success wins; exhaustion surfaces the last
/// error. Idempotency of the downstream tool is the caller's
/// responsibility.
#[derive(Debug, Clone, Copy)]
pub struct RetryMiddleware {
    attempts: usize,
    backoff: Option<Duration>,
}

impl RetryMiddleware {
    /// Retry up to `attempts` total attempts.
    #[must_use]
    pub const fn new(attempts: usize) -> Self {
        Self {
            attempts,
            backoff: None,
        }
    }

    /// Sleep `backoff` between attempts.
    #[must_use]
    pub const fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = Some(backoff);
        self
    }
}

#[async_trait]
impl ToolMiddleware for RetryMiddleware {
    async fn handle(&self, ctx: ToolContext, next: Next<'_>) -> Result<Value> {
        if self.attempts == 0 {
            return Err(Error::invalid_configuration(
                "attempts",
                "retry requires at least one attempt",
            ));
        }

        let mut last_error = None;
        for attempt in 1..=self.attempts {
            match next.run(ctx.clone()).await {
                Ok(value) => return Ok(value),
                Err(error) => {
                    tracing::debug!(
                        tool = %ctx.tool_name,
                        attempt,
                        total = self.attempts,
                        error = %error,
                        "tool attempt failed"
                    );
                    last_error = Some(error);
                }
            }
            if attempt < self.attempts
                && let Some(backoff) = self.backoff
            {
                tokio::time::sleep(backoff).await;
            }
        }
        Err(last_error.unwrap_or_else(|| Error::tool_execution(ctx.tool_name, "retry exhausted")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::{FnTool, Tool as _, ToolPipeline};
    use serde_json::json;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn timeout_cuts_off_slow_tools() {
        let slow = FnTool::new("Slow", "Sleeps", |_arguments| async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(json!("done"))
        });
        let pipeline = ToolPipeline::new(Arc::new(slow))
            .with(TimeoutMiddleware::new(Duration::from_millis(10)));

        assert!(matches!(
            pipeline.call(json!({})).await,
            Err(Error::Timeout { .. })
        ));
    }

    #[tokio::test]
    async fn retry_reruns_the_continuation() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let flaky = FnTool::new("Flaky", "Fails twice", move |_arguments| {
            let counter = Arc::clone(&counter);
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(Error::tool_execution("Flaky", "not yet"))
                } else {
                    Ok(json!("third time lucky"))
                }
            }
        });
        let pipeline = ToolPipeline::new(Arc::new(flaky)).with(RetryMiddleware::new(5));

        assert_eq!(
            pipeline.call(json!({})).await.expect("call"),
            json!("third time lucky")
        );
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retry_exhaustion_surfaces_the_last_error() {
        let doomed = FnTool::new("Doomed", "Always fails", |_arguments| {
            std::future::ready(Err::<Value, _>(Error::tool_execution("Doomed", "nope")))
        });
        let pipeline = ToolPipeline::new(Arc::new(doomed)).with(RetryMiddleware::new(2));

        assert!(matches!(
            pipeline.call(json!({})).await,
            Err(Error::ToolExecution { .. })
        ));
    }
}
