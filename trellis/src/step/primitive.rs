//! Primitive steps — the leaves of a step tree.

use std::future::Future;
use std::marker::PhantomData;

use crate::context::current;
use crate::error::{Error, Result};
use crate::session::{AgentSessionKey, LanguageModelSessionKey};
use crate::step::Step;

/// A pure or effectful function lifted to a step.
pub struct Transform<I, O, F> {
    f: F,
    _marker: PhantomData<fn(I) -> O>,
}

impl<I, O, F> Transform<I, O, F> {
    /// Lift `f` into a step.
    #[must_use]
    pub const fn new(f: F) -> Self {
        Self {
            f,
            _marker: PhantomData,
        }
    }
}

impl<I, O, F, Fut> Step for Transform<I, O, F>
where
    I: Send + 'static,
    O: Send + 'static,
    F: Fn(I) -> Fut + Send + Sync,
    Fut: Future<Output = Result<O>> + Send,
{
    type Input = I;
    type Output = O;

    fn run(&self, input: I) -> impl Future<Output = Result<O>> + Send {
        (self.f)(input)
    }
}

impl<I, O, F> std::fmt::Debug for Transform<I, O, F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transform").finish_non_exhaustive()
    }
}

/// The verdict of a [`Gate`] predicate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision<T> {
    /// Let the value through.
    Pass(T),
    /// Refuse the value with a reason.
    Block(String),
}

/// A step that lets values through or refuses them.
///
/// On refusal the step fails with a `blocked` error carrying the reason.
pub struct Gate<I, F> {
    check: F,
    _marker: PhantomData<fn(I)>,
}

impl<I, F> Gate<I, F> {
    /// Create a gate from a predicate.
    #[must_use]
    pub const fn new(check: F) -> Self {
        Self {
            check,
            _marker: PhantomData,
        }
    }
}

impl<I, F, Fut> Step for Gate<I, F>
where
    I: Send + 'static,
    F: Fn(I) -> Fut + Send + Sync,
    Fut: Future<Output = GateDecision<I>> + Send,
{
    type Input = I;
    type Output = I;

    async fn run(&self, input: I) -> Result<I> {
        match (self.check)(input).await {
            GateDecision::Pass(value) => Ok(value),
            GateDecision::Block(reason) => Err(Error::Blocked { reason }),
        }
    }
}

impl<I, F> std::fmt::Debug for Gate<I, F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gate").finish_non_exhaustive()
    }
}

/// The identity step.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptyStep<T> {
    _marker: PhantomData<fn(T)>,
}

impl<T> EmptyStep<T> {
    /// Create an identity step.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T: Send + 'static> Step for EmptyStep<T> {
    type Input = T;
    type Output = T;

    async fn run(&self, input: T) -> Result<T> {
        Ok(input)
    }
}

/// A step that sends its input to the ambient session as a prompt.
///
/// Resolution order: the ambient [`AgentSession`](crate::session::AgentSession)
/// (queuing, steering-aware), then the ambient bare language-model session.
/// Fails with an `invalid_configuration` error when neither is bound.
#[derive(Debug, Clone, Copy, Default)]
pub struct Generate;

impl Generate {
    /// Create a generation step.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Step for Generate {
    type Input = String;
    type Output = String;

    async fn run(&self, input: String) -> Result<String> {
        if let Some(session) = current::<AgentSessionKey>() {
            let response = session.send(&input).await?;
            return Ok(response.content);
        }
        if let Some(model) = current::<LanguageModelSessionKey>() {
            return model.respond(&input).await;
        }
        Err(Error::invalid_configuration(
            "session",
            "no ambient agent or language-model session is bound",
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn transform_applies_the_function() {
        let trim = Transform::new(|text: String| async move { Ok(text.trim().to_string()) });
        assert_eq!(trim.run("  hi  ".into()).await.expect("run"), "hi");
    }

    #[tokio::test]
    async fn gate_passes_and_blocks() {
        let gate = Gate::new(|value: i32| async move {
            if value >= 0 {
                GateDecision::Pass(value)
            } else {
                GateDecision::Block("negative input".into())
            }
        });

        assert_eq!(gate.run(3).await.expect("run"), 3);
        match gate.run(-1).await {
            Err(Error::Blocked { reason }) => assert_eq!(reason, "negative input"),
            other => panic!("expected blocked, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_step_is_identity() {
        let identity = EmptyStep::<String>::new();
        assert_eq!(identity.run("same".into()).await.expect("run"), "same");
    }

    #[tokio::test]
    async fn generate_requires_an_ambient_session() {
        match Generate::new().run("hello".into()).await {
            Err(Error::InvalidConfiguration { field, .. }) => assert_eq!(field, "session"),
            other => panic!("expected invalid configuration, got {other:?}"),
        }
    }
}
