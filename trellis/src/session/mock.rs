//! A deterministic language-model session for tests and examples.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;
use crate::session::{Entry, LanguageModelSession, SessionDelegate, Transcript};

type ReplyFn = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// A scripted [`LanguageModelSession`].
///
/// Replies are computed from the prompt by a closure; an optional latency
/// simulates a slow model. Each `respond` appends the prompt and the reply
/// to the transcript.
#[derive(Clone)]
pub struct MockSession {
    transcript: Arc<Mutex<Transcript>>,
    reply: ReplyFn,
    latency: Option<Duration>,
}

impl MockSession {
    /// A session replying with a closure over the prompt.
    #[must_use]
    pub fn new(reply: impl Fn(&str) -> String + Send + Sync + 'static) -> Self {
        Self {
            transcript: Arc::new(Mutex::new(Transcript::new())),
            reply: Arc::new(reply),
            latency: None,
        }
    }

    /// A session replying with the uppercased prompt.
    #[must_use]
    pub fn uppercase() -> Self {
        Self::new(|prompt| prompt.to_uppercase())
    }

    /// Seed the transcript.
    #[must_use]
    pub fn seeded(self, transcript: Transcript) -> Self {
        *self
            .transcript
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = transcript;
        self
    }

    /// Sleep this long inside every `respond`.
    #[must_use]
    pub const fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }
}

#[async_trait]
impl LanguageModelSession for MockSession {
    fn transcript(&self) -> Transcript {
        self.transcript
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    async fn respond(&self, prompt: &str) -> Result<String> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        let content = (self.reply)(prompt);
        let mut transcript = self
            .transcript
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        transcript.push(Entry::Prompt {
            content: prompt.to_string(),
        });
        transcript.push(Entry::Response {
            content: content.clone(),
        });
        Ok(content)
    }
}

impl std::fmt::Debug for MockSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockSession")
            .field("latency", &self.latency)
            .finish_non_exhaustive()
    }
}

/// A [`SessionDelegate`] producing [`MockSession`] backings.
#[derive(Clone)]
pub struct MockDelegate {
    reply: ReplyFn,
    latency: Option<Duration>,
}

impl MockDelegate {
    /// A delegate whose sessions reply with a closure over the prompt.
    #[must_use]
    pub fn new(reply: impl Fn(&str) -> String + Send + Sync + 'static) -> Self {
        Self {
            reply: Arc::new(reply),
            latency: None,
        }
    }

    /// A delegate whose sessions reply with the uppercased prompt.
    #[must_use]
    pub fn uppercase() -> Self {
        Self::new(|prompt| prompt.to_uppercase())
    }

    /// Give every produced session this latency.
    #[must_use]
    pub const fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }
}

impl SessionDelegate for MockDelegate {
    fn make_session(&self, transcript: Transcript) -> Arc<dyn LanguageModelSession> {
        let reply = Arc::clone(&self.reply);
        let mut session = MockSession {
            transcript: Arc::new(Mutex::new(transcript)),
            reply,
            latency: None,
        };
        if let Some(latency) = self.latency {
            session = session.with_latency(latency);
        }
        Arc::new(session)
    }
}

impl std::fmt::Debug for MockDelegate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockDelegate")
            .field("latency", &self.latency)
            .finish_non_exhaustive()
    }
}
