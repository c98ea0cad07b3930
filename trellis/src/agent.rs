//! The agent runtime — a long-running input/output loop over a session.
//!
//! An [`Agent`] consumes string inputs, sends each through its
//! [`AgentSession`], runs its body step on the [`Response`], and yields the
//! body's output string to its [`EventSink`]. The loop terminates only on
//! cancellation (or a step/session error).
//!
//! A [`Transport`] is the boundary between an agent and its I/O peer; the
//! [`AgentRuntime`] pumps requests and events across it, buffering inbound
//! requests that arrive while a turn is being processed.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex as TokioMutex;
use tokio::sync::mpsc;

use crate::context::{CancellationKey, current};
use crate::error::{Error, Result};
use crate::event::{EventSink, RunEvent};
use crate::session::{AgentSession, Response};
use crate::step::Step;

/// A request arriving over a transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRequest {
    /// The input text.
    pub content: String,
}

impl RunRequest {
    /// Create a request.
    #[must_use]
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
        }
    }
}

/// The boundary between an agent and its I/O peer.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Block until a request arrives.
    ///
    /// Fails with `input_closed` once the input side is exhausted.
    async fn receive(&self) -> Result<RunRequest>;

    /// Emit an event to the peer.
    async fn send(&self, event: RunEvent) -> Result<()>;

    /// Stop accepting further input. Idempotent.
    async fn close_input(&self);

    /// Tear the transport down. Idempotent.
    async fn close(&self);
}

/// A long-running consumer of inputs and producer of outputs.
pub struct Agent<S> {
    session: Arc<AgentSession>,
    body: S,
    sink: EventSink,
    input_tx: mpsc::UnboundedSender<String>,
    input_rx: TokioMutex<mpsc::UnboundedReceiver<String>>,
}

impl<S> Agent<S>
where
    S: Step<Input = Response, Output = String>,
{
    /// Create an agent over a session, a body step, and an output sink.
    #[must_use]
    pub fn new(session: Arc<AgentSession>, body: S, sink: EventSink) -> Self {
        let (input_tx, input_rx) = mpsc::unbounded_channel();
        Self {
            session,
            body,
            sink,
            input_tx,
            input_rx: TokioMutex::new(input_rx),
        }
    }

    /// The agent's session.
    #[must_use]
    pub fn session(&self) -> &Arc<AgentSession> {
        &self.session
    }

    /// Queue an input for processing.
    ///
    /// Inputs may arrive at any time; they are buffered while a turn is in
    /// flight and consumed in arrival order.
    pub fn submit(&self, content: impl Into<String>) {
        // The receiver lives as long as the agent, so the send cannot fail.
        let _ = self.input_tx.send(content.into());
    }

    /// Run the loop: send each queued input through the session, run the
    /// body on the response, and yield its output to the sink.
    ///
    /// Returns only on cancellation or on a session/body error.
    pub async fn run(&self, initial: impl Into<String>) -> Result<()> {
        self.submit(initial);
        let cancellation = current::<CancellationKey>();

        loop {
            let content = {
                let mut inputs = self.input_rx.lock().await;
                tokio::select! {
                    () = cancellation.cancelled() => return Err(Error::Cancelled),
                    message = inputs.recv() => message.ok_or(Error::InputClosed)?,
                }
            };

            let response = self.session.send(&content).await?;
            let output = self.body.run(response).await?;
            self.sink.emit(RunEvent::Response { content: output });
        }
    }
}

impl<S> std::fmt::Debug for Agent<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("session", &self.session.id())
            .finish_non_exhaustive()
    }
}

/// Pumps requests and events between a transport and an agent.
#[derive(Debug)]
pub struct AgentRuntime<T> {
    transport: Arc<T>,
}

impl<T: Transport> AgentRuntime<T> {
    /// Create a runtime over a transport.
    pub fn new(transport: T) -> Self {
        Self {
            transport: Arc::new(transport),
        }
    }

    /// The underlying transport.
    #[must_use]
    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    /// Run an agent against the transport until it stops.
    ///
    /// Inbound requests are buffered into the agent while turns are being
    /// processed; sink events are forwarded to the peer. On exit the
    /// remaining events are drained and the transport is closed.
    pub async fn run<S>(
        &self,
        session: Arc<AgentSession>,
        body: S,
        initial: impl Into<String>,
    ) -> Result<()>
    where
        S: Step<Input = Response, Output = String>,
    {
        let (sink, mut events) = EventSink::channel();
        let agent = Agent::new(session, body, sink.clone());

        let inbound = async {
            while let Ok(request) = self.transport.receive().await {
                agent.submit(request.content);
            }
        };
        let outbound = async {
            while let Some(event) = events.recv().await {
                if self.transport.send(event).await.is_err() {
                    break;
                }
            }
        };

        let result = tokio::select! {
            result = agent.run(initial) => result,
            () = async { let _ = tokio::join!(inbound, outbound); } => Ok(()),
        };

        sink.finish();
        while let Ok(event) = events.try_recv() {
            let _ = self.transport.send(event).await;
        }
        self.transport.close().await;
        result
    }
}

/// An in-process [`Transport`] over unbounded channels.
///
/// [`pair`](ChannelTransport::pair) returns the transport together with the
/// peer-side handle used to push requests and read events.
pub struct ChannelTransport {
    requests: TokioMutex<mpsc::UnboundedReceiver<RunRequest>>,
    events: mpsc::UnboundedSender<RunEvent>,
    closed: AtomicBool,
}

/// The peer side of a [`ChannelTransport`].
pub struct ChannelTransportHandle {
    requests: mpsc::UnboundedSender<RunRequest>,
    events: TokioMutex<mpsc::UnboundedReceiver<RunEvent>>,
}

impl ChannelTransport {
    /// Create a connected transport/handle pair.
    #[must_use]
    pub fn pair() -> (Self, ChannelTransportHandle) {
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        (
            Self {
                requests: TokioMutex::new(request_rx),
                events: event_tx,
                closed: AtomicBool::new(false),
            },
            ChannelTransportHandle {
                requests: request_tx,
                events: TokioMutex::new(event_rx),
            },
        )
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn receive(&self) -> Result<RunRequest> {
        self.requests
            .lock()
            .await
            .recv()
            .await
            .ok_or(Error::InputClosed)
    }

    async fn send(&self, event: RunEvent) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Ok(());
        }
        // A departed peer is not the agent's problem.
        let _ = self.events.send(event);
        Ok(())
    }

    async fn close_input(&self) {
        self.requests.lock().await.close();
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.close_input().await;
    }
}

impl std::fmt::Debug for ChannelTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelTransport")
            .field("closed", &self.closed.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}

impl ChannelTransportHandle {
    /// Push a request to the agent.
    pub fn request(&self, content: impl Into<String>) {
        let _ = self.requests.send(RunRequest::new(content));
    }

    /// Read the next event from the agent, or `None` once it is gone.
    pub async fn next_event(&self) -> Option<RunEvent> {
        self.events.lock().await.recv().await
    }
}

impl std::fmt::Debug for ChannelTransportHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelTransportHandle").finish()
    }
}
