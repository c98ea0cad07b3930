//! Events — the name-keyed bus and the run-event sink.
//!
//! Two sideways channels carry observability out of a step tree:
//!
//! - **[`EventBus`]** — a mutable map from event name to an ordered list of
//!   async handlers. Emission fans out to every handler registered under the
//!   event's name, awaiting each in registration order on the emitting task.
//! - **[`EventSink`]** — a single-producer sink of [`RunEvent`] values that
//!   forwards to an async channel (one consumer expected) or to a closure.
//!   `finish` is idempotent; emission after `finish` is a no-op.
//!
//! Both are available ambiently via [`EventBusKey`] and [`EventSinkKey`].

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::context::ContextKey;

/// Reserved event names emitted by the engine itself.
pub mod names {
    /// Emitted by a session just before the backing model is called.
    pub const PROMPT_SUBMITTED: &str = "promptSubmitted";
    /// Emitted by a session once the backing model has responded.
    pub const RESPONSE_COMPLETED: &str = "responseCompleted";
    /// A user-facing notification.
    pub const NOTIFICATION: &str = "notification";
}

/// The origin of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    /// Emitted by a session turn.
    Session,
    /// Emitted by a step.
    Step,
    /// Emitted by user code.
    Community,
}

/// A named event with a timestamp and an optional JSON payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// The event name used for handler lookup.
    pub name: String,
    /// Where the event came from.
    pub kind: EventKind,
    /// When the event was created.
    pub timestamp: DateTime<Utc>,
    /// Optional structured payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl Event {
    /// Create a new event of the given kind.
    #[must_use]
    pub fn new(name: impl Into<String>, kind: EventKind) -> Self {
        Self {
            name: name.into(),
            kind,
            timestamp: Utc::now(),
            payload: None,
        }
    }

    /// Create a session-kind event.
    #[must_use]
    pub fn session(name: impl Into<String>) -> Self {
        Self::new(name, EventKind::Session)
    }

    /// Create a step-kind event.
    #[must_use]
    pub fn step(name: impl Into<String>) -> Self {
        Self::new(name, EventKind::Step)
    }

    /// Create a community-kind event.
    #[must_use]
    pub fn community(name: impl Into<String>) -> Self {
        Self::new(name, EventKind::Community)
    }

    /// Attach a payload.
    #[must_use]
    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }
}

type EventHandler = Arc<dyn Fn(Event) -> BoxFuture<'static, ()> + Send + Sync>;

/// A name-keyed multiplexer of events.
///
/// Cloning is cheap and clones observe the same handler table. Emission
/// snapshots the handler list under the mutex and awaits each handler
/// outside of it, in registration order. There are no ordering guarantees
/// across distinct event names.
#[derive(Clone, Default)]
pub struct EventBus {
    handlers: Arc<Mutex<HashMap<String, Vec<EventHandler>>>>,
}

impl EventBus {
    /// Create a new bus with no handlers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for events named `name`.
    pub fn on<F, Fut>(&self, name: impl Into<String>, handler: F)
    where
        F: Fn(Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handler: EventHandler = Arc::new(move |event| Box::pin(handler(event)));
        self.lock().entry(name.into()).or_default().push(handler);
    }

    /// Remove all handlers registered under `name`.
    pub fn off(&self, name: &str) {
        self.lock().remove(name);
    }

    /// Emit an event to every handler registered under its name.
    ///
    /// Handlers run on the emitting task, awaited one after another in
    /// registration order. No handler table lock is held while awaiting.
    pub async fn emit(&self, event: Event) {
        let matched: Vec<EventHandler> = self
            .lock()
            .get(&event.name)
            .map(|handlers| handlers.to_vec())
            .unwrap_or_default();

        for handler in matched {
            handler(event.clone()).await;
        }
    }

    /// Number of handlers registered under `name`.
    #[must_use]
    pub fn handler_count(&self, name: &str) -> usize {
        self.lock().get(name).map_or(0, Vec::len)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Vec<EventHandler>>> {
        self.handlers
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("event_names", &self.lock().len())
            .finish()
    }
}

/// Ambient access to the current event bus.
///
/// The default is a fresh bus with no handlers, so unscoped emission is a
/// harmless no-op.
#[derive(Debug, Clone, Copy)]
pub struct EventBusKey;

impl ContextKey for EventBusKey {
    type Value = EventBus;

    fn default_value() -> EventBus {
        EventBus::new()
    }
}

/// An event produced by an agent run and delivered to its transport peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum RunEvent {
    /// A completed response from the agent body.
    Response {
        /// The body's output string.
        content: String,
    },
    /// An out-of-band notification.
    Notification {
        /// The notification text.
        content: String,
    },
    /// The run failed.
    Failed {
        /// A one-line description of the failure.
        message: String,
    },
}

enum SinkTarget {
    Channel(mpsc::UnboundedSender<RunEvent>),
    Callback(Box<dyn Fn(RunEvent) + Send + Sync>),
    Null,
}

struct SinkInner {
    target: SinkTarget,
    finished: AtomicBool,
}

/// A single-producer sink of [`RunEvent`] values.
///
/// Steps emit into the sink without knowing what consumes it. Cloning is
/// cheap; all clones share the finished flag.
#[derive(Clone)]
pub struct EventSink {
    inner: Arc<SinkInner>,
}

impl EventSink {
    /// Create a sink forwarding into an unbounded channel.
    ///
    /// One consumer is expected on the returned receiver.
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<RunEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = Self {
            inner: Arc::new(SinkInner {
                target: SinkTarget::Channel(tx),
                finished: AtomicBool::new(false),
            }),
        };
        (sink, rx)
    }

    /// Create a sink forwarding into a closure.
    #[must_use]
    pub fn callback(f: impl Fn(RunEvent) + Send + Sync + 'static) -> Self {
        Self {
            inner: Arc::new(SinkInner {
                target: SinkTarget::Callback(Box::new(f)),
                finished: AtomicBool::new(false),
            }),
        }
    }

    /// Create a sink that discards everything.
    #[must_use]
    pub fn null() -> Self {
        Self {
            inner: Arc::new(SinkInner {
                target: SinkTarget::Null,
                finished: AtomicBool::new(false),
            }),
        }
    }

    /// Emit an event. A no-op once [`finish`](Self::finish) has been called.
    pub fn emit(&self, event: RunEvent) {
        if self.inner.finished.load(Ordering::Acquire) {
            return;
        }
        match &self.inner.target {
            SinkTarget::Channel(tx) => {
                // The consumer may already be gone; that is not the
                // producer's problem.
                let _ = tx.send(event);
            }
            SinkTarget::Callback(f) => f(event),
            SinkTarget::Null => {}
        }
    }

    /// Mark the sink finished. Idempotent.
    pub fn finish(&self) {
        self.inner.finished.store(true, Ordering::Release);
    }

    /// Returns `true` once the sink has been finished.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.inner.finished.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for EventSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSink")
            .field("finished", &self.is_finished())
            .finish_non_exhaustive()
    }
}

/// Ambient access to the current run-event sink.
///
/// The default is a null sink, so unscoped emission goes nowhere.
#[derive(Debug, Clone, Copy)]
pub struct EventSinkKey;

impl ContextKey for EventSinkKey {
    type Value = EventSink;

    fn default_value() -> EventSink {
        EventSink::null()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn handlers_run_in_registration_order() {
        let bus = EventBus::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second", "third"] {
            let order = Arc::clone(&order);
            bus.on("tick", move |_event| {
                let order = Arc::clone(&order);
                async move {
                    order.lock().expect("lock poisoned").push(tag);
                }
            });
        }

        bus.emit(Event::step("tick")).await;
        assert_eq!(
            *order.lock().expect("lock poisoned"),
            vec!["first", "second", "third"]
        );
    }

    #[tokio::test]
    async fn emit_only_reaches_matching_name() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let counted = Arc::clone(&hits);
        bus.on("wanted", move |_event| {
            let counted = Arc::clone(&counted);
            async move {
                counted.fetch_add(1, Ordering::SeqCst);
            }
        });

        bus.emit(Event::step("other")).await;
        bus.emit(Event::step("wanted")).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn off_removes_all_handlers() {
        let bus = EventBus::new();
        bus.on("gone", |_event| async {});
        bus.on("gone", |_event| async {});
        assert_eq!(bus.handler_count("gone"), 2);

        bus.off("gone");
        assert_eq!(bus.handler_count("gone"), 0);
    }

    #[test]
    fn sink_is_silent_after_finish() {
        let (sink, mut rx) = EventSink::channel();
        sink.emit(RunEvent::Notification {
            content: "before".into(),
        });
        sink.finish();
        sink.finish();
        sink.emit(RunEvent::Notification {
            content: "after".into(),
        });

        assert_eq!(
            rx.try_recv().expect("one event"),
            RunEvent::Notification {
                content: "before".into()
            }
        );
        assert!(rx.try_recv().is_err());
    }
}
