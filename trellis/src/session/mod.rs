//! Sessions — serialized conversation turns over a replaceable model backing.
//!
//! An [`AgentSession`] wraps an abstract [`LanguageModelSession`] with:
//!
//! - a queue of *steering* messages prepended to the next turn's prompt;
//! - a single-slot turn lock with FIFO waiters, so at most one turn is ever
//!   in flight;
//! - a replaceable backing session (for transcript compaction), built from a
//!   transcript by a [`SessionDelegate`];
//! - an [`EventBus`] announcing `promptSubmitted` / `responseCompleted`.
//!
//! Steering messages added while a turn is in flight are consumed by the
//! *next* turn, never the current one. When the backing session is replaced
//! during a turn, the in-flight turn completes on the captured previous
//! backing; the next turn uses the new one.

pub mod mock;
pub mod snapshot;
pub mod store;

use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::Mutex as TurnMutex;

use crate::context::{CancellationKey, ContextKey, current};
use crate::error::{Error, Result};
use crate::event::{Event, EventBus, names};

pub use snapshot::SessionSnapshot;
pub use store::{FileSessionStore, InMemorySessionStore, SessionStore};

/// One record in a transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Entry {
    /// A prompt submitted to the model.
    Prompt {
        /// The prompt text.
        content: String,
    },
    /// A batch of tool calls requested by the model.
    ToolCalls {
        /// The requested calls.
        calls: Vec<ToolCallEntry>,
    },
    /// The output of one tool call.
    ToolOutput {
        /// Id of the call this output answers.
        id: String,
        /// The tool's JSON output.
        output: Value,
    },
    /// An assistant response.
    Response {
        /// The response text.
        content: String,
    },
}

/// One tool call inside an [`Entry::ToolCalls`] batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallEntry {
    /// Unique identifier for the call.
    pub id: String,
    /// Name of the tool.
    pub name: String,
    /// Arguments passed to the tool.
    pub arguments: Value,
}

/// An ordered finite sequence of entries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Transcript {
    entries: Vec<Entry>,
}

impl Transcript {
    /// Create an empty transcript.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Create a transcript from entries.
    #[must_use]
    pub fn from_entries(entries: Vec<Entry>) -> Self {
        Self { entries }
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` when there are no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The entries in order.
    #[must_use]
    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    /// Append an entry.
    pub fn push(&mut self, entry: Entry) {
        self.entries.push(entry);
    }

    /// Copy the entries from `start` onward.
    #[must_use]
    pub fn suffix(&self, start: usize) -> Vec<Entry> {
        self.entries.get(start..).unwrap_or_default().to_vec()
    }
}

/// The result of one session turn.
#[derive(Debug, Clone)]
pub struct Response {
    /// The generated content.
    pub content: String,
    /// The transcript entries produced by this turn.
    pub entries: Vec<Entry>,
    /// How long the turn took.
    pub duration: Duration,
}

/// The abstract model backing of a session.
///
/// Implementations own the transcript: `respond` appends whatever entries
/// the turn produced, and `transcript` returns a copy of the current state.
/// The engine only reads a length index and a suffix view.
#[async_trait]
pub trait LanguageModelSession: Send + Sync {
    /// A copy of the current transcript.
    fn transcript(&self) -> Transcript;

    /// Generate a response to `prompt`, appending the turn's entries.
    async fn respond(&self, prompt: &str) -> Result<String>;
}

/// Builds backing sessions from transcripts.
///
/// Used when creating, restoring, and replacing the backing of an
/// [`AgentSession`]. Snapshots are opaque to the engine: it copies the
/// transcript by value and re-derives a session through the delegate.
pub trait SessionDelegate: Send + Sync {
    /// Build a backing session seeded with `transcript`.
    fn make_session(&self, transcript: Transcript) -> Arc<dyn LanguageModelSession>;
}

struct Backing {
    session: Arc<dyn LanguageModelSession>,
    updated_at: DateTime<Utc>,
    metadata: HashMap<String, String>,
    parent_id: Option<String>,
}

/// An identified conversation with serialized turns.
pub struct AgentSession {
    id: String,
    created_at: DateTime<Utc>,
    backing: StdMutex<Backing>,
    steering: StdMutex<VecDeque<String>>,
    turn: TurnMutex<()>,
    turns_completed: AtomicU64,
    events: EventBus,
    delegate: Arc<dyn SessionDelegate>,
}

impl AgentSession {
    /// Create a session with a fresh id and an empty transcript.
    #[must_use]
    pub fn new(delegate: Arc<dyn SessionDelegate>) -> Self {
        Self::with_id(uuid::Uuid::new_v4().to_string(), delegate)
    }

    /// Create a session with the given id and an empty transcript.
    #[must_use]
    pub fn with_id(id: impl Into<String>, delegate: Arc<dyn SessionDelegate>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            created_at: now,
            backing: StdMutex::new(Backing {
                session: delegate.make_session(Transcript::new()),
                updated_at: now,
                metadata: HashMap::new(),
                parent_id: None,
            }),
            steering: StdMutex::new(VecDeque::new()),
            turn: TurnMutex::new(()),
            turns_completed: AtomicU64::new(0),
            events: EventBus::new(),
            delegate,
        }
    }

    /// Re-create a session from a snapshot.
    ///
    /// The backing session is built from the snapshot's transcript through
    /// the delegate.
    #[must_use]
    pub fn restore(snapshot: SessionSnapshot, delegate: Arc<dyn SessionDelegate>) -> Self {
        Self {
            id: snapshot.id,
            created_at: snapshot.created_at,
            backing: StdMutex::new(Backing {
                session: delegate.make_session(snapshot.transcript),
                updated_at: snapshot.updated_at,
                metadata: snapshot.metadata,
                parent_id: snapshot.parent_session_id,
            }),
            steering: StdMutex::new(VecDeque::new()),
            turn: TurnMutex::new(()),
            turns_completed: AtomicU64::new(0),
            events: EventBus::new(),
            delegate,
        }
    }

    /// The session id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The session's event bus.
    #[must_use]
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Number of completed turns.
    #[must_use]
    pub fn turns(&self) -> u64 {
        self.turns_completed.load(Ordering::Relaxed)
    }

    /// A copy of the current transcript.
    #[must_use]
    pub fn transcript(&self) -> Transcript {
        self.lock_backing().session.transcript()
    }

    /// Set a metadata entry carried by snapshots.
    pub fn set_metadata(&self, key: impl Into<String>, value: impl Into<String>) {
        self.lock_backing().metadata.insert(key.into(), value.into());
    }

    /// Queue a steering message for the next turn.
    ///
    /// Steering is accepted at any time, including while a turn is in
    /// flight; queued messages are drained into the *next* prompt.
    pub fn steer(&self, content: impl Into<String>) {
        self.lock_steering().push_back(content.into());
    }

    /// Replace the backing session with one built from `transcript`.
    ///
    /// If a turn is in flight it completes on the previously captured
    /// backing; the next turn uses the new one.
    pub fn replace_session(&self, transcript: Transcript) {
        let session = self.delegate.make_session(transcript);
        let mut backing = self.lock_backing();
        backing.session = session;
        backing.updated_at = Utc::now();
    }

    /// Run one turn, waiting for the slot if another turn is in flight.
    ///
    /// Waiters acquire the slot in FIFO order; a waiter whose future is
    /// dropped leaves the queue without disturbing it. Cancellation via the
    /// ambient token is checked before and after slot acquisition.
    pub async fn send(&self, content: &str) -> Result<Response> {
        let cancellation = current::<CancellationKey>();
        if cancellation.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let _turn = self.turn.lock().await;
        if cancellation.is_cancelled() {
            return Err(Error::Cancelled);
        }

        self.run_turn(content).await
    }

    /// Run one turn only if no turn is in flight.
    ///
    /// Unlike [`send`](Self::send) this never queues: it fails with
    /// `session_busy` when the slot is taken.
    pub async fn try_send(&self, content: &str) -> Result<Response> {
        let Ok(_turn) = self.turn.try_lock() else {
            return Err(Error::SessionBusy);
        };
        self.run_turn(content).await
    }

    /// Capture a snapshot of the session.
    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        let backing = self.lock_backing();
        SessionSnapshot {
            id: self.id.clone(),
            transcript: backing.session.transcript(),
            created_at: self.created_at,
            updated_at: backing.updated_at,
            metadata: backing.metadata.clone(),
            parent_session_id: backing.parent_id.clone(),
        }
    }

    /// Fork a child session sharing this session's transcript.
    ///
    /// The child gets a fresh id and records this session as its parent.
    #[must_use]
    pub fn fork(&self) -> Self {
        let transcript = self.transcript();
        let child = Self::with_id(uuid::Uuid::new_v4().to_string(), Arc::clone(&self.delegate));
        {
            let mut backing = child.lock_backing();
            backing.session = child.delegate.make_session(transcript);
            backing.parent_id = Some(self.id.clone());
        }
        child
    }

    /// Save a snapshot of this session into `store`.
    pub async fn persist(&self, store: &dyn SessionStore) -> Result<()> {
        store.save(&self.snapshot()).await
    }

    /// Load a session from `store` by id.
    pub async fn resume(
        store: &dyn SessionStore,
        id: &str,
        delegate: Arc<dyn SessionDelegate>,
    ) -> Result<Self> {
        let snapshot = store.load(id).await?;
        Ok(Self::restore(snapshot, delegate))
    }

    // The slot is held by the caller for the whole turn. Capture the
    // backing once so a concurrent `replace_session` cannot disturb this
    // turn, and drain steering only now so messages queued mid-turn wait
    // for the next one.
    async fn run_turn(&self, content: &str) -> Result<Response> {
        let captured = self.lock_backing().session.clone();
        let transcript_start = captured.transcript().len();

        let steering: Vec<String> = self.lock_steering().drain(..).collect();
        let prompt = if steering.is_empty() {
            content.to_string()
        } else {
            format!("{content}\n\n{}", steering.join("\n\n"))
        };

        self.events
            .emit(Event::session(names::PROMPT_SUBMITTED).with_payload(json!({ "prompt": prompt })))
            .await;

        let started = Instant::now();
        let content = captured.respond(&prompt).await?;
        let duration = started.elapsed();

        self.events
            .emit(
                Event::session(names::RESPONSE_COMPLETED)
                    .with_payload(json!({ "content": content })),
            )
            .await;

        let entries = captured.transcript().suffix(transcript_start);
        self.lock_backing().updated_at = Utc::now();
        self.turns_completed.fetch_add(1, Ordering::Relaxed);

        Ok(Response {
            content,
            entries,
            duration,
        })
    }

    fn lock_backing(&self) -> std::sync::MutexGuard<'_, Backing> {
        self.backing.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_steering(&self) -> std::sync::MutexGuard<'_, VecDeque<String>> {
        self.steering.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for AgentSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentSession")
            .field("id", &self.id)
            .field("turns", &self.turns())
            .finish_non_exhaustive()
    }
}

/// Ambient access to the current agent session.
#[derive(Debug, Clone, Copy)]
pub struct AgentSessionKey;

impl ContextKey for AgentSessionKey {
    type Value = Option<Arc<AgentSession>>;

    fn default_value() -> Option<Arc<AgentSession>> {
        None
    }
}

/// Ambient access to a bare language-model session.
#[derive(Debug, Clone, Copy)]
pub struct LanguageModelSessionKey;

impl ContextKey for LanguageModelSessionKey {
    type Value = Option<Arc<dyn LanguageModelSession>>;

    fn default_value() -> Option<Arc<dyn LanguageModelSession>> {
        None
    }
}
