//! Convenience re-exports for the common surface of the crate.
//!
//! ```rust,ignore
//! use trellis::prelude::*;
//! ```

pub use crate::agent::{Agent, AgentRuntime, ChannelTransport, RunRequest, Transport};
pub use crate::context::{
    CancellationKey, ContextKey, ContextMap, current, with_cancellation, with_value,
};
pub use crate::error::{Error, Result};
pub use crate::event::{Event, EventBus, EventBusKey, EventKind, EventSink, EventSinkKey, RunEvent};
pub use crate::guardrail::{Guardrail, GuardrailConfiguration, GuardrailKey, GuardedStep};
pub use crate::memory::{Memory, Relay};
pub use crate::session::{
    AgentSession, AgentSessionKey, Entry, FileSessionStore, InMemorySessionStore,
    LanguageModelSession, LanguageModelSessionKey, Response, SessionDelegate, SessionSnapshot,
    SessionStore, Transcript,
};
pub use crate::step::{
    AnyStep, EmptyStep, Gate, GateDecision, Generate, Loop, Map, Parallel, Pipeline, Race, Reduce,
    Step, StepExt, Transform,
};
pub use crate::tool::{
    DefaultAction, FnTool, LoggingMiddleware, Next, PermissionConfiguration, PermissionDecision,
    PermissionHandler, PermissionMiddleware, PermissionRule, PermissionsFile, RetryMiddleware,
    SandboxConfiguration, SandboxExecutor, SandboxMiddleware, SharedTool, TimeoutMiddleware, Tool,
    ToolContext, ToolDefinition, ToolMiddleware, ToolPipeline, ToolProviderKey, ToolSet,
};
