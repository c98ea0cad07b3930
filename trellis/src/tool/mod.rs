//! Tools and the middleware pipeline that gates them.
//!
//! A [`Tool`] is a named, schema-described, side-effectful operation
//! invocable by a language model. Tools are not steps: they consume and
//! produce JSON values and are always reached through a [`ToolPipeline`] —
//! an ordered middleware chain terminating in the tool body. Middleware may
//! short-circuit by not calling [`Next`], transform arguments before
//! calling it, or transform results after.
//!
//! A pipeline is itself a [`Tool`], so every tool handed to a model turn is
//! shape-identical whether or not it is wrapped.

pub mod middleware;
pub mod pattern;
pub mod permission;
pub mod sandbox;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::{ContextKey, current};
use crate::error::{Error, Result};
use crate::session::AgentSessionKey;

pub use middleware::{LoggingMiddleware, RetryMiddleware, TimeoutMiddleware};
pub use pattern::{ArgumentPattern, PermissionRule};
pub use permission::{
    DefaultAction, PermissionConfiguration, PermissionDecision, PermissionHandler,
    PermissionMiddleware, PermissionsFile,
};
pub use sandbox::{
    FilePolicy, NetworkPolicy, SandboxConfiguration, SandboxExecutor, SandboxKey,
    SandboxMiddleware,
};

/// A machine-readable description of a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// The tool name presented to the model.
    pub name: String,
    /// What the tool does.
    pub description: String,
    /// JSON schema of the tool's arguments.
    pub parameters: Value,
}

impl ToolDefinition {
    /// Create a definition with an empty object schema.
    #[must_use]
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: serde_json::json!({ "type": "object", "properties": {} }),
        }
    }

    /// Derive the parameter schema from an argument type.
    #[must_use]
    pub fn with_parameters_of<T: JsonSchema>(mut self) -> Self {
        self.parameters = schemars::schema_for!(T).to_value();
        self
    }
}

/// A side-effectful operation invocable by a language model.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The tool's unique name.
    fn name(&self) -> &str;

    /// The tool's definition.
    fn definition(&self) -> ToolDefinition;

    /// Execute the tool on JSON arguments, producing a JSON output.
    async fn call(&self, arguments: Value) -> Result<Value>;
}

/// A shared, type-erased tool.
pub type SharedTool = Arc<dyn Tool>;

type ToolBody = Box<dyn Fn(Value) -> BoxFuture<'static, Result<Value>> + Send + Sync>;

/// A tool built from a closure.
pub struct FnTool {
    definition: ToolDefinition,
    body: ToolBody,
}

impl FnTool {
    /// Create a tool from a name, a description, and a body closure.
    #[must_use]
    pub fn new<F, Fut>(name: impl Into<String>, description: impl Into<String>, body: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        Self {
            definition: ToolDefinition::new(name, description),
            body: Box::new(move |arguments| Box::pin(body(arguments))),
        }
    }

    /// Derive the parameter schema from an argument type.
    #[must_use]
    pub fn with_parameters_of<T: JsonSchema>(mut self) -> Self {
        self.definition = self.definition.with_parameters_of::<T>();
        self
    }
}

#[async_trait]
impl Tool for FnTool {
    fn name(&self) -> &str {
        &self.definition.name
    }

    fn definition(&self) -> ToolDefinition {
        self.definition.clone()
    }

    async fn call(&self, arguments: Value) -> Result<Value> {
        (self.body)(arguments).await
    }
}

impl std::fmt::Debug for FnTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnTool")
            .field("name", &self.definition.name)
            .finish_non_exhaustive()
    }
}

/// Everything a middleware can know about one tool invocation.
#[derive(Debug, Clone)]
pub struct ToolContext {
    /// The invoked tool's name.
    pub tool_name: String,
    /// The invocation arguments.
    pub arguments: Value,
    /// Id of the session driving the invocation, when known.
    pub session_id: Option<String>,
    /// The working directory policy checks resolve paths against.
    pub working_directory: PathBuf,
    /// Per-call override of the configured default permission action.
    pub permission_mode: Option<DefaultAction>,
    /// The session turn the invocation belongs to, when known.
    pub turn: Option<u64>,
    /// Correlates the invocation with a trace, when one is active.
    pub trace_id: Option<String>,
    /// Nesting depth of the invocation (0 = top level).
    pub depth: u32,
}

impl ToolContext {
    /// Create a context with engine defaults.
    #[must_use]
    pub fn new(tool_name: impl Into<String>, arguments: Value) -> Self {
        Self {
            tool_name: tool_name.into(),
            arguments,
            session_id: None,
            working_directory: PathBuf::from("."),
            permission_mode: None,
            turn: None,
            trace_id: None,
            depth: 0,
        }
    }

    /// Set the working directory.
    #[must_use]
    pub fn with_working_directory(mut self, directory: impl Into<PathBuf>) -> Self {
        self.working_directory = directory.into();
        self
    }

    /// Override the default permission action for this call.
    #[must_use]
    pub const fn with_permission_mode(mut self, mode: DefaultAction) -> Self {
        self.permission_mode = Some(mode);
        self
    }

    /// Set the nesting depth.
    #[must_use]
    pub const fn with_depth(mut self, depth: u32) -> Self {
        self.depth = depth;
        self
    }
}

/// An interceptor in the tool pipeline.
#[async_trait]
pub trait ToolMiddleware: Send + Sync {
    /// Handle one invocation.
    ///
    /// Call `next.run(ctx)` to continue down the chain, or return without
    /// calling it to short-circuit.
    async fn handle(&self, ctx: ToolContext, next: Next<'_>) -> Result<Value>;
}

/// The continuation of a middleware chain.
///
/// `Copy`, so a middleware may run the remaining chain more than once
/// (retries) or not at all (short-circuits).
#[derive(Clone, Copy)]
pub struct Next<'a> {
    stack: &'a [Arc<dyn ToolMiddleware>],
    tool: &'a dyn Tool,
}

impl Next<'_> {
    /// Run the rest of the chain, ending in the tool body.
    pub async fn run(self, ctx: ToolContext) -> Result<Value> {
        match self.stack.split_first() {
            Some((head, rest)) => {
                head.handle(
                    ctx,
                    Next {
                        stack: rest,
                        tool: self.tool,
                    },
                )
                .await
            }
            None => self.tool.call(ctx.arguments).await,
        }
    }
}

impl std::fmt::Debug for Next<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Next")
            .field("remaining", &self.stack.len())
            .finish_non_exhaustive()
    }
}

/// An ordered middleware chain terminating in a tool body.
#[derive(Clone)]
pub struct ToolPipeline {
    middleware: Vec<Arc<dyn ToolMiddleware>>,
    tool: SharedTool,
}

impl ToolPipeline {
    /// Wrap a tool with an empty chain.
    #[must_use]
    pub fn new(tool: SharedTool) -> Self {
        Self {
            middleware: Vec::new(),
            tool,
        }
    }

    /// Append a middleware to the chain.
    ///
    /// Middleware run in the order they were appended.
    #[must_use]
    pub fn with(mut self, middleware: impl ToolMiddleware + 'static) -> Self {
        self.middleware.push(Arc::new(middleware));
        self
    }

    /// Append an already-shared middleware to the chain.
    #[must_use]
    pub fn with_shared(mut self, middleware: Arc<dyn ToolMiddleware>) -> Self {
        self.middleware.push(middleware);
        self
    }

    /// Run the chain on an explicit context.
    pub async fn handle(&self, ctx: ToolContext) -> Result<Value> {
        Next {
            stack: &self.middleware,
            tool: self.tool.as_ref(),
        }
        .run(ctx)
        .await
    }
}

#[async_trait]
impl Tool for ToolPipeline {
    fn name(&self) -> &str {
        self.tool.name()
    }

    fn definition(&self) -> ToolDefinition {
        self.tool.definition()
    }

    async fn call(&self, arguments: Value) -> Result<Value> {
        let mut ctx = ToolContext::new(self.tool.name(), arguments);
        if let Some(session) = current::<AgentSessionKey>() {
            ctx.session_id = Some(session.id().to_string());
            ctx.turn = Some(session.turns());
        }
        self.handle(ctx).await
    }
}

impl std::fmt::Debug for ToolPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolPipeline")
            .field("tool", &self.tool.name())
            .field("middleware", &self.middleware.len())
            .finish()
    }
}

/// A name-keyed collection of tools.
#[derive(Clone, Default)]
pub struct ToolSet {
    tools: BTreeMap<String, SharedTool>,
}

impl ToolSet {
    /// Create an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a tool, replacing any previous tool with the same name.
    #[must_use]
    pub fn with(mut self, tool: impl Tool + 'static) -> Self {
        self.add(Arc::new(tool));
        self
    }

    /// Add a shared tool, replacing any previous tool with the same name.
    pub fn add(&mut self, tool: SharedTool) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    /// Look up a tool by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<SharedTool> {
        self.tools.get(name).cloned()
    }

    /// The definitions of every tool, sorted by name.
    #[must_use]
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|tool| tool.definition()).collect()
    }

    /// Number of tools in the set.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Returns `true` when the set has no tools.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Invoke a tool by name.
    pub async fn call(&self, name: &str, arguments: Value) -> Result<Value> {
        let tool = self
            .get(name)
            .ok_or_else(|| Error::tool_execution(name, "unknown tool"))?;
        tool.call(arguments).await
    }

    /// Wrap every tool in a pipeline carrying the given middleware chain.
    ///
    /// Each tool gets its own pipeline sharing the same middleware values,
    /// so per-chain state (like permission session memory) is shared across
    /// tools.
    #[must_use]
    pub fn wrapped(&self, middleware: &[Arc<dyn ToolMiddleware>]) -> Self {
        let mut wrapped = Self::new();
        for tool in self.tools.values() {
            let mut pipeline = ToolPipeline::new(Arc::clone(tool));
            for layer in middleware {
                pipeline = pipeline.with_shared(Arc::clone(layer));
            }
            wrapped.add(Arc::new(pipeline));
        }
        wrapped
    }
}

impl std::fmt::Debug for ToolSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolSet")
            .field("tools", &self.tools.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Ambient access to the tools available to the current scope.
#[derive(Debug, Clone, Copy)]
pub struct ToolProviderKey;

impl ContextKey for ToolProviderKey {
    type Value = Option<Arc<ToolSet>>;

    fn default_value() -> Option<Arc<ToolSet>> {
        None
    }
}
