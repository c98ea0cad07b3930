//! Sandbox policy for command-executing tools.
//!
//! The engine only defines the policy surface and the middleware that
//! routes command tools through an abstract [`SandboxExecutor`]; the
//! containment mechanism itself lives outside the crate.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::{ContextKey, current};
use crate::error::Result;
use crate::guardrail::GuardrailKey;
use crate::tool::pattern::is_shell_tool;
use crate::tool::{Next, ToolContext, ToolMiddleware};

/// What network access a sandboxed command gets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkPolicy {
    /// No network access.
    None,
    /// Loopback only.
    Local,
    /// Unrestricted network access.
    #[default]
    Full,
}

/// What filesystem access a sandboxed command gets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilePolicy {
    /// Reads only.
    ReadOnly,
    /// Writes confined to the working directory.
    WorkingDirectoryOnly,
    /// Unrestricted filesystem access.
    #[default]
    Unrestricted,
}

/// The sandbox policy applied to a command execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SandboxConfiguration {
    /// Network containment.
    pub network_policy: NetworkPolicy,
    /// Filesystem containment.
    pub file_policy: FilePolicy,
    /// Whether the command may spawn subprocesses.
    pub allow_subprocesses: bool,
}

impl Default for SandboxConfiguration {
    fn default() -> Self {
        Self {
            network_policy: NetworkPolicy::default(),
            file_policy: FilePolicy::default(),
            allow_subprocesses: true,
        }
    }
}

impl SandboxConfiguration {
    /// The permissive default policy.
    #[must_use]
    pub fn unrestricted() -> Self {
        Self::default()
    }

    /// A read-only, offline policy.
    #[must_use]
    pub const fn locked_down() -> Self {
        Self {
            network_policy: NetworkPolicy::None,
            file_policy: FilePolicy::ReadOnly,
            allow_subprocesses: false,
        }
    }
}

/// Runs commands under a sandbox policy.
#[async_trait]
pub trait SandboxExecutor: Send + Sync {
    /// Execute `command` under `configuration`, resolving paths against
    /// `working_directory`.
    async fn execute(
        &self,
        command: &str,
        configuration: &SandboxConfiguration,
        working_directory: &Path,
    ) -> Result<Value>;
}

/// Ambient sandbox configuration.
///
/// `None` means nothing is bound and the middleware's base applies.
#[derive(Debug, Clone, Copy)]
pub struct SandboxKey;

impl ContextKey for SandboxKey {
    type Value = Option<SandboxConfiguration>;

    fn default_value() -> Option<SandboxConfiguration> {
        None
    }
}

/// Middleware routing command tools through the sandbox executor.
///
/// Non-command tools pass through untouched, as does a command tool whose
/// arguments carry no `command` string (the tool body reports its own
/// argument error). The effective configuration is resolved innermost
/// first: the ambient guardrail's sandbox slot, then the ambient
/// [`SandboxKey`] binding, then the middleware's base.
pub struct SandboxMiddleware {
    executor: Arc<dyn SandboxExecutor>,
    base: SandboxConfiguration,
}

impl SandboxMiddleware {
    /// Create a middleware with the permissive default base policy.
    #[must_use]
    pub fn new(executor: Arc<dyn SandboxExecutor>) -> Self {
        Self {
            executor,
            base: SandboxConfiguration::default(),
        }
    }

    /// Set the base policy.
    #[must_use]
    pub const fn with_base(mut self, base: SandboxConfiguration) -> Self {
        self.base = base;
        self
    }

    fn effective(&self) -> SandboxConfiguration {
        current::<GuardrailKey>()
            .and_then(|guardrail| guardrail.sandbox)
            .or_else(current::<SandboxKey>)
            .unwrap_or(self.base)
    }
}

#[async_trait]
impl ToolMiddleware for SandboxMiddleware {
    async fn handle(&self, ctx: ToolContext, next: Next<'_>) -> Result<Value> {
        if !is_shell_tool(&ctx.tool_name) {
            return next.run(ctx).await;
        }
        let Some(command) = ctx.arguments.get("command").and_then(Value::as_str) else {
            return next.run(ctx).await;
        };

        let configuration = self.effective();
        self.executor
            .execute(command, &configuration, &ctx.working_directory)
            .await
    }
}

impl std::fmt::Debug for SandboxMiddleware {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SandboxMiddleware")
            .field("base", &self.base)
            .finish_non_exhaustive()
    }
}
