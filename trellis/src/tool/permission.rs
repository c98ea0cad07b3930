//! Permission policy for tool invocations.
//!
//! On every invocation the [`PermissionMiddleware`] derives the effective
//! configuration (its base overlaid with the ambient guardrail, if any) and
//! evaluates, in order:
//!
//! 1. session memory (`always_allowed` short-circuits to the tool,
//!    `blocked` refuses);
//! 2. `final_deny` rules — these always apply and cannot be overridden;
//! 3. `allow` rules — first match proceeds;
//! 4. `deny` rules — first match refuses, unless an `override` rule exempts
//!    the invocation;
//! 5. `ask` rules — a match forces the handler;
//! 6. the default action (`allow`, `deny`, or `ask`).
//!
//! When policy asks, the configured [`PermissionHandler`] decides:
//! `allow_once`, `always_allow` (remembered), `deny`, or `deny_and_block`
//! (remembered). With no handler configured, asking fails fast.

use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::current;
use crate::error::{Error, Result};
use crate::guardrail::{GuardrailConfiguration, GuardrailKey};
use crate::tool::pattern::{PermissionRule, is_shell_tool};
use crate::tool::{Next, ToolContext, ToolMiddleware};

/// What to do when no rule matches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DefaultAction {
    /// Proceed to the tool.
    Allow,
    /// Refuse the invocation.
    Deny,
    /// Consult the permission handler.
    #[default]
    Ask,
}

/// A handler's verdict on an asked invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionDecision {
    /// Allow this invocation only.
    AllowOnce,
    /// Allow this invocation and remember its memory key.
    AlwaysAllow,
    /// Refuse this invocation only.
    Deny,
    /// Refuse this invocation and remember its memory key as blocked.
    DenyAndBlock,
}

/// Decides asked invocations.
///
/// The middleware never depends on how the decision is made — CLI prompt,
/// dialog, or policy service.
#[async_trait]
pub trait PermissionHandler: Send + Sync {
    /// Decide the fate of one invocation.
    async fn decide(&self, ctx: &ToolContext) -> PermissionDecision;
}

/// The policy a [`PermissionMiddleware`] evaluates.
#[derive(Clone, Default)]
pub struct PermissionConfiguration {
    /// Rules that let an invocation proceed.
    pub allow: Vec<PermissionRule>,
    /// Rules that refuse an invocation.
    pub deny: Vec<PermissionRule>,
    /// Deny rules that apply regardless of overrides.
    pub final_deny: Vec<PermissionRule>,
    /// Rules exempting an invocation from regular deny rules.
    pub overrides: Vec<PermissionRule>,
    /// Rules that force the handler to be consulted.
    pub ask: Vec<PermissionRule>,
    /// What to do when no rule matches.
    pub default_action: DefaultAction,
    /// The handler consulted when policy asks.
    pub handler: Option<Arc<dyn PermissionHandler>>,
    /// Whether handler decisions are remembered per memory key.
    pub enable_session_memory: bool,
}

impl PermissionConfiguration {
    /// An empty configuration that asks for everything.
    #[must_use]
    pub fn new() -> Self {
        Self {
            enable_session_memory: true,
            ..Self::default()
        }
    }

    /// Append an allow rule.
    pub fn allow_rule(mut self, pattern: &str) -> Result<Self> {
        self.allow.push(PermissionRule::parse(pattern)?);
        Ok(self)
    }

    /// Append a deny rule.
    pub fn deny_rule(mut self, pattern: &str) -> Result<Self> {
        self.deny.push(PermissionRule::parse(pattern)?);
        Ok(self)
    }

    /// Append a final-deny rule.
    pub fn final_deny_rule(mut self, pattern: &str) -> Result<Self> {
        self.final_deny.push(PermissionRule::parse(pattern)?);
        Ok(self)
    }

    /// Set the default action.
    #[must_use]
    pub const fn with_default_action(mut self, action: DefaultAction) -> Self {
        self.default_action = action;
        self
    }

    /// Set the handler consulted when policy asks.
    #[must_use]
    pub fn with_handler(mut self, handler: impl PermissionHandler + 'static) -> Self {
        self.handler = Some(Arc::new(handler));
        self
    }

    /// Set an already-shared handler.
    #[must_use]
    pub fn with_shared_handler(mut self, handler: Arc<dyn PermissionHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Enable or disable session memory.
    #[must_use]
    pub const fn with_session_memory(mut self, enabled: bool) -> Self {
        self.enable_session_memory = enabled;
        self
    }

    /// Overlay an ambient guardrail onto this base configuration.
    ///
    /// Guardrail rules are evaluated before base rules; guardrail scalars
    /// win where set; `final_deny` accumulates from both layers. The
    /// handler always comes from the base.
    #[must_use]
    pub fn overlaid(&self, guardrail: &GuardrailConfiguration) -> Self {
        let concat = |inner: &[PermissionRule], outer: &[PermissionRule]| {
            inner.iter().chain(outer).cloned().collect::<Vec<_>>()
        };
        Self {
            allow: concat(&guardrail.allow, &self.allow),
            deny: concat(&guardrail.deny, &self.deny),
            final_deny: concat(&guardrail.final_deny, &self.final_deny),
            overrides: concat(&guardrail.overrides, &self.overrides),
            ask: concat(&guardrail.ask, &self.ask),
            default_action: guardrail.default_action.unwrap_or(self.default_action),
            handler: self.handler.clone(),
            enable_session_memory: guardrail
                .enable_session_memory
                .unwrap_or(self.enable_session_memory),
        }
    }
}

impl std::fmt::Debug for PermissionConfiguration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PermissionConfiguration")
            .field("allow", &self.allow.len())
            .field("deny", &self.deny.len())
            .field("final_deny", &self.final_deny.len())
            .field("default_action", &self.default_action)
            .field("has_handler", &self.handler.is_some())
            .field("enable_session_memory", &self.enable_session_memory)
            .finish()
    }
}

/// Handler decisions remembered for the life of a pipeline.
#[derive(Debug, Default)]
pub struct SessionMemory {
    always_allowed: HashSet<String>,
    blocked: HashSet<String>,
}

/// The memory key an invocation is remembered under.
///
/// Shell tools key on the command word, file tools on the directory of the
/// target path, everything else on the tool name alone.
#[must_use]
pub fn memory_key(ctx: &ToolContext) -> String {
    if is_shell_tool(&ctx.tool_name) {
        if let Some(word) = ctx
            .arguments
            .get("command")
            .and_then(Value::as_str)
            .and_then(|command| command.split_whitespace().next())
        {
            return format!("{}:{word}", ctx.tool_name);
        }
    } else if let Some(path) = ctx
        .arguments
        .get("file_path")
        .or_else(|| ctx.arguments.get("path"))
        .and_then(Value::as_str)
    {
        let directory = Path::new(path)
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .map_or_else(|| ".".to_string(), |parent| parent.display().to_string());
        return format!("{}:{directory}", ctx.tool_name);
    }
    ctx.tool_name.clone()
}

/// Middleware enforcing permission rules with session memory.
pub struct PermissionMiddleware {
    base: PermissionConfiguration,
    memory: Mutex<SessionMemory>,
}

impl PermissionMiddleware {
    /// Create a middleware evaluating `configuration`.
    #[must_use]
    pub fn new(configuration: PermissionConfiguration) -> Self {
        Self {
            base: configuration,
            memory: Mutex::new(SessionMemory::default()),
        }
    }

    fn lock_memory(&self) -> std::sync::MutexGuard<'_, SessionMemory> {
        self.memory.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn effective(&self) -> PermissionConfiguration {
        match current::<GuardrailKey>() {
            Some(guardrail) => self.base.overlaid(&guardrail),
            None => self.base.clone(),
        }
    }
}

#[async_trait]
impl ToolMiddleware for PermissionMiddleware {
    async fn handle(&self, ctx: ToolContext, next: Next<'_>) -> Result<Value> {
        let config = self.effective();
        let key = memory_key(&ctx);

        if config.enable_session_memory {
            let (already_allowed, already_blocked) = {
                let memory = self.lock_memory();
                (
                    memory.always_allowed.contains(&key),
                    memory.blocked.contains(&key),
                )
            };
            if already_allowed {
                return next.run(ctx).await;
            }
            if already_blocked {
                return Err(Error::permission_denied(
                    "Pattern blocked earlier in session",
                ));
            }
        }

        if let Some(rule) = config.final_deny.iter().find(|rule| rule.matches(&ctx)) {
            return Err(Error::PermissionDenied {
                reason: "Matched deny rule".into(),
                matched_rule: Some(rule.raw().to_string()),
            });
        }

        if config.allow.iter().any(|rule| rule.matches(&ctx)) {
            return next.run(ctx).await;
        }

        if let Some(rule) = config.deny.iter().find(|rule| rule.matches(&ctx))
            && !config.overrides.iter().any(|rule| rule.matches(&ctx))
        {
            return Err(Error::PermissionDenied {
                reason: "Matched deny rule".into(),
                matched_rule: Some(rule.raw().to_string()),
            });
        }

        let mut action = ctx.permission_mode.unwrap_or(config.default_action);
        if config.ask.iter().any(|rule| rule.matches(&ctx)) {
            action = DefaultAction::Ask;
        }

        match action {
            DefaultAction::Allow => next.run(ctx).await,
            DefaultAction::Deny => Err(Error::permission_denied("Denied by default action")),
            DefaultAction::Ask => {
                let Some(handler) = config.handler.clone() else {
                    return Err(Error::permission_denied(
                        "No permission handler configured and default is 'ask'",
                    ));
                };
                match handler.decide(&ctx).await {
                    PermissionDecision::AllowOnce => next.run(ctx).await,
                    PermissionDecision::AlwaysAllow => {
                        if config.enable_session_memory {
                            self.lock_memory().always_allowed.insert(key);
                        }
                        next.run(ctx).await
                    }
                    PermissionDecision::Deny => {
                        Err(Error::permission_denied("Denied by permission handler"))
                    }
                    PermissionDecision::DenyAndBlock => {
                        if config.enable_session_memory {
                            self.lock_memory().blocked.insert(key);
                        }
                        Err(Error::permission_denied(
                            "Denied and blocked by permission handler",
                        ))
                    }
                }
            }
        }
    }
}

impl std::fmt::Debug for PermissionMiddleware {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PermissionMiddleware")
            .field("base", &self.base)
            .finish_non_exhaustive()
    }
}

fn enabled() -> bool {
    true
}

const fn schema_version() -> u64 {
    1
}

/// The `permissions` section of a rule file.
// Fields are declared in alphabetical order so the encoder emits sorted
// keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionsSection {
    /// Allow rule patterns.
    #[serde(default)]
    pub allow: Vec<String>,
    /// What to do when no rule matches.
    #[serde(default)]
    pub default_action: DefaultAction,
    /// Deny rule patterns.
    #[serde(default)]
    pub deny: Vec<String>,
    /// Whether handler decisions are remembered.
    #[serde(default = "enabled")]
    pub enable_session_memory: bool,
}

impl Default for PermissionsSection {
    fn default() -> Self {
        Self {
            allow: Vec::new(),
            default_action: DefaultAction::default(),
            deny: Vec::new(),
            enable_session_memory: true,
        }
    }
}

/// The permission rule file format.
///
/// ```json
/// {
///   "permissions": {
///     "allow": ["Read", "Bash(git:*)", "WebFetch(domain:github.com)"],
///     "defaultAction": "ask",
///     "deny": ["Bash(rm -rf:*)", "Bash(sudo:*)"],
///     "enableSessionMemory": true
///   },
///   "version": 1
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PermissionsFile {
    /// The rules and policy settings.
    #[serde(default)]
    pub permissions: PermissionsSection,
    /// The schema version.
    #[serde(default = "schema_version")]
    pub version: u64,
}

impl Default for PermissionsFile {
    fn default() -> Self {
        Self {
            permissions: PermissionsSection::default(),
            version: schema_version(),
        }
    }
}

impl PermissionsFile {
    /// An empty file at the current schema version.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode from raw bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|error| {
            Error::invalid_configuration("permissions", format!("could not parse: {error}"))
        })
    }

    /// Load from a file on disk.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|error| {
            Error::invalid_configuration("permissions", format!("{}: {error}", path.display()))
        })?;
        Self::from_slice(&bytes)
    }

    /// Encode with sorted keys, preserving the schema version.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|error| {
            Error::invalid_configuration("permissions", format!("could not encode: {error}"))
        })
    }

    /// Merge another file into this one.
    ///
    /// Rule lists are concatenated with first-occurrence deduplication;
    /// `other` takes precedence for `defaultAction` and
    /// `enableSessionMemory`; the receiver's schema version is kept.
    #[must_use]
    pub fn merged(&self, other: &Self) -> Self {
        let dedup_concat = |first: &[String], second: &[String]| {
            let mut seen = HashSet::new();
            first
                .iter()
                .chain(second)
                .filter(|pattern| seen.insert((*pattern).clone()))
                .cloned()
                .collect::<Vec<_>>()
        };
        Self {
            permissions: PermissionsSection {
                allow: dedup_concat(&self.permissions.allow, &other.permissions.allow),
                default_action: other.permissions.default_action,
                deny: dedup_concat(&self.permissions.deny, &other.permissions.deny),
                enable_session_memory: other.permissions.enable_session_memory,
            },
            version: self.version,
        }
    }

    /// Parse the rule patterns into an evaluatable configuration.
    ///
    /// The handler is not part of the file format; attach one afterwards
    /// with [`PermissionConfiguration::with_handler`].
    pub fn into_configuration(self) -> Result<PermissionConfiguration> {
        Ok(PermissionConfiguration {
            allow: PermissionRule::parse_all(&self.permissions.allow)?,
            deny: PermissionRule::parse_all(&self.permissions.deny)?,
            final_deny: Vec::new(),
            overrides: Vec::new(),
            ask: Vec::new(),
            default_action: self.permissions.default_action,
            handler: None,
            enable_session_memory: self.permissions.enable_session_memory,
        })
    }
}
