//! Guardrails — scoped overlays of permission and sandbox policy.
//!
//! A [`Guardrail`] is a declarative set of rules built with a fluent
//! builder. A [`GuardedStep`] wraps another step; at runtime it merges its
//! own configuration with the currently ambient one (inner overrides
//! outer) and runs the inner step inside a [`GuardrailKey`] scope. Tool
//! middleware reads that scoped value to derive the effective permission
//! and sandbox configuration per call.
//!
//! Layering laws:
//!
//! - `final_deny` rules accumulate across layers, always apply, and cannot
//!   be relaxed by an inner `override_rule`;
//! - regular rule lists concatenate inner-first, so inner rules are
//!   consulted before outer ones;
//! - scalar settings take the innermost set value.
//!
//! # Example
//!
//! ```rust,ignore
//! let guard = Guardrail::new()
//!     .allow("Bash(git:*)")
//!     .final_deny("Bash(rm -rf:*)")
//!     .sandbox(SandboxConfiguration::locked_down())
//!     .build()?;
//!
//! let step = GuardedStep::new(guard, body);
//! ```

use crate::context::{ContextKey, current, with_value};
use crate::error::Result;
use crate::step::Step;
use crate::tool::pattern::PermissionRule;
use crate::tool::permission::DefaultAction;
use crate::tool::sandbox::SandboxConfiguration;

/// One declarative guardrail rule.
#[derive(Debug, Clone, PartialEq)]
pub enum GuardrailRule {
    /// Let matching invocations proceed.
    Allow(String),
    /// Refuse matching invocations (overridable by inner layers).
    Deny(String),
    /// Refuse matching invocations, not overridable.
    FinalDeny(String),
    /// Exempt matching invocations from regular deny rules.
    Override(String),
    /// Force the permission handler for matching invocations.
    AskUser(String),
    /// Set the sandbox policy for command tools in scope.
    Sandbox(SandboxConfiguration),
    /// Set the default action in scope.
    DefaultAction(DefaultAction),
}

/// A scoped overlay of permission and sandbox policy.
#[derive(Debug, Clone, Default)]
pub struct GuardrailConfiguration {
    /// Rules that let an invocation proceed.
    pub allow: Vec<PermissionRule>,
    /// Rules that refuse an invocation.
    pub deny: Vec<PermissionRule>,
    /// Deny rules that always apply and cannot be overridden.
    pub final_deny: Vec<PermissionRule>,
    /// Rules exempting an invocation from regular deny rules.
    pub overrides: Vec<PermissionRule>,
    /// Rules that force the handler to be consulted.
    pub ask: Vec<PermissionRule>,
    /// Default action override; `None` defers to the outer layer or base.
    pub default_action: Option<DefaultAction>,
    /// Session memory override; `None` defers to the outer layer or base.
    pub enable_session_memory: Option<bool>,
    /// Sandbox override; `None` defers to the outer layer or base.
    pub sandbox: Option<SandboxConfiguration>,
}

impl GuardrailConfiguration {
    /// Merge an inner (deeper) layer onto an outer one.
    ///
    /// Inner rules come first; inner scalars win where set; `final_deny`
    /// accumulates from both layers.
    #[must_use]
    pub fn layered(outer: &Self, inner: &Self) -> Self {
        let concat = |first: &[PermissionRule], second: &[PermissionRule]| {
            first.iter().chain(second).cloned().collect::<Vec<_>>()
        };
        Self {
            allow: concat(&inner.allow, &outer.allow),
            deny: concat(&inner.deny, &outer.deny),
            final_deny: concat(&inner.final_deny, &outer.final_deny),
            overrides: concat(&inner.overrides, &outer.overrides),
            ask: concat(&inner.ask, &outer.ask),
            default_action: inner.default_action.or(outer.default_action),
            enable_session_memory: inner.enable_session_memory.or(outer.enable_session_memory),
            sandbox: inner.sandbox.or(outer.sandbox),
        }
    }
}

/// Ambient access to the effective guardrail.
///
/// `None` means no guardrail is in scope.
#[derive(Debug, Clone, Copy)]
pub struct GuardrailKey;

impl ContextKey for GuardrailKey {
    type Value = Option<GuardrailConfiguration>;

    fn default_value() -> Option<GuardrailConfiguration> {
        None
    }
}

/// Fluent builder of a [`GuardrailConfiguration`].
#[derive(Debug, Clone, Default)]
pub struct Guardrail {
    rules: Vec<GuardrailRule>,
}

impl Guardrail {
    /// Start an empty guardrail.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an allow rule.
    #[must_use]
    pub fn allow(mut self, pattern: impl Into<String>) -> Self {
        self.rules.push(GuardrailRule::Allow(pattern.into()));
        self
    }

    /// Add a deny rule.
    #[must_use]
    pub fn deny(mut self, pattern: impl Into<String>) -> Self {
        self.rules.push(GuardrailRule::Deny(pattern.into()));
        self
    }

    /// Add a deny rule that inner layers cannot override.
    #[must_use]
    pub fn final_deny(mut self, pattern: impl Into<String>) -> Self {
        self.rules.push(GuardrailRule::FinalDeny(pattern.into()));
        self
    }

    /// Add an override rule exempting matches from regular deny rules.
    #[must_use]
    pub fn override_rule(mut self, pattern: impl Into<String>) -> Self {
        self.rules.push(GuardrailRule::Override(pattern.into()));
        self
    }

    /// Add a rule forcing the permission handler for matches.
    #[must_use]
    pub fn ask_user(mut self, pattern: impl Into<String>) -> Self {
        self.rules.push(GuardrailRule::AskUser(pattern.into()));
        self
    }

    /// Set the sandbox policy for command tools in scope.
    #[must_use]
    pub fn sandbox(mut self, configuration: SandboxConfiguration) -> Self {
        self.rules.push(GuardrailRule::Sandbox(configuration));
        self
    }

    /// Set the default action in scope.
    #[must_use]
    pub fn default_action(mut self, action: DefaultAction) -> Self {
        self.rules.push(GuardrailRule::DefaultAction(action));
        self
    }

    /// Parse the declared rules into a configuration.
    pub fn build(self) -> Result<GuardrailConfiguration> {
        let mut configuration = GuardrailConfiguration::default();
        for rule in self.rules {
            match rule {
                GuardrailRule::Allow(pattern) => {
                    configuration.allow.push(PermissionRule::parse(&pattern)?);
                }
                GuardrailRule::Deny(pattern) => {
                    configuration.deny.push(PermissionRule::parse(&pattern)?);
                }
                GuardrailRule::FinalDeny(pattern) => {
                    configuration
                        .final_deny
                        .push(PermissionRule::parse(&pattern)?);
                }
                GuardrailRule::Override(pattern) => {
                    configuration
                        .overrides
                        .push(PermissionRule::parse(&pattern)?);
                }
                GuardrailRule::AskUser(pattern) => {
                    configuration.ask.push(PermissionRule::parse(&pattern)?);
                }
                GuardrailRule::Sandbox(sandbox) => configuration.sandbox = Some(sandbox),
                GuardrailRule::DefaultAction(action) => {
                    configuration.default_action = Some(action);
                }
            }
        }
        Ok(configuration)
    }
}

/// A step running inside a guardrail scope.
///
/// On each run the step's configuration is merged with the currently
/// ambient one (this step being the inner layer) and bound under
/// [`GuardrailKey`] for the dynamic extent of the inner step.
#[derive(Debug, Clone)]
pub struct GuardedStep<S> {
    configuration: GuardrailConfiguration,
    inner: S,
}

impl<S: Step> GuardedStep<S> {
    /// Guard `inner` with `configuration`.
    #[must_use]
    pub const fn new(configuration: GuardrailConfiguration, inner: S) -> Self {
        Self {
            configuration,
            inner,
        }
    }
}

impl<S: Step> Step for GuardedStep<S> {
    type Input = S::Input;
    type Output = S::Output;

    async fn run(&self, input: S::Input) -> Result<S::Output> {
        let merged = match current::<GuardrailKey>() {
            Some(outer) => GuardrailConfiguration::layered(&outer, &self.configuration),
            None => self.configuration.clone(),
        };
        with_value::<GuardrailKey, _>(Some(merged), self.inner.run(input)).await
    }
}
