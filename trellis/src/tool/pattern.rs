//! Permission rule patterns and matching.
//!
//! A rule's pattern is `"Tool"` or `"Tool(argument-pattern)"`. The tool
//! part matches the context's tool name exactly, except that a trailing `*`
//! makes it a prefix match (covering the `mcp__*` and `mcp__server__*`
//! conventions). The argument part is matched against the invocation's
//! argument text, normalized per tool family:
//!
//! - shell tools (`Bash`, `ExecuteCommand`): the `command` field;
//! - file tools: the `file_path` or `path` field;
//! - fetcher tools: the `url` field;
//! - otherwise: a single string argument, or the compact JSON encoding.
//!
//! Matching is case-sensitive. Deny rules should use `prefix:*` matching to
//! prevent syntactic bypasses (`Bash(rm -rf:*)` rather than an exact
//! command string).

use serde_json::Value;

use crate::error::{Error, Result};
use crate::tool::ToolContext;

/// Tool names treated as shell command executors.
pub(crate) const SHELL_TOOLS: &[&str] = &["Bash", "ExecuteCommand"];

pub(crate) fn is_shell_tool(name: &str) -> bool {
    SHELL_TOOLS.contains(&name)
}

/// The argument half of a rule pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgumentPattern {
    /// `*` — matches any argument.
    Any,
    /// `prefix:*` — the argument text starts with the prefix.
    Prefix(String),
    /// `domain:HOST` — the argument is a URL on the given host.
    Domain(String),
    /// A plain string — exact match on the argument text.
    Exact(String),
}

impl ArgumentPattern {
    fn parse(text: &str) -> Self {
        if text == "*" {
            return Self::Any;
        }
        if let Some(prefix) = text.strip_suffix(":*") {
            return Self::Prefix(prefix.to_string());
        }
        if let Some(host) = text.strip_prefix("domain:") {
            return Self::Domain(host.to_string());
        }
        Self::Exact(text.to_string())
    }

    fn matches(&self, argument: Option<&str>) -> bool {
        match self {
            Self::Any => true,
            Self::Prefix(prefix) => argument.is_some_and(|text| text.starts_with(prefix)),
            Self::Domain(host) => argument
                .and_then(|text| url::Url::parse(text).ok())
                .and_then(|parsed| parsed.host_str().map(str::to_string))
                .is_some_and(|actual| actual == *host),
            Self::Exact(expected) => argument == Some(expected.as_str()),
        }
    }
}

/// A parsed permission rule pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionRule {
    raw: String,
    tool: String,
    argument: Option<ArgumentPattern>,
}

impl PermissionRule {
    /// Parse `"Tool"` or `"Tool(argument-pattern)"`.
    pub fn parse(pattern: &str) -> Result<Self> {
        let pattern = pattern.trim();
        if pattern.is_empty() {
            return Err(Error::invalid_configuration(
                "pattern",
                "a rule pattern cannot be empty",
            ));
        }

        let (tool, argument) = match pattern.split_once('(') {
            None => (pattern.to_string(), None),
            Some((tool, rest)) => {
                let Some(argument) = rest.strip_suffix(')') else {
                    return Err(Error::invalid_configuration(
                        pattern.to_string(),
                        "unterminated argument pattern",
                    ));
                };
                (tool.to_string(), Some(ArgumentPattern::parse(argument)))
            }
        };

        if tool.is_empty() {
            return Err(Error::invalid_configuration(
                pattern.to_string(),
                "a rule pattern needs a tool name",
            ));
        }

        Ok(Self {
            raw: pattern.to_string(),
            tool,
            argument,
        })
    }

    /// Parse a list of patterns, failing on the first invalid one.
    pub fn parse_all(patterns: &[String]) -> Result<Vec<Self>> {
        patterns.iter().map(|p| Self::parse(p)).collect()
    }

    /// The pattern as written.
    #[must_use]
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Whether this rule matches the invocation.
    #[must_use]
    pub fn matches(&self, ctx: &ToolContext) -> bool {
        if !self.tool_matches(&ctx.tool_name) {
            return false;
        }
        match &self.argument {
            None => true,
            Some(pattern) => pattern.matches(argument_text(ctx).as_deref()),
        }
    }

    fn tool_matches(&self, name: &str) -> bool {
        match self.tool.strip_suffix('*') {
            Some(prefix) => name.starts_with(prefix),
            None => self.tool == name,
        }
    }
}

impl std::fmt::Display for PermissionRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}

/// The argument text a rule pattern is matched against.
pub(crate) fn argument_text(ctx: &ToolContext) -> Option<String> {
    let field = if is_shell_tool(&ctx.tool_name) {
        ctx.arguments.get("command")
    } else {
        ctx.arguments
            .get("file_path")
            .or_else(|| ctx.arguments.get("path"))
            .or_else(|| ctx.arguments.get("url"))
    };
    if let Some(text) = field.and_then(Value::as_str) {
        return Some(text.to_string());
    }
    match &ctx.arguments {
        Value::String(text) => Some(text.clone()),
        Value::Null => None,
        other => serde_json::to_string(other).ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn shell_ctx(command: &str) -> ToolContext {
        ToolContext::new("Bash", json!({ "command": command }))
    }

    #[test]
    fn bare_tool_pattern_matches_any_arguments() {
        let rule = PermissionRule::parse("Read").expect("parse");
        assert!(rule.matches(&ToolContext::new("Read", json!({ "file_path": "/tmp/x" }))));
        assert!(!rule.matches(&ToolContext::new("Write", json!({}))));
    }

    #[test]
    fn matching_is_case_sensitive() {
        let rule = PermissionRule::parse("Read").expect("parse");
        assert!(!rule.matches(&ToolContext::new("read", json!({}))));
    }

    #[test]
    fn prefix_pattern_matches_command_prefixes() {
        let rule = PermissionRule::parse("Bash(git:*)").expect("parse");
        assert!(rule.matches(&shell_ctx("git status")));
        assert!(rule.matches(&shell_ctx("git push origin")));
        assert!(!rule.matches(&shell_ctx("rm -rf /")));

        let dangerous = PermissionRule::parse("Bash(rm -rf:*)").expect("parse");
        assert!(dangerous.matches(&shell_ctx("rm -rf /")));
        assert!(!dangerous.matches(&shell_ctx("rm file.txt")));
    }

    #[test]
    fn wildcard_pattern_matches_anything() {
        let rule = PermissionRule::parse("Bash(*)").expect("parse");
        assert!(rule.matches(&shell_ctx("anything at all")));
    }

    #[test]
    fn domain_pattern_matches_url_hosts() {
        let rule = PermissionRule::parse("WebFetch(domain:github.com)").expect("parse");
        let hit = ToolContext::new("WebFetch", json!({ "url": "https://github.com/a/b" }));
        let miss = ToolContext::new("WebFetch", json!({ "url": "https://evil.example" }));
        assert!(rule.matches(&hit));
        assert!(!rule.matches(&miss));
    }

    #[test]
    fn mcp_prefix_patterns() {
        let any_mcp = PermissionRule::parse("mcp__*").expect("parse");
        let one_server = PermissionRule::parse("mcp__files__*").expect("parse");

        let ctx = ToolContext::new("mcp__files__read", json!({}));
        assert!(any_mcp.matches(&ctx));
        assert!(one_server.matches(&ctx));
        assert!(!one_server.matches(&ToolContext::new("mcp__web__fetch", json!({}))));
    }

    #[test]
    fn exact_argument_pattern() {
        let rule = PermissionRule::parse("Bash(git status)").expect("parse");
        assert!(rule.matches(&shell_ctx("git status")));
        assert!(!rule.matches(&shell_ctx("git status --short")));
    }

    #[test]
    fn file_tools_match_on_paths() {
        let rule = PermissionRule::parse("Edit(/home/user:*)").expect("parse");
        assert!(rule.matches(&ToolContext::new(
            "Edit",
            json!({ "file_path": "/home/user/notes.txt" })
        )));
        assert!(!rule.matches(&ToolContext::new(
            "Edit",
            json!({ "file_path": "/etc/passwd" })
        )));
    }

    #[test]
    fn malformed_patterns_are_rejected() {
        assert!(PermissionRule::parse("").is_err());
        assert!(PermissionRule::parse("Bash(git:*").is_err());
        assert!(PermissionRule::parse("(orphan)").is_err());
    }
}
