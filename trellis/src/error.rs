//! Error types for the trellis engine.
//!
//! A single sum type covers every failure kind the engine surfaces. Errors
//! propagate through the step tree untransformed unless a step deliberately
//! translates them (`MapErrorStep`) or replaces them (`TimeoutStep`).

use std::time::Duration;

/// A type alias for `Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for step, session, and tool operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The task was cooperatively cancelled.
    #[error("operation was cancelled")]
    Cancelled,

    /// A timeout wrapper elapsed before the inner operation completed.
    #[error("operation timed out after {elapsed:?}")]
    Timeout {
        /// How long the operation was allowed to run.
        elapsed: Duration,
    },

    /// A gate refused to pass its input.
    #[error("blocked: {reason}")]
    Blocked {
        /// Why the gate blocked the value.
        reason: String,
    },

    /// A bounded loop exhausted its iterations without the termination
    /// condition firing.
    #[error("loop condition not met after {iterations} iterations")]
    ConditionNotMet {
        /// Number of iterations that ran.
        iterations: usize,
    },

    /// A race finished with no successful child.
    #[error("no step produced a successful result")]
    NoSuccessfulResults,

    /// Every child of a parallel composition failed.
    #[error("all {} steps failed", .errors.len())]
    AllStepsFailed {
        /// The child errors, in completion order.
        errors: Vec<Error>,
    },

    /// A parallel composition was given no children.
    #[error("no steps to run")]
    NoResults,

    /// A tool invocation was refused by permission policy.
    #[error("permission denied: {reason}")]
    PermissionDenied {
        /// Why the invocation was refused.
        reason: String,
        /// The rule pattern that matched, when known.
        matched_rule: Option<String>,
    },

    /// A non-queuing session call found a turn already in flight.
    #[error("session is busy processing another turn")]
    SessionBusy,

    /// No stored session exists under the requested id.
    #[error("session '{id}' not found")]
    SessionNotFound {
        /// The requested session id.
        id: String,
    },

    /// A session snapshot could not be loaded from the store.
    #[error("failed to load session '{id}': {message}")]
    SessionLoadFailed {
        /// The requested session id.
        id: String,
        /// The underlying store error.
        message: String,
    },

    /// A session snapshot could not be written to the store.
    #[error("failed to save session '{id}': {message}")]
    SessionSaveFailed {
        /// The session id being saved.
        id: String,
        /// The underlying store error.
        message: String,
    },

    /// A configuration value failed validation.
    #[error("invalid configuration for '{field}': {reason}")]
    InvalidConfiguration {
        /// The offending field.
        field: String,
        /// Why the value was rejected.
        reason: String,
    },

    /// The language-model collaborator failed to generate a response.
    #[error("generation failed: {reason}")]
    GenerationFailed {
        /// The collaborator's failure description.
        reason: String,
    },

    /// The language-model collaborator produced undecodable output.
    #[error("decoding failed: {reason}")]
    DecodingFailed {
        /// The collaborator's failure description.
        reason: String,
    },

    /// The transport's input side is exhausted.
    #[error("transport input closed")]
    InputClosed,

    /// A tool body failed.
    #[error("tool '{tool_name}' failed: {message}")]
    ToolExecution {
        /// Name of the tool that failed.
        tool_name: String,
        /// The underlying error message.
        message: String,
    },
}

impl Error {
    /// Create a new blocked error.
    #[must_use]
    pub fn blocked(reason: impl Into<String>) -> Self {
        Self::Blocked {
            reason: reason.into(),
        }
    }

    /// Create a new permission-denied error with no matched rule.
    #[must_use]
    pub fn permission_denied(reason: impl Into<String>) -> Self {
        Self::PermissionDenied {
            reason: reason.into(),
            matched_rule: None,
        }
    }

    /// Create a new invalid-configuration error.
    #[must_use]
    pub fn invalid_configuration(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create a new generation-failed error.
    #[must_use]
    pub fn generation_failed(reason: impl Into<String>) -> Self {
        Self::GenerationFailed {
            reason: reason.into(),
        }
    }

    /// Create a new tool-execution error.
    #[must_use]
    pub fn tool_execution(tool_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ToolExecution {
            tool_name: tool_name.into(),
            message: message.into(),
        }
    }

    /// Returns `true` for the cancellation kind.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Returns `true` for the timeout kind.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::DecodingFailed {
            reason: err.to_string(),
        }
    }
}
