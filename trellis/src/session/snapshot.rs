//! Serializable session snapshots.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::session::Transcript;

/// An immutable capture of a session's transcript and metadata.
///
/// Serialized with camelCase keys and ISO-8601 dates, e.g.
///
/// ```json
/// {
///   "id": "6f9d…",
///   "transcript": [{ "type": "prompt", "content": "hello" }],
///   "createdAt": "2026-08-01T12:00:00Z",
///   "updatedAt": "2026-08-01T12:00:07Z",
///   "metadata": { "label": "nightly" },
///   "parentSessionId": "4c21…"
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    /// The session id.
    pub id: String,
    /// The transcript at capture time.
    pub transcript: Transcript,
    /// When the session was created.
    pub created_at: DateTime<Utc>,
    /// When the session last changed.
    pub updated_at: DateTime<Utc>,
    /// Free-form metadata.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
    /// The session this one was forked from, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_session_id: Option<String>,
}
