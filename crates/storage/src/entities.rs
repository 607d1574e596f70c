//! Persisted record types.
//!
//! Everything here is written as full-row upserts to append-only JSONL
//! logs; replay on load keeps the last line per id. Records therefore
//! carry their own ids and never rely on file position.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use skein_domain::stream::LlmUsage;

/// One user turn and its final answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: String,
    pub conversation_id: String,
    pub query: String,
    #[serde(default)]
    pub answer: String,
    #[serde(default)]
    pub usage: Option<LlmUsage>,
    #[serde(default)]
    pub status: MessageStatus,
    #[serde(default)]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    #[default]
    Running,
    Normal,
    Stopped,
    Error,
}

impl MessageRecord {
    pub fn new(conversation_id: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            conversation_id: conversation_id.into(),
            query: query.into(),
            answer: String::new(),
            usage: None,
            status: MessageStatus::Running,
            error: None,
            created_at: Utc::now(),
        }
    }
}

/// One persisted reasoning step of an agent run.
///
/// Filled incrementally: the row is inserted when the step starts and
/// re-upserted as the tool call, observation, and answer fragment become
/// known. `position` is assigned at insert time and never renumbered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentThoughtRecord {
    pub id: String,
    pub message_id: String,
    /// 1-based, monotonically increasing per message.
    pub position: u32,
    #[serde(default)]
    pub thought: String,
    /// Tool name(s), semicolon-joined when one turn called several.
    #[serde(default)]
    pub tool_name: String,
    /// Tool input keyed by tool name.
    #[serde(default)]
    pub tool_input: Option<serde_json::Value>,
    /// Observation text keyed by tool name.
    #[serde(default)]
    pub observation: Option<serde_json::Value>,
    /// Invocation metadata keyed by tool name.
    #[serde(default)]
    pub tool_meta: Option<serde_json::Value>,
    #[serde(default)]
    pub answer: String,
    #[serde(default)]
    pub usage: Option<LlmUsage>,
    pub created_at: DateTime<Utc>,
}

impl AgentThoughtRecord {
    pub fn new(message_id: impl Into<String>, position: u32) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            message_id: message_id.into(),
            position,
            thought: String::new(),
            tool_name: String::new(),
            tool_input: None,
            observation: None,
            tool_meta: None,
            answer: String::new(),
            usage: None,
            created_at: Utc::now(),
        }
    }
}

/// The per-conversation variable pool tools may write and later read.
/// Overwritten wholesale at the end of each run, never diffed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationVariablesRecord {
    pub conversation_id: String,
    pub variables: serde_json::Value,
    pub updated_at: DateTime<Utc>,
}

/// A binary attachment extracted from a tool response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageFileRecord {
    pub id: String,
    pub message_id: String,
    /// image / video / audio / text / pdf / archive / bin.
    pub file_type: String,
    pub mime_type: String,
    /// A URL for link-backed files, or a storage key for uploaded blobs.
    pub url: String,
    /// Variable name the tool asked to save this file under, if any.
    #[serde(default)]
    pub save_as: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl MessageFileRecord {
    pub fn new(
        message_id: impl Into<String>,
        file_type: impl Into<String>,
        mime_type: impl Into<String>,
        url: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            message_id: message_id.into(),
            file_type: file_type.into(),
            mime_type: mime_type.into(),
            url: url.into(),
            save_as: None,
            created_at: Utc::now(),
        }
    }
}
