//! The stream wire format.
//!
//! One JSON object per line, each tagged with `event` and carrying the
//! task id. This is what the REST layer forwards verbatim; nothing in
//! here leaks internal types.

use serde::Serialize;
use serde_json::Value;

use skein_domain::Result;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum StreamResponse {
    /// A raw answer delta.
    Message {
        task_id: String,
        message_id: String,
        answer: String,
    },
    /// An agent answer delta (CoT thought text).
    AgentMessage {
        task_id: String,
        message_id: String,
        answer: String,
    },
    /// A reasoning step, re-fetched fresh at translation time.
    AgentThought {
        task_id: String,
        message_id: String,
        id: String,
        position: u32,
        thought: String,
        tool: String,
        tool_input: Value,
        observation: Value,
    },
    MessageFile {
        task_id: String,
        id: String,
        #[serde(rename = "type")]
        file_type: String,
        url: String,
    },
    /// Replace everything shown so far.
    MessageReplace {
        task_id: String,
        message_id: String,
        answer: String,
    },
    /// Terminal: the run finished; `metadata` carries usage and citations.
    MessageEnd {
        task_id: String,
        id: String,
        metadata: Value,
    },
    /// Terminal: the run failed.
    Error { task_id: String, message: String },
    Ping { task_id: String },
}

impl StreamResponse {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::MessageEnd { .. } | Self::Error { .. })
    }

    /// One newline-delimited JSON line, ready to write to the wire.
    pub fn to_ndjson_line(&self) -> Result<String> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}
