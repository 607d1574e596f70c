//! Typed events on the generation event bus.

use chrono::{DateTime, Utc};
use serde::Serialize;

use skein_domain::retrieval::RetrieverResource;
use skein_domain::stream::LlmUsage;

/// Why a run was stopped before the model finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    UserManual,
    OutputModeration,
    AnnotationReply,
}

/// One observable unit of progress in a generation run.
///
/// Immutable once published. Exactly one terminal event reaches the
/// consumer per task; [`QueueEvent::is_terminal`] is the closed list of
/// what counts.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueueEvent {
    /// A raw model token chunk.
    LlmChunk { text: String },
    /// An agent answer fragment (CoT thought text shown to the user).
    AgentMessage { text: String },
    /// A reasoning step was persisted or updated; consumers re-fetch the
    /// record by id since it may have been filled further since.
    AgentThought { thought_id: String },
    /// A tool produced a persisted attachment.
    MessageFile { file_id: String },
    /// Source citations from a dataset retrieval.
    RetrieverResources { resources: Vec<RetrieverResource> },
    /// A stored annotation matched the query and overrides the answer.
    AnnotationReply {
        annotation_id: String,
        content: String,
    },
    /// Replace everything shown so far with this text.
    MessageReplace { text: String },
    /// Workflow run lifecycle.
    WorkflowStarted { workflow_run_id: String },
    WorkflowFinished {
        workflow_run_id: String,
        outputs: Option<serde_json::Value>,
        error: Option<String>,
    },
    NodeStarted {
        node_id: String,
        node_type: String,
        index: u32,
    },
    NodeFinished {
        node_id: String,
        outputs: Option<serde_json::Value>,
        error: Option<String>,
    },
    IterationStarted { node_id: String, index: u32 },
    IterationCompleted { node_id: String, index: u32 },
    /// Terminal: the run completed normally.
    MessageEnd { usage: Option<LlmUsage> },
    /// Terminal: the worker failed.
    Error { message: String },
    /// Terminal: the run was cut short.
    Stop { reason: StopReason },
    /// Keepalive for idle stretches.
    Ping,
}

impl QueueEvent {
    /// Whether consumers must stop listening after this event.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::MessageEnd { .. } | Self::Error { .. } | Self::Stop { .. }
        )
    }
}

/// An event plus its task envelope.
#[derive(Debug, Clone, Serialize)]
pub struct QueueMessage {
    pub task_id: String,
    pub published_at: DateTime<Utc>,
    #[serde(flatten)]
    pub event: QueueEvent,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_classification() {
        assert!(QueueEvent::MessageEnd { usage: None }.is_terminal());
        assert!(QueueEvent::Error {
            message: "x".into()
        }
        .is_terminal());
        assert!(QueueEvent::Stop {
            reason: StopReason::UserManual
        }
        .is_terminal());
        assert!(!QueueEvent::Ping.is_terminal());
        assert!(!QueueEvent::LlmChunk { text: "t".into() }.is_terminal());
    }

    #[test]
    fn events_serialize_with_type_tag() {
        let msg = QueueMessage {
            task_id: "task-1".into(),
            published_at: Utc::now(),
            event: QueueEvent::AgentThought {
                thought_id: "th-1".into(),
            },
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "agent_thought");
        assert_eq!(json["task_id"], "task-1");
    }
}
