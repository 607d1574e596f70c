//! Per-run accumulation state.
//!
//! Owned exclusively by one pipeline instance and mutated only by its
//! consumer loop; never shared after construction.

use serde::Serialize;
use serde_json::Value;

use skein_domain::retrieval::RetrieverResource;
use skein_domain::stream::LlmUsage;

/// Metadata attached to the end-of-stream response and the persisted
/// message.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TaskMetadata {
    pub usage: LlmUsage,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub retriever_resources: Vec<RetrieverResource>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub annotation_reply_id: Option<String>,
}

/// Accumulates one chat generation as queue events are drained.
#[derive(Default)]
pub struct ChatTaskState {
    pub answer: String,
    pub retriever_resources: Vec<RetrieverResource>,
    pub annotation_reply_id: Option<String>,
}

impl ChatTaskState {
    pub fn metadata(&self, usage: LlmUsage) -> Value {
        let metadata = TaskMetadata {
            usage,
            retriever_resources: self.retriever_resources.clone(),
            annotation_reply_id: self.annotation_reply_id.clone(),
        };
        serde_json::to_value(&metadata).unwrap_or(Value::Null)
    }
}

/// Accumulation state for a workflow run.
///
/// The workflow pipeline itself is not wired up here; this keeps the
/// graph-execution bookkeeping representable so workflow events on the
/// queue have somewhere to land.
#[derive(Debug, Clone, Default)]
pub struct WorkflowTaskState {
    pub total_tokens: u64,
    pub total_steps: u32,
    pub node_runs: Vec<NodeRun>,
    /// Which node's output chunks are currently forwarded to the user.
    pub stream_route_node_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NodeRun {
    pub node_id: String,
    pub node_type: String,
    pub outputs: Option<Value>,
    pub error: Option<String>,
}

impl WorkflowTaskState {
    pub fn node_started(&mut self, node_id: &str, node_type: &str) {
        self.total_steps += 1;
        self.node_runs.push(NodeRun {
            node_id: node_id.to_owned(),
            node_type: node_type.to_owned(),
            outputs: None,
            error: None,
        });
    }

    pub fn node_finished(&mut self, node_id: &str, outputs: Option<Value>, error: Option<String>) {
        if let Some(run) = self
            .node_runs
            .iter_mut()
            .rev()
            .find(|r| r.node_id == node_id)
        {
            run.outputs = outputs;
            run.error = error;
        }
    }
}
