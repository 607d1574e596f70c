//! Replaying persisted reasoning steps as prompt history.
//!
//! Prior turns of an agent conversation are stored as thought records,
//! not prompt messages. Before each run they are rebuilt into the
//! (assistant-with-tool-calls, tool-result) pair sequence a stateless
//! model call expects, so the model sees the full tool timeline of the
//! conversation.

use serde_json::Value;

use skein_domain::{PromptMessage, ToolCall};
use skein_storage::AgentThoughtRecord;

/// Rebuild prompt history from persisted thoughts, in record order.
///
/// A thought that called tools becomes an assistant message carrying the
/// tool-use parts followed by one tool-result message per call; a
/// thought without tools becomes a plain assistant message (its answer
/// fragment, falling back to the raw thought text).
pub fn organize_agent_history(thoughts: &[AgentThoughtRecord]) -> Vec<PromptMessage> {
    let mut messages = Vec::new();

    for thought in thoughts {
        if thought.tool_name.is_empty() {
            let text = if thought.answer.is_empty() {
                thought.thought.clone()
            } else {
                thought.answer.clone()
            };
            if !text.is_empty() {
                messages.push(PromptMessage::assistant(text));
            }
            continue;
        }

        let names: Vec<&str> = thought
            .tool_name
            .split(';')
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .collect();

        let calls: Vec<ToolCall> = names
            .iter()
            .enumerate()
            .map(|(i, name)| ToolCall {
                call_id: format!("{}:{}", thought.id, i),
                tool_name: (*name).to_owned(),
                arguments: keyed_value(thought.tool_input.as_ref(), name),
            })
            .collect();

        messages.push(PromptMessage::assistant_with_tool_calls(
            &thought.thought,
            &calls,
        ));

        for (call, name) in calls.iter().zip(&names) {
            let observation = keyed_text(thought.observation.as_ref(), name);
            messages.push(PromptMessage::tool_result(call.call_id.clone(), observation));
        }
    }

    messages
}

/// Pull the entry for one tool out of a name-keyed JSON object. Records
/// written before multi-call support stored the bare value.
fn keyed_value(value: Option<&Value>, name: &str) -> Value {
    match value {
        Some(Value::Object(map)) => map.get(name).cloned().unwrap_or(Value::Null),
        Some(other) => other.clone(),
        None => Value::Null,
    }
}

fn keyed_text(value: Option<&Value>, name: &str) -> String {
    match keyed_value(value, name) {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
