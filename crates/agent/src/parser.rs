//! Streaming parser for chain-of-thought model output.
//!
//! CoT models interleave free text with `Action:` blocks carrying a
//! JSON object (often fenced). The parser consumes the stream
//! incrementally: plain text is released as soon as it cannot be the
//! start of an `Action:` marker, and an action is emitted once its JSON
//! object closes. Malformed action blocks fall back to plain text so
//! nothing the model said is lost.

use serde_json::Value;

use crate::scratchpad::AgentAction;

const ACTION_MARKER: &str = "Action:";

/// One parsed piece of model output.
#[derive(Debug, Clone)]
pub enum CotChunk {
    Text(String),
    Action(AgentAction),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Text,
    Action,
    /// Just consumed an action's JSON; an optional closing fence may
    /// still arrive and should be swallowed.
    FenceTail,
}

pub struct CotOutputParser {
    buffer: String,
    state: State,
}

impl CotOutputParser {
    pub fn new() -> Self {
        Self {
            buffer: String::new(),
            state: State::Text,
        }
    }

    /// Feed one stream delta, getting back whatever became complete.
    pub fn feed(&mut self, delta: &str) -> Vec<CotChunk> {
        self.buffer.push_str(delta);
        self.drain(false)
    }

    /// Flush at end of stream. Incomplete action blocks degrade to text.
    pub fn finish(&mut self) -> Vec<CotChunk> {
        let mut chunks = self.drain(true);
        if !self.buffer.is_empty() {
            let rest = std::mem::take(&mut self.buffer);
            match self.state {
                State::Text => chunks.push(CotChunk::Text(rest)),
                // A dangling "Action:" block that never produced valid
                // JSON is still something the model said.
                State::Action => chunks.push(CotChunk::Text(format!("{ACTION_MARKER}{rest}"))),
                State::FenceTail => {}
            }
        }
        self.state = State::Text;
        chunks
    }

    fn drain(&mut self, at_end: bool) -> Vec<CotChunk> {
        let mut chunks = Vec::new();
        loop {
            match self.state {
                State::Text => {
                    if let Some(idx) = self.buffer.find(ACTION_MARKER) {
                        if idx > 0 {
                            chunks.push(CotChunk::Text(self.buffer[..idx].to_owned()));
                        }
                        self.buffer.drain(..idx + ACTION_MARKER.len());
                        self.state = State::Action;
                        continue;
                    }
                    // Release everything that cannot be a marker prefix.
                    let hold = if at_end { 0 } else { marker_tail_len(&self.buffer) };
                    let release = self.buffer.len() - hold;
                    if release > 0 {
                        let text: String = self.buffer.drain(..release).collect();
                        chunks.push(CotChunk::Text(text));
                    }
                    break;
                }
                State::Action => {
                    let Some(start) = self.buffer.find('{') else {
                        break;
                    };
                    let Some(end) = matching_brace(&self.buffer[start..]) else {
                        break;
                    };
                    let raw = &self.buffer[start..start + end + 1];
                    let chunk = parse_action(raw);
                    self.buffer.drain(..start + end + 1);
                    chunks.push(chunk);
                    self.state = State::FenceTail;
                }
                State::FenceTail => {
                    let trimmed = self.buffer.trim_start();
                    let skipped = self.buffer.len() - trimmed.len();
                    if trimmed.starts_with("```") {
                        self.buffer.drain(..skipped + 3);
                        self.state = State::Text;
                    } else if !at_end && "```".starts_with(trimmed) {
                        // Could still become a fence; wait for more.
                        break;
                    } else {
                        self.buffer.drain(..skipped);
                        self.state = State::Text;
                    }
                }
            }
        }
        chunks
    }
}

impl Default for CotOutputParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Length of the longest buffer suffix that is a proper prefix of the
/// action marker.
fn marker_tail_len(buffer: &str) -> usize {
    for len in (1..ACTION_MARKER.len()).rev() {
        if buffer.ends_with(&ACTION_MARKER[..len]) {
            return len;
        }
    }
    0
}

/// Byte offset of the brace closing the object that starts at byte 0,
/// string-literal aware. `None` while the object is still open.
fn matching_brace(s: &str) -> Option<usize> {
    let mut depth = 0u32;
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in s.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

/// `{"action": ..., "action_input": ...}`, or the raw text when the
/// object does not have that shape.
fn parse_action(raw: &str) -> CotChunk {
    let parsed: Option<AgentAction> = serde_json::from_str::<Value>(raw).ok().and_then(|v| {
        let name = v.get("action")?.as_str()?.to_owned();
        let input = v.get("action_input").cloned().unwrap_or(Value::Null);
        Some(AgentAction {
            action_name: name,
            action_input: input,
        })
    });
    match parsed {
        Some(action) => CotChunk::Action(action),
        None => CotChunk::Text(raw.to_owned()),
    }
}
