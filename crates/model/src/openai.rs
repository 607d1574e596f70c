//! OpenAI-compatible adapter.
//!
//! Works with OpenAI, Azure OpenAI, Ollama, vLLM, LM Studio, Together,
//! and any other endpoint following the OpenAI chat completions contract.
//! Rerank uses the Jina/Cohere-style `/rerank` endpoint many compatible
//! gateways expose alongside it.

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;

use skein_domain::stream::{BoxStream, LlmResult, LlmStreamEvent, LlmUsage};
use skein_domain::tool::ToolDefinition;
use skein_domain::{ContentPart, MessageContent, PromptMessage, PromptRole, ToolCall};

use crate::backend::{ChatRequest, LlmBackend, RerankedDocument};
use crate::error::InvokeError;
use crate::sse::sse_response_stream;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Adapter struct
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A backend bound to one credential set of an OpenAI-compatible endpoint.
pub struct OpenAiCompatBackend {
    id: String,
    base_url: String,
    api_key: String,
    model: String,
    client: reqwest::Client,
}

impl OpenAiCompatBackend {
    pub fn new(
        id: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        let base_url = base_url.into();
        Self {
            id: id.into(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
            client: reqwest::Client::new(),
        }
    }

    fn authed_post(&self, url: &str) -> reqwest::RequestBuilder {
        self.client
            .post(url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
    }

    fn build_chat_body(&self, req: &ChatRequest, stream: bool) -> Value {
        let messages: Vec<Value> = req.messages.iter().map(msg_to_openai).collect();

        let mut body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "stream": stream,
        });

        if !req.tools.is_empty() {
            let tools: Vec<Value> = req.tools.iter().map(tool_to_openai).collect();
            body["tools"] = Value::Array(tools);
        }
        if !req.stop.is_empty() {
            body["stop"] = serde_json::json!(req.stop);
        }
        if let Some(temp) = req.temperature {
            body["temperature"] = serde_json::json!(temp);
        }
        if let Some(max) = req.max_tokens {
            body["max_tokens"] = serde_json::json!(max);
        }
        if let Some(user) = &req.user {
            body["user"] = Value::String(user.clone());
        }
        if stream {
            body["stream_options"] = serde_json::json!({"include_usage": true});
        }
        body
    }

    /// POST, check the status, and return the parsed JSON body.
    async fn post_json(&self, url: &str, body: &Value) -> Result<Value, InvokeError> {
        let resp = self
            .authed_post(url)
            .json(body)
            .send()
            .await
            .map_err(from_reqwest)?;

        let status = resp.status();
        let text = resp.text().await.map_err(from_reqwest)?;
        if !status.is_success() {
            return Err(status_error(status.as_u16(), text));
        }
        serde_json::from_str(&text).map_err(|e| InvokeError::BadResponse(e.to_string()))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Error mapping
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn from_reqwest(e: reqwest::Error) -> InvokeError {
    InvokeError::Connection(e.to_string())
}

fn status_error(status: u16, body: String) -> InvokeError {
    match status {
        401 | 403 => InvokeError::Auth(body),
        429 => InvokeError::RateLimit(body),
        400..=499 => InvokeError::BadRequest(format!("HTTP {status} - {body}")),
        _ => InvokeError::Server {
            status,
            message: body,
        },
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Message serialization helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn role_to_str(role: PromptRole) -> &'static str {
    match role {
        PromptRole::System => "system",
        PromptRole::User => "user",
        PromptRole::Assistant => "assistant",
        PromptRole::Tool => "tool",
    }
}

fn msg_to_openai(msg: &PromptMessage) -> Value {
    match msg.role {
        PromptRole::Tool => tool_result_to_openai(msg),
        PromptRole::Assistant => assistant_to_openai(msg),
        _ => user_or_system_to_openai(msg),
    }
}

fn user_or_system_to_openai(msg: &PromptMessage) -> Value {
    match &msg.content {
        MessageContent::Text(t) => serde_json::json!({
            "role": role_to_str(msg.role),
            "content": t,
        }),
        MessageContent::Parts(parts) => {
            // Vision-style multipart content.
            let content: Vec<Value> = parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text } => Some(serde_json::json!({
                        "type": "text",
                        "text": text,
                    })),
                    ContentPart::Image { url, .. } => Some(serde_json::json!({
                        "type": "image_url",
                        "image_url": {"url": url},
                    })),
                    _ => None,
                })
                .collect();
            serde_json::json!({
                "role": role_to_str(msg.role),
                "content": content,
            })
        }
    }
}

fn assistant_to_openai(msg: &PromptMessage) -> Value {
    let mut obj = serde_json::json!({"role": "assistant"});
    let mut text_parts: Vec<String> = Vec::new();
    let mut tool_calls: Vec<Value> = Vec::new();

    match &msg.content {
        MessageContent::Text(t) => text_parts.push(t.clone()),
        MessageContent::Parts(parts) => {
            for part in parts {
                match part {
                    ContentPart::Text { text } => text_parts.push(text.clone()),
                    ContentPart::ToolUse { id, name, input } => {
                        tool_calls.push(serde_json::json!({
                            "id": id,
                            "type": "function",
                            "function": {
                                "name": name,
                                "arguments": input.to_string(),
                            }
                        }));
                    }
                    _ => {}
                }
            }
        }
    }

    if text_parts.is_empty() {
        obj["content"] = Value::Null;
    } else {
        obj["content"] = Value::String(text_parts.join("\n"));
    }
    if !tool_calls.is_empty() {
        obj["tool_calls"] = Value::Array(tool_calls);
    }
    obj
}

fn tool_result_to_openai(msg: &PromptMessage) -> Value {
    match &msg.content {
        MessageContent::Parts(parts) => {
            for part in parts {
                if let ContentPart::ToolResult {
                    tool_use_id,
                    content,
                    ..
                } = part
                {
                    return serde_json::json!({
                        "role": "tool",
                        "tool_call_id": tool_use_id,
                        "content": content,
                    });
                }
            }
            serde_json::json!({"role": "tool", "tool_call_id": "", "content": ""})
        }
        MessageContent::Text(t) => serde_json::json!({
            "role": "tool",
            "tool_call_id": "",
            "content": t,
        }),
    }
}

fn tool_to_openai(tool: &ToolDefinition) -> Value {
    serde_json::json!({
        "type": "function",
        "function": {
            "name": tool.name,
            "description": tool.description,
            "parameters": tool.parameters,
        }
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Response deserialization helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn parse_chat_response(body: &Value) -> Result<LlmResult, InvokeError> {
    let choice = body
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|a| a.first())
        .ok_or_else(|| InvokeError::BadResponse("no choices in response".into()))?;

    let message = choice
        .get("message")
        .ok_or_else(|| InvokeError::BadResponse("no message in choice".into()))?;

    let text = message
        .get("content")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();

    let finish_reason = choice
        .get("finish_reason")
        .and_then(|v| v.as_str())
        .map(String::from);

    let model = body
        .get("model")
        .and_then(|v| v.as_str())
        .unwrap_or("unknown")
        .to_string();

    Ok(LlmResult {
        text,
        tool_calls: parse_tool_calls(message),
        usage: body.get("usage").and_then(parse_usage),
        model,
        finish_reason,
    })
}

fn parse_tool_calls(message: &Value) -> Vec<ToolCall> {
    let arr = match message.get("tool_calls").and_then(|v| v.as_array()) {
        Some(a) => a,
        None => return Vec::new(),
    };
    arr.iter()
        .filter_map(|tc| {
            let call_id = tc.get("id")?.as_str()?.to_string();
            let func = tc.get("function")?;
            let tool_name = func.get("name")?.as_str()?.to_string();
            let args_str = func.get("arguments")?.as_str().unwrap_or("{}");
            let arguments: Value =
                serde_json::from_str(args_str).unwrap_or(Value::Object(Default::default()));
            Some(ToolCall {
                call_id,
                tool_name,
                arguments,
            })
        })
        .collect()
}

fn parse_usage(v: &Value) -> Option<LlmUsage> {
    Some(LlmUsage::from_tokens(
        v.get("prompt_tokens")?.as_u64()? as u32,
        v.get("completion_tokens")
            .and_then(|t| t.as_u64())
            .unwrap_or(0) as u32,
    ))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// SSE streaming: tool-call assembly
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One tool call under assembly, keyed by its stream `index`.
#[derive(Default)]
struct PartialToolCall {
    call_id: String,
    tool_name: String,
    arguments: String,
}

/// Mutable per-stream state. The delta protocol identifies a call by its
/// `index` field; the `id` and `function.name` arrive only on the first
/// delta for that index, with argument fragments trailing after.
#[derive(Default)]
struct StreamState {
    calls: Vec<PartialToolCall>,
}

impl StreamState {
    fn slot(&mut self, index: usize) -> &mut PartialToolCall {
        while self.calls.len() <= index {
            self.calls.push(PartialToolCall::default());
        }
        &mut self.calls[index]
    }

    /// Emit `ToolCallFinished` for every assembled call and clear them.
    fn finish_calls(&mut self) -> Vec<Result<LlmStreamEvent, InvokeError>> {
        std::mem::take(&mut self.calls)
            .into_iter()
            .filter(|c| !c.tool_name.is_empty())
            .map(|c| {
                let arguments: Value = serde_json::from_str(&c.arguments)
                    .unwrap_or(Value::Object(Default::default()));
                Ok(LlmStreamEvent::ToolCallFinished {
                    call_id: c.call_id,
                    tool_name: c.tool_name,
                    arguments,
                })
            })
            .collect()
    }
}

fn parse_stream_data(state: &mut StreamState, data: &str) -> Vec<Result<LlmStreamEvent, InvokeError>> {
    if data.trim() == "[DONE]" {
        let mut events = state.finish_calls();
        events.push(Ok(LlmStreamEvent::Done {
            usage: None,
            finish_reason: Some("stop".into()),
        }));
        return events;
    }

    let v: Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(e) => return vec![Err(InvokeError::BadResponse(e.to_string()))],
    };

    let choice = v
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|a| a.first());

    // Usage-only chunk (stream_options.include_usage).
    let Some(choice) = choice else {
        if let Some(usage) = v.get("usage").and_then(parse_usage) {
            let mut events = state.finish_calls();
            events.push(Ok(LlmStreamEvent::Done {
                usage: Some(usage),
                finish_reason: None,
            }));
            return events;
        }
        return Vec::new();
    };

    let mut events = Vec::new();
    let delta = choice.get("delta").unwrap_or(&Value::Null);

    if let Some(tc_arr) = delta.get("tool_calls").and_then(|v| v.as_array()) {
        for tc in tc_arr {
            let index = tc.get("index").and_then(|v| v.as_u64()).unwrap_or(0) as usize;
            let slot = state.slot(index);

            if let Some(id) = tc.get("id").and_then(|v| v.as_str()) {
                slot.call_id = id.to_string();
            }
            if let Some(name) = tc
                .get("function")
                .and_then(|f| f.get("name"))
                .and_then(|v| v.as_str())
            {
                slot.tool_name.push_str(name);
                events.push(Ok(LlmStreamEvent::ToolCallStarted {
                    call_id: slot.call_id.clone(),
                    tool_name: slot.tool_name.clone(),
                }));
            }
            if let Some(args) = tc
                .get("function")
                .and_then(|f| f.get("arguments"))
                .and_then(|v| v.as_str())
            {
                slot.arguments.push_str(args);
                events.push(Ok(LlmStreamEvent::ToolCallDelta {
                    call_id: slot.call_id.clone(),
                    delta: args.to_string(),
                }));
            }
        }
    }

    if let Some(text) = delta.get("content").and_then(|v| v.as_str()) {
        if !text.is_empty() {
            events.push(Ok(LlmStreamEvent::Delta {
                text: text.to_string(),
            }));
        }
    }

    if let Some(fr) = choice.get("finish_reason").and_then(|f| f.as_str()) {
        events.append(&mut state.finish_calls());
        events.push(Ok(LlmStreamEvent::Done {
            usage: v.get("usage").and_then(parse_usage),
            finish_reason: Some(fr.to_string()),
        }));
    }

    events
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trait implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait::async_trait]
impl LlmBackend for OpenAiCompatBackend {
    async fn chat(&self, req: ChatRequest) -> Result<LlmResult, InvokeError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.build_chat_body(&req, false);

        tracing::debug!(backend = %self.id, url = %url, "chat request");

        let resp = self.post_json(&url, &body).await?;
        parse_chat_response(&resp)
    }

    async fn chat_stream(
        &self,
        req: ChatRequest,
    ) -> Result<BoxStream<'static, Result<LlmStreamEvent, InvokeError>>, InvokeError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.build_chat_body(&req, true);

        tracing::debug!(backend = %self.id, url = %url, "stream request");

        let resp = self
            .authed_post(&url)
            .json(&body)
            .send()
            .await
            .map_err(from_reqwest)?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.map_err(from_reqwest)?;
            return Err(status_error(status.as_u16(), text));
        }

        // Tool-call assembly state shared between per-payload parsing and
        // the end-of-body flush.
        let state = Arc::new(Mutex::new(StreamState::default()));
        let parse_state = Arc::clone(&state);
        let flush_state = Arc::clone(&state);

        Ok(sse_response_stream(
            resp,
            move |data| parse_stream_data(&mut parse_state.lock(), data),
            move || flush_state.lock().finish_calls(),
        ))
    }

    async fn embeddings(&self, input: Vec<String>) -> Result<Vec<Vec<f32>>, InvokeError> {
        let url = format!("{}/embeddings", self.base_url);
        let body = serde_json::json!({ "model": self.model, "input": input });

        let resp = self.post_json(&url, &body).await?;
        let data = resp
            .get("data")
            .and_then(|d| d.as_array())
            .ok_or_else(|| {
                InvokeError::BadResponse("missing 'data' array in embeddings response".into())
            })?;

        Ok(data
            .iter()
            .filter_map(|item| {
                let embedding = item.get("embedding")?.as_array()?;
                Some(
                    embedding
                        .iter()
                        .filter_map(|v| v.as_f64().map(|f| f as f32))
                        .collect(),
                )
            })
            .collect())
    }

    async fn rerank(
        &self,
        query: String,
        documents: Vec<String>,
        top_n: Option<usize>,
    ) -> Result<Vec<RerankedDocument>, InvokeError> {
        let url = format!("{}/rerank", self.base_url);
        let mut body = serde_json::json!({
            "model": self.model,
            "query": query,
            "documents": documents,
        });
        if let Some(n) = top_n {
            body["top_n"] = serde_json::json!(n);
        }

        let resp = self.post_json(&url, &body).await?;
        let results = resp
            .get("results")
            .and_then(|r| r.as_array())
            .ok_or_else(|| {
                InvokeError::BadResponse("missing 'results' array in rerank response".into())
            })?;

        Ok(results
            .iter()
            .filter_map(|item| {
                Some(RerankedDocument {
                    index: item.get("index")?.as_u64()? as usize,
                    score: item.get("relevance_score")?.as_f64()? as f32,
                })
            })
            .collect())
    }

    fn backend_id(&self) -> &str {
        &self.id
    }
}
