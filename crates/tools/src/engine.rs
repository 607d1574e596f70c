//! Tool execution.
//!
//! The engine runs a resolved tool exactly once and guarantees three
//! things: every execution yields a [`ToolInvokeMeta`] with elapsed
//! time, heterogeneous response chunks are flattened into one plain
//! string for the model, and no failure escapes as an error to the
//! agent loop. The only `Err` this module returns is the string-payload
//! misuse case; everything else degrades into a user-facing phrase.

use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use skein_domain::tool::ToolInvokeMessage;
use skein_storage::{MessageFileRecord, MessageFileStore};

use crate::error::ToolError;
use crate::tool::Tool;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Invocation metadata
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Immutable record of one tool execution, success or failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInvokeMeta {
    /// Wall-clock seconds.
    pub time_cost: f64,
    #[serde(default)]
    pub error: Option<String>,
    /// Snapshot of the configuration the call ran under.
    pub tool_config: Value,
}

impl ToolInvokeMeta {
    fn snapshot(tool: &Tool) -> Value {
        serde_json::json!({
            "provider": tool.spec.identity.provider,
            "tool_name": tool.spec.identity.name,
            "runtime_parameters": tool.runtime.runtime_parameters,
        })
    }
}

/// Observed by the agent layer to publish thought progress.
pub trait ToolCallback: Send + Sync {
    fn on_tool_start(&self, tool_name: &str, input: &Value);
    fn on_tool_end(&self, tool_name: &str, input: &Value, output: &str);
    fn on_tool_error(&self, tool_name: &str, error: &str);
}

/// Everything one tool execution produced.
#[derive(Debug)]
pub struct ToolInvokeResult {
    /// Plain-text summary handed back to the model.
    pub text: String,
    /// Attachments persisted from binary-bearing response chunks.
    pub files: Vec<MessageFileRecord>,
    pub meta: ToolInvokeMeta,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Engine
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct ToolEngine;

impl ToolEngine {
    /// Invoke on behalf of an agent loop.
    ///
    /// `Err` is returned only when a bare-string payload is given for a
    /// tool with more than one model-filled parameter. Every runtime
    /// failure is absorbed into a degraded `Ok` result carrying the
    /// matching user-facing phrase and an error-tagged meta.
    pub async fn agent_invoke(
        tool: &Tool,
        tool_parameters: Value,
        user_id: &str,
        message_id: &str,
        files: &MessageFileStore,
        callback: Option<&dyn ToolCallback>,
    ) -> Result<ToolInvokeResult, ToolError> {
        let parameters = normalize_parameters(tool, tool_parameters)?;

        if let Some(cb) = callback {
            cb.on_tool_start(tool.name(), &parameters);
        }

        let started = Instant::now();
        let outcome = tool.invoke(user_id, parameters.clone()).await;
        let time_cost = started.elapsed().as_secs_f64();

        match outcome {
            Ok(messages) => {
                let text = response_to_text(&messages);
                let records = extract_files(&messages, message_id, files);
                let meta = ToolInvokeMeta {
                    time_cost,
                    error: None,
                    tool_config: ToolInvokeMeta::snapshot(tool),
                };
                if let Some(cb) = callback {
                    cb.on_tool_end(tool.name(), &parameters, &text);
                }
                Ok(ToolInvokeResult {
                    text,
                    files: records,
                    meta,
                })
            }
            Err(e) => {
                let text = error_text(tool.name(), &e);
                tracing::warn!(tool = tool.name(), error = %e, "tool invocation failed");
                if let Some(cb) = callback {
                    cb.on_tool_error(tool.name(), &text);
                }
                Ok(ToolInvokeResult {
                    text,
                    files: Vec::new(),
                    meta: ToolInvokeMeta {
                        time_cost,
                        error: Some(e.to_string()),
                        tool_config: ToolInvokeMeta::snapshot(tool),
                    },
                })
            }
        }
    }
}

/// A bare string is auto-wrapped for single-parameter tools only.
fn normalize_parameters(tool: &Tool, parameters: Value) -> Result<Value, ToolError> {
    match parameters {
        Value::String(s) => {
            let llm_params = tool.llm_parameters();
            if llm_params.len() == 1 {
                Ok(serde_json::json!({ llm_params[0].name.clone(): s }))
            } else {
                Err(ToolError::ParameterValidation(format!(
                    "tool {} takes {} parameters but was given a bare string",
                    tool.name(),
                    llm_params.len()
                )))
            }
        }
        other => Ok(other),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Response flattening
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Flatten response chunks into the text the model sees. Assets are
/// described with instructional phrases so the model does not try to
/// re-emit raw URLs or bytes the user already received.
pub fn response_to_text(messages: &[ToolInvokeMessage]) -> String {
    let mut result = String::new();
    for message in messages {
        match message {
            ToolInvokeMessage::Text { text } => result.push_str(text),
            ToolInvokeMessage::Link { url, .. } => {
                result.push_str(&format!(
                    "result link: {url}. please tell user to check it."
                ));
            }
            ToolInvokeMessage::Image { .. } | ToolInvokeMessage::ImageLink { .. } => {
                result.push_str(
                    "image has been created and sent to user already, \
                     you do not need to create it, just tell the user to check it now.",
                );
            }
            ToolInvokeMessage::Blob { data, .. } => {
                result.push_str(&format!("tool response: [binary data, {} bytes].", data.len()));
            }
        }
    }
    result
}

/// Persist binary-bearing chunks as message file records.
fn extract_files(
    messages: &[ToolInvokeMessage],
    message_id: &str,
    store: &MessageFileStore,
) -> Vec<MessageFileRecord> {
    let mut records = Vec::new();
    for message in messages {
        let record = match message {
            ToolInvokeMessage::Image { url } | ToolInvokeMessage::ImageLink { url } => {
                let mime = mime_from_url(url).unwrap_or_else(|| "image/jpeg".to_owned());
                Some(MessageFileRecord::new(
                    message_id,
                    file_type_from_mime(&mime),
                    mime,
                    url.clone(),
                ))
            }
            // A plain link only becomes a file when it declares a mime type.
            ToolInvokeMessage::Link {
                url,
                mime_type: Some(mime),
            } => Some(MessageFileRecord::new(
                message_id,
                file_type_from_mime(mime),
                mime.clone(),
                url.clone(),
            )),
            ToolInvokeMessage::Blob {
                mime_type, save_as, ..
            } => {
                let mime = mime_type.clone().unwrap_or_else(|| "octet/stream".to_owned());
                let mut record = MessageFileRecord::new(
                    message_id,
                    file_type_from_mime(&mime),
                    mime,
                    format!("blob://{}", uuid::Uuid::new_v4()),
                );
                record.save_as = save_as.clone();
                Some(record)
            }
            _ => None,
        };
        if let Some(record) = record {
            if let Err(e) = store.insert(&record) {
                tracing::warn!(error = %e, "failed to persist message file");
                continue;
            }
            records.push(record);
        }
    }
    records
}

fn mime_from_url(url: &str) -> Option<String> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let ext = path.rsplit('.').next()?.to_ascii_lowercase();
    let mime = match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "txt" | "md" => "text/plain",
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        "gz" | "tgz" => "application/gzip",
        "tar" => "application/x-tar",
        _ => return None,
    };
    Some(mime.to_owned())
}

/// Collapse a mime type into the stored file-type tag.
pub fn file_type_from_mime(mime: &str) -> &'static str {
    let mime = mime.to_ascii_lowercase();
    if mime.starts_with("image/") {
        "image"
    } else if mime.starts_with("video/") {
        "video"
    } else if mime.starts_with("audio/") {
        "audio"
    } else if mime.starts_with("text/") {
        "text"
    } else if mime.contains("pdf") {
        "pdf"
    } else if mime.contains("zip") || mime.contains("tar") || mime.contains("gzip") {
        "archive"
    } else {
        "bin"
    }
}

/// The fixed user-facing phrase for each failure category. The agent
/// loop feeds these back to the model as if the tool had answered.
fn error_text(tool_name: &str, error: &ToolError) -> String {
    match error {
        ToolError::ProviderNotFound(_) | ToolError::NotFound(_) | ToolError::NotSupported(_) => {
            format!("there is not a tool named {tool_name}")
        }
        ToolError::ParameterValidation(_) => {
            "tool parameters validation error: please check your tool parameters".to_owned()
        }
        ToolError::CredentialValidation(_) => {
            "please check your tool provider credentials".to_owned()
        }
        ToolError::Invoke(e) => format!("tool invoke error: {e}"),
        other => format!("unknown error: {other}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use skein_domain::tool::{
        InvokeFrom, ToolIdentity, ToolParameter, ToolParameterType,
    };
    use crate::tool::{ToolExec, ToolRuntime, ToolSpec};

    struct FixedExec(Result<Vec<ToolInvokeMessage>, fn() -> ToolError>);

    #[async_trait::async_trait]
    impl ToolExec for FixedExec {
        async fn invoke(
            &self,
            _runtime: &ToolRuntime,
            _parameters: Value,
            _user_id: &str,
        ) -> Result<Vec<ToolInvokeMessage>, ToolError> {
            match &self.0 {
                Ok(messages) => Ok(messages.clone()),
                Err(make) => Err(make()),
            }
        }
    }

    fn tool_with(
        params: Vec<ToolParameter>,
        exec: FixedExec,
    ) -> Tool {
        let spec = ToolSpec {
            identity: ToolIdentity {
                name: "search".into(),
                label: "Search".into(),
                provider: "test".into(),
                icon: None,
            },
            description: "test tool".into(),
            parameters: params,
        };
        Tool::new(
            spec,
            ToolRuntime::new("t1", InvokeFrom::Debugger),
            Arc::new(exec),
        )
    }

    fn file_store() -> (tempfile::TempDir, MessageFileStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = MessageFileStore::open(dir.path()).unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn string_payload_wraps_for_single_parameter_tool() {
        let tool = tool_with(
            vec![ToolParameter::new("q", ToolParameterType::String).required()],
            FixedExec(Ok(vec![ToolInvokeMessage::text("found it")])),
        );
        let (_dir, store) = file_store();

        let result = ToolEngine::agent_invoke(
            &tool,
            Value::String("rust".into()),
            "u1",
            "m1",
            &store,
            None,
        )
        .await
        .unwrap();
        assert_eq!(result.text, "found it");
        assert!(result.meta.error.is_none());
        assert!(result.meta.time_cost >= 0.0);
    }

    #[tokio::test]
    async fn string_payload_for_multi_parameter_tool_is_a_hard_error() {
        let tool = tool_with(
            vec![
                ToolParameter::new("q", ToolParameterType::String).required(),
                ToolParameter::new("lang", ToolParameterType::String),
            ],
            FixedExec(Ok(vec![])),
        );
        let (_dir, store) = file_store();

        let err = ToolEngine::agent_invoke(
            &tool,
            Value::String("rust".into()),
            "u1",
            "m1",
            &store,
            None,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ToolError::ParameterValidation(_)));
    }

    #[tokio::test]
    async fn failure_degrades_to_phrase_with_error_meta() {
        let tool = tool_with(
            vec![ToolParameter::new("q", ToolParameterType::String)],
            FixedExec(Err(|| ToolError::Invoke("backend exploded".into()))),
        );
        let (_dir, store) = file_store();

        let result =
            ToolEngine::agent_invoke(&tool, serde_json::json!({"q": "x"}), "u1", "m1", &store, None)
                .await
                .unwrap();
        assert_eq!(result.text, "tool invoke error: backend exploded");
        assert!(result.meta.error.as_deref().unwrap().contains("exploded"));
    }

    #[tokio::test]
    async fn missing_tool_phrase_names_the_tool() {
        let tool = tool_with(
            vec![],
            FixedExec(Err(|| ToolError::NotFound("search".into()))),
        );
        let (_dir, store) = file_store();

        let result =
            ToolEngine::agent_invoke(&tool, serde_json::json!({}), "u1", "m1", &store, None)
                .await
                .unwrap();
        assert_eq!(result.text, "there is not a tool named search");
    }

    #[tokio::test]
    async fn binary_chunks_become_message_files() {
        let tool = tool_with(
            vec![],
            FixedExec(Ok(vec![
                ToolInvokeMessage::text("see attached"),
                ToolInvokeMessage::ImageLink {
                    url: "https://example.com/chart".into(),
                },
                ToolInvokeMessage::Link {
                    url: "https://example.com/report.pdf".into(),
                    mime_type: Some("application/pdf".into()),
                },
                ToolInvokeMessage::Blob {
                    data: vec![1, 2, 3],
                    mime_type: None,
                    save_as: Some("payload".into()),
                },
            ])),
        );
        let (_dir, store) = file_store();

        let result =
            ToolEngine::agent_invoke(&tool, serde_json::json!({}), "u1", "m1", &store, None)
                .await
                .unwrap();

        assert_eq!(result.files.len(), 3);
        // Unresolvable image link defaults to jpeg.
        assert_eq!(result.files[0].mime_type, "image/jpeg");
        assert_eq!(result.files[0].file_type, "image");
        assert_eq!(result.files[1].file_type, "pdf");
        assert_eq!(result.files[2].mime_type, "octet/stream");
        assert_eq!(result.files[2].file_type, "bin");
        assert_eq!(result.files[2].save_as.as_deref(), Some("payload"));

        // Persisted, not just returned.
        assert_eq!(store.list_for_message("m1").len(), 3);

        assert!(result.text.starts_with("see attached"));
        assert!(result.text.contains("image has been created"));
        assert!(result.text.contains("tool response: [binary data, 3 bytes]"));
    }
}
