//! The chat task pipeline.
//!
//! Drains one task's event queue, maintains [`ChatTaskState`], and
//! presents either a stream of wire responses or a single blocking
//! response, persisting the final message row exactly once. The
//! translation table lives in `handle_event`; everything terminal funnels
//! through `finalize`, which owns usage backfill, finish-time moderation,
//! and persistence.

use std::sync::Arc;
use std::sync::OnceLock;
use std::time::Instant;

use futures_util::StreamExt;
use regex::Regex;
use serde_json::Value;

use skein_domain::config::ModerationConfig;
use skein_domain::stream::{BoxStream, LlmUsage};
use skein_domain::{Error, Result};
use skein_model::ModelInstance;
use skein_queue::{QueueEvent, QueueListener, StopReason};
use skein_storage::{MessageStatus, Storage};

use crate::moderation::{self, ChunkVerdict, OutputModeration};
use crate::responses::StreamResponse;
use crate::state::ChatTaskState;

/// The single response of a blocking (non-streaming) request.
#[derive(Debug, Clone)]
pub struct BlockingChatResponse {
    pub task_id: String,
    pub message_id: String,
    pub conversation_id: String,
    pub answer: String,
    pub metadata: Value,
}

pub struct ChatTaskPipeline {
    task_id: String,
    message_id: String,
    conversation_id: String,
    query: String,
    model: Arc<ModelInstance>,
    storage: Arc<Storage>,
    moderation: Box<dyn OutputModeration>,
    state: ChatTaskState,
    /// Wall-clock start; the persisted latency covers the whole run,
    /// queue wait included.
    started: Instant,
}

impl ChatTaskPipeline {
    /// The message row must already exist; its query feeds token
    /// backfill when a stopped run never reported usage.
    pub fn new(
        task_id: impl Into<String>,
        message_id: impl Into<String>,
        model: Arc<ModelInstance>,
        storage: Arc<Storage>,
        moderation_config: &ModerationConfig,
    ) -> Result<Self> {
        let message_id = message_id.into();
        let record = storage
            .messages
            .get(&message_id)
            .ok_or_else(|| Error::Storage(format!("message {message_id} not found")))?;
        Ok(Self {
            task_id: task_id.into(),
            message_id,
            conversation_id: record.conversation_id,
            query: record.query,
            model,
            storage,
            moderation: moderation::from_config(moderation_config),
            state: ChatTaskState::default(),
            started: Instant::now(),
        })
    }

    // ── Consumption modes ──────────────────────────────────────────

    /// Streaming mode: one wire response at a time, ending with exactly
    /// one terminal response. Internal failures become the terminal
    /// error response rather than escaping the stream.
    pub fn process(mut self, listener: QueueListener) -> BoxStream<'static, StreamResponse> {
        Box::pin(async_stream::stream! {
            let mut events = listener.listen();
            while let Some(message) = events.next().await {
                match self.handle_event(message.event) {
                    Ok((responses, ended)) => {
                        for response in responses {
                            yield response;
                        }
                        if ended {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::error!(task_id = %self.task_id, error = %e, "pipeline failed");
                        yield StreamResponse::Error {
                            task_id: self.task_id.clone(),
                            message: e.to_string(),
                        };
                        break;
                    }
                }
            }
        })
    }

    /// Blocking mode: drain the whole stream, surface the final answer,
    /// and raise run failures as errors.
    pub async fn blocking(self, listener: QueueListener) -> Result<BlockingChatResponse> {
        let task_id = self.task_id.clone();
        let message_id = self.message_id.clone();
        let conversation_id = self.conversation_id.clone();
        let storage = self.storage.clone();

        let mut stream = self.process(listener);
        while let Some(response) = stream.next().await {
            match response {
                StreamResponse::MessageEnd { metadata, .. } => {
                    let answer = storage
                        .messages
                        .get(&message_id)
                        .map(|m| m.answer)
                        .unwrap_or_default();
                    return Ok(BlockingChatResponse {
                        task_id,
                        message_id,
                        conversation_id,
                        answer,
                        metadata,
                    });
                }
                StreamResponse::Error { message, .. } => {
                    return Err(Error::Other(message));
                }
                _ => {}
            }
        }
        Err(Error::QueueClosed)
    }

    // ── Event translation ──────────────────────────────────────────

    fn handle_event(&mut self, event: QueueEvent) -> Result<(Vec<StreamResponse>, bool)> {
        let responses = match event {
            QueueEvent::LlmChunk { text } => return self.handle_delta(text, false),
            QueueEvent::AgentMessage { text } => return self.handle_delta(text, true),

            QueueEvent::AgentThought { thought_id } => {
                // Re-fetch: the record may have been filled further since
                // the event was queued, and may also have vanished.
                match self.storage.thoughts.get(&thought_id) {
                    Some(thought) => vec![StreamResponse::AgentThought {
                        task_id: self.task_id.clone(),
                        message_id: self.message_id.clone(),
                        id: thought.id,
                        position: thought.position,
                        thought: thought.thought,
                        tool: thought.tool_name,
                        tool_input: thought.tool_input.unwrap_or(Value::Null),
                        observation: thought.observation.unwrap_or(Value::Null),
                    }],
                    None => Vec::new(),
                }
            }

            QueueEvent::MessageFile { file_id } => match self.storage.files.get(&file_id) {
                Some(file) => vec![StreamResponse::MessageFile {
                    task_id: self.task_id.clone(),
                    id: file.id,
                    file_type: file.file_type,
                    url: file.url,
                }],
                None => Vec::new(),
            },

            QueueEvent::RetrieverResources { resources } => {
                self.state.retriever_resources.extend(resources);
                Vec::new()
            }

            QueueEvent::AnnotationReply {
                annotation_id,
                content,
            } => {
                // A stored annotation short-circuits the model's answer.
                self.state.annotation_reply_id = Some(annotation_id);
                self.state.answer = content.clone();
                vec![StreamResponse::MessageReplace {
                    task_id: self.task_id.clone(),
                    message_id: self.message_id.clone(),
                    answer: content,
                }]
            }

            QueueEvent::MessageReplace { text } => {
                self.state.answer = text.clone();
                vec![StreamResponse::MessageReplace {
                    task_id: self.task_id.clone(),
                    message_id: self.message_id.clone(),
                    answer: text,
                }]
            }

            QueueEvent::Ping => vec![StreamResponse::Ping {
                task_id: self.task_id.clone(),
            }],

            QueueEvent::MessageEnd { usage } => {
                return Ok((self.finalize(None, usage)?, true));
            }
            QueueEvent::Stop { reason } => {
                return Ok((self.finalize(Some(reason), None)?, true));
            }
            QueueEvent::Error { message } => {
                return Ok((vec![self.fail(message)?], true));
            }

            // Workflow graph events have no chat-mode rendering.
            QueueEvent::WorkflowStarted { .. }
            | QueueEvent::WorkflowFinished { .. }
            | QueueEvent::NodeStarted { .. }
            | QueueEvent::NodeFinished { .. }
            | QueueEvent::IterationStarted { .. }
            | QueueEvent::IterationCompleted { .. } => {
                tracing::debug!(task_id = %self.task_id, "ignoring workflow event in chat pipeline");
                Vec::new()
            }
        };
        Ok((responses, false))
    }

    /// An answer delta: accumulate, run chunk moderation, forward what
    /// is releasable. A moderation hit replaces the whole visible
    /// answer and stops the run.
    fn handle_delta(&mut self, text: String, agent: bool) -> Result<(Vec<StreamResponse>, bool)> {
        self.state.answer.push_str(&text);

        match self.moderation.feed_chunk(&text) {
            ChunkVerdict::Release(released) if !released.is_empty() => {
                let response = if agent {
                    StreamResponse::AgentMessage {
                        task_id: self.task_id.clone(),
                        message_id: self.message_id.clone(),
                        answer: released,
                    }
                } else {
                    StreamResponse::Message {
                        task_id: self.task_id.clone(),
                        message_id: self.message_id.clone(),
                        answer: released,
                    }
                };
                Ok((vec![response], false))
            }
            ChunkVerdict::Release(_) | ChunkVerdict::Buffering => Ok((Vec::new(), false)),
            ChunkVerdict::Flagged { replacement } => {
                self.state.answer = replacement.clone();
                let mut responses = vec![StreamResponse::MessageReplace {
                    task_id: self.task_id.clone(),
                    message_id: self.message_id.clone(),
                    answer: replacement,
                }];
                responses.extend(self.finalize(Some(StopReason::OutputModeration), None)?);
                Ok((responses, true))
            }
        }
    }

    // ── Termination ────────────────────────────────────────────────

    /// Everything that must happen exactly once at the end of a
    /// successful or stopped run: finish-time moderation, token
    /// backfill, message persistence, and the end response.
    fn finalize(
        &mut self,
        stop: Option<StopReason>,
        event_usage: Option<LlmUsage>,
    ) -> Result<Vec<StreamResponse>> {
        let mut responses = Vec::new();

        if let Some(replacement) = self.moderation.check_final(&self.state.answer) {
            self.state.answer = replacement.clone();
            responses.push(StreamResponse::MessageReplace {
                task_id: self.task_id.clone(),
                message_id: self.message_id.clone(),
                answer: replacement,
            });
        }

        let answer = strip_template_variables(&self.state.answer);

        // Token backfill. An annotation reply means no model call
        // happened, so counting is skipped entirely; otherwise prompt
        // tokens are estimated when the run never reported them, and
        // completion tokens only for a user-initiated stop.
        let mut usage = event_usage.unwrap_or_default();
        let annotation = self.state.annotation_reply_id.is_some()
            || matches!(stop, Some(StopReason::AnnotationReply));
        if !annotation {
            if usage.prompt_tokens == 0 {
                usage.prompt_tokens = self.model.count_tokens(&self.query);
            }
            if matches!(stop, Some(StopReason::UserManual)) {
                usage.completion_tokens = self.model.count_tokens(&answer);
            }
            usage.total_tokens = usage.prompt_tokens + usage.completion_tokens;
            usage = self.model.price_usage(usage);
        }
        usage.latency_ms = self.started.elapsed().as_millis() as u64;

        let mut record = self
            .storage
            .messages
            .get(&self.message_id)
            .ok_or_else(|| Error::Storage(format!("message {} not found", self.message_id)))?;
        record.answer = answer;
        record.usage = Some(usage.clone());
        record.status = if stop.is_some() {
            MessageStatus::Stopped
        } else {
            MessageStatus::Normal
        };
        record.error = None;
        self.storage.messages.upsert(&record)?;
        tracing::info!(
            task_id = %self.task_id,
            message_id = %self.message_id,
            status = ?record.status,
            "message persisted"
        );

        responses.push(StreamResponse::MessageEnd {
            task_id: self.task_id.clone(),
            id: self.message_id.clone(),
            metadata: self.state.metadata(usage),
        });
        Ok(responses)
    }

    /// The worker failed: mark the message and emit the terminal error.
    fn fail(&mut self, message: String) -> Result<StreamResponse> {
        if let Some(mut record) = self.storage.messages.get(&self.message_id) {
            record.status = MessageStatus::Error;
            record.error = Some(message.clone());
            self.storage.messages.upsert(&record)?;
        }
        Ok(StreamResponse::Error {
            task_id: self.task_id.clone(),
            message,
        })
    }
}

/// Strip `{{#node.variable#}}` template references the model may have
/// echoed back into the answer.
fn strip_template_variables(text: &str) -> String {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"\{\{#[\w.]+#\}\}").ok());
    match re {
        Some(re) => re.replace_all(text, "").into_owned(),
        None => text.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_variables_are_stripped() {
        assert_eq!(
            strip_template_variables("before {{#node1.output#}} after"),
            "before  after"
        );
        assert_eq!(strip_template_variables("no vars"), "no vars");
    }
}
