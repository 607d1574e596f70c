//! Function-calling reasoning loop.
//!
//! Uses the model's native tool-call protocol: each iteration sends the
//! running message list with the tool definitions attached, executes
//! whatever calls come back, and appends the assistant turn plus one
//! tool-result message per call. A response with zero tool calls is the
//! final answer. The last permitted iteration sends no tool definitions
//! at all, forcing the model to answer.

use futures_util::StreamExt;

use skein_domain::{Error, LlmStreamEvent, LlmUsage, PromptMessage, Result, ToolCall};
use skein_model::ChatRequest;
use skein_queue::QueueEvent;

use crate::base::{AgentRunner, ToolCallSummary};

pub struct FcAgentRunner {
    pub base: AgentRunner,
}

impl FcAgentRunner {
    pub async fn run(mut self) -> Result<()> {
        let max_steps = self.base.config.max_iteration_steps();

        let mut messages = vec![PromptMessage::system(self.base.input.instruction.clone())];
        messages.extend(self.base.history_messages());
        messages.push(self.base.user_message());

        let mut total_usage = LlmUsage::default();

        'iterations: for iteration in 1..=max_steps {
            if self.base.cancel.is_cancelled() {
                break;
            }
            let final_iteration = iteration == max_steps;

            let request = ChatRequest {
                messages: messages.clone(),
                tools: if final_iteration {
                    Vec::new()
                } else {
                    self.base.tool_definitions()
                },
                user: Some(self.base.input.user_id.clone()),
                ..Default::default()
            };

            let mut record = self.base.create_thought().await?;
            let (text, tool_calls, round_usage) = self.invoke_round(&request).await?;

            if let Some(usage) = &round_usage {
                total_usage.add(usage);
            }
            record.thought = text.clone();
            record.usage = round_usage;

            if tool_calls.is_empty() {
                record.answer = text;
                self.base.save_thought(&record).await?;
                break;
            }

            messages.push(PromptMessage::assistant_with_tool_calls(&text, &tool_calls));

            let mut summary = ToolCallSummary::default();
            for call in &tool_calls {
                if self.base.cancel.is_cancelled() {
                    summary.apply_to(&mut record);
                    self.base.save_thought(&record).await?;
                    break 'iterations;
                }
                let outcome = self
                    .base
                    .execute_tool_call(&call.tool_name, call.arguments.clone())
                    .await;
                messages.push(PromptMessage::tool_result(
                    call.call_id.clone(),
                    outcome.observation.clone(),
                ));
                summary.record(&call.tool_name, call.arguments.clone(), &outcome);
            }
            summary.apply_to(&mut record);
            self.base.save_thought(&record).await?;
        }

        self.base.finish(total_usage).await
    }

    /// One model round, streamed when the deployment assembles tool
    /// calls over SSE, blocking otherwise. Text is published chunk by
    /// chunk either way, with a newline separator after non-empty turns
    /// so multi-iteration answers read as lines.
    async fn invoke_round(
        &self,
        request: &ChatRequest,
    ) -> Result<(String, Vec<ToolCall>, Option<LlmUsage>)> {
        let mut text = String::new();
        let mut tool_calls = Vec::new();
        let mut usage: Option<LlmUsage> = None;

        if self.base.model.supports_stream_tool_call() {
            let mut stream = self.base.model.invoke_llm_stream(request).await?;
            while let Some(event) = stream.next().await {
                match event.map_err(Error::from)? {
                    LlmStreamEvent::Delta { text: delta } => {
                        text.push_str(&delta);
                        self.base
                            .queue
                            .publish(QueueEvent::LlmChunk { text: delta })
                            .await;
                    }
                    LlmStreamEvent::ToolCallFinished {
                        call_id,
                        tool_name,
                        arguments,
                    } => {
                        tool_calls.push(ToolCall {
                            call_id,
                            tool_name,
                            arguments,
                        });
                    }
                    LlmStreamEvent::Done { usage: u, .. } => {
                        usage = u.map(|u| self.base.model.price_usage(u));
                    }
                    LlmStreamEvent::ToolCallStarted { .. }
                    | LlmStreamEvent::ToolCallDelta { .. } => {}
                }
            }
        } else {
            let result = self.base.model.invoke_llm(request).await?;
            text = result.text;
            tool_calls = result.tool_calls;
            usage = result.usage;
            if !text.is_empty() {
                self.base
                    .queue
                    .publish(QueueEvent::LlmChunk { text: text.clone() })
                    .await;
            }
        }

        if !text.is_empty() {
            self.base
                .queue
                .publish(QueueEvent::LlmChunk { text: "\n".into() })
                .await;
        }

        Ok((text, tool_calls, usage))
    }
}
