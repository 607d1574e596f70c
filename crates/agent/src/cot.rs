//! Chain-of-thought reasoning loop.
//!
//! The model writes free text interleaved with `Action:` JSON blocks;
//! the loop streams that text to the user as it arrives, runs the
//! chosen tool, and feeds the observation back through the scratchpad.
//! A `Final Answer` pseudo-action ends the loop. The last permitted
//! iteration lists no tools, so the model has to answer.

use futures_util::StreamExt;
use serde_json::Value;

use skein_domain::{Error, LlmStreamEvent, LlmUsage, PromptMessage, Result};
use skein_model::ChatRequest;
use skein_queue::QueueEvent;

use crate::base::{AgentRunner, ToolCallSummary};
use crate::parser::{CotChunk, CotOutputParser};
use crate::scratchpad::{render_scratchpad, AgentAction, AgentScratchpadUnit};

const REACT_INSTRUCTION: &str = r#"{{instruction}}

You have access to the following tools:

{{tools}}

Use a json blob to specify a tool by providing an action key (tool name) and an action_input key (tool input).
Valid "action" values: "Final Answer" or {{tool_names}}

Follow this format:

Thought: consider what to do
Action:
```json
{"action": "tool name", "action_input": {"parameter": "value"}}
```
Observation: the tool result
... (repeat Thought/Action/Observation as needed)
Thought: I know what to respond
Action:
```json
{"action": "Final Answer", "action_input": "the answer"}
```"#;

pub struct CotAgentRunner {
    pub base: AgentRunner,
}

impl CotAgentRunner {
    pub async fn run(mut self) -> Result<()> {
        let max_steps = self.base.config.max_iteration_steps();
        let history = self.base.history_messages();
        let user_message = self.base.user_message();

        let mut scratchpad: Vec<AgentScratchpadUnit> = Vec::new();
        let mut total_usage = LlmUsage::default();

        for iteration in 1..=max_steps {
            if self.base.cancel.is_cancelled() {
                break;
            }
            let final_iteration = iteration == max_steps;

            let mut messages = vec![PromptMessage::system(self.system_prompt(final_iteration))];
            messages.extend(history.iter().cloned());
            messages.push(user_message.clone());
            if !scratchpad.is_empty() {
                messages.push(PromptMessage::assistant(render_scratchpad(&scratchpad)));
            }

            let request = ChatRequest {
                messages,
                stop: vec!["Observation".into()],
                user: Some(self.base.input.user_id.clone()),
                ..Default::default()
            };

            let mut record = self.base.create_thought().await?;
            let mut unit = AgentScratchpadUnit::default();
            let mut action: Option<AgentAction> = None;
            let mut round_usage: Option<LlmUsage> = None;
            let mut parser = CotOutputParser::new();

            let mut stream = self.base.model.invoke_llm_stream(&request).await?;
            while let Some(event) = stream.next().await {
                match event.map_err(Error::from)? {
                    LlmStreamEvent::Delta { text } => {
                        for chunk in parser.feed(&text) {
                            self.consume_chunk(chunk, &mut unit, &mut action).await;
                        }
                    }
                    LlmStreamEvent::Done { usage, .. } => {
                        round_usage = usage.map(|u| self.base.model.price_usage(u));
                    }
                    // CoT prompts offer no native tool protocol.
                    _ => {}
                }
            }
            for chunk in parser.finish() {
                self.consume_chunk(chunk, &mut unit, &mut action).await;
            }

            if let Some(usage) = &round_usage {
                total_usage.add(usage);
            }
            record.thought = unit.thought.clone();
            record.usage = round_usage;

            match action {
                Some(action) if action.is_final_answer() => {
                    let answer = action.input_text();
                    self.base
                        .queue
                        .publish(QueueEvent::AgentMessage {
                            text: answer.clone(),
                        })
                        .await;
                    record.answer = answer;
                    self.base.save_thought(&record).await?;
                    break;
                }
                Some(action) => {
                    let outcome = self
                        .base
                        .execute_tool_call(&action.action_name, action.action_input.clone())
                        .await;

                    let mut summary = ToolCallSummary::default();
                    summary.record(&action.action_name, action.action_input.clone(), &outcome);
                    summary.apply_to(&mut record);
                    self.base.save_thought(&record).await?;

                    unit.observation = Some(outcome.observation);
                    unit.action = Some(action);
                    scratchpad.push(unit);
                }
                None => {
                    record.answer = answer_for_missing_action(&unit.thought);
                    self.base.save_thought(&record).await?;
                    break;
                }
            }
        }

        self.base.finish(total_usage).await
    }

    async fn consume_chunk(
        &self,
        chunk: CotChunk,
        unit: &mut AgentScratchpadUnit,
        action: &mut Option<AgentAction>,
    ) {
        match chunk {
            CotChunk::Text(text) => {
                unit.thought.push_str(&text);
                self.base
                    .queue
                    .publish(QueueEvent::AgentMessage { text })
                    .await;
            }
            CotChunk::Action(parsed) => *action = Some(parsed),
        }
    }

    fn system_prompt(&self, final_iteration: bool) -> String {
        let (tools, tool_names) = if final_iteration {
            (String::new(), String::new())
        } else {
            let definitions = self.base.tool_definitions();
            let tools = definitions
                .iter()
                .map(|d| {
                    format!(
                        "{}: {} parameters: {}",
                        d.name,
                        d.description,
                        serde_json::to_string(&d.parameters)
                            .unwrap_or_else(|_| Value::Null.to_string())
                    )
                })
                .collect::<Vec<_>>()
                .join("\n");
            let names = definitions
                .iter()
                .map(|d| format!("\"{}\"", d.name))
                .collect::<Vec<_>>()
                .join(", ");
            (tools, names)
        };

        REACT_INSTRUCTION
            .replace("{{instruction}}", &self.base.input.instruction)
            .replace("{{tools}}", &tools)
            .replace("{{tool_names}}", &tool_names)
    }
}

/// The model stopped without choosing any action, not even a final
/// answer. The run ends with an empty answer rather than guessing that
/// the stray thought text was meant as one; the thought itself was
/// already streamed and persisted.
fn answer_for_missing_action(thought: &str) -> String {
    tracing::warn!(
        thought_len = thought.len(),
        "model produced no action; ending run with an empty answer"
    );
    String::new()
}
