//! Shared state and plumbing for both reasoning strategies.
//!
//! [`AgentRunner`] owns everything one run needs: the resolved tools,
//! the conversation variable pool, the thought store, and the queue
//! publisher. The strategy loops in `cot` and `fc` borrow it for the
//! parts they share: thought persistence, tool dispatch with absorbed
//! failures, history replay, and the end-of-run bookkeeping.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use skein_domain::config::AgentConfig;
use skein_domain::tool::{InvokeFrom, ToolDefinition};
use skein_domain::{ContentPart, Error, MessageContent, PromptMessage, PromptRole, Result};
use skein_model::ModelInstance;
use skein_queue::{AppQueueManager, CancelToken, QueueEvent};
use skein_storage::{AgentThoughtRecord, Storage};
use skein_tools::{
    dataset_retriever_tool, DatasetRetrieval, RetrievalCallback, RetrievalSettings, Tool,
    ToolConfig, ToolEngine, ToolManager,
};

use crate::history::organize_agent_history;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Run input
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Everything the caller supplies for one agent turn.
#[derive(Debug, Clone)]
pub struct AgentRunInput {
    pub task_id: String,
    pub tenant_id: String,
    pub app_id: String,
    pub conversation_id: String,
    /// The message record for this turn; must already exist in storage.
    pub message_id: String,
    pub query: String,
    pub user_id: String,
    /// The app's configured system instruction.
    pub instruction: String,
    pub invoke_from: InvokeFrom,
    pub tool_configs: Vec<ToolConfig>,
    pub retrieval: Option<RetrievalSettings>,
    /// Prior messages of the conversation, oldest first.
    pub prior_message_ids: Vec<String>,
    /// Image attachments on this turn.
    pub file_urls: Vec<String>,
}

/// Result of one tool dispatch, failures already absorbed into the
/// observation text.
pub struct ToolCallOutcome {
    pub observation: String,
    pub meta: Value,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Runner
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct AgentRunner {
    pub input: AgentRunInput,
    pub model: Arc<ModelInstance>,
    pub storage: Arc<Storage>,
    pub queue: Arc<AppQueueManager>,
    pub cancel: CancelToken,
    pub config: AgentConfig,
    pub(crate) tools: Vec<Tool>,
    pub(crate) variables: Value,
}

impl AgentRunner {
    /// Resolve the configured tools and load the variable pool.
    ///
    /// Tools that fail to resolve (provider gone, credentials missing)
    /// are skipped with a warning rather than failing the run; the model
    /// simply does not see them.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        input: AgentRunInput,
        model: Arc<ModelInstance>,
        tool_manager: &ToolManager,
        retrieval_backend: Option<Arc<dyn DatasetRetrieval>>,
        storage: Arc<Storage>,
        queue: Arc<AppQueueManager>,
        cancel: CancelToken,
        config: AgentConfig,
    ) -> Self {
        let mut tools = Vec::new();
        for tool_config in &input.tool_configs {
            match tool_manager.get_agent_tool_runtime(
                &input.tenant_id,
                &input.app_id,
                tool_config,
                input.invoke_from,
            ) {
                Ok(tool) => tools.push(tool),
                Err(e) => {
                    tracing::warn!(
                        tool = %tool_config.selector.tool_name,
                        error = %e,
                        "skipping unresolvable tool"
                    );
                }
            }
        }

        if let (Some(settings), Some(backend)) = (input.retrieval.clone(), retrieval_backend) {
            let callback = Arc::new(QueueRetrievalCallback {
                queue: queue.clone(),
            });
            tools.push(dataset_retriever_tool(
                &input.tenant_id,
                input.invoke_from,
                settings,
                backend,
                Some(callback),
            ));
        }

        let variables = storage.variables.get(&input.conversation_id);

        Self {
            input,
            model,
            storage,
            queue,
            cancel,
            config,
            tools,
            variables,
        }
    }

    pub(crate) fn tool_definitions(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(Tool::definition).collect()
    }

    pub(crate) fn find_tool(&self, name: &str) -> Option<&Tool> {
        self.tools.iter().find(|t| t.name() == name)
    }

    // ── Prompt assembly ────────────────────────────────────────────

    /// Prior turns replayed as prompt messages: each message's query
    /// followed by its reasoning steps rebuilt into assistant/tool pairs.
    pub(crate) fn history_messages(&self) -> Vec<PromptMessage> {
        let mut messages = Vec::new();
        for id in &self.input.prior_message_ids {
            if let Some(record) = self.storage.messages.get(id) {
                messages.push(PromptMessage::user(record.query.clone()));
                let thoughts = self.storage.thoughts.list_for_message(id);
                messages.extend(organize_agent_history(&thoughts));
            }
        }
        messages
    }

    /// The query as a prompt message, with image parts attached when the
    /// model can see them.
    pub(crate) fn user_message(&self) -> PromptMessage {
        if self.input.file_urls.is_empty() || !self.model.supports_vision() {
            return PromptMessage::user(self.input.query.clone());
        }
        let mut parts = vec![ContentPart::Text {
            text: self.input.query.clone(),
        }];
        for url in &self.input.file_urls {
            parts.push(ContentPart::Image {
                url: url.clone(),
                media_type: None,
            });
        }
        PromptMessage {
            role: PromptRole::User,
            content: MessageContent::Parts(parts),
        }
    }

    // ── Thought persistence ────────────────────────────────────────

    /// Insert the row for a new reasoning step and announce it. The
    /// record is re-upserted as the step fills in.
    pub(crate) async fn create_thought(&self) -> Result<AgentThoughtRecord> {
        let position = self.storage.thoughts.next_position(&self.input.message_id);
        let record = AgentThoughtRecord::new(&self.input.message_id, position);
        self.storage.thoughts.upsert(&record)?;
        self.queue
            .publish(QueueEvent::AgentThought {
                thought_id: record.id.clone(),
            })
            .await;
        Ok(record)
    }

    pub(crate) async fn save_thought(&self, record: &AgentThoughtRecord) -> Result<()> {
        self.storage.thoughts.upsert(record)?;
        self.queue
            .publish(QueueEvent::AgentThought {
                thought_id: record.id.clone(),
            })
            .await;
        Ok(())
    }

    // ── Tool dispatch ──────────────────────────────────────────────

    /// Run one tool call, absorbing every failure into the observation.
    ///
    /// An unknown tool name gets the same phrase the engine uses, so
    /// the model can recover on the next iteration either way. File
    /// attachments are announced on the queue, and blobs a tool asked to
    /// save land in the conversation variable pool.
    pub(crate) async fn execute_tool_call(
        &mut self,
        tool_name: &str,
        arguments: Value,
    ) -> ToolCallOutcome {
        let Some(tool) = self.find_tool(tool_name) else {
            let observation = format!("there is not a tool named {tool_name}");
            return ToolCallOutcome {
                meta: serde_json::json!({
                    "time_cost": 0.0,
                    "error": observation,
                    "tool_config": { "tool_name": tool_name },
                }),
                observation,
            };
        };

        let invoked = ToolEngine::agent_invoke(
            tool,
            arguments,
            &self.input.user_id,
            &self.input.message_id,
            &self.storage.files,
            None,
        )
        .await;

        match invoked {
            Ok(result) => {
                for file in &result.files {
                    self.queue
                        .publish(QueueEvent::MessageFile {
                            file_id: file.id.clone(),
                        })
                        .await;
                    if let Some(name) = &file.save_as {
                        // The store accepts any value; a non-object pool
                        // row is reset instead of indexed into.
                        if !self.variables.is_object() {
                            self.variables = Value::Object(serde_json::Map::new());
                        }
                        if let Some(pool) = self.variables.as_object_mut() {
                            pool.insert(name.clone(), Value::String(file.url.clone()));
                        }
                    }
                }
                ToolCallOutcome {
                    observation: result.text,
                    meta: serde_json::to_value(&result.meta).unwrap_or(Value::Null),
                }
            }
            Err(e) => {
                let observation =
                    "tool parameters validation error: please check your tool parameters"
                        .to_owned();
                ToolCallOutcome {
                    meta: serde_json::json!({
                        "time_cost": 0.0,
                        "error": e.to_string(),
                        "tool_config": { "tool_name": tool_name },
                    }),
                    observation,
                }
            }
        }
    }

    // ── End of run ─────────────────────────────────────────────────

    /// Write the variable pool back wholesale and publish the terminal
    /// event with the run's accumulated usage.
    pub(crate) async fn finish(&self, usage: skein_domain::LlmUsage) -> Result<()> {
        self.storage
            .variables
            .set(&self.input.conversation_id, self.variables.clone())
            .map_err(|e| Error::Storage(e.to_string()))?;
        self.queue
            .publish(QueueEvent::MessageEnd {
                usage: (!usage.is_empty()).then_some(usage),
            })
            .await;
        Ok(())
    }
}

/// Bridges retrieval citations onto the event queue.
struct QueueRetrievalCallback {
    queue: Arc<AppQueueManager>,
}

#[async_trait::async_trait]
impl RetrievalCallback for QueueRetrievalCallback {
    async fn on_retrieved(&self, resources: Vec<skein_domain::RetrieverResource>) {
        self.queue
            .publish(QueueEvent::RetrieverResources { resources })
            .await;
    }
}

/// Per-iteration maps keyed by tool name, collected into the thought
/// record's JSON columns.
#[derive(Default)]
pub(crate) struct ToolCallSummary {
    pub names: Vec<String>,
    pub inputs: HashMap<String, Value>,
    pub observations: HashMap<String, Value>,
    pub metas: HashMap<String, Value>,
}

impl ToolCallSummary {
    pub fn record(&mut self, name: &str, input: Value, outcome: &ToolCallOutcome) {
        self.names.push(name.to_owned());
        self.inputs.insert(name.to_owned(), input);
        self.observations.insert(
            name.to_owned(),
            Value::String(outcome.observation.clone()),
        );
        self.metas.insert(name.to_owned(), outcome.meta.clone());
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Fill the tool columns of a thought record.
    pub fn apply_to(&self, record: &mut AgentThoughtRecord) {
        record.tool_name = self.names.join(";");
        record.tool_input = Some(map_value(&self.inputs));
        record.observation = Some(map_value(&self.observations));
        record.tool_meta = Some(map_value(&self.metas));
    }
}

fn map_value(map: &HashMap<String, Value>) -> Value {
    Value::Object(map.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
}
