//! End-to-end runs of both reasoning strategies over a scripted model
//! backend, asserting the persisted thoughts and the event stream.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use parking_lot::Mutex;
use serde_json::Value;

use skein_agent::{spawn_agent_run, AgentRunInput, AgentRunner};
use skein_domain::config::{AgentConfig, AgentStrategy, ModelFeature, QueueConfig};
use skein_domain::stream::{BoxStream, LlmResult, LlmStreamEvent, LlmUsage};
use skein_domain::tool::{
    InvokeFrom, ToolIdentity, ToolInvokeMessage, ToolParameter, ToolParameterType,
    ToolProviderType,
};
use skein_domain::ToolCall;
use skein_model::{
    ChatRequest, InvokeError, LlmBackend, ModelInstance, RerankedDocument, SystemClock,
};
use skein_queue::{channel, AppQueueManager, QueueEvent, QueueMessage, StopFlagStore};
use skein_storage::{MessageRecord, Storage};
use skein_tools::{
    BuiltinProvider, BuiltinRegistry, ProviderStore, ToolConfig, ToolError, ToolExec,
    ToolManager, ToolRuntime, ToolSelector, ToolSpec,
};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scripted backend
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct ScriptedBackend {
    turns: Vec<LlmResult>,
    /// Reuse the last turn when the script runs out (for loops that
    /// never terminate on their own).
    repeat_last: bool,
    cursor: AtomicUsize,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedBackend {
    fn new(turns: Vec<LlmResult>) -> Self {
        Self {
            turns,
            repeat_last: false,
            cursor: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    fn repeating(turns: Vec<LlmResult>) -> Self {
        let mut backend = Self::new(turns);
        backend.repeat_last = true;
        backend
    }

    fn next_turn(&self, req: &ChatRequest) -> LlmResult {
        self.requests.lock().push(req.clone());
        let i = self.cursor.fetch_add(1, Ordering::SeqCst);
        if i < self.turns.len() {
            self.turns[i].clone()
        } else if self.repeat_last {
            self.turns.last().cloned().unwrap_or_default()
        } else {
            LlmResult::default()
        }
    }

    fn calls(&self) -> usize {
        self.cursor.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl LlmBackend for ScriptedBackend {
    async fn chat(&self, req: ChatRequest) -> Result<LlmResult, InvokeError> {
        Ok(self.next_turn(&req))
    }

    async fn chat_stream(
        &self,
        req: ChatRequest,
    ) -> Result<BoxStream<'static, Result<LlmStreamEvent, InvokeError>>, InvokeError> {
        let turn = self.next_turn(&req);
        let mut events: Vec<Result<LlmStreamEvent, InvokeError>> = Vec::new();
        if !turn.text.is_empty() {
            // Split mid-text so consumers must reassemble.
            let mid = turn.text.len() / 2;
            let mid = (0..=mid)
                .rev()
                .find(|&i| turn.text.is_char_boundary(i))
                .unwrap_or(0);
            for piece in [&turn.text[..mid], &turn.text[mid..]] {
                if !piece.is_empty() {
                    events.push(Ok(LlmStreamEvent::Delta {
                        text: piece.to_owned(),
                    }));
                }
            }
        }
        for call in &turn.tool_calls {
            events.push(Ok(LlmStreamEvent::ToolCallFinished {
                call_id: call.call_id.clone(),
                tool_name: call.tool_name.clone(),
                arguments: call.arguments.clone(),
            }));
        }
        events.push(Ok(LlmStreamEvent::Done {
            usage: turn.usage.clone(),
            finish_reason: turn.finish_reason.clone(),
        }));
        Ok(Box::pin(futures_util::stream::iter(events)))
    }

    async fn embeddings(&self, _input: Vec<String>) -> Result<Vec<Vec<f32>>, InvokeError> {
        Err(InvokeError::BadRequest("not scripted".into()))
    }

    async fn rerank(
        &self,
        _query: String,
        _documents: Vec<String>,
        _top_n: Option<usize>,
    ) -> Result<Vec<RerankedDocument>, InvokeError> {
        Err(InvokeError::BadRequest("not scripted".into()))
    }

    fn backend_id(&self) -> &str {
        "scripted"
    }
}

struct FailingBackend;

#[async_trait::async_trait]
impl LlmBackend for FailingBackend {
    async fn chat(&self, _req: ChatRequest) -> Result<LlmResult, InvokeError> {
        Err(InvokeError::BadRequest("model rejected the request".into()))
    }

    async fn chat_stream(
        &self,
        _req: ChatRequest,
    ) -> Result<BoxStream<'static, Result<LlmStreamEvent, InvokeError>>, InvokeError> {
        Err(InvokeError::BadRequest("model rejected the request".into()))
    }

    async fn embeddings(&self, _input: Vec<String>) -> Result<Vec<Vec<f32>>, InvokeError> {
        Err(InvokeError::BadRequest("not supported".into()))
    }

    async fn rerank(
        &self,
        _query: String,
        _documents: Vec<String>,
        _top_n: Option<usize>,
    ) -> Result<Vec<RerankedDocument>, InvokeError> {
        Err(InvokeError::BadRequest("not supported".into()))
    }

    fn backend_id(&self) -> &str {
        "failing"
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Stub tools
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct SearchExec;

#[async_trait::async_trait]
impl ToolExec for SearchExec {
    async fn invoke(
        &self,
        _runtime: &ToolRuntime,
        parameters: Value,
        _user_id: &str,
    ) -> Result<Vec<ToolInvokeMessage>, ToolError> {
        let q = parameters
            .get("q")
            .and_then(|v| v.as_str())
            .unwrap_or_default();
        Ok(vec![ToolInvokeMessage::text(format!("result-{q}"))])
    }
}

struct ArchiveExec;

#[async_trait::async_trait]
impl ToolExec for ArchiveExec {
    async fn invoke(
        &self,
        _runtime: &ToolRuntime,
        _parameters: Value,
        _user_id: &str,
    ) -> Result<Vec<ToolInvokeMessage>, ToolError> {
        Ok(vec![ToolInvokeMessage::Blob {
            data: b"archived".to_vec(),
            mime_type: Some("application/zip".into()),
            save_as: Some("archive_url".into()),
        }])
    }
}

struct BoomExec;

#[async_trait::async_trait]
impl ToolExec for BoomExec {
    async fn invoke(
        &self,
        _runtime: &ToolRuntime,
        _parameters: Value,
        _user_id: &str,
    ) -> Result<Vec<ToolInvokeMessage>, ToolError> {
        Err(ToolError::Invoke("backend exploded".into()))
    }
}

fn spec(name: &str, params: Vec<ToolParameter>) -> ToolSpec {
    ToolSpec {
        identity: ToolIdentity {
            name: name.into(),
            label: name.into(),
            provider: "testing".into(),
            icon: None,
        },
        description: format!("{name} stub"),
        parameters: params,
    }
}

fn test_manager() -> ToolManager {
    let provider = BuiltinProvider::new("testing", "Testing")
        .with_tool(
            spec(
                "search",
                vec![ToolParameter::new("q", ToolParameterType::String).required()],
            ),
            Arc::new(SearchExec),
        )
        .with_tool(spec("boom", vec![]), Arc::new(BoomExec))
        .with_tool(spec("archive", vec![]), Arc::new(ArchiveExec));
    ToolManager::new(Arc::new(ProviderStore::new()), 3)
        .with_registry(Arc::new(BuiltinRegistry::with_providers(vec![provider])))
}

fn tool_config(name: &str) -> ToolConfig {
    ToolConfig {
        selector: ToolSelector {
            provider_type: ToolProviderType::Builtin,
            provider_id: "testing".into(),
            tool_name: name.into(),
        },
        parameters: HashMap::new(),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Harness
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn model(features: Vec<ModelFeature>, backend: Arc<dyn LlmBackend>) -> Arc<ModelInstance> {
    Arc::new(ModelInstance::new(
        "test",
        "test-model",
        features,
        vec![backend],
        Duration::from_secs(60),
        Arc::new(SystemClock),
    ))
}

fn queue_config() -> QueueConfig {
    QueueConfig {
        capacity: 64,
        poll_timeout_ms: 10,
        ping_interval_secs: 600,
        hard_limit_secs: 1200,
        stop_flag_ttl_secs: 600,
    }
}

struct Harness {
    _dir: tempfile::TempDir,
    storage: Arc<Storage>,
    message_id: String,
}

impl Harness {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(Storage::open(dir.path()).unwrap());
        let message = MessageRecord::new("conv-1", "what is x?");
        storage.messages.upsert(&message).unwrap();
        Self {
            _dir: dir,
            storage,
            message_id: message.id,
        }
    }

    fn runner(
        &self,
        strategy: AgentStrategy,
        max_iterations: u32,
        backend: Arc<dyn LlmBackend>,
        features: Vec<ModelFeature>,
        tools: Vec<ToolConfig>,
    ) -> (AgentRunner, skein_queue::QueueListener) {
        let (manager, listener, cancel) =
            channel("task-1", queue_config(), Arc::new(StopFlagStore::new(Duration::from_secs(60))));
        let queue: Arc<AppQueueManager> = Arc::new(manager);

        let input = AgentRunInput {
            task_id: "task-1".into(),
            tenant_id: "t1".into(),
            app_id: "app-1".into(),
            conversation_id: "conv-1".into(),
            message_id: self.message_id.clone(),
            query: "what is x?".into(),
            user_id: "u1".into(),
            instruction: "You are a helpful assistant.".into(),
            invoke_from: InvokeFrom::Debugger,
            tool_configs: tools,
            retrieval: None,
            prior_message_ids: Vec::new(),
            file_urls: Vec::new(),
        };
        let config = AgentConfig {
            max_iterations,
            strategy,
            max_workflow_call_depth: 3,
        };
        let runner = AgentRunner::new(
            input,
            model(features, backend),
            &test_manager(),
            None,
            self.storage.clone(),
            queue,
            cancel,
            config,
        );
        (runner, listener)
    }
}

async fn run_and_collect(
    runner: AgentRunner,
    listener: skein_queue::QueueListener,
) -> Vec<QueueMessage> {
    let handle = spawn_agent_run(runner);
    let events: Vec<QueueMessage> = listener.listen().collect().await;
    handle.await.unwrap();
    events
}

fn chunk_text(events: &[QueueMessage]) -> String {
    events
        .iter()
        .filter_map(|m| match &m.event {
            QueueEvent::LlmChunk { text } => Some(text.as_str()),
            _ => None,
        })
        .collect()
}

fn agent_message_text(events: &[QueueMessage]) -> String {
    events
        .iter()
        .filter_map(|m| match &m.event {
            QueueEvent::AgentMessage { text } => Some(text.as_str()),
            _ => None,
        })
        .collect()
}

fn terminal_count(events: &[QueueMessage]) -> usize {
    events.iter().filter(|m| m.event.is_terminal()).count()
}

fn fc_tool_turn(calls: Vec<ToolCall>, usage: LlmUsage) -> LlmResult {
    LlmResult {
        text: String::new(),
        tool_calls: calls,
        usage: Some(usage),
        model: "test-model".into(),
        finish_reason: Some("tool_calls".into()),
    }
}

fn fc_text_turn(text: &str, usage: LlmUsage) -> LlmResult {
    LlmResult {
        text: text.into(),
        tool_calls: Vec::new(),
        usage: Some(usage),
        model: "test-model".into(),
        finish_reason: Some("stop".into()),
    }
}

fn search_call(q: &str) -> ToolCall {
    ToolCall {
        call_id: "c1".into(),
        tool_name: "search".into(),
        arguments: serde_json::json!({ "q": q }),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Function calling
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn fc_tool_round_then_answer() {
    let harness = Harness::new();
    let backend = Arc::new(ScriptedBackend::new(vec![
        fc_tool_turn(vec![search_call("x")], LlmUsage::from_tokens(10, 5)),
        fc_text_turn("done", LlmUsage::from_tokens(20, 5)),
    ]));
    let (runner, listener) = harness.runner(
        AgentStrategy::FunctionCalling,
        3,
        backend.clone(),
        vec![ModelFeature::ToolCall, ModelFeature::StreamToolCall],
        vec![tool_config("search")],
    );

    let events = run_and_collect(runner, listener).await;

    assert_eq!(chunk_text(&events), "done\n");
    assert_eq!(terminal_count(&events), 1);
    assert_eq!(backend.calls(), 2);

    let thoughts = harness.storage.thoughts.list_for_message(&harness.message_id);
    assert_eq!(thoughts.len(), 2);
    assert_eq!(thoughts[0].position, 1);
    assert_eq!(thoughts[0].tool_name, "search");
    assert_eq!(
        thoughts[0].observation.as_ref().unwrap()["search"],
        "result-x"
    );
    assert_eq!(
        thoughts[0].tool_input.as_ref().unwrap()["search"],
        serde_json::json!({"q": "x"})
    );
    assert_eq!(thoughts[1].answer, "done");

    let end = events
        .iter()
        .find_map(|m| match &m.event {
            QueueEvent::MessageEnd { usage } => usage.as_ref(),
            _ => None,
        })
        .expect("usage on message end");
    assert_eq!(end.prompt_tokens, 30);
    assert_eq!(end.completion_tokens, 10);
}

#[tokio::test]
async fn fc_loop_is_capped_and_final_round_strips_tools() {
    let harness = Harness::new();
    let backend = Arc::new(ScriptedBackend::repeating(vec![fc_tool_turn(
        vec![search_call("again")],
        LlmUsage::from_tokens(5, 2),
    )]));
    let (runner, listener) = harness.runner(
        AgentStrategy::FunctionCalling,
        2,
        backend.clone(),
        vec![ModelFeature::ToolCall],
        vec![tool_config("search")],
    );

    let events = run_and_collect(runner, listener).await;

    // max_iterations 2 -> 2 tool rounds plus one forced-answer round.
    assert_eq!(backend.calls(), 3);
    assert_eq!(terminal_count(&events), 1);
    assert_eq!(
        harness.storage.thoughts.list_for_message(&harness.message_id).len(),
        3
    );

    let requests = backend.requests.lock();
    assert!(!requests[0].tools.is_empty());
    assert!(!requests[1].tools.is_empty());
    assert!(requests[2].tools.is_empty());
}

#[tokio::test]
async fn fc_tool_failure_is_fed_back_not_fatal() {
    let harness = Harness::new();
    let backend = Arc::new(ScriptedBackend::new(vec![
        fc_tool_turn(
            vec![ToolCall {
                call_id: "c1".into(),
                tool_name: "boom".into(),
                arguments: serde_json::json!({}),
            }],
            LlmUsage::from_tokens(5, 2),
        ),
        fc_text_turn("recovered", LlmUsage::from_tokens(5, 2)),
    ]));
    let (runner, listener) = harness.runner(
        AgentStrategy::FunctionCalling,
        3,
        backend,
        vec![ModelFeature::ToolCall],
        vec![tool_config("search"), tool_config("boom")],
    );

    let events = run_and_collect(runner, listener).await;

    assert!(matches!(
        events.last().unwrap().event,
        QueueEvent::MessageEnd { .. }
    ));

    let thoughts = harness.storage.thoughts.list_for_message(&harness.message_id);
    assert_eq!(
        thoughts[0].observation.as_ref().unwrap()["boom"],
        "tool invoke error: backend exploded"
    );
    let meta_error = thoughts[0].tool_meta.as_ref().unwrap()["boom"]["error"]
        .as_str()
        .unwrap()
        .to_owned();
    assert!(meta_error.contains("backend exploded"));
    assert_eq!(thoughts[1].answer, "recovered");
}

#[tokio::test]
async fn fc_unknown_tool_name_is_absorbed() {
    let harness = Harness::new();
    let backend = Arc::new(ScriptedBackend::new(vec![
        fc_tool_turn(
            vec![ToolCall {
                call_id: "c1".into(),
                tool_name: "nonexistent".into(),
                arguments: serde_json::json!({}),
            }],
            LlmUsage::from_tokens(5, 2),
        ),
        fc_text_turn("ok", LlmUsage::from_tokens(5, 2)),
    ]));
    let (runner, listener) = harness.runner(
        AgentStrategy::FunctionCalling,
        3,
        backend,
        vec![ModelFeature::ToolCall],
        vec![tool_config("search")],
    );

    let events = run_and_collect(runner, listener).await;
    assert_eq!(terminal_count(&events), 1);

    let thoughts = harness.storage.thoughts.list_for_message(&harness.message_id);
    assert_eq!(
        thoughts[0].observation.as_ref().unwrap()["nonexistent"],
        "there is not a tool named nonexistent"
    );
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Chain of thought
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn cot_final_answer_in_first_round() {
    let harness = Harness::new();
    let backend = Arc::new(ScriptedBackend::new(vec![fc_text_turn(
        "Thought: I can answer directly.\nAction:\n```json\n{\"action\": \"Final Answer\", \"action_input\": \"42\"}\n```",
        LlmUsage::from_tokens(12, 8),
    )]));
    let (runner, listener) = harness.runner(
        AgentStrategy::ChainOfThought,
        3,
        backend.clone(),
        vec![],
        vec![tool_config("search")],
    );

    let events = run_and_collect(runner, listener).await;

    assert_eq!(backend.calls(), 1);
    assert_eq!(terminal_count(&events), 1);

    let streamed = agent_message_text(&events);
    assert!(streamed.contains("I can answer directly."));
    assert!(streamed.ends_with("42"));
    assert!(!streamed.contains("action_input"));

    let thoughts = harness.storage.thoughts.list_for_message(&harness.message_id);
    assert_eq!(thoughts.len(), 1);
    assert_eq!(thoughts[0].answer, "42");
    assert!(thoughts[0].tool_name.is_empty());
}

#[tokio::test]
async fn cot_tool_round_feeds_observation_into_next_prompt() {
    let harness = Harness::new();
    let backend = Arc::new(ScriptedBackend::new(vec![
        fc_text_turn(
            "Thought: need to search.\nAction:\n```json\n{\"action\": \"search\", \"action_input\": {\"q\": \"x\"}}\n```",
            LlmUsage::from_tokens(10, 6),
        ),
        fc_text_turn(
            "Thought: got it.\nAction:\n```json\n{\"action\": \"Final Answer\", \"action_input\": \"it is result-x\"}\n```",
            LlmUsage::from_tokens(15, 6),
        ),
    ]));
    let (runner, listener) = harness.runner(
        AgentStrategy::ChainOfThought,
        3,
        backend.clone(),
        vec![],
        vec![tool_config("search")],
    );

    let events = run_and_collect(runner, listener).await;
    assert_eq!(terminal_count(&events), 1);

    let thoughts = harness.storage.thoughts.list_for_message(&harness.message_id);
    assert_eq!(thoughts.len(), 2);
    assert_eq!(thoughts[0].tool_name, "search");
    assert_eq!(
        thoughts[0].observation.as_ref().unwrap()["search"],
        "result-x"
    );
    assert_eq!(thoughts[1].answer, "it is result-x");

    // The second prompt must carry the first round's scratchpad.
    let requests = backend.requests.lock();
    let rendered = serde_json::to_string(&requests[1].messages).unwrap();
    assert!(rendered.contains("Observation: result-x"));
}

#[tokio::test]
async fn cot_without_action_ends_with_empty_answer() {
    let harness = Harness::new();
    let backend = Arc::new(ScriptedBackend::new(vec![fc_text_turn(
        "Thought: rambling with no action at all",
        LlmUsage::from_tokens(5, 5),
    )]));
    let (runner, listener) = harness.runner(
        AgentStrategy::ChainOfThought,
        3,
        backend,
        vec![],
        vec![],
    );

    let events = run_and_collect(runner, listener).await;
    assert_eq!(terminal_count(&events), 1);
    assert!(matches!(
        events.last().unwrap().event,
        QueueEvent::MessageEnd { .. }
    ));

    let thoughts = harness.storage.thoughts.list_for_message(&harness.message_id);
    assert_eq!(thoughts.len(), 1);
    assert!(thoughts[0].answer.is_empty());
    assert!(thoughts[0].thought.contains("rambling"));
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Worker failure
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn model_failure_becomes_exactly_one_error_event() {
    let harness = Harness::new();
    let (runner, listener) = harness.runner(
        AgentStrategy::FunctionCalling,
        3,
        Arc::new(FailingBackend),
        vec![ModelFeature::ToolCall],
        vec![],
    );

    let events = run_and_collect(runner, listener).await;

    assert_eq!(terminal_count(&events), 1);
    let QueueEvent::Error { message } = &events.last().unwrap().event else {
        panic!("expected a terminal error");
    };
    assert!(message.contains("model rejected the request"));
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Misc plumbing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn saved_file_recovers_a_non_object_variable_pool() {
    let harness = Harness::new();
    // A pool row can hold any value; a run must not choke on a
    // non-object one.
    harness
        .storage
        .variables
        .set("conv-1", serde_json::json!("corrupted"))
        .unwrap();

    let backend = Arc::new(ScriptedBackend::new(vec![
        fc_tool_turn(
            vec![ToolCall {
                call_id: "c1".into(),
                tool_name: "archive".into(),
                arguments: serde_json::json!({}),
            }],
            LlmUsage::from_tokens(5, 2),
        ),
        fc_text_turn("saved", LlmUsage::from_tokens(5, 2)),
    ]));
    let (runner, listener) = harness.runner(
        AgentStrategy::FunctionCalling,
        3,
        backend,
        vec![ModelFeature::ToolCall],
        vec![tool_config("archive")],
    );

    let events = run_and_collect(runner, listener).await;
    assert!(matches!(
        events.last().unwrap().event,
        QueueEvent::MessageEnd { .. }
    ));

    let pool = harness.storage.variables.get("conv-1");
    let url = pool["archive_url"].as_str().expect("saved variable");
    assert!(url.starts_with("blob://"));
}

#[tokio::test]
async fn unresolvable_tools_are_skipped_not_fatal() {
    let harness = Harness::new();
    let backend = Arc::new(ScriptedBackend::new(vec![fc_text_turn(
        "hello",
        LlmUsage::from_tokens(3, 1),
    )]));
    let (runner, listener) = harness.runner(
        AgentStrategy::FunctionCalling,
        3,
        backend.clone(),
        vec![ModelFeature::ToolCall],
        vec![tool_config("search"), tool_config("does_not_exist")],
    );

    let events = run_and_collect(runner, listener).await;
    assert_eq!(terminal_count(&events), 1);

    // Only the resolvable tool was offered to the model.
    let requests = backend.requests.lock();
    let offered: Vec<&str> = requests[0].tools.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(offered, vec!["search"]);
}
