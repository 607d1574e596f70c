//! Queue-to-wire translation, persistence, and moderation behavior of
//! the chat pipeline.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;

use skein_domain::config::{ModelFeature, ModerationConfig, QueueConfig};
use skein_domain::stream::{BoxStream, LlmResult, LlmStreamEvent, LlmUsage};
use skein_model::{
    ChatRequest, InvokeError, LlmBackend, ModelInstance, RerankedDocument, SystemClock,
};
use skein_pipeline::{ChatTaskPipeline, StreamResponse};
use skein_queue::{channel, AppQueueManager, QueueEvent, QueueListener, StopFlagStore, StopReason};
use skein_storage::{AgentThoughtRecord, MessageRecord, MessageStatus, Storage};

struct NullBackend;

#[async_trait::async_trait]
impl LlmBackend for NullBackend {
    async fn chat(&self, _req: ChatRequest) -> Result<LlmResult, InvokeError> {
        Err(InvokeError::BadRequest("unused".into()))
    }

    async fn chat_stream(
        &self,
        _req: ChatRequest,
    ) -> Result<BoxStream<'static, Result<LlmStreamEvent, InvokeError>>, InvokeError> {
        Err(InvokeError::BadRequest("unused".into()))
    }

    async fn embeddings(&self, _input: Vec<String>) -> Result<Vec<Vec<f32>>, InvokeError> {
        Err(InvokeError::BadRequest("unused".into()))
    }

    async fn rerank(
        &self,
        _query: String,
        _documents: Vec<String>,
        _top_n: Option<usize>,
    ) -> Result<Vec<RerankedDocument>, InvokeError> {
        Err(InvokeError::BadRequest("unused".into()))
    }

    fn backend_id(&self) -> &str {
        "null"
    }
}

fn model() -> Arc<ModelInstance> {
    let features: Vec<ModelFeature> = Vec::new();
    Arc::new(ModelInstance::new(
        "test",
        "test-model",
        features,
        vec![Arc::new(NullBackend) as Arc<dyn LlmBackend>],
        Duration::from_secs(60),
        Arc::new(SystemClock),
    ))
}

struct Harness {
    _dir: tempfile::TempDir,
    storage: Arc<Storage>,
    message_id: String,
    queue: AppQueueManager,
    listener: Option<QueueListener>,
}

impl Harness {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(Storage::open(dir.path()).unwrap());
        let message = MessageRecord::new("conv-1", "what is x?");
        storage.messages.upsert(&message).unwrap();

        let config = QueueConfig {
            capacity: 64,
            poll_timeout_ms: 10,
            ping_interval_secs: 600,
            hard_limit_secs: 1200,
            stop_flag_ttl_secs: 600,
        };
        let (queue, listener, _cancel) = channel(
            "task-1",
            config,
            Arc::new(StopFlagStore::new(Duration::from_secs(60))),
        );
        Self {
            _dir: dir,
            storage,
            message_id: message.id,
            queue,
            listener: Some(listener),
        }
    }

    fn pipeline(&mut self, moderation: &ModerationConfig) -> (ChatTaskPipeline, QueueListener) {
        let pipeline = ChatTaskPipeline::new(
            "task-1",
            self.message_id.clone(),
            model(),
            self.storage.clone(),
            moderation,
        )
        .unwrap();
        (pipeline, self.listener.take().unwrap())
    }
}

fn message_text(responses: &[StreamResponse]) -> String {
    responses
        .iter()
        .filter_map(|r| match r {
            StreamResponse::Message { answer, .. }
            | StreamResponse::AgentMessage { answer, .. } => Some(answer.as_str()),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn chunks_stream_through_and_message_persists_once() {
    let mut harness = Harness::new();
    let (pipeline, listener) = harness.pipeline(&ModerationConfig::default());

    harness
        .queue
        .publish(QueueEvent::LlmChunk { text: "hel".into() })
        .await;
    harness
        .queue
        .publish(QueueEvent::LlmChunk { text: "lo".into() })
        .await;
    harness
        .queue
        .publish(QueueEvent::MessageEnd {
            usage: Some(LlmUsage::from_tokens(7, 3)),
        })
        .await;

    let responses: Vec<StreamResponse> = pipeline.process(listener).collect().await;

    assert_eq!(message_text(&responses), "hello");
    let StreamResponse::MessageEnd { metadata, id, .. } = responses.last().unwrap() else {
        panic!("expected message end");
    };
    assert_eq!(id, &harness.message_id);
    assert_eq!(metadata["usage"]["total_tokens"], 10);

    let record = harness.storage.messages.get(&harness.message_id).unwrap();
    assert_eq!(record.answer, "hello");
    assert_eq!(record.status, MessageStatus::Normal);
    assert_eq!(record.usage.as_ref().unwrap().prompt_tokens, 7);
}

#[tokio::test]
async fn agent_thoughts_are_refetched_and_vanished_rows_skipped() {
    let mut harness = Harness::new();
    let (pipeline, listener) = harness.pipeline(&ModerationConfig::default());

    let mut thought = AgentThoughtRecord::new(&harness.message_id, 1);
    thought.thought = "looking it up".into();
    thought.tool_name = "search".into();
    thought.observation = Some(serde_json::json!({"search": "found"}));
    harness.storage.thoughts.upsert(&thought).unwrap();

    harness
        .queue
        .publish(QueueEvent::AgentThought {
            thought_id: thought.id.clone(),
        })
        .await;
    harness
        .queue
        .publish(QueueEvent::AgentThought {
            thought_id: "gone".into(),
        })
        .await;
    harness
        .queue
        .publish(QueueEvent::MessageEnd { usage: None })
        .await;

    let responses: Vec<StreamResponse> = pipeline.process(listener).collect().await;

    let thoughts: Vec<&StreamResponse> = responses
        .iter()
        .filter(|r| matches!(r, StreamResponse::AgentThought { .. }))
        .collect();
    assert_eq!(thoughts.len(), 1);
    let StreamResponse::AgentThought {
        tool, observation, ..
    } = thoughts[0]
    else {
        unreachable!();
    };
    assert_eq!(tool, "search");
    assert_eq!(observation["search"], "found");
}

#[tokio::test]
async fn moderation_hit_replaces_answer_and_stops() {
    let mut harness = Harness::new();
    let moderation = ModerationConfig {
        enabled: true,
        keywords: vec!["secret".into()],
        replacement: "[removed]".into(),
    };
    let (pipeline, listener) = harness.pipeline(&moderation);

    harness
        .queue
        .publish(QueueEvent::LlmChunk {
            text: "the sec".into(),
        })
        .await;
    harness
        .queue
        .publish(QueueEvent::LlmChunk {
            text: "ret plan".into(),
        })
        .await;
    // The worker may keep publishing; the pipeline has already stopped.
    harness
        .queue
        .publish(QueueEvent::MessageEnd { usage: None })
        .await;

    let responses: Vec<StreamResponse> = pipeline.process(listener).collect().await;

    assert!(responses.iter().any(|r| matches!(
        r,
        StreamResponse::MessageReplace { answer, .. } if answer == "[removed]"
    )));
    assert!(matches!(
        responses.last().unwrap(),
        StreamResponse::MessageEnd { .. }
    ));
    assert_eq!(
        responses
            .iter()
            .filter(|r| matches!(r, StreamResponse::MessageEnd { .. } | StreamResponse::Error { .. }))
            .count(),
        1
    );

    let record = harness.storage.messages.get(&harness.message_id).unwrap();
    assert_eq!(record.answer, "[removed]");
    assert_eq!(record.status, MessageStatus::Stopped);
}

#[tokio::test]
async fn user_stop_backfills_both_token_counts() {
    let mut harness = Harness::new();
    let (pipeline, listener) = harness.pipeline(&ModerationConfig::default());

    harness
        .queue
        .publish(QueueEvent::LlmChunk {
            text: "partial".into(),
        })
        .await;
    harness
        .queue
        .publish(QueueEvent::Stop {
            reason: StopReason::UserManual,
        })
        .await;

    let responses: Vec<StreamResponse> = pipeline.process(listener).collect().await;
    assert!(matches!(
        responses.last().unwrap(),
        StreamResponse::MessageEnd { .. }
    ));

    let record = harness.storage.messages.get(&harness.message_id).unwrap();
    assert_eq!(record.status, MessageStatus::Stopped);
    let usage = record.usage.unwrap();
    // "what is x?" is 10 chars -> 3 estimated prompt tokens;
    // "partial" is 7 chars -> 2 estimated completion tokens.
    assert_eq!(usage.prompt_tokens, 3);
    assert_eq!(usage.completion_tokens, 2);
    assert_eq!(usage.total_tokens, 5);
}

#[tokio::test]
async fn annotation_reply_overrides_answer_and_skips_counting() {
    let mut harness = Harness::new();
    let (pipeline, listener) = harness.pipeline(&ModerationConfig::default());

    harness
        .queue
        .publish(QueueEvent::AnnotationReply {
            annotation_id: "ann-1".into(),
            content: "canned answer".into(),
        })
        .await;
    harness
        .queue
        .publish(QueueEvent::Stop {
            reason: StopReason::AnnotationReply,
        })
        .await;

    let responses: Vec<StreamResponse> = pipeline.process(listener).collect().await;

    assert!(responses.iter().any(|r| matches!(
        r,
        StreamResponse::MessageReplace { answer, .. } if answer == "canned answer"
    )));
    let StreamResponse::MessageEnd { metadata, .. } = responses.last().unwrap() else {
        panic!("expected message end");
    };
    assert_eq!(metadata["annotation_reply_id"], "ann-1");
    assert_eq!(metadata["usage"]["total_tokens"], 0);

    let record = harness.storage.messages.get(&harness.message_id).unwrap();
    assert_eq!(record.answer, "canned answer");
}

#[tokio::test]
async fn worker_error_marks_message_and_ends_stream() {
    let mut harness = Harness::new();
    let (pipeline, listener) = harness.pipeline(&ModerationConfig::default());

    harness
        .queue
        .publish(QueueEvent::Error {
            message: "model exploded".into(),
        })
        .await;

    let responses: Vec<StreamResponse> = pipeline.process(listener).collect().await;

    assert_eq!(responses.len(), 1);
    let StreamResponse::Error { message, .. } = &responses[0] else {
        panic!("expected an error response");
    };
    assert!(message.contains("model exploded"));

    let record = harness.storage.messages.get(&harness.message_id).unwrap();
    assert_eq!(record.status, MessageStatus::Error);
    assert!(record.error.as_deref().unwrap().contains("model exploded"));
}

#[tokio::test]
async fn blocking_mode_returns_final_answer() {
    let mut harness = Harness::new();
    let (pipeline, listener) = harness.pipeline(&ModerationConfig::default());

    harness
        .queue
        .publish(QueueEvent::LlmChunk {
            text: "hello there".into(),
        })
        .await;
    harness
        .queue
        .publish(QueueEvent::MessageEnd {
            usage: Some(LlmUsage::from_tokens(4, 2)),
        })
        .await;

    let response = pipeline.blocking(listener).await.unwrap();
    assert_eq!(response.answer, "hello there");
    assert_eq!(response.metadata["usage"]["total_tokens"], 6);
}

#[tokio::test]
async fn blocking_mode_raises_worker_errors() {
    let mut harness = Harness::new();
    let (pipeline, listener) = harness.pipeline(&ModerationConfig::default());

    harness
        .queue
        .publish(QueueEvent::Error {
            message: "model exploded".into(),
        })
        .await;

    let err = pipeline.blocking(listener).await.unwrap_err();
    assert!(err.to_string().contains("model exploded"));
}
