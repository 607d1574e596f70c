use skein_domain::stream::{BoxStream, LlmResult, LlmStreamEvent};
use skein_domain::tool::ToolDefinition;
use skein_domain::PromptMessage;

use crate::error::InvokeError;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A backend-agnostic chat completion request.
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    /// The conversation messages to send.
    pub messages: Vec<PromptMessage>,
    /// Tool definitions the model may invoke. Empty = no tools offered.
    pub tools: Vec<ToolDefinition>,
    /// Stop sequences.
    pub stop: Vec<String>,
    /// Sampling temperature. `None` lets the backend choose.
    pub temperature: Option<f32>,
    /// Maximum tokens in the response. `None` lets the backend choose.
    pub max_tokens: Option<u32>,
    /// End-user identifier forwarded for abuse attribution.
    pub user: Option<String>,
}

/// One reranked document: its index in the input list plus a relevance
/// score, ordered best-first.
#[derive(Debug, Clone)]
pub struct RerankedDocument {
    pub index: usize,
    pub score: f32,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Core backend trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Trait every concrete model adapter implements. One instance is bound
/// to exactly one credential set; rotation happens a level up in
/// [`crate::ModelInstance`].
#[async_trait::async_trait]
pub trait LlmBackend: Send + Sync {
    /// Send a chat completion request and wait for the full response.
    async fn chat(&self, req: ChatRequest) -> Result<LlmResult, InvokeError>;

    /// Send a chat completion request and return a stream of events.
    async fn chat_stream(
        &self,
        req: ChatRequest,
    ) -> Result<BoxStream<'static, Result<LlmStreamEvent, InvokeError>>, InvokeError>;

    /// Generate one embedding vector per input text.
    async fn embeddings(&self, input: Vec<String>) -> Result<Vec<Vec<f32>>, InvokeError>;

    /// Rerank documents against a query, best-first.
    async fn rerank(
        &self,
        query: String,
        documents: Vec<String>,
        top_n: Option<usize>,
    ) -> Result<Vec<RerankedDocument>, InvokeError>;

    /// A unique identifier for this backend instance (credential-set name).
    fn backend_id(&self) -> &str;
}
