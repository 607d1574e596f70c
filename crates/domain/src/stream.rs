use serde::{Deserialize, Serialize};
use std::pin::Pin;

use crate::message::ToolCall;

/// A boxed async stream, used for LLM streaming responses.
pub type BoxStream<'a, T> = Pin<Box<dyn futures_core::Stream<Item = T> + Send + 'a>>;

/// Events emitted during LLM streaming (backend-agnostic).
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LlmStreamEvent {
    /// A text token chunk.
    Delta { text: String },

    /// A tool call has started.
    ToolCallStarted { call_id: String, tool_name: String },

    /// Incremental tool call argument data.
    ToolCallDelta { call_id: String, delta: String },

    /// A tool call is complete with full arguments.
    ToolCallFinished {
        call_id: String,
        tool_name: String,
        arguments: serde_json::Value,
    },

    /// Stream is finished.
    Done {
        usage: Option<LlmUsage>,
        finish_reason: Option<String>,
    },
}

/// Token and price accounting for one or more completions.
///
/// Prices are filled from per-model unit pricing when available; totals are
/// additive so per-iteration usages can be folded into a run total.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LlmUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
    #[serde(default)]
    pub prompt_price: f64,
    #[serde(default)]
    pub completion_price: f64,
    #[serde(default)]
    pub total_price: f64,
    #[serde(default)]
    pub latency_ms: u64,
}

impl LlmUsage {
    pub fn from_tokens(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
            ..Default::default()
        }
    }

    /// Apply per-million-token unit pricing.
    pub fn priced(mut self, input_per_1m: f64, output_per_1m: f64) -> Self {
        self.prompt_price = self.prompt_tokens as f64 * input_per_1m / 1_000_000.0;
        self.completion_price = self.completion_tokens as f64 * output_per_1m / 1_000_000.0;
        self.total_price = self.prompt_price + self.completion_price;
        self
    }

    /// Fold another usage into this one (per-iteration accumulation).
    pub fn add(&mut self, other: &LlmUsage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
        self.prompt_price += other.prompt_price;
        self.completion_price += other.completion_price;
        self.total_price += other.total_price;
        self.latency_ms += other.latency_ms;
    }

    pub fn is_empty(&self) -> bool {
        self.total_tokens == 0
    }
}

/// A complete (non-streaming) model result.
#[derive(Debug, Clone, Default)]
pub struct LlmResult {
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
    pub usage: Option<LlmUsage>,
    pub model: String,
    pub finish_reason: Option<String>,
}
