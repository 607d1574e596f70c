//! Model access layer.
//!
//! [`ModelInstance`] is the sole LLM entry point for the rest of the
//! workspace: it wraps one provider+model deployment, rotates across its
//! configured credential sets on rate-limit/auth/connection errors, and
//! exposes chat (blocking + streaming), embeddings, and rerank.

pub mod backend;
pub mod balancer;
pub mod error;
pub mod instance;
pub mod openai;
mod sse;

pub use backend::{ChatRequest, LlmBackend, RerankedDocument};
pub use balancer::{Clock, LoadBalancer, SystemClock};
pub use error::InvokeError;
pub use instance::ModelInstance;
pub use openai::OpenAiCompatBackend;
