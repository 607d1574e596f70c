//! Shared vocabulary for the Skein agent core.
//!
//! Every other crate in the workspace depends on this one: prompt messages,
//! LLM streaming types, tool parameter/identity/response types, retrieval
//! citations, the shared error enum, and the TOML-backed config layer.

pub mod config;
pub mod error;
pub mod message;
pub mod retrieval;
pub mod stream;
pub mod tool;

pub use error::{Error, Result};
pub use message::{ContentPart, MessageContent, PromptMessage, PromptRole, ToolCall};
pub use retrieval::RetrieverResource;
pub use stream::{BoxStream, LlmResult, LlmStreamEvent, LlmUsage};
pub use tool::{
    InvokeFrom, ToolDefinition, ToolIdentity, ToolInvokeFrom, ToolInvokeMessage, ToolParameter,
    ToolParameterForm, ToolParameterOption, ToolParameterType, ToolProviderType,
};
