//! Tool layer: resolution, credentials, and execution.
//!
//! Three provider kinds (builtin, API-declared, workflow-as-tool) feed
//! [`ToolManager`], which resolves selectors into runnable [`Tool`]s
//! with decrypted credentials and materialized FORM parameters.
//! [`ToolEngine`] then runs them under the no-failure-escapes contract
//! the agent loop relies on.

pub mod builtin;
pub mod dataset;
pub mod encryption;
pub mod engine;
pub mod error;
pub mod manager;
pub mod provider;
pub mod registry;
pub mod tool;

pub use dataset::{
    dataset_retriever_tool, DatasetRetrieval, RetrievalCallback, RetrievalSettings,
    RetrievedSegment,
};
pub use encryption::ConfigIdentity;
pub use engine::{ToolCallback, ToolEngine, ToolInvokeMeta, ToolInvokeResult};
pub use error::ToolError;
pub use manager::{ToolConfig, ToolManager, ToolSelector};
pub use provider::{
    ApiAuthType, ApiProviderRecord, ApiToolSchema, ProviderStore, ToolProvider,
    WorkflowProviderRecord, WorkflowRunner,
};
pub use registry::{builtin_registry, BuiltinProvider, BuiltinRegistry};
pub use tool::{Tool, ToolExec, ToolRuntime, ToolSpec};
