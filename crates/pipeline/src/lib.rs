//! The response pipeline.
//!
//! Consumes one task's event queue and presents it to the outside
//! world: either a stream of newline-delimited JSON wire responses or a
//! single blocking response, with output moderation applied on the way
//! and the final message row persisted exactly once.

pub mod moderation;
pub mod pipeline;
pub mod responses;
pub mod state;

pub use moderation::{ChunkVerdict, KeywordModeration, NoopModeration, OutputModeration};
pub use pipeline::{BlockingChatResponse, ChatTaskPipeline};
pub use responses::StreamResponse;
pub use state::{ChatTaskState, NodeRun, TaskMetadata, WorkflowTaskState};
