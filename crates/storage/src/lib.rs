//! Record persistence.
//!
//! Append-only JSONL logs with in-memory maps on top. Incremental record
//! updates are full-row re-upserts; reload replays the log last-line-wins.

pub mod entities;
pub mod stores;

pub use entities::{
    AgentThoughtRecord, ConversationVariablesRecord, MessageFileRecord, MessageRecord,
    MessageStatus,
};
pub use stores::{AgentThoughtStore, MessageFileStore, MessageStore, Storage, VariablesStore};
