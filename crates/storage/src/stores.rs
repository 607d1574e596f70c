//! JSONL-backed record stores.
//!
//! Each store keeps a full in-memory map guarded by a `parking_lot`
//! read-write lock, and appends every upsert as one JSON line to its
//! log file. Loading replays the log with last-line-wins semantics, so
//! an incremental row update is just another append of the full record.
//!
//! Concurrent runs over the same conversation are not guarded against;
//! the variable pool is last-writer-wins on purpose.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;

use skein_domain::error::{Error, Result};

use crate::entities::{
    AgentThoughtRecord, ConversationVariablesRecord, MessageFileRecord, MessageRecord,
};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// JSONL plumbing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn append_line<T: Serialize>(path: &Path, record: &T) -> Result<()> {
    let mut line = serde_json::to_string(record)?;
    line.push('\n');
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(Error::Io)?;
    file.write_all(line.as_bytes()).map_err(Error::Io)?;
    Ok(())
}

/// Replay a JSONL log into a map keyed by `key(record)`, last line wins.
/// Unparseable lines are skipped with a warning rather than failing the
/// whole load.
fn replay<T, K, F>(path: &Path, key: F) -> Result<HashMap<K, T>>
where
    T: DeserializeOwned,
    K: std::hash::Hash + Eq,
    F: Fn(&T) -> K,
{
    let mut map = HashMap::new();
    if !path.exists() {
        return Ok(map);
    }
    let raw = std::fs::read_to_string(path).map_err(Error::Io)?;
    for line in raw.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<T>(line) {
            Ok(record) => {
                map.insert(key(&record), record);
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "skipping bad record line");
            }
        }
    }
    Ok(map)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Message store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct MessageStore {
    path: PathBuf,
    messages: RwLock<HashMap<String, MessageRecord>>,
}

impl MessageStore {
    pub fn open(dir: &Path) -> Result<Self> {
        let path = dir.join("messages.jsonl");
        let messages = replay(&path, |m: &MessageRecord| m.id.clone())?;
        Ok(Self {
            path,
            messages: RwLock::new(messages),
        })
    }

    pub fn get(&self, id: &str) -> Option<MessageRecord> {
        self.messages.read().get(id).cloned()
    }

    /// Full-row insert or update.
    pub fn upsert(&self, record: &MessageRecord) -> Result<()> {
        append_line(&self.path, record)?;
        self.messages
            .write()
            .insert(record.id.clone(), record.clone());
        Ok(())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Agent thought store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct AgentThoughtStore {
    path: PathBuf,
    thoughts: RwLock<HashMap<String, AgentThoughtRecord>>,
}

impl AgentThoughtStore {
    pub fn open(dir: &Path) -> Result<Self> {
        let path = dir.join("agent_thoughts.jsonl");
        let thoughts = replay(&path, |t: &AgentThoughtRecord| t.id.clone())?;
        Ok(Self {
            path,
            thoughts: RwLock::new(thoughts),
        })
    }

    pub fn get(&self, id: &str) -> Option<AgentThoughtRecord> {
        self.thoughts.read().get(id).cloned()
    }

    /// Full-row insert or update. Incremental fills of a step re-upsert
    /// the whole record.
    pub fn upsert(&self, record: &AgentThoughtRecord) -> Result<()> {
        append_line(&self.path, record)?;
        self.thoughts
            .write()
            .insert(record.id.clone(), record.clone());
        Ok(())
    }

    /// The next position for a new thought of this message: one past the
    /// highest already recorded.
    pub fn next_position(&self, message_id: &str) -> u32 {
        self.thoughts
            .read()
            .values()
            .filter(|t| t.message_id == message_id)
            .map(|t| t.position)
            .max()
            .unwrap_or(0)
            + 1
    }

    /// All thoughts for a message, ordered by position.
    pub fn list_for_message(&self, message_id: &str) -> Vec<AgentThoughtRecord> {
        let mut rows: Vec<AgentThoughtRecord> = self
            .thoughts
            .read()
            .values()
            .filter(|t| t.message_id == message_id)
            .cloned()
            .collect();
        rows.sort_by_key(|t| t.position);
        rows
    }

    /// All thoughts for every message of a conversation, message order
    /// given by the caller (messages know their own ordering).
    pub fn list_for_messages(&self, message_ids: &[String]) -> Vec<AgentThoughtRecord> {
        let mut rows = Vec::new();
        for id in message_ids {
            rows.extend(self.list_for_message(id));
        }
        rows
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Conversation variable pool
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct VariablesStore {
    path: PathBuf,
    variables: RwLock<HashMap<String, ConversationVariablesRecord>>,
}

impl VariablesStore {
    pub fn open(dir: &Path) -> Result<Self> {
        let path = dir.join("conversation_variables.jsonl");
        let variables = replay(&path, |v: &ConversationVariablesRecord| {
            v.conversation_id.clone()
        })?;
        Ok(Self {
            path,
            variables: RwLock::new(variables),
        })
    }

    pub fn get(&self, conversation_id: &str) -> serde_json::Value {
        self.variables
            .read()
            .get(conversation_id)
            .map(|v| v.variables.clone())
            .unwrap_or_else(|| serde_json::json!({}))
    }

    /// Replace the whole pool for a conversation.
    pub fn set(&self, conversation_id: &str, variables: serde_json::Value) -> Result<()> {
        let record = ConversationVariablesRecord {
            conversation_id: conversation_id.to_owned(),
            variables,
            updated_at: Utc::now(),
        };
        append_line(&self.path, &record)?;
        self.variables
            .write()
            .insert(record.conversation_id.clone(), record);
        Ok(())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Message file store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct MessageFileStore {
    path: PathBuf,
    files: RwLock<HashMap<String, MessageFileRecord>>,
}

impl MessageFileStore {
    pub fn open(dir: &Path) -> Result<Self> {
        let path = dir.join("message_files.jsonl");
        let files = replay(&path, |f: &MessageFileRecord| f.id.clone())?;
        Ok(Self {
            path,
            files: RwLock::new(files),
        })
    }

    pub fn insert(&self, record: &MessageFileRecord) -> Result<()> {
        append_line(&self.path, record)?;
        self.files.write().insert(record.id.clone(), record.clone());
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<MessageFileRecord> {
        self.files.read().get(id).cloned()
    }

    pub fn list_for_message(&self, message_id: &str) -> Vec<MessageFileRecord> {
        let mut rows: Vec<MessageFileRecord> = self
            .files
            .read()
            .values()
            .filter(|f| f.message_id == message_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        rows
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Aggregate handle
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// All record stores rooted at one state directory.
pub struct Storage {
    pub messages: MessageStore,
    pub thoughts: AgentThoughtStore,
    pub variables: VariablesStore,
    pub files: MessageFileStore,
}

impl Storage {
    pub fn open(state_path: &Path) -> Result<Self> {
        let dir = state_path.join("records");
        std::fs::create_dir_all(&dir).map_err(Error::Io)?;

        let storage = Self {
            messages: MessageStore::open(&dir)?,
            thoughts: AgentThoughtStore::open(&dir)?,
            variables: VariablesStore::open(&dir)?,
            files: MessageFileStore::open(&dir)?,
        };

        tracing::info!(path = %dir.display(), "record stores loaded");
        Ok(storage)
    }
}
