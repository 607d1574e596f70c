/// Shared error type used across all Skein crates.
///
/// Layer-specific taxonomies (tool resolution, model invocation) live in
/// their own crates and convert into this type at the boundary.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("config: {0}")]
    Config(String),

    #[error("model invocation: {0}")]
    Invoke(String),

    #[error("tool: {0}")]
    Tool(String),

    #[error("storage: {0}")]
    Storage(String),

    #[error("event queue closed before a terminal event was published")]
    QueueClosed,

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
