/// Tool layer error taxonomy.
///
/// Resolution and parameter errors are configuration problems; execution
/// errors are runtime problems. All of them are absorbed by the engine
/// before they reach an agent loop, each with its own user-facing phrase.
#[derive(thiserror::Error, Debug)]
pub enum ToolError {
    #[error("tool provider {0} not found")]
    ProviderNotFound(String),

    #[error("tool {0} not found")]
    NotFound(String),

    #[error("tool {0} not supported")]
    NotSupported(String),

    #[error("tool parameter validation failed: {0}")]
    ParameterValidation(String),

    #[error("credential validation failed: {0}")]
    CredentialValidation(String),

    #[error("tool invocation failed: {0}")]
    Invoke(String),

    #[error("workflow call depth {depth} exceeds the limit of {limit}")]
    DepthExceeded { depth: u32, limit: u32 },
}

impl From<ToolError> for skein_domain::Error {
    fn from(e: ToolError) -> Self {
        skein_domain::Error::Tool(e.to_string())
    }
}
