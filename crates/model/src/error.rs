/// Model-invocation error taxonomy.
///
/// Rate-limit, auth, and connection failures are credential-set-local: the
/// load balancer cools the offending set down and retries the next one.
/// Everything else propagates immediately.
#[derive(thiserror::Error, Debug)]
pub enum InvokeError {
    #[error("rate limited: {0}")]
    RateLimit(String),

    #[error("authorization failed: {0}")]
    Auth(String),

    #[error("connection: {0}")]
    Connection(String),

    #[error("server error (status {status}): {message}")]
    Server { status: u16, message: String },

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("malformed response: {0}")]
    BadResponse(String),

    #[error("all {attempts} credential set(s) exhausted, last error: {last}")]
    CredentialsExhausted { attempts: usize, last: String },
}

impl InvokeError {
    /// Whether the load balancer should cool this credential set down and
    /// try the next one.
    pub fn is_rotatable(&self) -> bool {
        matches!(
            self,
            Self::RateLimit(_) | Self::Auth(_) | Self::Connection(_)
        )
    }
}

impl From<InvokeError> for skein_domain::Error {
    fn from(e: InvokeError) -> Self {
        skein_domain::Error::Invoke(e.to_string())
    }
}
