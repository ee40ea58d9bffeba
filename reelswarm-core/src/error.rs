use thiserror::Error;

/// Failures talking to the shared key-value store.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Failed to connect to store at '{url}': {reason}")]
    ConnectionFailed { url: String, reason: String },

    #[error("Store command failed: {0}")]
    Command(String),

    #[error("Store is closed")]
    Closed,

    #[error("Store I/O error: {0}")]
    Io(String),
}

impl StoreError {
    /// Connection drops and timeouts are worth retrying, command errors are not.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StoreError::ConnectionFailed { .. } | StoreError::Io(_)
        )
    }
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_io_error()
            || err.is_timeout()
            || err.is_connection_dropped()
            || err.is_connection_refusal()
        {
            StoreError::Io(err.to_string())
        } else {
            StoreError::Command(err.to_string())
        }
    }
}

/// A parser record could not become a crawl context.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ContextError {
    #[error("Record is missing required field '{0}'")]
    MissingField(&'static str),

    #[error("Record field '{field}' is invalid: {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("Unsupported context version {found} (expected {expected})")]
    UnsupportedVersion { found: u8, expected: u8 },
}

/// Failure reported by a fetch, parse or sink collaborator.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StageError {
    #[error("Fetch failed: {0}")]
    Fetch(String),

    #[error("Malformed response: {0}")]
    Malformed(String),

    #[error("Sink error: {0}")]
    Sink(String),
}

#[derive(Error, Debug)]
pub enum SwarmError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Store unreachable for {seconds}s, refusing to dispatch work")]
    StoreUnavailable { seconds: u64 },

    #[error("Invalid record: {0}")]
    Context(#[from] ContextError),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error(transparent)]
    Stage(#[from] StageError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Task join error: {0}")]
    JoinError(#[from] tokio::task::JoinError),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;
pub type Result<T> = std::result::Result<T, SwarmError>;
