use reelswarm_core::StageError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("HTTP {status} from {url}")]
    Status { url: String, status: u16 },

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Proxy pool error: {0}")]
    ProxyPool(String),
}

impl ScanError {
    /// Connection problems, timeouts, 5xx and 429 are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            ScanError::HttpError(e) => e.is_connect() || e.is_timeout() || e.is_request(),
            ScanError::Status { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

impl From<ScanError> for StageError {
    fn from(err: ScanError) -> Self {
        match err {
            ScanError::ParseError(msg) => StageError::Malformed(msg),
            ScanError::IoError(e) => StageError::Sink(e.to_string()),
            other => StageError::Fetch(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, ScanError>;
