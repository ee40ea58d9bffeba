use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

/// Settings for the HTTP, download and CSV collaborators.
#[derive(Debug, Clone)]
pub struct ScannerConfig {
    pub user_agent: String,
    pub timeout: Duration,
    /// Extra attempts after the first one.
    pub retries: u32,
    pub retry_backoff: Duration,
    /// Minimum spacing between requests from one worker.
    pub download_delay: Duration,
    /// Endpoint returning `{"proxy": "host:port"}`. Direct connections when unset.
    pub proxy_pool_url: Option<String>,
    pub files_dir: PathBuf,
    pub data_dir: PathBuf,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout: Duration::from_secs(30),
            retries: 2,
            retry_backoff: Duration::from_millis(500),
            download_delay: Duration::from_millis(2500),
            proxy_pool_url: None,
            files_dir: PathBuf::from("./data"),
            data_dir: PathBuf::from("./data"),
        }
    }
}

impl ScannerConfig {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retries(mut self, retries: u32, backoff: Duration) -> Self {
        self.retries = retries;
        self.retry_backoff = backoff;
        self
    }

    pub fn with_download_delay(mut self, delay: Duration) -> Self {
        self.download_delay = delay;
        self
    }

    pub fn with_proxy_pool(mut self, url: Option<String>) -> Self {
        self.proxy_pool_url = url;
        self
    }

    pub fn with_files_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.files_dir = dir.into();
        self
    }

    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = dir.into();
        self
    }
}
