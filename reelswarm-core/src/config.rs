use crate::listing::DEFAULT_LISTING_URL;
use std::time::Duration;

pub const DEFAULT_STORE_URL: &str = "redis://127.0.0.1:6379";
pub const DEFAULT_NAMESPACE: &str = "douban";
pub const DEFAULT_REGISTRY_KEY: &str = "crawler:nodes";
pub const DEFAULT_TARGET: u64 = 2000;

/// Store key names for one swarm namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwarmKeys {
    pub requests: String,
    pub dupefilter: String,
    pub movie_ids: String,
    pub cover_ids: String,
    pub trailer_ids: String,
    pub nodes: String,
}

impl SwarmKeys {
    pub fn new(namespace: &str, registry_key: &str) -> Self {
        Self {
            requests: format!("{}:requests", namespace),
            dupefilter: format!("{}:dupefilter", namespace),
            movie_ids: format!("{}:movie_ids", namespace),
            cover_ids: format!("{}:cover_ids", namespace),
            trailer_ids: format!("{}:trailer_ids", namespace),
            nodes: registry_key.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SwarmConfig {
    pub store_url: String,
    pub namespace: String,
    pub registry_key: String,
    pub node_id: String,
    pub target: u64,
    /// In-flight request slots per worker.
    pub concurrency: usize,
    pub heartbeat_interval: Duration,
    pub stale_threshold: Duration,
    pub monitor_interval: Duration,
    pub idle_backoff_min: Duration,
    pub idle_backoff_max: Duration,
    /// Stop after the frontier has stayed empty this long. `None` waits
    /// for the target indefinitely.
    pub idle_timeout: Option<Duration>,
    /// Give up once the store has been unreachable this long.
    pub max_store_outage: Duration,
    pub listing_url: String,
}

impl Default for SwarmConfig {
    fn default() -> Self {
        Self {
            store_url: DEFAULT_STORE_URL.to_string(),
            namespace: DEFAULT_NAMESPACE.to_string(),
            registry_key: DEFAULT_REGISTRY_KEY.to_string(),
            node_id: resolve_node_id(None),
            target: DEFAULT_TARGET,
            concurrency: 2,
            heartbeat_interval: Duration::from_secs(10),
            stale_threshold: Duration::from_secs(30),
            monitor_interval: Duration::from_secs(2),
            idle_backoff_min: Duration::from_millis(200),
            idle_backoff_max: Duration::from_secs(5),
            idle_timeout: None,
            max_store_outage: Duration::from_secs(60),
            listing_url: DEFAULT_LISTING_URL.to_string(),
        }
    }
}

impl SwarmConfig {
    pub fn keys(&self) -> SwarmKeys {
        SwarmKeys::new(&self.namespace, &self.registry_key)
    }

    pub fn with_store_url(mut self, url: impl Into<String>) -> Self {
        self.store_url = url.into();
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_registry_key(mut self, key: impl Into<String>) -> Self {
        self.registry_key = key.into();
        self
    }

    pub fn with_node_id(mut self, node_id: impl Into<String>) -> Self {
        self.node_id = node_id.into();
        self
    }

    pub fn with_target(mut self, target: u64) -> Self {
        self.target = target;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn with_stale_threshold(mut self, threshold: Duration) -> Self {
        self.stale_threshold = threshold;
        self
    }

    pub fn with_monitor_interval(mut self, interval: Duration) -> Self {
        self.monitor_interval = interval;
        self
    }

    pub fn with_idle_backoff(mut self, min: Duration, max: Duration) -> Self {
        self.idle_backoff_min = min;
        self.idle_backoff_max = max.max(min);
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn with_max_store_outage(mut self, outage: Duration) -> Self {
        self.max_store_outage = outage;
        self
    }

    pub fn with_listing_url(mut self, url: impl Into<String>) -> Self {
        self.listing_url = url.into();
        self
    }
}

/// Picks a node id: an explicit value, then `NODE_ID`, then
/// `node_<HOSTNAME>`, then a random `node_<8 hex>`.
pub fn resolve_node_id(explicit: Option<&str>) -> String {
    if let Some(id) = explicit.map(str::trim).filter(|s| !s.is_empty()) {
        return id.to_string();
    }
    if let Ok(id) = std::env::var("NODE_ID")
        && !id.trim().is_empty()
    {
        return id.trim().to_string();
    }
    if let Ok(host) = std::env::var("HOSTNAME")
        && !host.trim().is_empty()
    {
        return format!("node_{}", host.trim());
    }
    let uuid = uuid::Uuid::new_v4().simple().to_string();
    format!("node_{}", &uuid[..8])
}
