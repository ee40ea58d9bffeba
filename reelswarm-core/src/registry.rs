//! Per-node status records and liveness.
//!
//! Every worker owns one field in the registry hash, keyed by its node id,
//! holding a JSON status document. Records are overwritten whole on every
//! report and removed on clean shutdown. Liveness is never stored; readers
//! derive it from `last_update`.

use crate::error::{Result, StoreResult};
use crate::store::KeyValueStore;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeState {
    Starting,
    Running,
    Stopped,
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeState::Starting => write!(f, "starting"),
            NodeState::Running => write!(f, "running"),
            NodeState::Stopped => write!(f, "stopped"),
        }
    }
}

/// JSON document stored per node. Field names match what existing
/// dashboards read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeStatus {
    pub status: NodeState,
    #[serde(rename = "requests")]
    pub requests_seen: u64,
    #[serde(rename = "items")]
    pub items_scraped: u64,
    #[serde(rename = "cover")]
    pub covers: u64,
    #[serde(rename = "trailer")]
    pub trailers: u64,
    /// Unix seconds.
    pub last_update: i64,
}

impl NodeStatus {
    pub fn is_active(&self, now: i64, threshold_secs: i64) -> bool {
        now - self.last_update < threshold_secs
    }
}

/// One registry field as read back. Records that fail to decode are kept so
/// the monitor can show them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeEntry {
    pub node_id: String,
    pub status: Option<NodeStatus>,
}

impl NodeEntry {
    pub fn is_active(&self, now: i64, threshold_secs: i64) -> bool {
        self.status
            .as_ref()
            .map(|s| s.is_active(now, threshold_secs))
            .unwrap_or(false)
    }
}

pub struct NodeRegistry {
    store: Arc<dyn KeyValueStore>,
    key: String,
}

impl NodeRegistry {
    pub fn new(store: Arc<dyn KeyValueStore>, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
        }
    }

    pub async fn report(&self, node_id: &str, status: &NodeStatus) -> Result<()> {
        let json = serde_json::to_string(status)?;
        self.store.hash_set(&self.key, node_id, &json).await?;
        Ok(())
    }

    pub async fn deregister(&self, node_id: &str) -> StoreResult<bool> {
        self.store.hash_del(&self.key, node_id).await
    }

    /// Every record, sorted by node id.
    pub async fn list_all(&self) -> StoreResult<Vec<NodeEntry>> {
        let raw = self.store.hash_get_all(&self.key).await?;
        let mut entries: Vec<NodeEntry> = raw
            .into_iter()
            .map(|(node_id, json)| {
                let status = match serde_json::from_str::<NodeStatus>(&json) {
                    Ok(status) => Some(status),
                    Err(e) => {
                        warn!("Unreadable status for node {}: {}", node_id, e);
                        None
                    }
                };
                NodeEntry { node_id, status }
            })
            .collect();
        entries.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        Ok(entries)
    }

    pub async fn reset(&self) -> StoreResult<u64> {
        self.store.delete(std::slice::from_ref(&self.key)).await
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

/// A worker's side of the registry: local counters plus the report cadence.
///
/// Shared by every slot of one worker process. `tick` and `on_item` report
/// only once `interval_secs` has passed since the previous report.
pub struct Heartbeat {
    registry: NodeRegistry,
    node_id: String,
    interval_secs: i64,
    last_report: AtomicI64,
    requests_seen: AtomicU64,
    items_scraped: AtomicU64,
    covers: AtomicU64,
    trailers: AtomicU64,
}

impl Heartbeat {
    pub fn new(registry: NodeRegistry, node_id: impl Into<String>, interval_secs: i64) -> Self {
        Self {
            registry,
            node_id: node_id.into(),
            interval_secs,
            last_report: AtomicI64::new(i64::MIN),
            requests_seen: AtomicU64::new(0),
            items_scraped: AtomicU64::new(0),
            covers: AtomicU64::new(0),
            trailers: AtomicU64::new(0),
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn snapshot(&self, state: NodeState, now: i64) -> NodeStatus {
        NodeStatus {
            status: state,
            requests_seen: self.requests_seen.load(Ordering::Relaxed),
            items_scraped: self.items_scraped.load(Ordering::Relaxed),
            covers: self.covers.load(Ordering::Relaxed),
            trailers: self.trailers.load(Ordering::Relaxed),
            last_update: now,
        }
    }

    async fn report(&self, state: NodeState, now: i64) -> Result<()> {
        self.registry
            .report(&self.node_id, &self.snapshot(state, now))
            .await?;
        self.last_report.store(now, Ordering::Release);
        debug!("Reported {} for node {}", state, self.node_id);
        Ok(())
    }

    fn due(&self, now: i64) -> bool {
        let last = self.last_report.load(Ordering::Acquire);
        last == i64::MIN || now.saturating_sub(last) >= self.interval_secs
    }

    pub async fn starting(&self, now: i64) -> Result<()> {
        self.report(NodeState::Starting, now).await
    }

    /// Timer path. Returns whether a report was written.
    pub async fn tick(&self, now: i64) -> Result<bool> {
        if !self.due(now) {
            return Ok(false);
        }
        self.report(NodeState::Running, now).await?;
        Ok(true)
    }

    pub fn on_request(&self) {
        self.requests_seen.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts a terminal item, then reports if the interval has elapsed.
    pub async fn on_item(&self, has_cover: bool, has_trailer: bool, now: i64) -> Result<bool> {
        self.items_scraped.fetch_add(1, Ordering::Relaxed);
        if has_cover {
            self.covers.fetch_add(1, Ordering::Relaxed);
        }
        if has_trailer {
            self.trailers.fetch_add(1, Ordering::Relaxed);
        }
        self.tick(now).await
    }

    /// Removes this node's record.
    pub async fn shutdown(&self) -> StoreResult<bool> {
        self.registry.deregister(&self.node_id).await
    }
}
