//! Read-only view of the whole swarm.
//!
//! The monitor only issues reads: queue length, set cardinalities and the
//! registry hash. Liveness is derived here from each record's `last_update`.

use crate::completion::CompletionTracker;
use crate::config::SwarmKeys;
use crate::dedup::DedupFilter;
use crate::error::StoreResult;
use crate::frontier::Frontier;
use crate::registry::{NodeEntry, NodeRegistry, NodeStatus};
use crate::store::KeyValueStore;
use chrono::{DateTime, Local};
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeRow {
    pub node_id: String,
    /// `None` when the stored record could not be decoded.
    pub status: Option<NodeStatus>,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterSnapshot {
    pub taken_at: i64,
    pub queue_size: u64,
    pub unique_movies: u64,
    pub dupefilter_size: u64,
    pub covers: u64,
    pub trailers: u64,
    pub target: u64,
    pub active_nodes: usize,
    pub nodes: Vec<NodeRow>,
}

impl ClusterSnapshot {
    pub fn total_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_satisfied(&self) -> bool {
        self.covers >= self.target && self.trailers >= self.target
    }
}

/// Result of one poll. An unreachable store is reported as such rather
/// than as an empty swarm.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ClusterView {
    Snapshot(ClusterSnapshot),
    Unreachable { error: String, taken_at: i64 },
}

pub struct ClusterMonitor {
    frontier: Frontier,
    dupefilter: DedupFilter,
    movie_ids: DedupFilter,
    tracker: CompletionTracker,
    registry: NodeRegistry,
    stale_threshold_secs: i64,
}

impl ClusterMonitor {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        keys: &SwarmKeys,
        target: u64,
        stale_threshold_secs: i64,
    ) -> Self {
        Self {
            frontier: Frontier::new(store.clone(), &keys.requests),
            dupefilter: DedupFilter::new(store.clone(), keys.dupefilter.clone()),
            movie_ids: DedupFilter::new(store.clone(), keys.movie_ids.clone()),
            tracker: CompletionTracker::new(
                store.clone(),
                keys.cover_ids.clone(),
                keys.trailer_ids.clone(),
                target,
            ),
            registry: NodeRegistry::new(store, keys.nodes.clone()),
            stale_threshold_secs,
        }
    }

    async fn read(&self, now: i64) -> StoreResult<ClusterSnapshot> {
        let progress = self.tracker.progress().await?;
        let nodes: Vec<NodeRow> = self
            .registry
            .list_all()
            .await?
            .into_iter()
            .map(|entry: NodeEntry| NodeRow {
                active: entry.is_active(now, self.stale_threshold_secs),
                node_id: entry.node_id,
                status: entry.status,
            })
            .collect();

        Ok(ClusterSnapshot {
            taken_at: now,
            queue_size: self.frontier.len().await?,
            unique_movies: self.movie_ids.len().await?,
            dupefilter_size: self.dupefilter.len().await?,
            covers: progress.covers,
            trailers: progress.trailers,
            target: progress.target,
            active_nodes: nodes.iter().filter(|n| n.active).count(),
            nodes,
        })
    }

    pub async fn snapshot(&self, now: i64) -> ClusterView {
        match self.read(now).await {
            Ok(snapshot) => ClusterView::Snapshot(snapshot),
            Err(e) => ClusterView::Unreachable {
                error: e.to_string(),
                taken_at: now,
            },
        }
    }
}

pub const TABLE_HEADERS: [&str; 7] = [
    "Node ID",
    "Requests",
    "Items",
    "Covers",
    "Trailers",
    "Last Update",
    "Active",
];

pub fn format_clock(timestamp: i64) -> String {
    if timestamp <= 0 {
        return "N/A".to_string();
    }
    DateTime::from_timestamp(timestamp, 0)
        .map(|dt| dt.with_timezone(&Local).format("%H:%M:%S").to_string())
        .unwrap_or_else(|| "N/A".to_string())
}

/// One table row per node. Undecodable records show ERROR in every column.
pub fn node_cells(row: &NodeRow) -> [String; 7] {
    match &row.status {
        Some(status) => [
            row.node_id.clone(),
            status.requests_seen.to_string(),
            status.items_scraped.to_string(),
            status.covers.to_string(),
            status.trailers.to_string(),
            format_clock(status.last_update),
            if row.active { "✓" } else { "✗" }.to_string(),
        ],
        None => [
            row.node_id.clone(),
            "ERROR".to_string(),
            "ERROR".to_string(),
            "ERROR".to_string(),
            "ERROR".to_string(),
            "ERROR".to_string(),
            "ERROR".to_string(),
        ],
    }
}

fn grid_rule(widths: &[usize], fill: char) -> String {
    let mut line = String::from("+");
    for w in widths {
        line.push_str(&fill.to_string().repeat(w + 2));
        line.push('+');
    }
    line.push('\n');
    line
}

fn grid_row(cells: &[String], widths: &[usize]) -> String {
    let mut line = String::from("|");
    for (cell, w) in cells.iter().zip(widths) {
        let pad = w.saturating_sub(cell.chars().count());
        line.push(' ');
        line.push_str(cell);
        line.push_str(&" ".repeat(pad + 1));
        line.push('|');
    }
    line.push('\n');
    line
}

/// Renders the node table as a bordered grid.
pub fn render_node_table(nodes: &[NodeRow]) -> String {
    let header: Vec<String> = TABLE_HEADERS.iter().map(|h| h.to_string()).collect();
    let rows: Vec<Vec<String>> = nodes.iter().map(|n| node_cells(n).to_vec()).collect();

    let mut widths: Vec<usize> = header.iter().map(|h| h.chars().count()).collect();
    for row in &rows {
        for (i, cell) in row.iter().enumerate() {
            widths[i] = widths[i].max(cell.chars().count());
        }
    }

    let mut table = grid_rule(&widths, '-');
    table.push_str(&grid_row(&header, &widths));
    table.push_str(&grid_rule(&widths, '='));
    for row in &rows {
        table.push_str(&grid_row(row, &widths));
        table.push_str(&grid_rule(&widths, '-'));
    }
    table
}

/// Full plain-text dashboard for one poll.
pub fn render_text(view: &ClusterView, store_label: &str) -> String {
    let mut out = String::new();
    out.push_str("==== Douban Movie Crawler Monitor ====\n");
    out.push_str(&format!("Store: {}\n", store_label));

    match view {
        ClusterView::Unreachable { error, .. } => {
            out.push_str("\nSTORE UNREACHABLE\n");
            out.push_str(&format!("  {}\n", error));
        }
        ClusterView::Snapshot(snap) => {
            out.push_str(&format!(
                "URL Queue: {} | Unique Movies: {} | Seen URLs: {} | Covers: {}/{} | Trailers: {}/{}\n",
                snap.queue_size,
                snap.unique_movies,
                snap.dupefilter_size,
                snap.covers,
                snap.target,
                snap.trailers,
                snap.target
            ));
            out.push_str(&format!(
                "Active Nodes: {}/{}\n\n",
                snap.active_nodes,
                snap.total_nodes()
            ));
            if snap.nodes.is_empty() {
                out.push_str("No nodes registered.\n");
            } else {
                out.push_str(&render_node_table(&snap.nodes));
            }
            if snap.is_satisfied() {
                out.push_str("\nTarget reached.\n");
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::AchievementKind;
    use crate::registry::{Heartbeat, NodeState};
    use crate::store::MemoryStore;

    fn keys() -> SwarmKeys {
        SwarmKeys::new("douban", "crawler:nodes")
    }

    #[tokio::test]
    async fn test_snapshot_counts_and_liveness() {
        let store = Arc::new(MemoryStore::new());
        let keys = keys();

        let fresh = Heartbeat::new(NodeRegistry::new(store.clone(), keys.nodes.clone()), "a", 10);
        fresh.starting(1000).await.unwrap();
        let stale = Heartbeat::new(NodeRegistry::new(store.clone(), keys.nodes.clone()), "b", 10);
        stale.starting(960).await.unwrap();

        let tracker = CompletionTracker::new(
            store.clone(),
            keys.cover_ids.clone(),
            keys.trailer_ids.clone(),
            5,
        );
        tracker.record("1", AchievementKind::Cover).await.unwrap();
        store.set_add(&keys.movie_ids, "1").await.unwrap();
        store.set_add(&keys.movie_ids, "2").await.unwrap();

        let monitor = ClusterMonitor::new(store.clone(), &keys, 5, 30);
        let ClusterView::Snapshot(snap) = monitor.snapshot(1010).await else {
            panic!("store should be reachable");
        };
        assert_eq!(snap.unique_movies, 2);
        assert_eq!(snap.covers, 1);
        assert_eq!(snap.trailers, 0);
        assert_eq!(snap.total_nodes(), 2);
        assert_eq!(snap.active_nodes, 1);
        assert!(snap.nodes[0].active);
        assert!(!snap.nodes[1].active);
    }

    #[tokio::test]
    async fn test_unreachable_is_distinct_from_empty() {
        let store = Arc::new(MemoryStore::new());
        let monitor = ClusterMonitor::new(store.clone(), &keys(), 5, 30);

        let ClusterView::Snapshot(empty) = monitor.snapshot(0).await else {
            panic!("store should be reachable");
        };
        assert_eq!(empty.active_nodes, 0);
        assert!(render_text(&ClusterView::Snapshot(empty), "mem").contains("No nodes registered"));

        store.set_unreachable(true);
        let view = monitor.snapshot(0).await;
        assert!(matches!(view, ClusterView::Unreachable { .. }));
        assert!(render_text(&view, "mem").contains("STORE UNREACHABLE"));
    }

    #[test]
    fn test_table_renders_error_rows() {
        let rows = vec![
            NodeRow {
                node_id: "node_a".to_string(),
                status: Some(NodeStatus {
                    status: NodeState::Running,
                    requests_seen: 120,
                    items_scraped: 7,
                    covers: 6,
                    trailers: 5,
                    last_update: 0,
                }),
                active: false,
            },
            NodeRow {
                node_id: "node_b".to_string(),
                status: None,
                active: false,
            },
        ];
        let table = render_node_table(&rows);
        let lines: Vec<&str> = table.lines().collect();
        assert!(lines[0].starts_with("+-"));
        assert!(lines[1].contains("Node ID"));
        assert!(lines[2].starts_with("+="));
        assert!(lines[3].contains("120") && lines[3].contains("N/A") && lines[3].contains("✗"));
        assert!(lines[5].contains("ERROR"));
        assert!(lines.iter().all(|l| l.chars().count() == lines[0].chars().count()));
    }
}
