// Tests for the shared-store coordination primitives under concurrency

use reelswarm_core::completion::{AchievementKind, CompletionTracker};
use reelswarm_core::dedup::{DedupFilter, Fingerprint};
use reelswarm_core::frontier::{Frontier, PopOutcome};
use reelswarm_core::listing::{DEFAULT_LISTING_URL, Interval, ListingPage};
use reelswarm_core::registry::{Heartbeat, NodeRegistry};
use reelswarm_core::request::CrawlRequest;
use reelswarm_core::{KeyValueStore, MemoryStore, SwarmKeys};
use std::collections::HashSet;
use std::sync::Arc;

fn keys() -> SwarmKeys {
    SwarmKeys::new("douban", "crawler:nodes")
}

// ============================================================================
// Dedup Filter
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_claim_has_exactly_one_winner() {
    let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
    let filter = Arc::new(DedupFilter::new(store, keys().dupefilter));
    let fp = Fingerprint::of_url("https://movie.douban.com/subject/1292052/").unwrap();

    let mut handles = Vec::new();
    for _ in 0..32 {
        let filter = filter.clone();
        let fp = fp.clone();
        handles.push(tokio::spawn(async move { filter.claim(&fp).await.unwrap() }));
    }

    let mut winners = 0;
    for handle in handles {
        if handle.await.unwrap() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
    assert_eq!(filter.len().await.unwrap(), 1);
}

#[tokio::test]
async fn test_equivalent_urls_claim_once() {
    let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
    let filter = DedupFilter::new(store, keys().dupefilter);

    let a =
        Fingerprint::of_url("https://movie.douban.com/j/chart/top_list?type=1&start=0").unwrap();
    let b =
        Fingerprint::of_url("https://movie.douban.com/j/chart/top_list?start=0&type=1#x").unwrap();
    assert!(filter.claim(&a).await.unwrap());
    assert!(!filter.claim(&b).await.unwrap());
}

// ============================================================================
// Completion Tracker
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cover_count_matches_distinct_ids() {
    let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
    let k = keys();
    let tracker = Arc::new(CompletionTracker::new(store, k.cover_ids, k.trailer_ids, 100));

    let ids = ["1", "2", "3", "2", "1", "4", "4", "4"];
    let mut handles = Vec::new();
    for id in ids {
        let tracker = tracker.clone();
        handles.push(tokio::spawn(async move {
            tracker.record(id, AchievementKind::Cover).await.unwrap()
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let distinct: HashSet<&str> = ids.into_iter().collect();
    assert_eq!(tracker.progress().await.unwrap().covers, distinct.len() as u64);
}

#[tokio::test]
async fn test_satisfaction_with_target_two() {
    let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
    let k = keys();
    let tracker = CompletionTracker::new(store, k.cover_ids, k.trailer_ids, 2);

    tracker.record("A", AchievementKind::Cover).await.unwrap();
    tracker.record("B", AchievementKind::Cover).await.unwrap();
    tracker.record("A", AchievementKind::Trailer).await.unwrap();
    assert!(!tracker.is_satisfied().await.unwrap());

    tracker.record("B", AchievementKind::Trailer).await.unwrap();
    assert!(tracker.is_satisfied().await.unwrap());
}

// ============================================================================
// Priority Frontier
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_pops_never_share_an_entry() {
    let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
    let frontier = Arc::new(Frontier::new(store, &keys().requests));
    for t in 1..=31u8 {
        for interval in [Interval::new(100, 90), Interval::new(90, 80)] {
            let page = ListingPage::new(t, interval, 0);
            frontier
                .push(&CrawlRequest::listing(&page, DEFAULT_LISTING_URL))
                .await
                .unwrap();
        }
    }

    let mut handles = Vec::new();
    for _ in 0..8 {
        let frontier = frontier.clone();
        handles.push(tokio::spawn(async move {
            let mut urls = Vec::new();
            while let PopOutcome::Request(popped) = frontier.pop().await.unwrap() {
                urls.push(popped.request.url);
            }
            urls
        }));
    }

    let mut seen = HashSet::new();
    for handle in handles {
        for url in handle.await.unwrap() {
            assert!(seen.insert(url), "entry popped twice");
        }
    }
    assert_eq!(seen.len(), 62);
}

#[tokio::test]
async fn test_frontier_survives_handle_restart() {
    let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
    let page = ListingPage::new(9, Interval::new(70, 60), 300);
    {
        let frontier = Frontier::new(store.clone(), &keys().requests);
        frontier
            .push(&CrawlRequest::listing(&page, DEFAULT_LISTING_URL))
            .await
            .unwrap();
    }

    let frontier = Frontier::new(store, &keys().requests);
    match frontier.pop().await.unwrap() {
        PopOutcome::Request(popped) => {
            assert_eq!(ListingPage::from_url(&popped.request.url).unwrap(), page);
            assert_eq!(popped.score, 30_003);
        }
        _ => panic!("queued work was lost"),
    }
}

// ============================================================================
// Node Registry
// ============================================================================

#[tokio::test]
async fn test_report_read_back_liveness() {
    let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
    let heartbeat = Heartbeat::new(NodeRegistry::new(store.clone(), keys().nodes), "node_a", 10);
    heartbeat.starting(0).await.unwrap();

    let entries = NodeRegistry::new(store, keys().nodes).list_all().await.unwrap();
    assert_eq!(entries.len(), 1);
    assert!(entries[0].is_active(29, 30));
    assert!(!entries[0].is_active(31, 30));
}
