// End-to-end tests for the worker loop over the in-memory store

use async_trait::async_trait;
use reelswarm_core::completion::CompletionTracker;
use reelswarm_core::frontier::Frontier;
use reelswarm_core::listing::{INTERVALS, Interval, ListingPage};
use reelswarm_core::pipeline::{
    Collaborators, FetchedPage, MediaStore, PageFetcher, PageParser, RecordSink, StageResult,
};
use reelswarm_core::record::{DetailFields, ListingBatch, ListingEntry, MediaOutcome, MovieRecord};
use reelswarm_core::registry::NodeRegistry;
use reelswarm_core::request::{CrawlRequest, MovieContext};
use reelswarm_core::worker::{StopReason, SwarmWorker};
use reelswarm_core::{KeyValueStore, MemoryStore, StageError, SwarmConfig, SwarmError};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const LISTING: &str = "https://list.test/top_list";

/// Serves canned bodies. Unknown listing pages are empty, any other unknown
/// URL fails.
struct CannedFetcher {
    pages: HashMap<String, String>,
    fetched: Mutex<Vec<String>>,
}

#[async_trait]
impl PageFetcher for CannedFetcher {
    async fn fetch(&self, url: &str) -> StageResult<FetchedPage> {
        self.fetched.lock().unwrap().push(url.to_string());
        let body = match self.pages.get(url) {
            Some(body) => body.clone(),
            None if url.starts_with(LISTING) => "[]".to_string(),
            None => return Err(StageError::Fetch(format!("404 for {}", url))),
        };
        Ok(FetchedPage {
            url: url.to_string(),
            status: 200,
            body,
        })
    }
}

/// Listing bodies are JSON arrays; detail bodies are
/// `{"cover": .., "trailer_page": ..}`; video bodies are the trailer URL.
struct JsonParser;

impl PageParser for JsonParser {
    fn parse_listing(&self, body: &str) -> StageResult<ListingBatch> {
        let entries: Vec<ListingEntry> =
            serde_json::from_str(body).map_err(|e| StageError::Malformed(e.to_string()))?;
        Ok(ListingBatch { entries })
    }

    fn parse_detail(&self, body: &str) -> StageResult<DetailFields> {
        let v: serde_json::Value =
            serde_json::from_str(body).map_err(|e| StageError::Malformed(e.to_string()))?;
        Ok(DetailFields {
            cover: v["cover"].as_str().map(str::to_string),
            hot_comments: vec![],
            summary: Some("summary".to_string()),
            trailer_page: v["trailer_page"].as_str().map(str::to_string),
        })
    }

    fn parse_video(&self, body: &str) -> StageResult<Option<String>> {
        Ok(Some(body.trim().to_string()).filter(|s| !s.is_empty()))
    }
}

/// "Downloads" everything except ids listed as broken.
struct FakeMedia {
    broken: HashSet<String>,
}

#[async_trait]
impl MediaStore for FakeMedia {
    async fn store_media(&self, movie: &MovieContext) -> MediaOutcome {
        if self.broken.contains(&movie.id) {
            return MediaOutcome::default();
        }
        MediaOutcome {
            cover_path: movie
                .cover
                .as_ref()
                .map(|_| PathBuf::from(format!("cover/{}.jpg", movie.id))),
            trailer_path: movie
                .trailer
                .as_ref()
                .map(|_| PathBuf::from(format!("trailer/{}.mp4", movie.id))),
        }
    }
}

#[derive(Default)]
struct CollectingSink {
    records: Mutex<Vec<MovieRecord>>,
}

#[async_trait]
impl RecordSink for CollectingSink {
    async fn write(&self, record: &MovieRecord) -> StageResult<()> {
        self.records.lock().unwrap().push(record.clone());
        Ok(())
    }
}

fn movie_json(id: &str) -> serde_json::Value {
    serde_json::json!({
        "id": id,
        "title": format!("Movie {}", id),
        "score": "9.0",
        "url": format!("https://detail.test/{}/", id),
        "types": ["剧情"],
        "regions": ["美国"],
    })
}

fn detail_body(id: &str) -> String {
    serde_json::json!({
        "cover": format!("https://img.test/{}.jpg", id),
        "trailer_page": format!("https://video.test/{}", id),
    })
    .to_string()
}

struct Harness {
    store: Arc<MemoryStore>,
    sink: Arc<CollectingSink>,
    fetcher: Arc<CannedFetcher>,
    config: SwarmConfig,
    broken: HashSet<String>,
}

impl Harness {
    fn new(pages: HashMap<String, String>, target: u64) -> Self {
        let config = SwarmConfig::default()
            .with_node_id("node_test")
            .with_target(target)
            .with_concurrency(2)
            .with_listing_url(LISTING)
            .with_idle_backoff(Duration::from_millis(5), Duration::from_millis(20))
            .with_idle_timeout(Some(Duration::from_millis(300)))
            .with_heartbeat_interval(Duration::from_millis(50));
        Self {
            store: Arc::new(MemoryStore::new()),
            sink: Arc::new(CollectingSink::default()),
            fetcher: Arc::new(CannedFetcher {
                pages,
                fetched: Mutex::new(Vec::new()),
            }),
            config,
            broken: HashSet::new(),
        }
    }

    fn worker(&self) -> SwarmWorker {
        let collaborators = Collaborators {
            fetcher: self.fetcher.clone(),
            parser: Arc::new(JsonParser),
            media: Arc::new(FakeMedia {
                broken: self.broken.clone(),
            }),
            sink: self.sink.clone(),
        };
        SwarmWorker::new(self.store.clone(), self.config.clone(), collaborators)
    }

    async fn seed(&self, movie_type: u8) {
        let frontier = Frontier::new(self.store.clone(), &self.config.keys().requests);
        let page = ListingPage::new(movie_type, Interval::first(), 0);
        frontier
            .push(&CrawlRequest::listing(&page, LISTING))
            .await
            .unwrap();
    }

    fn tracker(&self) -> CompletionTracker {
        let keys = self.config.keys();
        CompletionTracker::new(
            self.store.clone(),
            keys.cover_ids,
            keys.trailer_ids,
            self.config.target,
        )
    }
}

fn listing_url(movie_type: u8, interval: Interval, start: u32) -> String {
    ListingPage::new(movie_type, interval, start).url(LISTING)
}

fn two_movie_site() -> HashMap<String, String> {
    let mut pages = HashMap::new();
    let listing = serde_json::json!([
        movie_json("1"),
        movie_json("2"),
        movie_json("1"),
        { "id": "3", "title": "No url" },
    ]);
    pages.insert(listing_url(1, Interval::first(), 0), listing.to_string());
    for id in ["1", "2"] {
        pages.insert(format!("https://detail.test/{}/", id), detail_body(id));
        pages.insert(
            format!("https://video.test/{}", id),
            format!("https://cdn.test/{}.mp4", id),
        );
    }
    pages
}

#[tokio::test]
async fn test_worker_stops_when_target_reached() {
    let harness = Harness::new(two_movie_site(), 2);
    harness.seed(1).await;

    let summary = harness.worker().run().await.unwrap();

    assert_eq!(summary.reason, StopReason::TargetReached);
    assert_eq!(summary.items, 2);
    assert_eq!(summary.rejected_records, 1);
    assert!(harness.tracker().is_satisfied().await.unwrap());

    let records = harness.sink.records.lock().unwrap();
    let ids: HashSet<&str> = records.iter().map(|r| r.movie.id.as_str()).collect();
    assert_eq!(ids, HashSet::from(["1", "2"]));
    assert!(records.iter().all(|r| r.has_cover && r.has_trailer));
    assert!(
        records
            .iter()
            .all(|r| r.movie.trailer.as_deref().is_some_and(|t| t.ends_with(".mp4")))
    );
}

#[tokio::test]
async fn test_each_movie_is_detailed_once() {
    let harness = Harness::new(two_movie_site(), 2);
    harness.seed(1).await;
    harness.worker().run().await.unwrap();

    let fetched = harness.fetcher.fetched.lock().unwrap();
    let detail_fetches = fetched
        .iter()
        .filter(|u| u.starts_with("https://detail.test/1/"))
        .count();
    assert_eq!(detail_fetches, 1);
    assert_eq!(
        harness
            .store
            .set_len(&harness.config.keys().movie_ids)
            .await
            .unwrap(),
        2
    );
}

#[tokio::test]
async fn test_short_listing_walks_intervals_then_idles() {
    let harness = Harness::new(HashMap::new(), 5);
    harness.seed(4).await;

    let summary = harness.worker().run().await.unwrap();
    assert_eq!(summary.reason, StopReason::Idle);

    // One empty page per interval, then no follow-up after 10:0.
    let fetched = harness.fetcher.fetched.lock().unwrap();
    assert_eq!(fetched.len(), 10);
    assert!(fetched.last().unwrap().contains("interval_id=10:0"));
}

#[tokio::test]
async fn test_failed_fetch_and_failed_media_yield_no_achievement() {
    let mut pages = two_movie_site();
    pages.remove("https://detail.test/2/");
    let mut harness = Harness::new(pages, 2);
    harness.broken.insert("1".to_string());
    harness.seed(1).await;

    let summary = harness.worker().run().await.unwrap();

    assert_eq!(summary.reason, StopReason::Idle);
    assert_eq!(summary.items, 0);
    assert_eq!(summary.dropped_items, 1);
    assert!(summary.fetch_failures >= 1);
    let progress = harness.tracker().progress().await.unwrap();
    assert_eq!(progress.covers, 0);
    assert_eq!(progress.trailers, 0);
    assert!(harness.sink.records.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_malformed_listing_is_dropped_without_follow_up() {
    let mut pages = HashMap::new();
    pages.insert(listing_url(2, Interval::first(), 0), "<html>blocked</html>".to_string());
    let harness = Harness::new(pages, 1);
    harness.seed(2).await;

    let summary = harness.worker().run().await.unwrap();
    assert_eq!(summary.malformed, 1);
    assert_eq!(harness.fetcher.fetched.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_already_satisfied_swarm_dispatches_nothing() {
    let harness = Harness::new(two_movie_site(), 0);
    harness.seed(1).await;

    let summary = harness.worker().run().await.unwrap();
    assert_eq!(summary.reason, StopReason::TargetReached);
    assert!(harness.fetcher.fetched.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_shutdown_deregisters_node() {
    let mut harness = Harness::new(HashMap::new(), 5);
    harness.config = harness.config.clone().with_idle_timeout(None);
    let worker = harness.worker();
    let handle = worker.shutdown_handle();
    let registry = NodeRegistry::new(harness.store.clone(), harness.config.keys().nodes);

    let run = tokio::spawn(async move { worker.run().await });
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(registry.list_all().await.unwrap().len(), 1);

    handle.shutdown();
    let summary = run.await.unwrap().unwrap();
    assert_eq!(summary.reason, StopReason::Shutdown);
    assert!(registry.list_all().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_worker_gives_up_after_store_outage() {
    let mut harness = Harness::new(HashMap::new(), 5);
    harness.config = harness
        .config
        .clone()
        .with_idle_timeout(None)
        .with_max_store_outage(Duration::from_millis(300));
    let worker = harness.worker();

    let run = tokio::spawn(async move { worker.run().await });
    tokio::time::sleep(Duration::from_millis(50)).await;
    harness.store.set_unreachable(true);

    let result = tokio::time::timeout(Duration::from_secs(10), run)
        .await
        .expect("worker should give up")
        .unwrap();
    assert!(matches!(result, Err(SwarmError::StoreUnavailable { .. })));
}

/// Takes the store offline for 100 ms, starting now.
fn store_blip(store: &Arc<MemoryStore>) {
    store.set_unreachable(true);
    let store = store.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        store.set_unreachable(false);
    });
}

/// Drops the store while the first page is in flight.
struct BlipOnFirstFetch {
    inner: Arc<CannedFetcher>,
    store: Arc<MemoryStore>,
    tripped: AtomicBool,
}

#[async_trait]
impl PageFetcher for BlipOnFirstFetch {
    async fn fetch(&self, url: &str) -> StageResult<FetchedPage> {
        if !self.tripped.swap(true, Ordering::SeqCst) {
            store_blip(&self.store);
        }
        self.inner.fetch(url).await
    }
}

/// Drops the store right after the first movie's media is saved.
struct BlipOnFirstMedia {
    inner: FakeMedia,
    store: Arc<MemoryStore>,
    tripped: AtomicBool,
}

#[async_trait]
impl MediaStore for BlipOnFirstMedia {
    async fn store_media(&self, movie: &MovieContext) -> MediaOutcome {
        let outcome = self.inner.store_media(movie).await;
        if !self.tripped.swap(true, Ordering::SeqCst) {
            store_blip(&self.store);
        }
        outcome
    }
}

#[tokio::test]
async fn test_store_blip_during_listing_keeps_interval_chain() {
    let harness = Harness::new(HashMap::new(), 5);
    harness.seed(1).await;

    let collaborators = Collaborators {
        fetcher: Arc::new(BlipOnFirstFetch {
            inner: harness.fetcher.clone(),
            store: harness.store.clone(),
            tripped: AtomicBool::new(false),
        }),
        parser: Arc::new(JsonParser),
        media: Arc::new(FakeMedia {
            broken: HashSet::new(),
        }),
        sink: harness.sink.clone(),
    };
    let worker = SwarmWorker::new(harness.store.clone(), harness.config.clone(), collaborators);

    let summary = tokio::time::timeout(Duration::from_secs(20), worker.run())
        .await
        .expect("worker should finish")
        .unwrap();
    assert_eq!(summary.reason, StopReason::Idle);

    // The follow-up push was retried, so every interval is still visited.
    let fetched = harness.fetcher.fetched.lock().unwrap();
    assert_eq!(fetched.len(), 10);
    for interval in INTERVALS {
        let url = listing_url(1, interval, 0);
        assert!(fetched.contains(&url), "{} never fetched", url);
    }
}

#[tokio::test]
async fn test_store_blip_after_download_still_records_movie() {
    let harness = Harness::new(two_movie_site(), 2);
    harness.seed(1).await;

    let collaborators = Collaborators {
        fetcher: harness.fetcher.clone(),
        parser: Arc::new(JsonParser),
        media: Arc::new(BlipOnFirstMedia {
            inner: FakeMedia {
                broken: HashSet::new(),
            },
            store: harness.store.clone(),
            tripped: AtomicBool::new(false),
        }),
        sink: harness.sink.clone(),
    };
    let worker = SwarmWorker::new(harness.store.clone(), harness.config.clone(), collaborators);

    let summary = tokio::time::timeout(Duration::from_secs(20), worker.run())
        .await
        .expect("worker should finish")
        .unwrap();
    assert_eq!(summary.reason, StopReason::TargetReached);
    assert_eq!(summary.items, 2);

    let progress = harness.tracker().progress().await.unwrap();
    assert_eq!(progress.covers, 2);
    assert_eq!(progress.trailers, 2);
    assert_eq!(harness.sink.records.lock().unwrap().len(), 2);
}
