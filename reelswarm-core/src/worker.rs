//! The per-process coordination loop.
//!
//! A worker runs `concurrency` slots against the shared frontier. Each slot
//! repeats: check the goal, pop the best request, claim its fingerprint,
//! fetch and parse it, push follow-ups, and record terminal items. A timer
//! task publishes the node's status on the heartbeat interval.

use crate::completion::{AchievementKind, CompletionTracker};
use crate::config::SwarmConfig;
use crate::dedup::DedupFilter;
use crate::error::{Result, StoreError, SwarmError};
use crate::frontier::{Frontier, PopOutcome, Popped};
use crate::listing::ListingPage;
use crate::pipeline::Collaborators;
use crate::record::MovieRecord;
use crate::registry::{Heartbeat, NodeRegistry};
use crate::request::{CrawlRequest, MovieContext, Stage};
use crate::store::KeyValueStore;
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

pub type ProgressCallback = Arc<dyn Fn(usize, String) + Send + Sync>;

const STORE_BACKOFF_MIN: Duration = Duration::from_millis(500);
const STORE_BACKOFF_MAX: Duration = Duration::from_secs(10);

pub fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    TargetReached,
    Idle,
    Shutdown,
    StoreUnavailable,
}

#[derive(Default)]
struct WorkerStats {
    pages: AtomicU64,
    fetch_failures: AtomicU64,
    duplicates: AtomicU64,
    malformed: AtomicU64,
    rejected_records: AtomicU64,
    items: AtomicU64,
    dropped_items: AtomicU64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSummary {
    pub reason: StopReason,
    pub pages: u64,
    pub fetch_failures: u64,
    pub duplicates: u64,
    pub malformed: u64,
    pub rejected_records: u64,
    pub items: u64,
    pub dropped_items: u64,
}

/// Time since the store last answered, shared by every slot.
#[derive(Default)]
struct OutageClock {
    since: Mutex<Option<Instant>>,
}

impl OutageClock {
    fn fail(&self) -> Duration {
        let Ok(mut since) = self.since.lock() else {
            return Duration::ZERO;
        };
        since.get_or_insert_with(Instant::now).elapsed()
    }

    fn recover(&self) {
        if let Ok(mut since) = self.since.lock()
            && since.take().is_some()
        {
            info!("Store reachable again");
        }
    }
}

/// Keeps the first stop reason; later requests only wake sleepers.
#[derive(Default)]
struct StopLatch {
    reason: Mutex<Option<StopReason>>,
}

impl StopLatch {
    /// Returns true only for the call that set the reason.
    fn set(&self, reason: StopReason) -> bool {
        match self.reason.lock() {
            Ok(mut current) if current.is_none() => {
                *current = Some(reason);
                true
            }
            _ => false,
        }
    }

    fn get(&self) -> Option<StopReason> {
        self.reason.lock().ok().and_then(|r| *r)
    }
}

struct WorkerInner {
    config: SwarmConfig,
    frontier: Frontier,
    dedup: DedupFilter,
    movie_ids: DedupFilter,
    tracker: CompletionTracker,
    heartbeat: Heartbeat,
    collaborators: Collaborators,
    progress_callback: Option<ProgressCallback>,
    stats: WorkerStats,
    outage: OutageClock,
    /// Last time any slot popped work.
    last_work: Mutex<Instant>,
    in_flight: AtomicUsize,
    stop: StopLatch,
    stop_notify: Notify,
}

impl WorkerInner {
    fn request_stop(&self, reason: StopReason) -> bool {
        let first = self.stop.set(reason);
        if first {
            info!(node_id = %self.heartbeat.node_id(), "Stopping: {:?}", reason);
        }
        self.stop_notify.notify_waiters();
        first
    }

    fn stop_reason(&self) -> Option<StopReason> {
        self.stop.get()
    }

    fn mark_work(&self) {
        if let Ok(mut last) = self.last_work.lock() {
            *last = Instant::now();
        }
    }

    fn idle_for(&self) -> Duration {
        self.last_work
            .lock()
            .map(|last| last.elapsed())
            .unwrap_or(Duration::ZERO)
    }

    fn stopping(&self) -> bool {
        self.stop_reason().is_some()
    }

    /// Sleeps for `duration` unless a stop is requested first.
    async fn pause(&self, duration: Duration) {
        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            _ = self.stop_notify.notified() => {}
        }
    }

    /// Backs off after a failed store call, or fails once the outage has
    /// lasted longer than allowed.
    async fn store_failed(&self, err: StoreError, backoff: &mut Duration) -> Result<()> {
        if matches!(err, StoreError::Closed) {
            return Err(err.into());
        }
        let down_for = self.outage.fail();
        if down_for >= self.config.max_store_outage {
            error!(
                node_id = %self.heartbeat.node_id(),
                "Store unreachable for {:?}, giving up: {}", down_for, err
            );
            self.request_stop(StopReason::StoreUnavailable);
            return Err(SwarmError::StoreUnavailable {
                seconds: down_for.as_secs(),
            });
        }
        warn!("Store error ({}), retrying in {:?}", err, backoff);
        self.pause(*backoff).await;
        *backoff = (*backoff * 2).min(STORE_BACKOFF_MAX);
        Ok(())
    }

    /// Runs a store write that claimed work depends on, retrying transient
    /// failures until it lands or the outage limit is hit.
    async fn retry_store<T, E, F, Fut>(&self, mut op: F) -> Result<T>
    where
        E: Into<SwarmError>,
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
    {
        let mut backoff = STORE_BACKOFF_MIN;
        loop {
            match op().await.map_err(Into::<SwarmError>::into) {
                Ok(value) => {
                    self.outage.recover();
                    return Ok(value);
                }
                Err(SwarmError::Store(e)) if e.is_transient() => {
                    self.store_failed(e, &mut backoff).await?;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

pub struct SwarmWorker {
    inner: Arc<WorkerInner>,
}

/// Requests a graceful stop from outside the worker, e.g. on Ctrl+C.
#[derive(Clone)]
pub struct ShutdownHandle {
    inner: Arc<WorkerInner>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        self.inner.request_stop(StopReason::Shutdown);
    }
}

impl SwarmWorker {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        config: SwarmConfig,
        collaborators: Collaborators,
    ) -> Self {
        let keys = config.keys();
        let registry = NodeRegistry::new(store.clone(), keys.nodes.clone());
        let heartbeat = Heartbeat::new(
            registry,
            config.node_id.clone(),
            config.heartbeat_interval.as_secs() as i64,
        );

        let inner = WorkerInner {
            frontier: Frontier::new(store.clone(), &keys.requests),
            dedup: DedupFilter::new(store.clone(), keys.dupefilter.clone()),
            movie_ids: DedupFilter::new(store.clone(), keys.movie_ids.clone()),
            tracker: CompletionTracker::new(
                store,
                keys.cover_ids.clone(),
                keys.trailer_ids.clone(),
                config.target,
            ),
            heartbeat,
            collaborators,
            progress_callback: None,
            stats: WorkerStats::default(),
            outage: OutageClock::default(),
            last_work: Mutex::new(Instant::now()),
            in_flight: AtomicUsize::new(0),
            stop: StopLatch::default(),
            stop_notify: Notify::new(),
            config,
        };

        Self {
            inner: Arc::new(inner),
        }
    }

    /// Must be called before `run`; later calls are ignored.
    pub fn with_progress_callback(mut self, callback: ProgressCallback) -> Self {
        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            inner.progress_callback = Some(callback);
        }
        self
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            inner: self.inner.clone(),
        }
    }

    pub fn frontier(&self) -> &Frontier {
        &self.inner.frontier
    }

    pub async fn run(&self) -> Result<WorkerSummary> {
        let inner = &self.inner;
        let node_id = inner.config.node_id.clone();
        let slots = inner.config.concurrency.max(1);

        inner.heartbeat.starting(unix_now()).await?;
        inner.mark_work();
        info!(
            node_id = %node_id,
            "Worker started with {} slots, target {}", slots, inner.config.target
        );

        let heartbeat_task = {
            let inner = inner.clone();
            tokio::spawn(async move {
                let period = inner.config.heartbeat_interval.max(Duration::from_millis(10));
                let mut ticker = tokio::time::interval(period);
                ticker.tick().await;
                while !inner.stopping() {
                    tokio::select! {
                        _ = ticker.tick() => {
                            if let Err(e) = inner.heartbeat.tick(unix_now()).await {
                                warn!("Heartbeat failed: {}", e);
                            }
                        }
                        _ = inner.stop_notify.notified() => {}
                    }
                }
            })
        };

        let mut handles = Vec::with_capacity(slots);
        for slot in 0..slots {
            let inner = inner.clone();
            handles.push(tokio::spawn(async move { run_slot(inner, slot).await }));
        }

        let mut failure = None;
        for joined in futures::future::join_all(handles).await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    inner.request_stop(StopReason::StoreUnavailable);
                    failure.get_or_insert(e);
                }
                Err(e) => {
                    inner.request_stop(StopReason::Shutdown);
                    failure.get_or_insert(SwarmError::JoinError(e));
                }
            }
        }

        inner.request_stop(StopReason::Shutdown);
        heartbeat_task.await?;

        match inner.heartbeat.shutdown().await {
            Ok(_) => debug!("Deregistered node {}", node_id),
            Err(e) => warn!("Could not deregister node {}: {}", node_id, e),
        }

        if let Some(e) = failure {
            return Err(e);
        }

        let summary = self.summary();
        info!(
            node_id = %node_id,
            "Worker finished ({:?}): {} pages, {} items, {} dropped",
            summary.reason, summary.pages, summary.items, summary.dropped_items
        );
        Ok(summary)
    }

    pub fn summary(&self) -> WorkerSummary {
        let stats = &self.inner.stats;
        WorkerSummary {
            reason: self.inner.stop_reason().unwrap_or(StopReason::Shutdown),
            pages: stats.pages.load(Ordering::Relaxed),
            fetch_failures: stats.fetch_failures.load(Ordering::Relaxed),
            duplicates: stats.duplicates.load(Ordering::Relaxed),
            malformed: stats.malformed.load(Ordering::Relaxed),
            rejected_records: stats.rejected_records.load(Ordering::Relaxed),
            items: stats.items.load(Ordering::Relaxed),
            dropped_items: stats.dropped_items.load(Ordering::Relaxed),
        }
    }
}

async fn run_slot(inner: Arc<WorkerInner>, slot: usize) -> Result<()> {
    debug!("Slot {} started", slot);
    let mut idle_backoff = inner.config.idle_backoff_min;
    let mut store_backoff = STORE_BACKOFF_MIN;

    while !inner.stopping() {
        // Safe point: never dispatch once the goal is met.
        match inner.tracker.progress().await {
            Ok(progress) if progress.is_satisfied() => {
                inner.frontier.close();
                if inner.request_stop(StopReason::TargetReached) {
                    info!(
                        "Target reached: {} covers, {} trailers (target {})",
                        progress.covers, progress.trailers, progress.target
                    );
                }
                break;
            }
            Ok(_) => {}
            Err(e) => {
                inner.store_failed(e, &mut store_backoff).await?;
                continue;
            }
        }

        let popped = match inner.frontier.pop().await {
            Ok(PopOutcome::Request(popped)) => popped,
            Ok(PopOutcome::Empty) => {
                inner.outage.recover();
                store_backoff = STORE_BACKOFF_MIN;
                if let Some(limit) = inner.config.idle_timeout
                    && inner.in_flight.load(Ordering::Acquire) == 0
                    && inner.idle_for() >= limit
                {
                    inner.request_stop(StopReason::Idle);
                    break;
                }
                debug!("Slot {} idle, backing off {:?}", slot, idle_backoff);
                inner.pause(idle_backoff).await;
                idle_backoff = (idle_backoff * 2).min(inner.config.idle_backoff_max);
                continue;
            }
            Ok(PopOutcome::Malformed { .. }) => {
                inner.stats.malformed.fetch_add(1, Ordering::Relaxed);
                continue;
            }
            Err(e) => {
                inner.store_failed(e, &mut store_backoff).await?;
                continue;
            }
        };
        inner.outage.recover();
        store_backoff = STORE_BACKOFF_MIN;
        inner.mark_work();
        idle_backoff = inner.config.idle_backoff_min;

        match inner.dedup.claim(&popped.fingerprint).await {
            Ok(true) => {}
            Ok(false) => {
                inner.stats.duplicates.fetch_add(1, Ordering::Relaxed);
                continue;
            }
            Err(e) => {
                // Not claimed, so hand it back once the store answers again.
                warn!("Claim of {} failed ({}), requeueing", popped.request.url, e);
                let request = &popped.request;
                inner.retry_store(|| inner.frontier.push(request)).await?;
                continue;
            }
        }

        if let Some(ref callback) = inner.progress_callback {
            callback(slot, popped.request.url.clone());
        }

        inner.in_flight.fetch_add(1, Ordering::AcqRel);
        let outcome = process(&inner, &popped).await;
        inner.in_flight.fetch_sub(1, Ordering::AcqRel);
        inner.mark_work();

        match outcome {
            Ok(()) => {}
            Err(e @ SwarmError::StoreUnavailable { .. }) => return Err(e),
            Err(e @ SwarmError::Store(StoreError::Closed)) => return Err(e),
            Err(e) => warn!(url = %popped.request.url, "Request failed: {}", e),
        }
    }

    debug!("Slot {} finished", slot);
    Ok(())
}

async fn process(inner: &WorkerInner, popped: &Popped) -> Result<()> {
    let request = &popped.request;
    let collab = &inner.collaborators;

    inner.heartbeat.on_request();
    let page = match collab.fetcher.fetch(&request.url).await {
        Ok(page) => page,
        Err(e) => {
            inner.stats.fetch_failures.fetch_add(1, Ordering::Relaxed);
            warn!(url = %request.url, "Giving up on request: {}", e);
            return Ok(());
        }
    };
    inner.stats.pages.fetch_add(1, Ordering::Relaxed);

    match (request.stage, &request.context) {
        (Stage::List, _) => handle_listing(inner, request, &page.body).await,
        (Stage::Detail, Some(context)) => handle_detail(inner, context, &page.body).await,
        (Stage::Video, Some(context)) => handle_video(inner, context, &page.body).await,
        (_, None) => {
            inner.stats.malformed.fetch_add(1, Ordering::Relaxed);
            warn!(url = %request.url, "Item request without context, dropping");
            Ok(())
        }
    }
}

fn malformed(inner: &WorkerInner, url: &str, reason: impl std::fmt::Display) {
    inner.stats.malformed.fetch_add(1, Ordering::Relaxed);
    warn!(url = %url, "Dropping malformed response: {}", reason);
}

async fn handle_listing(inner: &WorkerInner, request: &CrawlRequest, body: &str) -> Result<()> {
    let page = match ListingPage::from_url(&request.url) {
        Ok(page) => page,
        Err(e) => {
            malformed(inner, &request.url, e);
            return Ok(());
        }
    };
    let batch = match inner.collaborators.parser.parse_listing(body) {
        Ok(batch) => batch,
        Err(e) => {
            malformed(inner, &request.url, e);
            return Ok(());
        }
    };

    let mut emitted = 0;
    for entry in &batch.entries {
        let context = match MovieContext::from_listing(entry) {
            Ok(context) => context,
            Err(e) => {
                inner.stats.rejected_records.fetch_add(1, Ordering::Relaxed);
                debug!("Rejected listing entry from {}: {}", request.url, e);
                continue;
            }
        };
        let id = context.id.as_str();
        if !inner.retry_store(|| inner.movie_ids.claim_raw(id)).await? {
            continue;
        }
        let detail = CrawlRequest::detail(context);
        inner.retry_store(|| inner.frontier.push(&detail)).await?;
        emitted += 1;
    }

    if let Some(next) = page.next_after(batch.count()) {
        let follow_up = CrawlRequest::listing(&next, &inner.config.listing_url);
        inner.retry_store(|| inner.frontier.push(&follow_up)).await?;
    }
    debug!(
        "Listing type {} {} start {}: {} entries, {} new movies",
        page.movie_type,
        page.interval,
        page.start,
        batch.count(),
        emitted
    );
    Ok(())
}

async fn handle_detail(inner: &WorkerInner, context: &MovieContext, body: &str) -> Result<()> {
    let detail = match inner.collaborators.parser.parse_detail(body) {
        Ok(detail) => detail,
        Err(e) => {
            malformed(inner, &context.url, e);
            return Ok(());
        }
    };

    let trailer_page = detail.trailer_page.clone();
    let detailed = context.with_detail(detail);
    match trailer_page {
        Some(url) => {
            let video = CrawlRequest::video(url, detailed);
            inner.retry_store(|| inner.frontier.push(&video)).await?;
            Ok(())
        }
        None => finish(inner, detailed).await,
    }
}

async fn handle_video(inner: &WorkerInner, context: &MovieContext, body: &str) -> Result<()> {
    match inner.collaborators.parser.parse_video(body) {
        Ok(trailer) => finish(inner, context.with_trailer(trailer)).await,
        Err(e) => {
            malformed(inner, &context.url, e);
            Ok(())
        }
    }
}

/// Terminal path: download media, record achievements, persist the row.
async fn finish(inner: &WorkerInner, movie: MovieContext) -> Result<()> {
    let collab = &inner.collaborators;
    let media = collab.media.store_media(&movie).await;
    let movie_id = movie.id.clone();

    let Some(record) = MovieRecord::assemble(movie, media) else {
        inner.stats.dropped_items.fetch_add(1, Ordering::Relaxed);
        warn!("Dropping movie {}: no media could be downloaded", movie_id);
        return Ok(());
    };

    let id = movie_id.as_str();
    if record.has_cover {
        inner
            .retry_store(|| inner.tracker.record(id, AchievementKind::Cover))
            .await?;
    }
    if record.has_trailer {
        inner
            .retry_store(|| inner.tracker.record(id, AchievementKind::Trailer))
            .await?;
    }

    if let Err(e) = collab.sink.write(&record).await {
        error!("Failed to persist movie {}: {}", movie_id, e);
    }

    inner.stats.items.fetch_add(1, Ordering::Relaxed);
    if let Err(e) = inner
        .heartbeat
        .on_item(record.has_cover, record.has_trailer, unix_now())
        .await
    {
        warn!("Status report failed: {}", e);
    }
    Ok(())
}
