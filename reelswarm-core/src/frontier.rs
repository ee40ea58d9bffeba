//! Swarm-wide priority frontier.
//!
//! Entries are keyed by the request URL's fingerprint, so a re-push of the
//! same URL replaces the resident entry (newest payload and score win).
//! Pops are strictly by ascending score; equal scores pop in enqueue order.

use crate::dedup::Fingerprint;
use crate::error::{Result, StoreResult};
use crate::request::CrawlRequest;
use crate::store::{KeyValueStore, QueueInsert, QueueKeys};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Queued,
    Updated,
    /// The frontier was closed; nothing was written.
    Closed,
}

/// A request taken from the head of the frontier, with the fingerprint it
/// was stored under.
#[derive(Debug, Clone, PartialEq)]
pub struct Popped {
    pub fingerprint: Fingerprint,
    pub score: i64,
    pub request: CrawlRequest,
}

pub enum PopOutcome {
    Request(Popped),
    /// Nothing queued right now. Callers back off and retry.
    Empty,
    /// An entry was removed but its payload could not be decoded. It is
    /// gone for good.
    Malformed { token: String, reason: String },
}

pub struct Frontier {
    store: Arc<dyn KeyValueStore>,
    keys: QueueKeys,
    closed: AtomicBool,
}

impl Frontier {
    pub fn new(store: Arc<dyn KeyValueStore>, base_key: &str) -> Self {
        Self {
            store,
            keys: QueueKeys::new(base_key),
            closed: AtomicBool::new(false),
        }
    }

    /// Inserts or updates `request` at `request.priority`.
    pub async fn push(&self, request: &CrawlRequest) -> Result<PushOutcome> {
        if self.is_closed() {
            debug!("Frontier closed, dropping push of {}", request.url);
            return Ok(PushOutcome::Closed);
        }

        let fingerprint = Fingerprint::of_url(&request.url)?;
        let payload = request.to_payload()?;
        let score = request.priority.score();

        let outcome = match self
            .store
            .queue_push(&self.keys, fingerprint.as_str(), score, &payload)
            .await?
        {
            QueueInsert::Inserted => PushOutcome::Queued,
            QueueInsert::Replaced => PushOutcome::Updated,
        };
        debug!("Pushed {} ({:?}, score {})", request.url, outcome, score);
        Ok(outcome)
    }

    pub async fn pop(&self) -> StoreResult<PopOutcome> {
        let Some(item) = self.store.queue_pop(&self.keys).await? else {
            return Ok(PopOutcome::Empty);
        };

        match CrawlRequest::from_payload(&item.payload) {
            Ok(request) => Ok(PopOutcome::Request(Popped {
                fingerprint: Fingerprint::from_token(item.token),
                score: item.score,
                request,
            })),
            Err(e) => {
                warn!("Dropping undecodable frontier entry {}: {}", item.token, e);
                Ok(PopOutcome::Malformed {
                    token: item.token,
                    reason: e.to_string(),
                })
            }
        }
    }

    pub async fn len(&self) -> StoreResult<u64> {
        self.store.queue_len(&self.keys).await
    }

    /// Stops accepting pushes from this handle. Pops keep working.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Operator reset of every key backing the frontier.
    pub async fn reset(&self) -> StoreResult<u64> {
        self.store.delete(&self.keys.all()).await
    }

    pub fn keys(&self) -> &QueueKeys {
        &self.keys
    }
}
