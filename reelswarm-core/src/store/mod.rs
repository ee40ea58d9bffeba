//! Shared key-value store abstraction.
//!
//! Every coordination component talks to the swarm's single source of truth
//! through [`KeyValueStore`]. Each method is one atomic store operation; the
//! components never compose check-then-write sequences out of them.

mod memory;
mod redis_store;

pub use memory::MemoryStore;
pub use redis_store::RedisStore;

use crate::error::StoreResult;
use async_trait::async_trait;
use std::collections::HashMap;

/// Keys backing one priority queue.
///
/// The ordering key is a sorted set of `seq:token` members; payloads and the
/// token → member index live in two hashes so a re-push can replace an entry
/// in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueKeys {
    pub ordering: String,
    pub payload: String,
    pub index: String,
    pub sequence: String,
}

impl QueueKeys {
    pub fn new(base: &str) -> Self {
        Self {
            ordering: base.to_string(),
            payload: format!("{}:payload", base),
            index: format!("{}:index", base),
            sequence: format!("{}:seq", base),
        }
    }

    pub fn all(&self) -> Vec<String> {
        vec![
            self.ordering.clone(),
            self.payload.clone(),
            self.index.clone(),
            self.sequence.clone(),
        ]
    }
}

/// Whether a queue push created a new entry or replaced a resident one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueInsert {
    Inserted,
    Replaced,
}

/// An entry removed from the head of a queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueItem {
    pub token: String,
    pub score: i64,
    pub payload: String,
}

/// Atomic primitives the coordination engine needs from the shared store.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Round-trip check used by the operator `ping` and the monitor.
    async fn ping(&self) -> StoreResult<()>;

    /// Adds `member` to the set, returning true only if it was not present.
    async fn set_add(&self, key: &str, member: &str) -> StoreResult<bool>;

    async fn set_len(&self, key: &str) -> StoreResult<u64>;

    async fn hash_set(&self, key: &str, field: &str, value: &str) -> StoreResult<()>;

    /// Removes a field, returning true if it existed.
    async fn hash_del(&self, key: &str, field: &str) -> StoreResult<bool>;

    async fn hash_get_all(&self, key: &str) -> StoreResult<HashMap<String, String>>;

    /// Inserts or replaces `token` with the given score and payload.
    ///
    /// A replaced entry takes a fresh enqueue sequence, so among equal scores
    /// it sorts after everything already queued.
    async fn queue_push(
        &self,
        keys: &QueueKeys,
        token: &str,
        score: i64,
        payload: &str,
    ) -> StoreResult<QueueInsert>;

    /// Removes and returns the lowest-scored entry (earliest enqueued on ties).
    async fn queue_pop(&self, keys: &QueueKeys) -> StoreResult<Option<QueueItem>>;

    async fn queue_len(&self, keys: &QueueKeys) -> StoreResult<u64>;

    /// Deletes whole keys, returning how many existed.
    async fn delete(&self, keys: &[String]) -> StoreResult<u64>;

    /// Ends the client's lifecycle. Later calls fail with `StoreError::Closed`.
    async fn close(&self) -> StoreResult<()>;
}
