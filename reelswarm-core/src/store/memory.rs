//! In-process store with the same atomic contract as Redis.
//!
//! All state sits behind one mutex, so every trait method is atomic with
//! respect to every other. Used by tests and single-machine dry runs.

use super::{KeyValueStore, QueueInsert, QueueItem, QueueKeys};
use crate::error::{StoreError, StoreResult};

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;

#[derive(Default)]
struct MemoryQueue {
    order: BTreeMap<(i64, u64), String>,
    entries: HashMap<String, ((i64, u64), String)>,
    sequence: u64,
}

#[derive(Default)]
struct MemoryState {
    sets: HashMap<String, HashSet<String>>,
    hashes: HashMap<String, HashMap<String, String>>,
    queues: HashMap<String, MemoryQueue>,
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    unreachable: AtomicBool,
    closed: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates a network partition: every call fails with a transient error
    /// until switched back.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::Release);
    }

    fn check(&self) -> StoreResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Closed);
        }
        if self.unreachable.load(Ordering::Acquire) {
            return Err(StoreError::Io("connection refused (simulated)".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn ping(&self) -> StoreResult<()> {
        self.check()
    }

    async fn set_add(&self, key: &str, member: &str) -> StoreResult<bool> {
        self.check()?;
        let mut state = self.state.lock().await;
        Ok(state
            .sets
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string()))
    }

    async fn set_len(&self, key: &str) -> StoreResult<u64> {
        self.check()?;
        let state = self.state.lock().await;
        Ok(state.sets.get(key).map(|s| s.len() as u64).unwrap_or(0))
    }

    async fn hash_set(&self, key: &str, field: &str, value: &str) -> StoreResult<()> {
        self.check()?;
        let mut state = self.state.lock().await;
        state
            .hashes
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value.to_string());
        Ok(())
    }

    async fn hash_del(&self, key: &str, field: &str) -> StoreResult<bool> {
        self.check()?;
        let mut state = self.state.lock().await;
        Ok(state
            .hashes
            .get_mut(key)
            .map(|h| h.remove(field).is_some())
            .unwrap_or(false))
    }

    async fn hash_get_all(&self, key: &str) -> StoreResult<HashMap<String, String>> {
        self.check()?;
        let state = self.state.lock().await;
        Ok(state.hashes.get(key).cloned().unwrap_or_default())
    }

    async fn queue_push(
        &self,
        keys: &QueueKeys,
        token: &str,
        score: i64,
        payload: &str,
    ) -> StoreResult<QueueInsert> {
        self.check()?;
        let mut state = self.state.lock().await;
        let queue = state.queues.entry(keys.ordering.clone()).or_default();

        let previous = queue.entries.remove(token);
        if let Some((slot, _)) = previous {
            queue.order.remove(&slot);
        }

        queue.sequence += 1;
        let slot = (score, queue.sequence);
        queue.order.insert(slot, token.to_string());
        queue
            .entries
            .insert(token.to_string(), (slot, payload.to_string()));

        Ok(if previous.is_some() {
            QueueInsert::Replaced
        } else {
            QueueInsert::Inserted
        })
    }

    async fn queue_pop(&self, keys: &QueueKeys) -> StoreResult<Option<QueueItem>> {
        self.check()?;
        let mut state = self.state.lock().await;
        let Some(queue) = state.queues.get_mut(&keys.ordering) else {
            return Ok(None);
        };

        let Some(((score, _), token)) = queue.order.pop_first() else {
            return Ok(None);
        };
        let payload = queue
            .entries
            .remove(&token)
            .map(|(_, payload)| payload)
            .unwrap_or_default();

        Ok(Some(QueueItem {
            token,
            score,
            payload,
        }))
    }

    async fn queue_len(&self, keys: &QueueKeys) -> StoreResult<u64> {
        self.check()?;
        let state = self.state.lock().await;
        Ok(state
            .queues
            .get(&keys.ordering)
            .map(|q| q.order.len() as u64)
            .unwrap_or(0))
    }

    async fn delete(&self, keys: &[String]) -> StoreResult<u64> {
        self.check()?;
        let mut state = self.state.lock().await;
        let mut removed = 0;
        for key in keys {
            if state.sets.remove(key).is_some() {
                removed += 1;
            }
            if state.hashes.remove(key).is_some() {
                removed += 1;
            }
            if state.queues.remove(key).is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn close(&self) -> StoreResult<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}
