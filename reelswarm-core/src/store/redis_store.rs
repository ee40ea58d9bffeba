//! Redis-backed store.
//!
//! Set and hash operations map onto single Redis commands. Queue push and pop
//! touch three keys each, so they run as Lua scripts, which Redis executes
//! atomically.
//!
//! A multiplexed connection does not come back after the socket drops, so the
//! store keeps its `Client` and opens a new connection on the next call after
//! any connection-level failure.

use super::{KeyValueStore, QueueInsert, QueueItem, QueueKeys};
use crate::error::{StoreError, StoreResult};

use async_trait::async_trait;
use redis::{AsyncCommands, Client, RedisResult, Script, aio::MultiplexedConnection};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// KEYS: ordering, payload, index, sequence. ARGV: token, score, payload.
const PUSH_SCRIPT: &str = r#"
local previous = redis.call('HGET', KEYS[3], ARGV[1])
if previous then
    redis.call('ZREM', KEYS[1], previous)
end
local seq = redis.call('INCR', KEYS[4])
local member = string.format('%020d:%s', seq, ARGV[1])
redis.call('ZADD', KEYS[1], ARGV[2], member)
redis.call('HSET', KEYS[3], ARGV[1], member)
redis.call('HSET', KEYS[2], ARGV[1], ARGV[3])
if previous then
    return 0
end
return 1
"#;

/// KEYS: ordering, payload, index. Returns {token, score, payload} or nil.
const POP_SCRIPT: &str = r#"
local popped = redis.call('ZPOPMIN', KEYS[1])
if #popped == 0 then
    return false
end
local token = string.sub(popped[1], 22)
local payload = redis.call('HGET', KEYS[2], token)
redis.call('HDEL', KEYS[2], token)
redis.call('HDEL', KEYS[3], token)
return {token, popped[2], payload or ''}
"#;

pub struct RedisStore {
    url: String,
    client: Client,
    connection: RwLock<Option<MultiplexedConnection>>,
    push_script: Script,
    pop_script: Script,
    closed: AtomicBool,
}

impl RedisStore {
    /// Opens a multiplexed connection and verifies it with a PING.
    pub async fn connect(url: &str) -> StoreResult<Self> {
        let client = Client::open(url).map_err(|e| StoreError::ConnectionFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| StoreError::ConnectionFailed {
                url: url.to_string(),
                reason: e.to_string(),
            })?;

        let store = Self {
            url: url.to_string(),
            client,
            connection: RwLock::new(Some(connection)),
            push_script: Script::new(PUSH_SCRIPT),
            pop_script: Script::new(POP_SCRIPT),
            closed: AtomicBool::new(false),
        };
        store.ping().await?;
        info!("Connected to store at {}", url);
        Ok(store)
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Returns the shared connection, opening a fresh one if the last was
    /// dropped.
    async fn conn(&self) -> StoreResult<MultiplexedConnection> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Closed);
        }
        if let Some(conn) = self.connection.read().await.as_ref() {
            return Ok(conn.clone());
        }

        let mut slot = self.connection.write().await;
        if let Some(conn) = slot.as_ref() {
            return Ok(conn.clone());
        }
        let conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| StoreError::ConnectionFailed {
                url: self.url.clone(),
                reason: e.to_string(),
            })?;
        info!("Reconnected to store at {}", self.url);
        *slot = Some(conn.clone());
        Ok(conn)
    }

    /// Maps a command result, forgetting the connection when it has failed.
    async fn check<T>(&self, result: RedisResult<T>) -> StoreResult<T> {
        match result {
            Ok(value) => Ok(value),
            Err(e) => {
                let err = StoreError::from(e);
                if err.is_transient() {
                    warn!("Store connection lost: {}", err);
                    self.connection.write().await.take();
                }
                Err(err)
            }
        }
    }
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn ping(&self) -> StoreResult<()> {
        let mut conn = self.conn().await?;
        let result: RedisResult<String> = redis::cmd("PING").query_async(&mut conn).await;
        self.check(result).await?;
        Ok(())
    }

    async fn set_add(&self, key: &str, member: &str) -> StoreResult<bool> {
        let mut conn = self.conn().await?;
        let added: i64 = self.check(conn.sadd(key, member).await).await?;
        Ok(added == 1)
    }

    async fn set_len(&self, key: &str) -> StoreResult<u64> {
        let mut conn = self.conn().await?;
        self.check(conn.scard(key).await).await
    }

    async fn hash_set(&self, key: &str, field: &str, value: &str) -> StoreResult<()> {
        let mut conn = self.conn().await?;
        self.check(conn.hset::<_, _, _, ()>(key, field, value).await).await
    }

    async fn hash_del(&self, key: &str, field: &str) -> StoreResult<bool> {
        let mut conn = self.conn().await?;
        let removed: i64 = self.check(conn.hdel(key, field).await).await?;
        Ok(removed > 0)
    }

    async fn hash_get_all(&self, key: &str) -> StoreResult<HashMap<String, String>> {
        let mut conn = self.conn().await?;
        self.check(conn.hgetall(key).await).await
    }

    async fn queue_push(
        &self,
        keys: &QueueKeys,
        token: &str,
        score: i64,
        payload: &str,
    ) -> StoreResult<QueueInsert> {
        let mut conn = self.conn().await?;
        let result = self
            .push_script
            .key(&keys.ordering)
            .key(&keys.payload)
            .key(&keys.index)
            .key(&keys.sequence)
            .arg(token)
            .arg(score)
            .arg(payload)
            .invoke_async(&mut conn)
            .await;
        let inserted: i64 = self.check(result).await?;

        Ok(if inserted == 1 {
            QueueInsert::Inserted
        } else {
            QueueInsert::Replaced
        })
    }

    async fn queue_pop(&self, keys: &QueueKeys) -> StoreResult<Option<QueueItem>> {
        let mut conn = self.conn().await?;
        let result = self
            .pop_script
            .key(&keys.ordering)
            .key(&keys.payload)
            .key(&keys.index)
            .invoke_async(&mut conn)
            .await;
        let popped: Option<(String, String, String)> = self.check(result).await?;

        match popped {
            Some((token, score, payload)) => {
                // Redis renders scores as doubles; frontier scores are whole numbers.
                let score = score
                    .parse::<f64>()
                    .map_err(|e| StoreError::Command(format!("bad score '{}': {}", score, e)))?
                    as i64;
                debug!("Popped {} (score {})", token, score);
                Ok(Some(QueueItem {
                    token,
                    score,
                    payload,
                }))
            }
            None => Ok(None),
        }
    }

    async fn queue_len(&self, keys: &QueueKeys) -> StoreResult<u64> {
        let mut conn = self.conn().await?;
        self.check(conn.zcard(&keys.ordering).await).await
    }

    async fn delete(&self, keys: &[String]) -> StoreResult<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn().await?;
        self.check(conn.del(keys).await).await
    }

    async fn close(&self) -> StoreResult<()> {
        // The multiplexed connection shuts down once its last clone drops.
        self.closed.store(true, Ordering::Release);
        self.connection.write().await.take();
        debug!("Closed store client for {}", self.url);
        Ok(())
    }
}
