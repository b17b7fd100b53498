//! Shared Redis counter store.

use super::{CounterError, CounterKind, CounterStore};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::time::Duration;
use tracing::debug;

/// Counters shared by every replica through Redis.
///
/// Increments run `INCRBY` and `EXPIRE` in one `MULTI`/`EXEC` block, so the
/// count and its TTL window change together.
pub struct RedisCounterStore {
    conn: ConnectionManager,
}

impl RedisCounterStore {
    /// Connect, failing if Redis does not answer within `connect_timeout`.
    pub async fn connect(url: &str, connect_timeout: Duration) -> Result<Self, CounterError> {
        let client = redis::Client::open(url)?;

        debug!("Connecting to Redis counter store");

        let conn = tokio::time::timeout(connect_timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| CounterError::Timeout)??;

        Ok(Self { conn })
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn increment(
        &self,
        _kind: CounterKind,
        key: &str,
        amount: u64,
        ttl: Duration,
    ) -> Result<u64, CounterError> {
        let mut conn = self.conn.clone();
        let ttl_seconds = ttl.as_secs().max(1) as i64;

        let (count,): (u64,) = redis::pipe()
            .atomic()
            .incr(key, amount)
            .expire(key, ttl_seconds)
            .ignore()
            .query_async(&mut conn)
            .await?;

        Ok(count)
    }

    async fn get(&self, _kind: CounterKind, key: &str) -> Result<u64, CounterError> {
        let mut conn = self.conn.clone();
        let count: Option<u64> = conn.get(key).await?;
        Ok(count.unwrap_or(0))
    }

    fn name(&self) -> &str {
        "redis"
    }
}
