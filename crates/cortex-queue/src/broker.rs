//! Broker capability boundary.
//!
//! The queue needs a small set of atomic list and counter primitives; this
//! trait names exactly those. Implementations must be object-safe so callers
//! can hold an `Arc<dyn Broker>` without knowing the concrete transport
//! (Redis in production, an in-process list broker in tests).

use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;

use crate::QueueError;

#[async_trait]
pub trait Broker: Send + Sync {
    /// Append to the tail of a list (RPUSH).
    async fn push_tail(&self, key: &str, value: &[u8]) -> Result<(), QueueError>;

    /// Prepend to the head of a list (LPUSH).
    async fn push_head(&self, key: &str, value: &[u8]) -> Result<(), QueueError>;

    /// Atomically move the tail of `src` to the head of `dst`, blocking up to
    /// `timeout` (BRPOPLPUSH). `None` on timeout with no entry.
    async fn pop_tail_push_head(
        &self,
        src: &str,
        dst: &str,
        timeout: Duration,
    ) -> Result<Option<Vec<u8>>, QueueError>;

    /// List length (LLEN).
    async fn list_len(&self, key: &str) -> Result<u64, QueueError>;

    /// Full range read (LRANGE 0 -1), head first.
    async fn list_range(&self, key: &str) -> Result<Vec<Vec<u8>>, QueueError>;

    /// Remove up to `count` occurrences of `value` from the list head-first
    /// (LREM). Returns the number of removals.
    async fn remove_value(&self, key: &str, count: i64, value: &[u8])
        -> Result<u64, QueueError>;

    /// Counter read (GET); `None` when the key is absent.
    async fn counter_get(&self, key: &str) -> Result<Option<u64>, QueueError>;

    /// Counter increment (INCR), returning the new value.
    async fn counter_incr(&self, key: &str) -> Result<u64, QueueError>;

    /// Key delete (DEL).
    async fn delete(&self, key: &str) -> Result<(), QueueError>;

    /// Connectivity probe for readiness checks.
    async fn ping(&self) -> Result<(), QueueError>;
}

// ---------------------------------------------------------------------------
// Redis implementation
// ---------------------------------------------------------------------------

/// Production broker over a shared multiplexed Redis connection.
///
/// `ConnectionManager` is cloneable and reconnects on failure; every
/// operation clones the handle, so `RedisBroker` itself is cheaply shared.
#[derive(Clone)]
pub struct RedisBroker {
    manager: redis::aio::ConnectionManager,
}

impl RedisBroker {
    pub async fn connect(url: &str, response_timeout: Duration) -> Result<Self, QueueError> {
        let client = redis::Client::open(url)?;
        let config = redis::aio::ConnectionManagerConfig::new()
            .set_response_timeout(response_timeout);
        let manager = redis::aio::ConnectionManager::new_with_config(client, config).await?;
        Ok(Self { manager })
    }
}

#[async_trait]
impl Broker for RedisBroker {
    async fn push_tail(&self, key: &str, value: &[u8]) -> Result<(), QueueError> {
        let mut conn = self.manager.clone();
        let _: i64 = conn.rpush(key, value).await?;
        Ok(())
    }

    async fn push_head(&self, key: &str, value: &[u8]) -> Result<(), QueueError> {
        let mut conn = self.manager.clone();
        let _: i64 = conn.lpush(key, value).await?;
        Ok(())
    }

    async fn pop_tail_push_head(
        &self,
        src: &str,
        dst: &str,
        timeout: Duration,
    ) -> Result<Option<Vec<u8>>, QueueError> {
        let mut conn = self.manager.clone();
        let value: Option<Vec<u8>> = conn.brpoplpush(src, dst, timeout.as_secs_f64()).await?;
        Ok(value)
    }

    async fn list_len(&self, key: &str) -> Result<u64, QueueError> {
        let mut conn = self.manager.clone();
        let len: u64 = conn.llen(key).await?;
        Ok(len)
    }

    async fn list_range(&self, key: &str) -> Result<Vec<Vec<u8>>, QueueError> {
        let mut conn = self.manager.clone();
        let items: Vec<Vec<u8>> = conn.lrange(key, 0, -1).await?;
        Ok(items)
    }

    async fn remove_value(
        &self,
        key: &str,
        count: i64,
        value: &[u8],
    ) -> Result<u64, QueueError> {
        let mut conn = self.manager.clone();
        let removed: u64 = conn.lrem(key, count as isize, value).await?;
        Ok(removed)
    }

    async fn counter_get(&self, key: &str) -> Result<Option<u64>, QueueError> {
        let mut conn = self.manager.clone();
        let value: Option<u64> = conn.get(key).await?;
        Ok(value)
    }

    async fn counter_incr(&self, key: &str) -> Result<u64, QueueError> {
        let mut conn = self.manager.clone();
        let value: u64 = conn.incr(key, 1).await?;
        Ok(value)
    }

    async fn delete(&self, key: &str) -> Result<(), QueueError> {
        let mut conn = self.manager.clone();
        let _: i64 = conn.del(key).await?;
        Ok(())
    }

    async fn ping(&self) -> Result<(), QueueError> {
        let mut conn = self.manager.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}
