//! Redis-backed [`DurableStore`].

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use tracing::{debug, info};

use super::{DurableStore, StoreResult, ttl_secs};

/// Store backed by a shared Redis instance.
///
/// The connection manager reconnects transparently; each call clones the handle.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
}

impl fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisStore")
            .field("connection", &"ConnectionManager")
            .finish()
    }
}

impl RedisStore {
    pub async fn connect(redis_url: &str) -> StoreResult<Self> {
        info!("Connecting to Redis at {}", redis_url);

        let client = redis::Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;

        info!("Connected to Redis");
        Ok(Self { conn })
    }
}

#[async_trait]
impl DurableStore for RedisStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()> {
        debug!("Store SETEX: {} (TTL: {:?})", key, ttl);
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(key, value, ttl_secs(ttl)).await?;
        Ok(())
    }

    async fn delete(&self, keys: &[&str]) -> StoreResult<()> {
        if keys.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(keys).await?;
        Ok(())
    }

    async fn list_push(&self, key: &str, value: &str) -> StoreResult<usize> {
        let mut conn = self.conn.clone();
        let len: usize = conn.rpush(key, value).await?;
        Ok(len)
    }

    async fn list_range(&self, key: &str, start: isize, end: isize) -> StoreResult<Vec<String>> {
        let mut conn = self.conn.clone();
        let values: Vec<String> = conn.lrange(key, start, end).await?;
        Ok(values)
    }

    async fn list_length(&self, key: &str) -> StoreResult<usize> {
        let mut conn = self.conn.clone();
        let len: usize = conn.llen(key).await?;
        Ok(len)
    }

    async fn list_remove(&self, key: &str, value: &str, count: isize) -> StoreResult<usize> {
        let mut conn = self.conn.clone();
        let removed: usize = conn.lrem(key, count, value).await?;
        Ok(removed)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
        let mut conn = self.conn.clone();
        let applied: bool = conn.expire(key, ttl_secs(ttl) as i64).await?;
        Ok(applied)
    }

    async fn ping(&self) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }
}
