//! Cache backends available to the CLI: Redis for real runs, an in-process
//! map for local trials (`memory://`).

use std::time::Duration;

use async_trait::async_trait;
use bucket_migrate_core::contract::{CacheBackend, CacheError};
use bucket_migrate_core::store::MemoryCache;
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use redis::AsyncCommands;
use tokio::sync::Mutex;
use tracing::{debug, info};

pub const MEMORY_CACHE_URL: &str = "memory://";

fn backend_error(e: redis::RedisError) -> CacheError {
    CacheError::Backend(Box::new(e))
}

/// Glob pattern matching every key that starts with `prefix` literally.
fn scan_pattern(prefix: &str) -> String {
    let mut pattern = String::with_capacity(prefix.len() + 1);
    for c in prefix.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('*');
    pattern
}

/// Redis-backed [`CacheBackend`] over a reconnecting connection manager.
pub struct RedisCache {
    manager: Mutex<Option<ConnectionManager>>,
}

impl RedisCache {
    /// Connects to `url`. Every command, and the connection attempt itself,
    /// fails once `response_timeout` passes without a reply.
    pub async fn connect(url: &str, response_timeout: Duration) -> Result<Self, CacheError> {
        let client = redis::Client::open(url).map_err(backend_error)?;
        let config = ConnectionManagerConfig::new()
            .set_connection_timeout(response_timeout)
            .set_response_timeout(response_timeout);
        let manager = ConnectionManager::new_with_config(client, config)
            .await
            .map_err(backend_error)?;
        info!(response_timeout_ms = response_timeout.as_millis() as u64, "Connected to Redis");
        Ok(Self {
            manager: Mutex::new(Some(manager)),
        })
    }

    async fn connection(&self) -> Result<ConnectionManager, CacheError> {
        self.manager.lock().await.clone().ok_or(CacheError::Closed)
    }
}

#[async_trait]
impl CacheBackend for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.connection().await?;
        conn.get::<_, Option<String>>(key)
            .await
            .map_err(backend_error)
    }

    async fn set_with_expiry(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let mut conn = self.connection().await?;
        conn.set_ex::<_, _, ()>(key, value, ttl.as_secs().max(1))
            .await
            .map_err(backend_error)
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, CacheError> {
        let mut conn = self.connection().await?;
        let mut iter = conn
            .scan_match::<_, String>(scan_pattern(prefix))
            .await
            .map_err(backend_error)?;
        let mut keys = Vec::new();
        while let Some(key) = iter.next_item().await {
            keys.push(key);
        }
        // SCAN may return a key more than once.
        keys.sort_unstable();
        keys.dedup();
        debug!(prefix, found = keys.len(), "Scanned Redis keys");
        Ok(keys)
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let mut conn = self.connection().await?;
        conn.del::<_, ()>(key).await.map_err(backend_error)
    }

    async fn close(&self) -> Result<(), CacheError> {
        if self.manager.lock().await.take().is_some() {
            debug!("Redis connection released");
        }
        Ok(())
    }
}

/// The backend selected by `cache.url`.
pub enum CliCache {
    Redis(RedisCache),
    Memory(MemoryCache),
}

impl CliCache {
    pub async fn open(url: &str, response_timeout: Duration) -> Result<Self, CacheError> {
        if url == MEMORY_CACHE_URL {
            info!("Using in-process cache; transfer records last only for this run");
            return Ok(Self::Memory(MemoryCache::new()));
        }
        RedisCache::connect(url, response_timeout)
            .await
            .map(Self::Redis)
    }
}

#[async_trait]
impl CacheBackend for CliCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        match self {
            Self::Redis(c) => c.get(key).await,
            Self::Memory(c) => c.get(key).await,
        }
    }

    async fn set_with_expiry(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        match self {
            Self::Redis(c) => c.set_with_expiry(key, value, ttl).await,
            Self::Memory(c) => c.set_with_expiry(key, value, ttl).await,
        }
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, CacheError> {
        match self {
            Self::Redis(c) => c.scan_prefix(prefix).await,
            Self::Memory(c) => c.scan_prefix(prefix).await,
        }
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        match self {
            Self::Redis(c) => c.delete(key).await,
            Self::Memory(c) => c.delete(key).await,
        }
    }

    async fn close(&self) -> Result<(), CacheError> {
        match self {
            Self::Redis(c) => c.close().await,
            Self::Memory(c) => c.close().await,
        }
    }
}
