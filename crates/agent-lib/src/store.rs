//! Coordination store used to publish why the agent stopped a container

use crate::error::StoreError;
use async_trait::async_trait;
use dashmap::DashMap;

/// Write-only key/value store shared with the rest of the platform
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
}

/// Key under which the stop reason of a container is published
pub fn kill_reason_key(container_id: &str) -> String {
    format!("agent:{}:container:reason", container_id)
}

/// In-process store, used when no shared store is configured
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).map(|v| v.clone())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl CoordinationStore for MemoryStore {
    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

#[cfg(feature = "redis-store")]
pub use self::redis_store::RedisStore;

#[cfg(feature = "redis-store")]
mod redis_store {
    use super::{CoordinationStore, StoreError};
    use async_trait::async_trait;
    use redis::aio::MultiplexedConnection;

    /// Redis-backed coordination store
    #[derive(Clone)]
    pub struct RedisStore {
        conn: MultiplexedConnection,
    }

    impl RedisStore {
        /// Connect to `url` (e.g. `redis://127.0.0.1:6379/0`)
        pub async fn connect(url: &str) -> Result<Self, StoreError> {
            let client =
                redis::Client::open(url).map_err(|e| StoreError::Unavailable(e.to_string()))?;
            let conn = client
                .get_multiplexed_tokio_connection()
                .await
                .map_err(|e| StoreError::Unavailable(e.to_string()))?;
            Ok(Self { conn })
        }
    }

    #[async_trait]
    impl CoordinationStore for RedisStore {
        async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
            let mut conn = self.conn.clone();
            redis::cmd("SET")
                .arg(key)
                .arg(value)
                .query_async::<_, ()>(&mut conn)
                .await
                .map_err(|e| StoreError::Write(e.to_string()))
        }
    }
}
