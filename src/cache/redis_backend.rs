//! Redis cache provider.
//!
//! Values are stored as JSON strings with `SET .. EX`; expiry is enforced by
//! Redis itself. Uses a multiplexed connection manager so one provider can be
//! shared across every service instance.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use serde_json::Value;

use crate::config::RedisConfig;

use super::provider::{CacheError, CacheProvider};

/// Redis-backed cache provider.
pub struct RedisCache {
    connection: ConnectionManager,
}

impl RedisCache {
    /// Connect to Redis and build a provider.
    pub async fn connect(config: &RedisConfig) -> Result<Self, CacheError> {
        let client = Client::open(config.url.as_str())?;
        let connection = ConnectionManager::new(client).await?;

        tracing::info!(url = %config.url, "Redis cache provider connected");

        Ok(Self { connection })
    }

    /// Build a provider from an existing connection manager.
    pub fn from_connection(connection: ConnectionManager) -> Self {
        Self { connection }
    }
}

#[async_trait]
impl CacheProvider for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<Value>, CacheError> {
        let mut conn = self.connection.clone();
        let raw: Option<String> = conn.get(key).await?;
        match raw {
            Some(payload) => Ok(Some(serde_json::from_str(&payload)?)),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: Value, ttl: Duration) -> Result<(), CacheError> {
        let payload = serde_json::to_string(&value)?;
        // SET with EX: Redis enforces the TTL, minimum one second
        let seconds = ttl.as_secs().max(1);
        let mut conn = self.connection.clone();
        conn.set_ex::<_, _, ()>(key, payload, seconds).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let mut conn = self.connection.clone();
        conn.del::<_, ()>(key).await?;
        Ok(())
    }
}
