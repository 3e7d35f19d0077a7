//! Provider trait for cache storage.
//!
//! Providers store opaque JSON values under string keys with a TTL. Every
//! operation may fail independently of the backing store; callers must treat
//! failures as misses/no-ops and never propagate them (see
//! [`super::CacheAside`]).

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// Errors that can occur during cache provider operations.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Redis operation failed
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Provider is unavailable or misbehaving
    #[error("Cache backend error: {0}")]
    Backend(String),
}

/// Backend trait for cache storage.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; a provider is shared across every
/// service instance configured with it.
///
/// # TTL Contract
///
/// An entry must never be served once its TTL has elapsed. Backends without
/// native expiry (memory) enforce this on read.
#[async_trait]
pub trait CacheProvider: Send + Sync {
    /// Get a non-expired value by key. `Ok(None)` is a miss.
    async fn get(&self, key: &str) -> Result<Option<Value>, CacheError>;

    /// Store a value under a key with the given TTL.
    async fn set(&self, key: &str, value: Value, ttl: Duration) -> Result<(), CacheError>;

    /// Remove a key. Removing an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<(), CacheError>;
}
