//! Cache-aside adapter.
//!
//! The single point where the cache and the store are kept coherent. Reads
//! consult the provider and degrade to a miss on any failure; writes and
//! invalidations are best-effort because by the time they run the store
//! mutation has already committed and must not be rolled back for a cache
//! problem. Failures go to tracing and metrics, never to the caller.

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::metrics::{CACHE_ERROR_TOTAL, CACHE_HIT_TOTAL, CACHE_MISS_TOTAL};

use super::provider::CacheProvider;

/// Best-effort facade over a [`CacheProvider`].
#[derive(Clone)]
pub struct CacheAside {
    provider: Arc<dyn CacheProvider>,
}

impl CacheAside {
    pub fn new(provider: Arc<dyn CacheProvider>) -> Self {
        Self { provider }
    }

    /// Read a cached record. Returns `None` on miss, on an expired entry, on
    /// a provider failure, and on a payload that no longer deserializes into
    /// `T` (stale shape after a schema change is treated as a miss).
    pub async fn read<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = match self.provider.get(key).await {
            Ok(value) => value,
            Err(err) => {
                CACHE_ERROR_TOTAL.with_label_values(&["get"]).inc();
                tracing::warn!(key = %key, error = %err, "Cache read failed, treating as miss");
                return None;
            }
        };

        let Some(value) = value else {
            CACHE_MISS_TOTAL.inc();
            return None;
        };

        match serde_json::from_value(value) {
            Ok(record) => {
                CACHE_HIT_TOTAL.inc();
                tracing::debug!(key = %key, "Cache hit");
                Some(record)
            }
            Err(err) => {
                CACHE_MISS_TOTAL.inc();
                tracing::warn!(key = %key, error = %err, "Cached payload no longer deserializes, treating as miss");
                None
            }
        }
    }

    /// Write a record snapshot under a key. Best-effort.
    pub async fn write<T: Serialize>(&self, key: &str, record: &T, ttl: Duration) {
        let value = match serde_json::to_value(record) {
            Ok(value) => value,
            Err(err) => {
                CACHE_ERROR_TOTAL.with_label_values(&["set"]).inc();
                tracing::warn!(key = %key, error = %err, "Record not serializable for cache, skipping write");
                return;
            }
        };

        if let Err(err) = self.provider.set(key, value, ttl).await {
            CACHE_ERROR_TOTAL.with_label_values(&["set"]).inc();
            tracing::warn!(key = %key, error = %err, "Cache write failed, store remains authoritative");
        } else {
            tracing::debug!(key = %key, ttl_seconds = ttl.as_secs(), "Cache entry written");
        }
    }

    /// Remove a key. Best-effort.
    pub async fn invalidate(&self, key: &str) {
        if let Err(err) = self.provider.delete(key).await {
            CACHE_ERROR_TOTAL.with_label_values(&["delete"]).inc();
            tracing::warn!(key = %key, error = %err, "Cache invalidation failed");
        } else {
            tracing::debug!(key = %key, "Cache entry invalidated");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::provider::CacheError;
    use crate::cache::MemoryCache;
    use async_trait::async_trait;
    use serde_json::{json, Value};

    /// Provider that fails every call.
    struct BrokenCache;

    #[async_trait]
    impl CacheProvider for BrokenCache {
        async fn get(&self, _key: &str) -> Result<Option<Value>, CacheError> {
            Err(CacheError::Backend("down".into()))
        }

        async fn set(&self, _key: &str, _value: Value, _ttl: Duration) -> Result<(), CacheError> {
            Err(CacheError::Backend("down".into()))
        }

        async fn delete(&self, _key: &str) -> Result<(), CacheError> {
            Err(CacheError::Backend("down".into()))
        }
    }

    #[tokio::test]
    async fn test_round_trip() {
        let aside = CacheAside::new(Arc::new(MemoryCache::new()));
        aside.write("k", &json!({"id": 7}), Duration::from_secs(60)).await;

        let hit: Option<Value> = aside.read("k").await;
        assert_eq!(hit, Some(json!({"id": 7})));
    }

    #[tokio::test]
    async fn test_provider_failure_is_a_miss_not_an_error() {
        let aside = CacheAside::new(Arc::new(BrokenCache));

        // None of these return errors or panic
        aside.write("k", &json!(1), Duration::from_secs(60)).await;
        let miss: Option<Value> = aside.read("k").await;
        assert_eq!(miss, None);
        aside.invalidate("k").await;
    }

    #[tokio::test]
    async fn test_invalidate_removes_entry() {
        let aside = CacheAside::new(Arc::new(MemoryCache::new()));
        aside.write("k", &json!(1), Duration::from_secs(60)).await;
        aside.invalidate("k").await;

        let miss: Option<Value> = aside.read("k").await;
        assert_eq!(miss, None);
    }

    #[tokio::test]
    async fn test_undeserializable_payload_is_a_miss() {
        #[derive(serde::Deserialize)]
        #[allow(dead_code)]
        struct Strict {
            id: i64,
        }

        let aside = CacheAside::new(Arc::new(MemoryCache::new()));
        aside.write("k", &json!("not an object"), Duration::from_secs(60)).await;

        let miss: Option<Strict> = aside.read("k").await;
        assert!(miss.is_none());
    }
}
