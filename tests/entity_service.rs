//! Entity service integration tests.
//!
//! Exercises the cache-aside read/write path, partial-failure semantics of
//! batch creation, and cache-field divergence through the public API, with
//! the in-memory store and cache backends.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use vela_entity_service::beacon::MemoryBeaconEmitter;
use vela_entity_service::cache::{CacheError, CacheProvider, MemoryCache};
use vela_entity_service::entity::{CacheOptions, EntityError, EntityService};
use vela_entity_service::store::{
    BulkMode, BulkSummary, ChartBucket, ChartOptions, CurrencyOptions, Entity, EntityStore,
    Filter, MemoryStore, StoreError,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Customer {
    id: i64,
    email: String,
    balance: i64,
    account_id: i64,
}

impl Entity for Customer {
    fn id(&self) -> i64 {
        self.id
    }

    fn set_id(&mut self, id: i64) {
        self.id = id;
    }
}

fn customer(email: &str, balance: i64) -> Customer {
    Customer {
        id: 0,
        email: email.into(),
        balance,
        account_id: 7,
    }
}

/// Cache provider that fails every call.
struct BrokenCache;

#[async_trait]
impl CacheProvider for BrokenCache {
    async fn get(&self, _key: &str) -> Result<Option<Value>, CacheError> {
        Err(CacheError::Backend("cache down".into()))
    }

    async fn set(&self, _key: &str, _value: Value, _ttl: Duration) -> Result<(), CacheError> {
        Err(CacheError::Backend("cache down".into()))
    }

    async fn delete(&self, _key: &str) -> Result<(), CacheError> {
        Err(CacheError::Backend("cache down".into()))
    }
}

/// Store wrapper that fails the Nth insert, delegating everything else.
struct FailingStore {
    inner: MemoryStore<Customer>,
    fail_on: usize,
    inserts: AtomicUsize,
}

impl FailingStore {
    fn new(fail_on: usize) -> Self {
        Self {
            inner: MemoryStore::new("customers"),
            fail_on,
            inserts: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl EntityStore<Customer> for FailingStore {
    fn table_name(&self) -> &str {
        self.inner.table_name()
    }

    async fn insert(&self, data: Customer) -> Result<Customer, StoreError> {
        let attempt = self.inserts.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt == self.fail_on {
            return Err(StoreError::Backend("connection reset".into()));
        }
        self.inner.insert(data).await
    }

    async fn update(&self, data: Customer) -> Result<Customer, StoreError> {
        self.inner.update(data).await
    }

    async fn remove_soft(&self, record: &Customer) -> Result<Customer, StoreError> {
        self.inner.remove_soft(record).await
    }

    async fn remove_permanent(&self, record: &Customer) -> Result<(), StoreError> {
        self.inner.remove_permanent(record).await
    }

    async fn find_one(&self, filter: &Filter) -> Result<Option<Customer>, StoreError> {
        self.inner.find_one(filter).await
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<Customer>, StoreError> {
        self.inner.find_by_id(id).await
    }

    async fn find_all(
        &self,
        filter: &Filter,
        currency: Option<&CurrencyOptions>,
    ) -> Result<Vec<Customer>, StoreError> {
        self.inner.find_all(filter, currency).await
    }

    async fn count(&self, filter: &Filter) -> Result<u64, StoreError> {
        self.inner.count(filter).await
    }

    async fn sum(&self, metric: &str, filter: &Filter) -> Result<f64, StoreError> {
        self.inner.sum(metric, filter).await
    }

    async fn avg(&self, metric: &str, filter: &Filter) -> Result<f64, StoreError> {
        self.inner.avg(metric, filter).await
    }

    async fn charts(
        &self,
        field: &str,
        options: &ChartOptions,
        currency: Option<&CurrencyOptions>,
    ) -> Result<Vec<ChartBucket>, StoreError> {
        self.inner.charts(field, options, currency).await
    }

    async fn bulk(
        &self,
        records: Vec<Customer>,
        mode: BulkMode,
        dedup_field: Option<&str>,
    ) -> Result<BulkSummary, StoreError> {
        self.inner.bulk(records, mode, dedup_field).await
    }
}

#[tokio::test]
async fn cache_coherence_across_mutations() {
    let store: Arc<MemoryStore<Customer>> = Arc::new(MemoryStore::new("customers"));
    let service = EntityService::new(store)
        .with_cache(CacheOptions::new(Arc::new(MemoryCache::new())));

    let saved = service.create(customer("a@x.co", 10)).await.unwrap();
    let found = service.find_by_id(saved.id).await.unwrap().unwrap();
    assert_eq!(found.balance, 10);

    // Update refreshes the cache; the lookup must see the new value, never
    // the stale pre-update snapshot
    let mut richer = saved.clone();
    richer.balance = 99;
    service.update(richer).await.unwrap();

    let found = service.find_by_id(saved.id).await.unwrap().unwrap();
    assert_eq!(found.balance, 99);

    // Remove invalidates; the record is gone from reads
    let found = service.find_by_id(saved.id).await.unwrap().unwrap();
    service.remove(found).await.unwrap();
    assert!(service.find_by_id(saved.id).await.unwrap().is_none());
}

#[tokio::test]
async fn crud_succeeds_when_cache_always_fails() {
    let store: Arc<MemoryStore<Customer>> = Arc::new(MemoryStore::new("customers"));
    let service =
        EntityService::new(store).with_cache(CacheOptions::new(Arc::new(BrokenCache)));

    let saved = service.create(customer("a@x.co", 10)).await.unwrap();
    assert_eq!(saved.id, 1);

    let mut updated = saved.clone();
    updated.balance = 20;
    let updated = service.update(updated).await.unwrap();
    assert_eq!(updated.balance, 20);

    let found = service.find_by_id(saved.id).await.unwrap().unwrap();
    assert_eq!(found.balance, 20);

    let found = service
        .find_one(&Filter::new().eq("email", json!("a@x.co")))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found.id, saved.id);

    service.remove(found).await.unwrap();
    assert!(service.find_by_id(saved.id).await.unwrap().is_none());
}

#[tokio::test]
async fn create_many_partial_failure_reports_committed_prefix() {
    let store = Arc::new(FailingStore::new(3));
    let cache = Arc::new(MemoryCache::new());
    let emitter = Arc::new(MemoryBeaconEmitter::new());
    let service = EntityService::new(store)
        .with_cache(CacheOptions::new(cache.clone()))
        .with_beacon(emitter.clone());

    let err = service
        .create_many(5, customer("a@x.co", 1))
        .await
        .unwrap_err();

    // Exactly the two records created before the failure, in order
    assert_eq!(err.requested, 5);
    assert_eq!(err.created.len(), 2);
    assert_eq!(err.created[0].id, 1);
    assert_eq!(err.created[1].id, 2);
    assert!(matches!(err.source, EntityError::Store(_)));

    // Their events were already emitted and they remain cached and readable
    assert_eq!(emitter.events_for("account_7_customers").len(), 2);
    assert!(service.find_by_id(1).await.unwrap().is_some());
    assert!(service.find_by_id(2).await.unwrap().is_some());
    assert!(service.find_by_id(3).await.unwrap().is_none());
}

#[tokio::test]
async fn find_by_id_rejects_zero_before_touching_backends() {
    // Both backends would fail loudly if touched; the validation error must
    // come first
    let store = Arc::new(FailingStore::new(1));
    let service =
        EntityService::new(store).with_cache(CacheOptions::new(Arc::new(BrokenCache)));

    let err = service.find_by_id(0).await.unwrap_err();
    assert!(matches!(err, EntityError::Validation(_)));
}

#[tokio::test]
async fn custom_cache_field_diverges_from_id_lookups() {
    let store: Arc<MemoryStore<Customer>> = Arc::new(MemoryStore::new("customers"));
    let cache = Arc::new(MemoryCache::new());
    let service = EntityService::new(store.clone())
        .with_cache(CacheOptions::new(cache).field("email"));

    let saved = service.create(customer("a@x.co", 10)).await.unwrap();

    // Drop the row behind the service's back to tell cache hits from store
    // hits apart
    store.remove_permanent(&saved).await.unwrap();

    // By-id lookups never consult a cache keyed by another field
    assert!(service.find_by_id(saved.id).await.unwrap().is_none());

    // A find_one on the cache field still short-circuits
    let cached = service
        .find_one(&Filter::new().eq("email", json!("a@x.co")))
        .await
        .unwrap();
    assert_eq!(cached.unwrap().id, saved.id);
}

#[tokio::test]
async fn bulk_upsert_collapses_dedup_duplicates() {
    let store: Arc<MemoryStore<Customer>> = Arc::new(MemoryStore::new("customers"));
    let service = EntityService::new(store);

    let summary = service
        .bulk(
            vec![customer("dup@x.co", 1), customer("dup@x.co", 2)],
            BulkMode::Upsert,
            Some("email"),
        )
        .await
        .unwrap();

    assert_eq!(summary.inserted, 1);
    assert_eq!(summary.skipped, 1);

    let stored = service
        .find_all(&Filter::new().eq("email", json!("dup@x.co")), None)
        .await
        .unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].balance, 2, "last input row wins");
}

#[tokio::test]
async fn aggregates_and_charts_pass_through() {
    let store: Arc<MemoryStore<Customer>> = Arc::new(MemoryStore::new("customers"));
    let service = EntityService::new(store);

    service.create(customer("a@x.co", 10)).await.unwrap();
    service.create(customer("a@x.co", 30)).await.unwrap();
    service.create(customer("b@x.co", 20)).await.unwrap();

    assert_eq!(service.count(&Filter::new()).await.unwrap(), 3);
    assert_eq!(service.sum("balance", &Filter::new()).await.unwrap(), 60.0);
    assert_eq!(service.avg("balance", &Filter::new()).await.unwrap(), 20.0);

    let series = service
        .charts("email", &ChartOptions::default(), None)
        .await
        .unwrap();
    assert_eq!(series[0].label, "a@x.co");
    assert_eq!(series[0].count, 2);
}
