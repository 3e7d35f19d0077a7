//! Generic entity service.
//!
//! `EntityService<T>` is the read/write path every domain service is built
//! on: CRUD and aggregates against an [`EntityStore`], with an optional
//! cache-aside layer for single-record lookups and an optional beacon emitted
//! after each mutation.
//!
//! Ordering per mutation is strict: store write, then cache update, then
//! beacon. Cache and beacon failures are logged and absorbed; only validation
//! and store errors reach the caller.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

use crate::beacon::{BeaconEmitter, BeaconPayload, EntityAction};
use crate::cache::{derive_key, CacheAside, CacheProvider};
use crate::config::CacheSettings;
use crate::metrics::{BEACON_FAILED_TOTAL, BEACON_PUBLISHED_TOTAL, ENTITY_MUTATIONS_TOTAL};
use crate::store::{
    BulkMode, BulkSummary, ChartBucket, ChartOptions, CurrencyOptions, Entity, EntityStore,
    Filter, StoreError,
};

/// Default TTL when the cache options specify none: one day.
const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(86_400);

/// Default namespace for derived cache keys.
const DEFAULT_CACHE_NAMESPACE: &str = "database";

/// Errors surfaced by entity service operations.
#[derive(Debug, Error)]
pub enum EntityError {
    /// Caller supplied an invalid argument. No retry will help.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The backing store failed; surfaced unmodified.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Partial failure of [`EntityService::create_many`].
///
/// The batch is not a transaction: records created before the failing
/// iteration remain committed, cached, and evented. They are carried here so
/// the caller can tell a partial failure from a total one.
#[derive(Debug, Error)]
#[error("created {} of {requested} records before failing: {source}", .created.len())]
pub struct CreateManyError<T: Entity> {
    /// Records committed before the failure, in creation order
    pub created: Vec<T>,
    /// Requested batch size
    pub requested: usize,
    #[source]
    pub source: EntityError,
}

/// Cache configuration for one service instance.
#[derive(Clone)]
pub struct CacheOptions {
    provider: Arc<dyn CacheProvider>,
    field: Option<String>,
    ttl: Option<Duration>,
    namespace: String,
}

impl CacheOptions {
    pub fn new(provider: Arc<dyn CacheProvider>) -> Self {
        Self {
            provider,
            field: None,
            ttl: None,
            namespace: DEFAULT_CACHE_NAMESPACE.to_string(),
        }
    }

    /// Build options from crate settings: namespace and default TTL come
    /// from configuration, the cache field stays the identity field unless
    /// overridden afterwards.
    pub fn from_settings(provider: Arc<dyn CacheProvider>, settings: &CacheSettings) -> Self {
        Self {
            provider,
            field: None,
            ttl: Some(Duration::from_secs(settings.ttl_seconds)),
            namespace: settings.namespace.clone(),
        }
    }

    /// Key the cache by a field other than the identity field.
    pub fn field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }
}

struct CacheState {
    aside: CacheAside,
    field: Option<String>,
    ttl: Duration,
    namespace: String,
}

/// Generic CRUD service over an entity type.
pub struct EntityService<T: Entity> {
    store: Arc<dyn EntityStore<T>>,
    beacon: Option<Arc<dyn BeaconEmitter>>,
    cache: Option<CacheState>,
}

impl<T: Entity> EntityService<T> {
    /// Create a service with no cache and no beacon.
    pub fn new(store: Arc<dyn EntityStore<T>>) -> Self {
        Self {
            store,
            beacon: None,
            cache: None,
        }
    }

    /// Attach a beacon emitter. Mutations publish CREATE/UPDATE/DELETE events.
    pub fn with_beacon(mut self, beacon: Arc<dyn BeaconEmitter>) -> Self {
        self.beacon = Some(beacon);
        self
    }

    /// Attach a cache. Single-record lookups become cache-aside.
    pub fn with_cache(mut self, options: CacheOptions) -> Self {
        self.cache = Some(CacheState {
            aside: CacheAside::new(options.provider),
            field: options.field,
            ttl: options.ttl.unwrap_or(DEFAULT_CACHE_TTL),
            namespace: options.namespace,
        });
        self
    }

    pub fn table_name(&self) -> &str {
        self.store.table_name()
    }

    /// Field the cache is keyed by: the configured one, else the identity field.
    pub fn cache_field(&self) -> &str {
        self.cache
            .as_ref()
            .and_then(|c| c.field.as_deref())
            .unwrap_or_else(|| self.store.primary_key_field())
    }

    // ------------------------------------------------------------------
    // Mutations
    // ------------------------------------------------------------------

    /// Insert a record, cache it, and emit a CREATE beacon.
    pub async fn create(&self, data: T) -> Result<T, EntityError> {
        let record = self.store.insert(data).await?;
        self.cache_record(&record).await;
        self.send_event(EntityAction::Create, &record).await;
        ENTITY_MUTATIONS_TOTAL.with_label_values(&["CREATE"]).inc();
        Ok(record)
    }

    /// Create `qty` records from the same data, strictly sequentially.
    ///
    /// Each success is individually cached and evented before the next store
    /// call is issued, so emitted event order matches creation order. On
    /// failure, the error carries everything created so far (see
    /// [`CreateManyError`]).
    pub async fn create_many(&self, qty: usize, data: T) -> Result<Vec<T>, CreateManyError<T>> {
        let mut created = Vec::with_capacity(qty);

        for _ in 0..qty {
            match self.create(data.clone()).await {
                Ok(record) => created.push(record),
                Err(source) => {
                    tracing::warn!(
                        table = %self.store.table_name(),
                        created = created.len(),
                        requested = qty,
                        error = %source,
                        "create_many failed partway; prior records remain committed"
                    );
                    return Err(CreateManyError {
                        created,
                        requested: qty,
                        source,
                    });
                }
            }
        }

        Ok(created)
    }

    /// Bulk insert, upsert or delete. Batching semantics (dedup collapse,
    /// row-level conflicts) belong to the store; this forwards and returns
    /// its summary.
    pub async fn bulk(
        &self,
        records: Vec<T>,
        mode: BulkMode,
        dedup_field: Option<&str>,
    ) -> Result<BulkSummary, EntityError> {
        Ok(self.store.bulk(records, mode, dedup_field).await?)
    }

    /// Update a record, refresh its cache entry, and emit an UPDATE beacon.
    ///
    /// The cache is refreshed with the new value, not invalidated, so a
    /// subsequent lookup hits the latest write.
    pub async fn update(&self, data: T) -> Result<T, EntityError> {
        let record = self.store.update(data).await?;
        self.cache_record(&record).await;
        self.send_event(EntityAction::Update, &record).await;
        ENTITY_MUTATIONS_TOTAL.with_label_values(&["UPDATE"]).inc();
        Ok(record)
    }

    /// Soft-delete a record, invalidate its cache entry, and emit a DELETE
    /// beacon. The record remains recoverable in the store.
    pub async fn remove(&self, record: T) -> Result<T, EntityError> {
        let removed = self.store.remove_soft(&record).await?;
        self.cache_delete(&record).await;
        self.send_event(EntityAction::Delete, &removed).await;
        ENTITY_MUTATIONS_TOTAL.with_label_values(&["DELETE"]).inc();
        Ok(removed)
    }

    /// Hard-delete a record. Irrecoverable.
    pub async fn purge(&self, record: T) -> Result<(), EntityError> {
        self.store.remove_permanent(&record).await?;
        self.cache_delete(&record).await;
        self.send_event(EntityAction::Delete, &record).await;
        ENTITY_MUTATIONS_TOTAL.with_label_values(&["DELETE"]).inc();
        Ok(())
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// All records matching the filter. Multi-row reads are never cached;
    /// invalidating cached collections on every mutation is not tractable
    /// with per-field cache keys.
    pub async fn find_all(
        &self,
        filter: &Filter,
        currency: Option<&CurrencyOptions>,
    ) -> Result<Vec<T>, EntityError> {
        Ok(self.store.find_all(filter, currency).await?)
    }

    /// First record matching the filter.
    ///
    /// Eligible for a cache short-circuit only when the filter carries a
    /// condition on the configured cache field. A store hit populates the
    /// cache on the way out.
    pub async fn find_one(&self, filter: &Filter) -> Result<Option<T>, EntityError> {
        if let Some(hit) = self.cache_find_one(filter).await {
            return Ok(Some(hit));
        }

        let found = self.store.find_one(filter).await?;
        if let Some(record) = &found {
            self.cache_record(record).await;
        }
        Ok(found)
    }

    /// Record by identity.
    ///
    /// Fails with a validation error for a zero (or negative) id before any
    /// store or cache access. The cache short-circuit applies only when the
    /// cache is keyed by the identity field; with a custom cache field,
    /// by-id lookups always go to the store.
    pub async fn find_by_id(&self, id: i64) -> Result<Option<T>, EntityError> {
        if id <= 0 {
            return Err(EntityError::Validation(format!(
                "a non-zero id is required to look up {}",
                self.store.table_name()
            )));
        }

        if let Some(hit) = self.cache_find_by_id(id).await {
            return Ok(Some(hit));
        }

        let found = self.store.find_by_id(id).await?;
        if let Some(record) = &found {
            self.cache_record(record).await;
        }
        Ok(found)
    }

    pub async fn count(&self, filter: &Filter) -> Result<u64, EntityError> {
        Ok(self.store.count(filter).await?)
    }

    pub async fn sum(&self, metric: &str, filter: &Filter) -> Result<f64, EntityError> {
        Ok(self.store.sum(metric, filter).await?)
    }

    pub async fn avg(&self, metric: &str, filter: &Filter) -> Result<f64, EntityError> {
        Ok(self.store.avg(metric, filter).await?)
    }

    pub async fn charts(
        &self,
        field: &str,
        options: &ChartOptions,
        currency: Option<&CurrencyOptions>,
    ) -> Result<Vec<ChartBucket>, EntityError> {
        Ok(self.store.charts(field, options, currency).await?)
    }

    // ------------------------------------------------------------------
    // Beacon
    // ------------------------------------------------------------------

    /// Publish a mutation beacon. No-op without an emitter; emitter failures
    /// are logged and absorbed so a bus outage cannot fail a committed write.
    pub async fn send_event(&self, action: EntityAction, data: &T) {
        let Some(emitter) = &self.beacon else {
            return;
        };

        let event_name = self.event_name(data);
        let payload = match BeaconPayload::new(action, data) {
            Ok(payload) => payload,
            Err(err) => {
                BEACON_FAILED_TOTAL.inc();
                tracing::warn!(
                    event = %event_name,
                    error = %err,
                    "Record not serializable for beacon, event dropped"
                );
                return;
            }
        };

        match emitter.publish(&event_name, payload).await {
            Ok(()) => {
                BEACON_PUBLISHED_TOTAL.inc();
            }
            Err(err) => {
                BEACON_FAILED_TOTAL.inc();
                tracing::warn!(
                    event = %event_name,
                    action = %action.as_str(),
                    error = %err,
                    "Beacon emission failed, mutation already committed"
                );
            }
        }
    }

    /// Event name for a mutated record: `account_{account_id}_{table}` when
    /// the record carries an account reference, else `{table}_{id}`.
    fn event_name(&self, data: &T) -> String {
        let table = self.store.table_name();
        match data.field_value("account_id") {
            Some(value) if !value.is_null() => {
                format!("account_{}_{}", render_value(&value), table)
            }
            _ => format!("{}_{}", table, data.id()),
        }
    }

    // ------------------------------------------------------------------
    // Cache plumbing (all best-effort; no-ops without cache options)
    // ------------------------------------------------------------------

    fn cache_key(&self, state: &CacheState, field: &str, value: &Value) -> Option<String> {
        derive_key(&state.namespace, self.store.table_name(), field, value)
    }

    async fn cache_record(&self, record: &T) {
        let Some(state) = &self.cache else { return };
        let field = state
            .field
            .as_deref()
            .unwrap_or_else(|| self.store.primary_key_field());

        // A record without a usable cache-field value is simply not cached
        let Some(value) = record.field_value(field) else {
            return;
        };
        let Some(key) = self.cache_key(state, field, &value) else {
            return;
        };

        state.aside.write(&key, record, state.ttl).await;
    }

    async fn cache_find_one(&self, filter: &Filter) -> Option<T> {
        let state = self.cache.as_ref()?;
        let field = state
            .field
            .as_deref()
            .unwrap_or_else(|| self.store.primary_key_field());

        let value = filter.condition(field)?.clone();
        let key = self.cache_key(state, field, &value)?;
        state.aside.read(&key).await
    }

    async fn cache_find_by_id(&self, id: i64) -> Option<T> {
        let state = self.cache.as_ref()?;
        let pk = self.store.primary_key_field();

        // By-id lookups only short-circuit when the cache is keyed by the
        // identity field; otherwise the cached key is for another field.
        if let Some(field) = &state.field {
            if field != pk {
                return None;
            }
        }

        let key = self.cache_key(state, pk, &Value::from(id))?;
        state.aside.read(&key).await
    }

    async fn cache_delete(&self, record: &T) {
        let Some(state) = &self.cache else { return };
        let field = state
            .field
            .as_deref()
            .unwrap_or_else(|| self.store.primary_key_field());

        let Some(value) = record.field_value(field) else {
            return;
        };
        let Some(key) = self.cache_key(state, field, &value) else {
            return;
        };

        state.aside.invalidate(&key).await;
    }
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
