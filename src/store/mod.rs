//! Backing store contract.
//!
//! This module defines the abstraction layer the entity service is built on:
//! the [`Entity`] capability trait for records and the [`EntityStore`] trait
//! a backing store implements. Query-engine concerns (SQL generation, joins,
//! currency conversion) live behind this boundary; the in-memory backend in
//! [`memory_backend`] is the reference implementation used in tests and
//! single-process deployments.

mod memory_backend;

pub use memory_backend::MemoryStore;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Errors that can occur during store operations.
///
/// Store failures are correctness-affecting and always propagate to the
/// caller unmodified; retry policy belongs to the store implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Record not found for a mutation that requires it
    #[error("{table} record {id} not found")]
    NotFound { table: String, id: i64 },

    /// Uniqueness or identity conflict
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Backend failure (connection, query, etc.)
    #[error("Store backend error: {0}")]
    Backend(String),
}

/// Capability contract for records managed through the entity service.
///
/// The identity field is assigned by the store (zero means not yet
/// persisted) and immutable afterwards. Field access goes through the serde
/// representation so the cache field stays configurable per service without
/// per-entity boilerplate.
pub trait Entity:
    Clone + std::fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Identity assigned by the store; zero for a not-yet-persisted record.
    fn id(&self) -> i64;

    /// Set the identity. Called by the store exactly once, on insert.
    fn set_id(&mut self, id: i64);

    /// Value of a named field, via the serde representation of the record.
    fn field_value(&self, field: &str) -> Option<Value> {
        serde_json::to_value(self).ok()?.get(field).cloned()
    }
}

/// Equality filter over entity fields.
///
/// Deliberately not a query language: conditions are field = value pairs,
/// which is all the cache-aside contract and the reference backend need.
/// Richer stores are free to translate it into whatever they speak.
#[derive(Debug, Clone, Default)]
pub struct Filter {
    conditions: BTreeMap<String, Value>,
    include_deleted: bool,
    limit: Option<usize>,
    offset: Option<usize>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a field = value condition.
    pub fn eq(mut self, field: impl Into<String>, value: Value) -> Self {
        self.conditions.insert(field.into(), value);
        self
    }

    /// Include soft-deleted records in the result set.
    pub fn with_deleted(mut self) -> Self {
        self.include_deleted = true;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    /// The condition value for a field, if one is set.
    pub fn condition(&self, field: &str) -> Option<&Value> {
        self.conditions.get(field)
    }

    pub fn includes_deleted(&self) -> bool {
        self.include_deleted
    }

    pub fn limit_value(&self) -> Option<usize> {
        self.limit
    }

    pub fn offset_value(&self) -> Option<usize> {
        self.offset
    }

    /// Whether a record satisfies every condition.
    pub fn matches<T: Entity>(&self, record: &T) -> bool {
        self.conditions
            .iter()
            .all(|(field, expected)| record.field_value(field).as_ref() == Some(expected))
    }
}

/// Bulk import mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BulkMode {
    /// Insert every record; conflicts are reported per row
    InsertOnly,
    /// Update matching records, insert the rest
    Upsert,
    /// Soft-delete matching records
    Delete,
}

/// Structured summary of a bulk operation.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BulkSummary {
    /// Input rows received
    pub total: usize,
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
    /// Rows collapsed by the dedup field or without a match to act on
    pub skipped: usize,
    /// Per-row failures; the batch is not a transaction
    pub errors: Vec<String>,
}

/// Options for chart aggregation.
#[derive(Debug, Clone, Default)]
pub struct ChartOptions {
    /// Keep only the N largest buckets
    pub limit: Option<usize>,
}

/// One bucket of a chart series.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartBucket {
    pub label: String,
    pub count: u64,
}

/// Currency conversion directives, passed through to the store untouched.
///
/// Conversion itself is a store-query concern; this layer only forwards the
/// request. Stores without currency support ignore it.
#[derive(Debug, Clone)]
pub struct CurrencyOptions {
    pub currency: String,
    pub fields: Vec<String>,
}

/// Backend trait for entity storage.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; one store is shared by every
/// service instance bound to its table.
///
/// # Error Handling
///
/// All fallible operations return `Result<T, StoreError>` and errors
/// propagate to service callers unmodified.
#[async_trait]
pub trait EntityStore<T: Entity>: Send + Sync {
    /// Table (or collection) name, used for cache keys and event names.
    fn table_name(&self) -> &str;

    /// Name of the identity field.
    fn primary_key_field(&self) -> &str {
        "id"
    }

    /// Insert a record and assign its identity.
    async fn insert(&self, data: T) -> Result<T, StoreError>;

    /// Update an existing record by identity.
    async fn update(&self, data: T) -> Result<T, StoreError>;

    /// Soft-delete a record. It remains recoverable in the store.
    async fn remove_soft(&self, record: &T) -> Result<T, StoreError>;

    /// Hard-delete a record. Irrecoverable.
    async fn remove_permanent(&self, record: &T) -> Result<(), StoreError>;

    /// First record matching the filter, if any.
    async fn find_one(&self, filter: &Filter) -> Result<Option<T>, StoreError>;

    /// Record by identity, if present and not soft-deleted.
    async fn find_by_id(&self, id: i64) -> Result<Option<T>, StoreError>;

    /// All records matching the filter.
    async fn find_all(
        &self,
        filter: &Filter,
        currency: Option<&CurrencyOptions>,
    ) -> Result<Vec<T>, StoreError>;

    /// Number of records matching the filter.
    async fn count(&self, filter: &Filter) -> Result<u64, StoreError>;

    /// Sum of a numeric field over matching records.
    async fn sum(&self, metric: &str, filter: &Filter) -> Result<f64, StoreError>;

    /// Average of a numeric field over matching records.
    async fn avg(&self, metric: &str, filter: &Filter) -> Result<f64, StoreError>;

    /// Bucket counts grouped by a field's value.
    async fn charts(
        &self,
        field: &str,
        options: &ChartOptions,
        currency: Option<&CurrencyOptions>,
    ) -> Result<Vec<ChartBucket>, StoreError>;

    /// Bulk insert, upsert or delete. Row-level conflict resolution and
    /// dedup-field collapse (last-wins) are decided here, not by the caller.
    async fn bulk(
        &self,
        records: Vec<T>,
        mode: BulkMode,
        dedup_field: Option<&str>,
    ) -> Result<BulkSummary, StoreError>;
}
