//! In-memory entity store using DashMap.
//!
//! Reference implementation of the [`EntityStore`] contract: identity
//! assignment, soft delete, equality filters, aggregates, and bulk import
//! with dedup-field collapse. Used by tests and single-process deployments;
//! contents are lost on restart.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::Value;

use super::{
    BulkMode, BulkSummary, ChartBucket, ChartOptions, CurrencyOptions, Entity, EntityStore,
    Filter, StoreError,
};

struct Row<T> {
    record: T,
    deleted_at: Option<DateTime<Utc>>,
}

/// In-memory entity store.
pub struct MemoryStore<T: Entity> {
    table: String,
    rows: DashMap<i64, Row<T>>,
    next_id: AtomicI64,
}

impl<T: Entity> MemoryStore<T> {
    /// Create a store for the given table name.
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            rows: DashMap::new(),
            next_id: AtomicI64::new(1),
        }
    }

    /// Number of rows, including soft-deleted ones.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn not_found(&self, id: i64) -> StoreError {
        StoreError::NotFound {
            table: self.table.clone(),
            id,
        }
    }

    /// Matching live rows (plus deleted ones when the filter asks), sorted
    /// by identity for deterministic results.
    fn matching(&self, filter: &Filter) -> Vec<T> {
        let mut records: Vec<T> = self
            .rows
            .iter()
            .filter(|row| filter.includes_deleted() || row.deleted_at.is_none())
            .filter(|row| filter.matches(&row.record))
            .map(|row| row.record.clone())
            .collect();
        records.sort_by_key(|r| r.id());
        records
    }

    fn find_id_by_field(&self, field: &str, value: &Value) -> Option<i64> {
        let mut ids: Vec<i64> = self
            .rows
            .iter()
            .filter(|row| row.deleted_at.is_none())
            .filter(|row| row.record.field_value(field).as_ref() == Some(value))
            .map(|row| row.record.id())
            .collect();
        ids.sort_unstable();
        ids.first().copied()
    }

    /// Collapse a batch by the dedup field: records sharing a dedup value
    /// become one effective operation, last occurrence wins. Records without
    /// a value for the field pass through untouched.
    fn collapse(records: Vec<T>, dedup_field: Option<&str>) -> (Vec<T>, usize) {
        let Some(field) = dedup_field else {
            return (records, 0);
        };

        let mut effective: Vec<T> = Vec::with_capacity(records.len());
        let mut index: HashMap<String, usize> = HashMap::new();
        let mut collapsed = 0;

        for record in records {
            match record.field_value(field) {
                Some(value) if !value.is_null() => {
                    let key = value.to_string();
                    if let Some(&slot) = index.get(&key) {
                        effective[slot] = record;
                        collapsed += 1;
                    } else {
                        index.insert(key, effective.len());
                        effective.push(record);
                    }
                }
                _ => effective.push(record),
            }
        }

        (effective, collapsed)
    }

    /// Target row id for an upsert/delete row: dedup-field match first,
    /// falling back to an explicit identity.
    fn locate(&self, record: &T, dedup_field: Option<&str>) -> Option<i64> {
        if let Some(field) = dedup_field {
            if let Some(value) = record.field_value(field) {
                if !value.is_null() {
                    if let Some(id) = self.find_id_by_field(field, &value) {
                        return Some(id);
                    }
                }
            }
        }
        let id = record.id();
        if id != 0 && self.rows.get(&id).map(|r| r.deleted_at.is_none()) == Some(true) {
            return Some(id);
        }
        None
    }
}

#[async_trait]
impl<T: Entity> EntityStore<T> for MemoryStore<T> {
    fn table_name(&self) -> &str {
        &self.table
    }

    async fn insert(&self, mut data: T) -> Result<T, StoreError> {
        let id = if data.id() == 0 {
            self.next_id.fetch_add(1, Ordering::SeqCst)
        } else {
            let id = data.id();
            if self.rows.contains_key(&id) {
                return Err(StoreError::Conflict(format!(
                    "{} record {} already exists",
                    self.table, id
                )));
            }
            // Keep generated ids ahead of explicit ones
            self.next_id.fetch_max(id + 1, Ordering::SeqCst);
            id
        };

        data.set_id(id);
        self.rows.insert(
            id,
            Row {
                record: data.clone(),
                deleted_at: None,
            },
        );

        tracing::debug!(table = %self.table, id = id, "Record inserted");
        Ok(data)
    }

    async fn update(&self, data: T) -> Result<T, StoreError> {
        let id = data.id();
        let mut row = self.rows.get_mut(&id).ok_or_else(|| self.not_found(id))?;
        if row.deleted_at.is_some() {
            return Err(self.not_found(id));
        }
        row.record = data.clone();

        tracing::debug!(table = %self.table, id = id, "Record updated");
        Ok(data)
    }

    async fn remove_soft(&self, record: &T) -> Result<T, StoreError> {
        let id = record.id();
        let mut row = self.rows.get_mut(&id).ok_or_else(|| self.not_found(id))?;
        if row.deleted_at.is_some() {
            return Err(self.not_found(id));
        }
        row.deleted_at = Some(Utc::now());

        tracing::debug!(table = %self.table, id = id, "Record soft-deleted");
        Ok(row.record.clone())
    }

    async fn remove_permanent(&self, record: &T) -> Result<(), StoreError> {
        let id = record.id();
        if self.rows.remove(&id).is_none() {
            return Err(self.not_found(id));
        }

        tracing::debug!(table = %self.table, id = id, "Record purged");
        Ok(())
    }

    async fn find_one(&self, filter: &Filter) -> Result<Option<T>, StoreError> {
        Ok(self.matching(filter).into_iter().next())
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<T>, StoreError> {
        Ok(self
            .rows
            .get(&id)
            .filter(|row| row.deleted_at.is_none())
            .map(|row| row.record.clone()))
    }

    async fn find_all(
        &self,
        filter: &Filter,
        _currency: Option<&CurrencyOptions>,
    ) -> Result<Vec<T>, StoreError> {
        // Currency conversion is a query-engine concern this backend does not have
        let mut records = self.matching(filter);
        if let Some(offset) = filter.offset_value() {
            records = records.into_iter().skip(offset).collect();
        }
        if let Some(limit) = filter.limit_value() {
            records.truncate(limit);
        }
        Ok(records)
    }

    async fn count(&self, filter: &Filter) -> Result<u64, StoreError> {
        Ok(self.matching(filter).len() as u64)
    }

    async fn sum(&self, metric: &str, filter: &Filter) -> Result<f64, StoreError> {
        Ok(self
            .matching(filter)
            .iter()
            .filter_map(|r| r.field_value(metric).and_then(|v| v.as_f64()))
            .sum())
    }

    async fn avg(&self, metric: &str, filter: &Filter) -> Result<f64, StoreError> {
        let values: Vec<f64> = self
            .matching(filter)
            .iter()
            .filter_map(|r| r.field_value(metric).and_then(|v| v.as_f64()))
            .collect();
        if values.is_empty() {
            return Ok(0.0);
        }
        Ok(values.iter().sum::<f64>() / values.len() as f64)
    }

    async fn charts(
        &self,
        field: &str,
        options: &ChartOptions,
        _currency: Option<&CurrencyOptions>,
    ) -> Result<Vec<ChartBucket>, StoreError> {
        let mut buckets: HashMap<String, u64> = HashMap::new();
        for row in self.rows.iter().filter(|row| row.deleted_at.is_none()) {
            let label = match row.record.field_value(field) {
                Some(Value::String(s)) => s,
                Some(Value::Null) | None => continue,
                Some(other) => other.to_string(),
            };
            *buckets.entry(label).or_insert(0) += 1;
        }

        let mut series: Vec<ChartBucket> = buckets
            .into_iter()
            .map(|(label, count)| ChartBucket { label, count })
            .collect();
        // Largest buckets first; label breaks ties deterministically
        series.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.label.cmp(&b.label)));
        if let Some(limit) = options.limit {
            series.truncate(limit);
        }
        Ok(series)
    }

    async fn bulk(
        &self,
        records: Vec<T>,
        mode: BulkMode,
        dedup_field: Option<&str>,
    ) -> Result<BulkSummary, StoreError> {
        let mut summary = BulkSummary {
            total: records.len(),
            ..Default::default()
        };

        let (effective, collapsed) = Self::collapse(records, dedup_field);
        summary.skipped += collapsed;

        for record in effective {
            match mode {
                BulkMode::InsertOnly => match self.insert(record).await {
                    Ok(_) => summary.inserted += 1,
                    Err(err) => summary.errors.push(err.to_string()),
                },
                BulkMode::Upsert => match self.locate(&record, dedup_field) {
                    Some(id) => {
                        let mut updated = record;
                        updated.set_id(id);
                        match self.update(updated).await {
                            Ok(_) => summary.updated += 1,
                            Err(err) => summary.errors.push(err.to_string()),
                        }
                    }
                    None => {
                        let mut fresh = record;
                        fresh.set_id(0);
                        match self.insert(fresh).await {
                            Ok(_) => summary.inserted += 1,
                            Err(err) => summary.errors.push(err.to_string()),
                        }
                    }
                },
                BulkMode::Delete => match self.locate(&record, dedup_field) {
                    Some(id) => {
                        let target = self
                            .rows
                            .get(&id)
                            .map(|row| row.record.clone())
                            .ok_or_else(|| self.not_found(id))?;
                        match self.remove_soft(&target).await {
                            Ok(_) => summary.deleted += 1,
                            Err(err) => summary.errors.push(err.to_string()),
                        }
                    }
                    None => summary.skipped += 1,
                },
            }
        }

        tracing::info!(
            table = %self.table,
            total = summary.total,
            inserted = summary.inserted,
            updated = summary.updated,
            deleted = summary.deleted,
            skipped = summary.skipped,
            errors = summary.errors.len(),
            "Bulk import completed"
        );

        Ok(summary)
    }
}
