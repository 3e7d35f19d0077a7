//! Prometheus metrics for the entity access layer.
//!
//! Counters cover the side channels that never surface errors to callers:
//! cache reads/writes, beacon emission, notification dedup, and push
//! delivery. Store failures propagate to callers and are not counted here.

use lazy_static::lazy_static;
use prometheus::{
    register_int_counter, register_int_counter_vec, Encoder, IntCounter, IntCounterVec,
    TextEncoder,
};

/// Prefix for all metrics
const METRIC_PREFIX: &str = "vela";

lazy_static! {
    // ============================================================================
    // Cache Metrics
    // ============================================================================

    /// Cache hits on single-record lookups
    pub static ref CACHE_HIT_TOTAL: IntCounter = register_int_counter!(
        format!("{}_cache_hit_total", METRIC_PREFIX),
        "Cache hits on single-record lookups"
    ).unwrap();

    /// Cache misses on single-record lookups
    pub static ref CACHE_MISS_TOTAL: IntCounter = register_int_counter!(
        format!("{}_cache_miss_total", METRIC_PREFIX),
        "Cache misses on single-record lookups"
    ).unwrap();

    /// Cache provider failures, by operation (swallowed, never surfaced)
    pub static ref CACHE_ERROR_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_cache_error_total", METRIC_PREFIX),
        "Cache provider failures by operation",
        &["operation"]
    ).unwrap();

    // ============================================================================
    // Entity Metrics
    // ============================================================================

    /// Entity mutations by action (CREATE/UPDATE/DELETE)
    pub static ref ENTITY_MUTATIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_entity_mutations_total", METRIC_PREFIX),
        "Entity mutations by action",
        &["action"]
    ).unwrap();

    // ============================================================================
    // Beacon Metrics
    // ============================================================================

    /// Beacon events published
    pub static ref BEACON_PUBLISHED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_beacon_published_total", METRIC_PREFIX),
        "Beacon events published"
    ).unwrap();

    /// Beacon emission failures (swallowed, never surfaced)
    pub static ref BEACON_FAILED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_beacon_failed_total", METRIC_PREFIX),
        "Beacon emission failures"
    ).unwrap();

    // ============================================================================
    // Notification Metrics
    // ============================================================================

    /// Notifications created and dispatched
    pub static ref NOTIFICATIONS_CREATED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_notifications_created_total", METRIC_PREFIX),
        "Notifications created and dispatched"
    ).unwrap();

    /// Notification requests skipped by the dedup check
    pub static ref NOTIFICATIONS_DEDUPED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_notifications_deduped_total", METRIC_PREFIX),
        "Notification requests skipped as duplicates"
    ).unwrap();

    /// Push delivery failures (swallowed, never surfaced)
    pub static ref DELIVERY_FAILED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_delivery_failed_total", METRIC_PREFIX),
        "Push delivery failures"
    ).unwrap();
}

/// Encode all registered metrics in Prometheus text format.
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer).unwrap_or_default())
}
