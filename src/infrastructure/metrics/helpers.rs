//! Metrics helper structs for convenient metric recording

use prometheus::{Encoder, TextEncoder};

use super::{
    CACHE_ERRORS_TOTAL, CACHE_OPERATION_LATENCY, INVALIDATIONS_APPLIED_TOTAL,
    INVALIDATION_EVENTS_TOTAL, SESSIONS_CREATED_TOTAL, SESSIONS_EXPIRED_ON_LOAD_TOTAL,
    SESSIONS_REMOVED_TOTAL, SESSIONS_TRACKED, SESSIONS_UPDATED_TOTAL, SESSION_LOADS_TOTAL,
    SESSION_WRITES_REJECTED_TOTAL, TOMBSTONES_PURGED_TOTAL,
};

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer).unwrap_or_default())
}

/// Helper struct for recording session lifecycle metrics
pub struct SessionMetrics;

impl SessionMetrics {
    pub fn record_created() {
        SESSIONS_CREATED_TOTAL.inc();
    }

    pub fn record_updated() {
        SESSIONS_UPDATED_TOTAL.inc();
    }

    pub fn record_removed() {
        SESSIONS_REMOVED_TOTAL.inc();
    }

    pub fn record_expired_on_load() {
        SESSIONS_EXPIRED_ON_LOAD_TOTAL.inc();
        SESSION_LOADS_TOTAL.with_label_values(&["expired"]).inc();
    }

    pub fn record_load_hit() {
        SESSION_LOADS_TOTAL.with_label_values(&["hit"]).inc();
    }

    pub fn record_load_miss() {
        SESSION_LOADS_TOTAL.with_label_values(&["miss"]).inc();
    }

    /// Load short-circuited by a local tombstone
    pub fn record_load_tombstoned() {
        SESSION_LOADS_TOTAL.with_label_values(&["tombstoned"]).inc();
    }

    pub fn record_write_rejected(reason: &str) {
        SESSION_WRITES_REJECTED_TOTAL.with_label_values(&[reason]).inc();
    }

    pub fn set_tracked(node_id: &str, count: usize) {
        SESSIONS_TRACKED
            .with_label_values(&[node_id])
            .set(count as i64);
    }
}

/// Helper struct for recording replicated cache metrics
pub struct CacheMetrics;

impl CacheMetrics {
    /// Record operation latency
    pub fn record_latency(operation: &str, duration_secs: f64) {
        CACHE_OPERATION_LATENCY
            .with_label_values(&[operation])
            .observe(duration_secs);
    }

    pub fn record_error(operation: &str) {
        CACHE_ERRORS_TOTAL.with_label_values(&[operation]).inc();
    }
}

/// Helper struct for recording invalidation listener metrics
pub struct InvalidationMetrics;

impl InvalidationMetrics {
    pub fn record_event(kind: &str) {
        INVALIDATION_EVENTS_TOTAL.with_label_values(&[kind]).inc();
    }

    pub fn record_applied() {
        INVALIDATIONS_APPLIED_TOTAL.inc();
    }

    pub fn record_tombstones_purged(count: usize) {
        TOMBSTONES_PURGED_TOTAL.inc_by(count as u64);
    }
}
