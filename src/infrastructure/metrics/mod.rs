//! Prometheus metrics for the session store.
//!
//! - Session lifecycle metrics (created, updated, removed, expired on load)
//! - Load outcomes
//! - Cache operation latency and errors
//! - Invalidation events observed from the cache
//! - Local registry size per node

mod helpers;

pub use helpers::{encode_metrics, CacheMetrics, InvalidationMetrics, SessionMetrics};

use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec,
    register_int_gauge_vec, HistogramVec, IntCounter, IntCounterVec, IntGaugeVec,
};

/// Prefix for all metrics
const METRIC_PREFIX: &str = "session";

lazy_static! {
    // ============================================================================
    // Session Metrics
    // ============================================================================

    /// Sessions written for the first time
    pub static ref SESSIONS_CREATED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_created_total", METRIC_PREFIX),
        "Total sessions created"
    ).unwrap();

    /// Whole-record updates
    pub static ref SESSIONS_UPDATED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_updated_total", METRIC_PREFIX),
        "Total session updates"
    ).unwrap();

    /// Explicit removals and logouts
    pub static ref SESSIONS_REMOVED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_removed_total", METRIC_PREFIX),
        "Total sessions removed or invalidated"
    ).unwrap();

    /// Sessions found idle-expired by the store on load
    pub static ref SESSIONS_EXPIRED_ON_LOAD_TOTAL: IntCounter = register_int_counter!(
        format!("{}_expired_on_load_total", METRIC_PREFIX),
        "Total sessions found expired when loaded"
    ).unwrap();

    /// Loads by outcome (hit, miss, expired, tombstoned)
    pub static ref SESSION_LOADS_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_loads_total", METRIC_PREFIX),
        "Total session loads by outcome",
        &["outcome"]
    ).unwrap();

    /// Writes refused by the store (duplicate, not found, invalid)
    pub static ref SESSION_WRITES_REJECTED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_writes_rejected_total", METRIC_PREFIX),
        "Total session writes rejected",
        &["reason"]
    ).unwrap();

    /// Sessions each node believes valid; one series per node id
    pub static ref SESSIONS_TRACKED: IntGaugeVec = register_int_gauge_vec!(
        format!("{}_tracked", METRIC_PREFIX),
        "Number of sessions tracked as valid by a node",
        &["node"]
    ).unwrap();

    // ============================================================================
    // Cache Metrics
    // ============================================================================

    /// Cache operation latency
    pub static ref CACHE_OPERATION_LATENCY: HistogramVec = register_histogram_vec!(
        format!("{}_cache_operation_latency_seconds", METRIC_PREFIX),
        "Replicated cache operation latency in seconds",
        &["operation"],
        vec![0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0]
    ).unwrap();

    /// Cache operation errors
    pub static ref CACHE_ERRORS_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_cache_errors_total", METRIC_PREFIX),
        "Total replicated cache errors",
        &["operation"]
    ).unwrap();

    // ============================================================================
    // Invalidation Metrics
    // ============================================================================

    /// Cache change events received by the invalidation listener
    pub static ref INVALIDATION_EVENTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_invalidation_events_total", METRIC_PREFIX),
        "Total cache change events received",
        &["kind"]
    ).unwrap();

    /// Events that moved a locally tracked session to a terminal state
    pub static ref INVALIDATIONS_APPLIED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_invalidations_applied_total", METRIC_PREFIX),
        "Total cache events applied to locally tracked sessions"
    ).unwrap();

    /// Tombstones purged from the local registry
    pub static ref TOMBSTONES_PURGED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_tombstones_purged_total", METRIC_PREFIX),
        "Total tombstones purged from the local registry"
    ).unwrap();
}
