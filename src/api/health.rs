//! Health check endpoint.

use axum::{extract::State, Json};
use serde::Serialize;

use crate::cache::CacheHealthStatus;
use crate::server::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub node_id: String,
    pub cache: CacheHealthResponse,
    pub sessions: SessionHealthResponse,
}

#[derive(Debug, Serialize)]
pub struct CacheHealthResponse {
    pub backend: String,
    pub name: String,
    pub status: String,
    pub total_failures: u64,
    pub total_reconnections: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_file: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SessionHealthResponse {
    pub tracked: usize,
    pub tombstones: usize,
    pub default_ttl_seconds: u64,
}

/// GET /health
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let cache_health = state.store.cache_health();
    let status = match cache_health.status {
        CacheHealthStatus::Healthy => "healthy",
        CacheHealthStatus::Reconnecting | CacheHealthStatus::Unavailable => "degraded",
    };

    Json(HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        node_id: state.store.node_id().to_string(),
        cache: CacheHealthResponse {
            backend: state.store.backend_type().as_str().to_string(),
            name: state.store.config().cache_name.clone(),
            status: cache_health.status.as_str().to_string(),
            total_failures: cache_health.total_failures,
            total_reconnections: cache_health.total_reconnections,
            config_file: state.settings.cache.config_file.clone(),
        },
        sessions: SessionHealthResponse {
            tracked: state.store.tracked_count(),
            tombstones: state.store.registry().tombstone_count(),
            default_ttl_seconds: state.store.config().default_ttl_seconds,
        },
    })
}
