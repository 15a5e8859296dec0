use axum::{
    routing::{get, post},
    Router,
};

use crate::server::AppState;

use super::health::health;
use super::metrics::prometheus_metrics;
use super::sessions::{
    create_session, delete_attribute, delete_session, get_attribute, get_session,
    replace_session, set_attribute, touch_session,
};

pub fn api_routes() -> Router<AppState> {
    Router::new()
        // Health & Metrics
        .route("/health", get(health))
        .route("/metrics", get(prometheus_metrics))
        // Session endpoints
        .nest(
            "/api/v1",
            Router::new()
                .route("/sessions", post(create_session))
                .route(
                    "/sessions/{id}",
                    get(get_session).put(replace_session).delete(delete_session),
                )
                .route("/sessions/{id}/touch", post(touch_session))
                .route(
                    "/sessions/{id}/attributes/{key}",
                    get(get_attribute).put(set_attribute).delete(delete_attribute),
                ),
        )
}
