//! API layer - HTTP endpoint handlers.

mod health;
mod metrics;
mod routes;
mod sessions;

pub use health::{health, HealthResponse};
pub use metrics::prometheus_metrics;
pub use routes::api_routes;
pub use sessions::{
    create_session, delete_attribute, delete_session, get_attribute, get_session,
    replace_session, set_attribute, touch_session, CreateSessionRequest, SessionResponse,
};
