// Infrastructure layer (shared components)
pub mod infrastructure;

pub use infrastructure::config;
pub use infrastructure::error;
pub use infrastructure::metrics;
pub use infrastructure::redis;

// Domain layer
pub mod cache;
pub mod session;

// Application layer
pub mod api;
pub mod server;
