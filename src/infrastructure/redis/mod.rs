//! Redis connectivity for the replicated cache backend
//!
//! - `pool`: lazily connected multiplexed connection
//! - `ExponentialBackoff`: reconnect delays for the event subscription

mod backoff;
pub mod pool;

pub use backoff::{BackoffConfig, ExponentialBackoff};
pub use pool::{PoolError, RedisPool};
