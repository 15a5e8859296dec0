//! Replicated cache contract and backends
//!
//! The session store only talks to the cache through [`ReplicatedCache`].
//! Replication, TTL enforcement and change notification are the backend's
//! responsibility.

mod health;
mod memory;
mod redis_store;
mod traits;
mod types;

pub use health::{CacheHealth, CacheHealthStats, CacheHealthStatus};
pub use memory::{MemoryCache, MemoryCluster, MemoryClusterConfig};
pub use redis_store::RedisCache;
pub use traits::{EntryChangeListener, ListenerSet, ReplicatedCache};
pub use types::{CacheBackend, CacheError, CacheEvent, CacheEventKind};
