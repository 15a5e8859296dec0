//! Factory functions for the cache backend and the session store

use std::sync::Arc;
use std::time::Duration;

use crate::cache::{CacheError, MemoryCluster, MemoryClusterConfig, RedisCache, ReplicatedCache};
use crate::config::{CacheConfig, SessionConfig};
use crate::redis::pool::RedisPool;

use super::store::SessionStore;

/// Create the cache handle for this node based on configuration.
///
/// The memory backend gives every call its own single-node cluster; use
/// [`MemoryCluster::join`] directly to put several nodes on one cluster.
/// Selecting Redis without a pool is an error; only unknown backend names
/// fall back to memory.
pub fn create_cache(
    cache: &CacheConfig,
    session: &SessionConfig,
    redis_pool: Option<Arc<RedisPool>>,
) -> Result<Arc<dyn ReplicatedCache>, CacheError> {
    if let Some(config_file) = cache.config_file.as_deref() {
        tracing::debug!(config_file = %config_file, "Cache cluster configuration file");
    }

    match cache.backend.to_lowercase().as_str() {
        "redis" => {
            let Some(pool) = redis_pool else {
                return Err(CacheError::Unavailable(
                    "Redis cache backend requested but no Redis pool was provided".to_string(),
                ));
            };
            tracing::info!(
                node_id = %session.node_id,
                cache_name = %session.cache_name,
                url = %pool.url(),
                "Creating Redis replicated cache"
            );
            return Ok(Arc::new(RedisCache::new(
                session.node_id.clone(),
                session.cache_name.clone(),
                pool,
            )));
        }
        "memory" => {}
        other => {
            tracing::warn!(backend = %other, "Unknown cache backend, falling back to memory");
        }
    }

    tracing::info!(
        node_id = %session.node_id,
        max_entries = cache.max_entries,
        "Creating in-process replicated cache"
    );

    let cluster = MemoryCluster::with_config(MemoryClusterConfig {
        max_entries: cache.max_entries,
        sweep_interval: Duration::from_millis(cache.sweep_interval_ms),
    });
    Ok(Arc::new(cluster.join(session.node_id.clone())))
}

/// Build a session store over an existing cache handle
pub fn create_session_store(
    cache: Arc<dyn ReplicatedCache>,
    session: &SessionConfig,
) -> Arc<SessionStore> {
    Arc::new(SessionStore::new(cache, session.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheBackend;

    fn session_config() -> SessionConfig {
        SessionConfig {
            node_id: "node-test".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_create_memory_cache() {
        let cache = create_cache(&CacheConfig::default(), &session_config(), None).unwrap();
        assert_eq!(cache.backend_type(), CacheBackend::Memory);
        assert_eq!(cache.node_id(), "node-test");
    }

    #[test]
    fn test_redis_without_pool_is_an_error() {
        let config = CacheConfig {
            backend: "Redis".to_string(),
            ..Default::default()
        };
        let result = create_cache(&config, &session_config(), None);
        assert!(matches!(result, Err(CacheError::Unavailable(_))));
    }

    #[test]
    fn test_unknown_backend_falls_back_to_memory() {
        let config = CacheConfig {
            backend: "hazelcast".to_string(),
            ..Default::default()
        };
        let cache = create_cache(&config, &session_config(), None).unwrap();
        assert_eq!(cache.backend_type(), CacheBackend::Memory);
    }

    #[test]
    fn test_create_redis_cache_with_pool() {
        let pool = Arc::new(
            RedisPool::new(
                crate::config::RedisConfig::default(),
                Arc::new(crate::cache::CacheHealth::new()),
            )
            .unwrap(),
        );
        let config = CacheConfig {
            backend: "redis".to_string(),
            ..Default::default()
        };
        let cache = create_cache(&config, &session_config(), Some(pool)).unwrap();
        assert_eq!(cache.backend_type(), CacheBackend::Redis);
    }

    #[test]
    fn test_create_session_store() {
        let cache = create_cache(&CacheConfig::default(), &session_config(), None).unwrap();
        let store = create_session_store(cache, &session_config());
        assert_eq!(store.node_id(), "node-test");
        assert_eq!(store.tracked_count(), 0);
    }
}
