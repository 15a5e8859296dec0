//! Shared Redis connection for the replicated cache backend.
//!
//! Holds one multiplexed connection, established lazily and dropped again
//! when Redis reports a broken connection so the next command reconnects.
//! Commands are never retried here.

use std::future::Future;
use std::sync::Arc;

use redis::aio::MultiplexedConnection;
use redis::{Client, RedisError, RedisResult};
use tokio::sync::RwLock;

use crate::cache::CacheHealth;
use crate::config::RedisConfig;

/// Error type for Redis pool operations.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// Redis operation failed
    #[error("Redis error: {0}")]
    Redis(#[from] RedisError),

    /// Connection could not be established
    #[error("Connection not available: {0}")]
    ConnectionUnavailable(String),
}

pub struct RedisPool {
    client: Client,
    connection: RwLock<Option<MultiplexedConnection>>,
    health: Arc<CacheHealth>,
    config: RedisConfig,
}

impl RedisPool {
    /// Create a new pool. No connection is opened until the first command.
    pub fn new(config: RedisConfig, health: Arc<CacheHealth>) -> Result<Self, PoolError> {
        let client = Client::open(config.url.as_str())?;

        Ok(Self {
            client,
            connection: RwLock::new(None),
            health,
            config,
        })
    }

    pub async fn get_connection(&self) -> Result<MultiplexedConnection, PoolError> {
        {
            let conn = self.connection.read().await;
            if let Some(ref c) = *conn {
                return Ok(c.clone());
            }
        }

        self.connect().await
    }

    async fn connect(&self) -> Result<MultiplexedConnection, PoolError> {
        let mut conn_guard = self.connection.write().await;

        // Another task may have connected while we waited
        if let Some(ref c) = *conn_guard {
            return Ok(c.clone());
        }

        self.health.set_reconnecting();

        match self.client.get_multiplexed_tokio_connection().await {
            Ok(conn) => {
                *conn_guard = Some(conn.clone());
                self.health.record_success();
                tracing::info!(url = %self.config.url, "Redis connection established");
                Ok(conn)
            }
            Err(e) => {
                self.health.record_failure();
                tracing::error!(error = %e, "Failed to connect to Redis");
                Err(PoolError::ConnectionUnavailable(e.to_string()))
            }
        }
    }

    /// Run one command against the shared connection and record the outcome.
    pub async fn execute<F, T, Fut>(&self, f: F) -> Result<T, PoolError>
    where
        F: FnOnce(MultiplexedConnection) -> Fut,
        Fut: Future<Output = RedisResult<T>>,
    {
        let conn = self.get_connection().await?;

        match f(conn).await {
            Ok(result) => {
                self.health.record_success();
                Ok(result)
            }
            Err(e) => {
                if e.is_connection_dropped() || e.is_io_error() {
                    let mut conn_guard = self.connection.write().await;
                    *conn_guard = None;
                }
                self.health.record_failure();
                Err(PoolError::Redis(e))
            }
        }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn config(&self) -> &RedisConfig {
        &self.config
    }

    pub fn url(&self) -> &str {
        &self.config.url
    }

    pub fn health(&self) -> &Arc<CacheHealth> {
        &self.health
    }

    pub fn is_healthy(&self) -> bool {
        self.health.is_healthy()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_creation_does_not_connect() {
        let health = Arc::new(CacheHealth::new());
        let pool = RedisPool::new(RedisConfig::default(), health).unwrap();
        assert_eq!(pool.url(), "redis://localhost:6379");
        assert!(pool.config().configure_keyspace_events);
    }

    #[test]
    fn test_invalid_url_is_rejected() {
        let config = RedisConfig {
            url: "not a url".to_string(),
            ..Default::default()
        };
        let result = RedisPool::new(config, Arc::new(CacheHealth::new()));
        assert!(matches!(result, Err(PoolError::Redis(_))));
    }

    #[test]
    fn test_pool_error_display() {
        let err = PoolError::ConnectionUnavailable("refused".to_string());
        assert_eq!(err.to_string(), "Connection not available: refused");
    }
}
