use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use uuid::Uuid;

/// Node settings.
///
/// Sources, lowest precedence first: built-in defaults, `config/default`,
/// `config/{RUN_MODE}`, then environment variables prefixed with
/// `SESSION_STORE_` using `__` between sections
/// (e.g. `SESSION_STORE_SESSION__DEFAULT_TTL_SECONDS=60`).
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

/// What `store` does when the id is already present in the cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DuplicatePolicy {
    /// Fail with `DuplicateSession`
    #[default]
    Reject,
    /// Replace the existing entry
    Overwrite,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Identifier of this node, stamped on every record it writes
    #[serde(default = "default_node_id")]
    pub node_id: String,
    /// Named cache; used as key prefix for every entry
    #[serde(default = "default_cache_name")]
    pub cache_name: String,
    /// Idle timeout used when a record carries `ttl_seconds == 0`
    #[serde(default = "default_session_ttl")]
    pub default_ttl_seconds: u64,
    #[serde(default)]
    pub duplicate_policy: DuplicatePolicy,
    /// How long a terminal id is remembered locally
    #[serde(default = "default_tombstone_ttl")]
    pub tombstone_ttl_seconds: u64,
    /// Interval between tombstone purges in the invalidation worker
    #[serde(default = "default_purge_interval")]
    pub purge_interval_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// "memory" or "redis"
    #[serde(default = "default_cache_backend")]
    pub backend: String,
    /// Expiration sweep interval for the memory backend
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_ms: u64,
    /// Capacity of the memory backend before eviction (0 = unbounded)
    #[serde(default)]
    pub max_entries: usize,
    /// Cluster configuration file handed to the cache engine
    #[serde(default)]
    pub config_file: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    #[serde(default = "default_redis_url")]
    pub url: String,
    /// Enable `notify-keyspace-events` for expired/evicted keys on startup
    #[serde(default = "default_true")]
    pub configure_keyspace_events: bool,
    #[serde(default = "default_backoff_initial_delay_ms")]
    pub backoff_initial_delay_ms: u64,
    #[serde(default = "default_backoff_max_delay_ms")]
    pub backoff_max_delay_ms: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub format: LogFormat,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8082
}

fn default_node_id() -> String {
    format!("node-{}", Uuid::new_v4().simple())
}

fn default_cache_name() -> String {
    "session-cache".to_string()
}

fn default_session_ttl() -> u64 {
    1800 // 30 minutes
}

fn default_tombstone_ttl() -> u64 {
    3600
}

fn default_purge_interval() -> u64 {
    60
}

fn default_cache_backend() -> String {
    "memory".to_string()
}

fn default_sweep_interval() -> u64 {
    500
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_true() -> bool {
    true
}

fn default_backoff_initial_delay_ms() -> u64 {
    100
}

fn default_backoff_max_delay_ms() -> u64 {
    30_000
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if exists
        let _ = dotenvy::dotenv();

        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = Config::builder()
            .set_default("server.host", default_host())?
            .set_default("server.port", default_port())?
            .set_default("session.cache_name", default_cache_name())?
            .set_default("session.default_ttl_seconds", default_session_ttl())?
            .set_default("cache.backend", default_cache_backend())?
            .set_default("redis.url", default_redis_url())?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            .add_source(
                Environment::with_prefix("SESSION_STORE")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            cache_name: default_cache_name(),
            default_ttl_seconds: default_session_ttl(),
            duplicate_policy: DuplicatePolicy::default(),
            tombstone_ttl_seconds: default_tombstone_ttl(),
            purge_interval_seconds: default_purge_interval(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: default_cache_backend(),
            sweep_interval_ms: default_sweep_interval(),
            max_entries: 0,
            config_file: None,
        }
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            configure_keyspace_events: true,
            backoff_initial_delay_ms: default_backoff_initial_delay_ms(),
            backoff_max_delay_ms: default_backoff_max_delay_ms(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let server = ServerConfig::default();
        assert_eq!(server.host, "0.0.0.0");
        assert_eq!(server.port, 8082);

        let session = SessionConfig::default();
        assert!(session.node_id.starts_with("node-"));
        assert_eq!(session.cache_name, "session-cache");
        assert_eq!(session.default_ttl_seconds, 1800);
        assert_eq!(session.duplicate_policy, DuplicatePolicy::Reject);

        let cache = CacheConfig::default();
        assert_eq!(cache.backend, "memory");
        assert_eq!(cache.max_entries, 0);
    }

    #[test]
    fn test_duplicate_policy_deserialize() {
        let policy: DuplicatePolicy = serde_json::from_str(r#""overwrite""#).unwrap();
        assert_eq!(policy, DuplicatePolicy::Overwrite);

        let format: LogFormat = serde_json::from_str(r#""json""#).unwrap();
        assert_eq!(format, LogFormat::Json);
    }

    #[test]
    fn test_partial_session_section_uses_defaults() {
        let session: SessionConfig =
            serde_json::from_str(r#"{"node_id":"node-a","default_ttl_seconds":5}"#).unwrap();
        assert_eq!(session.node_id, "node-a");
        assert_eq!(session.default_ttl_seconds, 5);
        assert_eq!(session.tombstone_ttl_seconds, 3600);
    }
}
