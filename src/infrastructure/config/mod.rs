mod settings;

pub use settings::{
    CacheConfig, DuplicatePolicy, LogFormat, LoggingConfig, RedisConfig, ServerConfig,
    SessionConfig, Settings,
};
