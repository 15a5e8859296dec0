//! Replicated cache types

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::session::{SessionId, SessionState};

/// Why an entry left the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheEventKind {
    /// Explicit delete
    Removed,
    /// TTL elapsed
    Expired,
    /// Dropped by the cache to make room
    Evicted,
}

impl CacheEventKind {
    /// Kind announced when an entry is replaced by a terminal record
    pub fn for_tombstone(state: SessionState) -> Self {
        match state {
            SessionState::Expired => CacheEventKind::Expired,
            SessionState::Valid | SessionState::Invalidated => CacheEventKind::Removed,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CacheEventKind::Removed => "removed",
            CacheEventKind::Expired => "expired",
            CacheEventKind::Evicted => "evicted",
        }
    }
}

/// Change notification delivered to subscribed listeners
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEvent {
    pub key: SessionId,
    pub kind: CacheEventKind,
    /// Node whose operation caused the event, when known
    #[serde(default)]
    pub origin_node: Option<String>,
    /// Milliseconds since epoch
    pub occurred_at: i64,
}

impl CacheEvent {
    pub fn new(key: SessionId, kind: CacheEventKind, origin_node: Option<String>) -> Self {
        Self {
            key,
            kind,
            origin_node,
            occurred_at: chrono::Utc::now().timestamp_millis(),
        }
    }
}

/// Error type for cache operations
#[derive(Debug, Clone, Error)]
pub enum CacheError {
    /// The cache could not be reached or refused the operation
    #[error("Cache unavailable: {0}")]
    Unavailable(String),
    /// A value could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Backend type for the replicated cache
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheBackend {
    /// In-process replicated cache
    Memory,
    /// Redis-backed replicated cache
    Redis,
}

impl CacheBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheBackend::Memory => "memory",
            CacheBackend::Redis => "redis",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_event_serialization() {
        let event = CacheEvent::new(
            SessionId::from("s1"),
            CacheEventKind::Removed,
            Some("node-a".to_string()),
        );
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""kind":"removed""#));
        assert!(json.contains(r#""key":"s1""#));

        let parsed: CacheEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, event);
    }

    #[test]
    fn test_tombstone_event_kind() {
        assert_eq!(
            CacheEventKind::for_tombstone(SessionState::Invalidated),
            CacheEventKind::Removed
        );
        assert_eq!(
            CacheEventKind::for_tombstone(SessionState::Expired),
            CacheEventKind::Expired
        );
    }

    #[test]
    fn test_cache_event_without_origin() {
        let parsed: CacheEvent =
            serde_json::from_str(r#"{"key":"s2","kind":"evicted","occurred_at":0}"#).unwrap();
        assert_eq!(parsed.kind, CacheEventKind::Evicted);
        assert!(parsed.origin_node.is_none());
    }
}
