//! Redis-backed replicated cache
//!
//! Records are stored as JSON under `{prefix}:session:{id}` with `SET ... EX`.
//! `put_if_absent` maps to `NX`; writes that must not land on a terminal
//! record go through a Lua script that inspects the stored `validity`.
//! Tombstones and removals are announced on `{prefix}:events`; expirations
//! and evictions come from Redis keyspace notifications. Tombstone writes use
//! `SET ... GET` and need Redis 6.2 or later.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use redis::RedisError;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::redis::{BackoffConfig, ExponentialBackoff, PoolError, RedisPool};
use crate::session::{SessionId, SessionRecord};

use super::health::CacheHealthStats;
use super::traits::{EntryChangeListener, ListenerSet, ReplicatedCache};
use super::types::{CacheBackend, CacheError, CacheEvent, CacheEventKind};

const KEYEVENT_EXPIRED_PATTERN: &str = "__keyevent@*__:expired";
const KEYEVENT_EVICTED_PATTERN: &str = "__keyevent@*__:evicted";

impl From<PoolError> for CacheError {
    fn from(err: PoolError) -> Self {
        CacheError::Unavailable(err.to_string())
    }
}

pub(crate) fn session_key(key_prefix: &str, id: &SessionId) -> String {
    format!("{}:session:{}", key_prefix, id)
}

pub(crate) fn events_channel(key_prefix: &str) -> String {
    format!("{}:events", key_prefix)
}

/// Turn a pub/sub message into a cache event, if it concerns our sessions
pub(crate) fn parse_notification(key_prefix: &str, channel: &str, payload: &str) -> Option<CacheEvent> {
    if channel == events_channel(key_prefix) {
        return match serde_json::from_str::<CacheEvent>(payload) {
            Ok(event) => Some(event),
            Err(e) => {
                tracing::warn!(error = %e, channel = %channel, "Failed to parse cache event");
                None
            }
        };
    }

    let kind = if channel.ends_with(":expired") {
        CacheEventKind::Expired
    } else if channel.ends_with(":evicted") {
        CacheEventKind::Evicted
    } else {
        return None;
    };

    let session_prefix = format!("{}:session:", key_prefix);
    let id = payload.strip_prefix(&session_prefix)?;
    Some(CacheEvent::new(SessionId::from(id), kind, None))
}

/// Write ARGV[1] (TTL ARGV[2]) unless the stored record is terminal.
/// With ARGV[3] == 'live' the key must also already exist.
const GUARDED_SET_SCRIPT: &str = r#"
local current = redis.call('GET', KEYS[1])
if current then
    local ok, decoded = pcall(cjson.decode, current)
    if not ok or decoded['validity'] ~= 'valid' then
        return 0
    end
elseif ARGV[3] == 'live' then
    return 0
end

if tonumber(ARGV[2]) > 0 then
    redis.call('SET', KEYS[1], ARGV[1], 'EX', ARGV[2])
else
    redis.call('SET', KEYS[1], ARGV[1])
end
return 1
"#;

#[derive(Debug, Clone, Copy)]
enum WriteGuard {
    /// Key must hold a valid record
    Live,
    /// Key may be absent or hold a valid record
    NotTerminal,
}

impl WriteGuard {
    fn as_str(&self) -> &'static str {
        match self {
            WriteGuard::Live => "live",
            WriteGuard::NotTerminal => "not_terminal",
        }
    }
}

fn set_command(key: &str, payload: &str, ttl_seconds: u64, condition: Option<&str>) -> redis::Cmd {
    let mut cmd = redis::cmd("SET");
    cmd.arg(key).arg(payload);
    if ttl_seconds > 0 {
        cmd.arg("EX").arg(ttl_seconds);
    }
    if let Some(condition) = condition {
        cmd.arg(condition);
    }
    cmd
}

pub struct RedisCache {
    node_id: String,
    key_prefix: String,
    pool: Arc<RedisPool>,
    listeners: ListenerSet,
}

impl RedisCache {
    pub fn new(node_id: String, key_prefix: String, pool: Arc<RedisPool>) -> Self {
        Self {
            node_id,
            key_prefix,
            pool,
            listeners: ListenerSet::new(),
        }
    }

    fn encode(value: &SessionRecord) -> Result<String, CacheError> {
        serde_json::to_string(value).map_err(|e| CacheError::Serialization(e.to_string()))
    }

    /// SET with an optional NX condition; returns whether Redis wrote the value
    async fn conditional_set(
        &self,
        key: &SessionId,
        value: &SessionRecord,
        ttl_seconds: u64,
        condition: Option<&str>,
    ) -> Result<bool, CacheError> {
        let cmd = set_command(
            &session_key(&self.key_prefix, key),
            &Self::encode(value)?,
            ttl_seconds,
            condition,
        );

        let written = self
            .pool
            .execute(|mut conn| async move {
                let reply: Option<String> = cmd.query_async(&mut conn).await?;
                Ok::<_, RedisError>(reply.is_some())
            })
            .await?;

        Ok(written)
    }

    /// Scripted write that refuses to overwrite a terminal record
    async fn guarded_set(
        &self,
        key: &SessionId,
        value: &SessionRecord,
        ttl_seconds: u64,
        guard: WriteGuard,
    ) -> Result<bool, CacheError> {
        let redis_key = session_key(&self.key_prefix, key);
        let payload = Self::encode(value)?;

        let written = self
            .pool
            .execute(|mut conn| async move {
                let script = redis::Script::new(GUARDED_SET_SCRIPT);
                let reply: i64 = script
                    .key(&redis_key)
                    .arg(&payload)
                    .arg(ttl_seconds)
                    .arg(guard.as_str())
                    .invoke_async(&mut conn)
                    .await?;
                Ok::<_, RedisError>(reply == 1)
            })
            .await?;

        Ok(written)
    }

    async fn enable_keyspace_events(&self) {
        let result = self
            .pool
            .execute(|mut conn| async move {
                let _: () = redis::cmd("CONFIG")
                    .arg("SET")
                    .arg("notify-keyspace-events")
                    .arg("Exe")
                    .query_async(&mut conn)
                    .await?;
                Ok::<_, RedisError>(())
            })
            .await;

        if let Err(e) = result {
            tracing::warn!(
                error = %e,
                "Could not enable keyspace notifications, expirations will only be observed on load"
            );
        }
    }

    async fn run_event_loop(
        &self,
        shutdown: &mut broadcast::Receiver<()>,
        backoff: &mut ExponentialBackoff,
    ) -> Result<(), RedisError> {
        if self.pool.config().configure_keyspace_events {
            self.enable_keyspace_events().await;
        }

        let channel = events_channel(&self.key_prefix);
        let mut pubsub = self.pool.client().get_async_pubsub().await?;
        pubsub.subscribe(&channel).await?;
        pubsub.psubscribe(KEYEVENT_EXPIRED_PATTERN).await?;
        pubsub.psubscribe(KEYEVENT_EVICTED_PATTERN).await?;
        backoff.reset();

        tracing::info!(
            node_id = %self.node_id,
            channel = %channel,
            "Subscribed to cache change notifications"
        );

        let mut messages = pubsub.on_message();

        loop {
            tokio::select! {
                biased;

                _ = shutdown.recv() => {
                    return Ok(());
                }

                msg = messages.next() => {
                    let Some(msg) = msg else {
                        return Err(RedisError::from((
                            redis::ErrorKind::IoError,
                            "cache event stream ended",
                        )));
                    };

                    let channel_name = msg.get_channel_name().to_string();
                    let payload: String = match msg.get_payload() {
                        Ok(p) => p,
                        Err(e) => {
                            tracing::warn!(error = %e, "Failed to read notification payload");
                            continue;
                        }
                    };

                    if let Some(event) = parse_notification(&self.key_prefix, &channel_name, &payload) {
                        tracing::debug!(
                            session_id = %event.key,
                            kind = event.kind.as_str(),
                            "Received cache event"
                        );
                        self.listeners.notify(&event);
                    }
                }
            }
        }
    }
}

#[async_trait]
impl ReplicatedCache for RedisCache {
    fn node_id(&self) -> &str {
        &self.node_id
    }

    fn backend_type(&self) -> CacheBackend {
        CacheBackend::Redis
    }

    fn health(&self) -> CacheHealthStats {
        self.pool.health().stats()
    }

    async fn put(
        &self,
        key: &SessionId,
        value: &SessionRecord,
        ttl_seconds: u64,
    ) -> Result<(), CacheError> {
        self.conditional_set(key, value, ttl_seconds, None).await?;
        Ok(())
    }

    async fn put_if_absent(
        &self,
        key: &SessionId,
        value: &SessionRecord,
        ttl_seconds: u64,
    ) -> Result<bool, CacheError> {
        self.conditional_set(key, value, ttl_seconds, Some("NX")).await
    }

    async fn replace(
        &self,
        key: &SessionId,
        value: &SessionRecord,
        ttl_seconds: u64,
    ) -> Result<bool, CacheError> {
        self.guarded_set(key, value, ttl_seconds, WriteGuard::Live).await
    }

    async fn put_unless_terminal(
        &self,
        key: &SessionId,
        value: &SessionRecord,
        ttl_seconds: u64,
    ) -> Result<bool, CacheError> {
        self.guarded_set(key, value, ttl_seconds, WriteGuard::NotTerminal)
            .await
    }

    async fn tombstone(
        &self,
        key: &SessionId,
        value: &SessionRecord,
        ttl_seconds: u64,
    ) -> Result<Option<SessionRecord>, CacheError> {
        let cmd = set_command(
            &session_key(&self.key_prefix, key),
            &Self::encode(value)?,
            ttl_seconds,
            Some("GET"),
        );
        let channel = events_channel(&self.key_prefix);
        let event = CacheEvent::new(
            key.clone(),
            CacheEventKind::for_tombstone(value.state()),
            Some(self.node_id.clone()),
        );
        let event_json =
            serde_json::to_string(&event).map_err(|e| CacheError::Serialization(e.to_string()))?;

        // Overwrite and announce in one transaction
        let (previous, _receivers): (Option<String>, i64) = self
            .pool
            .execute(|mut conn| async move {
                let reply: (Option<String>, i64) = redis::pipe()
                    .atomic()
                    .add_command(cmd)
                    .cmd("PUBLISH")
                    .arg(&channel)
                    .arg(&event_json)
                    .query_async(&mut conn)
                    .await?;
                Ok::<_, RedisError>(reply)
            })
            .await?;

        Ok(previous.and_then(|json| match serde_json::from_str(&json) {
            Ok(record) => Some(record),
            Err(e) => {
                tracing::warn!(session_id = %key, error = %e, "Discarding unreadable previous value");
                None
            }
        }))
    }

    async fn get(&self, key: &SessionId) -> Result<Option<SessionRecord>, CacheError> {
        let redis_key = session_key(&self.key_prefix, key);

        let payload = self
            .pool
            .execute(|mut conn| async move {
                let reply: Option<String> = redis::cmd("GET").arg(&redis_key).query_async(&mut conn).await?;
                Ok::<_, RedisError>(reply)
            })
            .await?;

        payload
            .map(|json| {
                serde_json::from_str(&json).map_err(|e| CacheError::Serialization(e.to_string()))
            })
            .transpose()
    }

    async fn remove(&self, key: &SessionId) -> Result<bool, CacheError> {
        let redis_key = session_key(&self.key_prefix, key);
        let channel = events_channel(&self.key_prefix);
        let event = CacheEvent::new(key.clone(), CacheEventKind::Removed, Some(self.node_id.clone()));
        let event_json =
            serde_json::to_string(&event).map_err(|e| CacheError::Serialization(e.to_string()))?;

        // Delete and announce in one transaction
        let (deleted, _receivers): (i64, i64) = self
            .pool
            .execute(|mut conn| async move {
                let reply: (i64, i64) = redis::pipe()
                    .atomic()
                    .cmd("DEL")
                    .arg(&redis_key)
                    .cmd("PUBLISH")
                    .arg(&channel)
                    .arg(&event_json)
                    .query_async(&mut conn)
                    .await?;
                Ok::<_, RedisError>(reply)
            })
            .await?;

        Ok(deleted > 0)
    }

    fn subscribe(&self, listener: Arc<dyn EntryChangeListener>) {
        self.listeners.add(listener);
    }

    fn spawn_background(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut backoff = ExponentialBackoff::new(BackoffConfig::from(self.pool.config()));

            loop {
                match self.run_event_loop(&mut shutdown, &mut backoff).await {
                    Ok(()) => {
                        tracing::info!(node_id = %self.node_id, "Cache event subscriber stopped");
                        break;
                    }
                    Err(e) => {
                        self.pool.health().set_reconnecting();
                        let delay = backoff.next_delay();
                        tracing::error!(
                            error = %e,
                            retry_delay_ms = delay.as_millis() as u64,
                            "Cache event subscription failed, reconnecting"
                        );

                        tokio::select! {
                            _ = shutdown.recv() => break,
                            _ = tokio::time::sleep(delay) => {}
                        }
                    }
                }
            }
        })
    }
}
