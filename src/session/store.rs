//! Session store over a replicated cache
//!
//! Every write is a single cache call, followed by one read when the cache
//! refuses a conditional write. Cache failures surface as `CacheUnavailable`
//! and are never retried here. Absent, removed and expired sessions all read
//! as not-found.
//!
//! Removal and expiry overwrite the entry with a terminal record for
//! `tombstone_ttl_seconds` (0 keeps it until the cache drops it), so no node
//! can write the id again while the tombstone lives.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde_json::Value;

use crate::cache::{CacheBackend, CacheError, CacheHealthStats, ReplicatedCache};
use crate::config::{DuplicatePolicy, SessionConfig};
use crate::metrics::{CacheMetrics, SessionMetrics};

use super::error::{SessionError, SessionResult};
use super::lifecycle::SessionState;
use super::listener::{invalidation_channel, InvalidationWorker};
use super::record::{SessionId, SessionRecord};
use super::registry::LocalSessionRegistry;

async fn timed<T, F>(operation: &'static str, fut: F) -> Result<T, CacheError>
where
    F: Future<Output = Result<T, CacheError>>,
{
    let start = Instant::now();
    let result = fut.await;
    CacheMetrics::record_latency(operation, start.elapsed().as_secs_f64());
    if result.is_err() {
        CacheMetrics::record_error(operation);
    }
    result
}

/// Node-side handle for reading and writing replicated sessions.
///
/// Built explicitly from a cache handle and shared by `Arc`; several stores
/// (one per node) may sit on the same cluster.
pub struct SessionStore {
    cache: Arc<dyn ReplicatedCache>,
    config: SessionConfig,
    registry: Arc<LocalSessionRegistry>,
}

impl SessionStore {
    pub fn new(cache: Arc<dyn ReplicatedCache>, config: SessionConfig) -> Self {
        let registry = Arc::new(LocalSessionRegistry::new(Duration::from_secs(
            config.tombstone_ttl_seconds,
        )));

        Self {
            cache,
            config,
            registry,
        }
    }

    /// Subscribe to cache change events.
    ///
    /// The returned worker must be run (usually spawned) for events to reach
    /// the local registry.
    pub fn start_invalidation_listener(&self) -> InvalidationWorker {
        let purge_interval = Duration::from_secs(self.config.purge_interval_seconds.max(1));
        let (listener, worker) = invalidation_channel(
            self.cache.node_id().to_string(),
            self.registry.clone(),
            purge_interval,
        );
        self.cache.subscribe(Arc::new(listener));

        tracing::info!(
            node_id = %self.cache.node_id(),
            cache_name = %self.config.cache_name,
            "Invalidation listener registered"
        );

        worker
    }

    /// Fetch a live session; `Ok(None)` when absent, removed or expired
    pub async fn load(&self, id: &SessionId) -> SessionResult<Option<SessionRecord>> {
        if self.registry.is_terminal(id) {
            SessionMetrics::record_load_tombstoned();
            return Ok(None);
        }

        let record = timed("get", self.cache.get(id))
            .await
            .map_err(|e| SessionError::from_cache("load", id, e))?;

        let Some(record) = record else {
            if self.registry.mark_terminal_if_tracked(id, SessionState::Invalidated) {
                tracing::debug!(session_id = %id, "Tracked session no longer in cache");
                self.refresh_tracked_gauge();
            }
            SessionMetrics::record_load_miss();
            return Ok(None);
        };

        if !record.is_valid() {
            self.registry.mark_terminal(id, record.state());
            self.refresh_tracked_gauge();
            SessionMetrics::record_load_miss();
            return Ok(None);
        }

        if record.is_idle_expired(Utc::now(), self.config.default_ttl_seconds) {
            if let Err(e) = self.write_tombstone(id, SessionState::Expired).await {
                tracing::debug!(
                    session_id = %id,
                    error = %e,
                    "Failed to replicate session expiry"
                );
            }
            self.registry.mark_terminal(id, SessionState::Expired);
            self.refresh_tracked_gauge();
            SessionMetrics::record_expired_on_load();
            tracing::debug!(session_id = %id, "Session expired on load");
            return Ok(None);
        }

        self.registry.track(id);
        self.refresh_tracked_gauge();
        SessionMetrics::record_load_hit();
        Ok(Some(record))
    }

    /// Write a new session, honoring the configured duplicate policy
    pub async fn store(&self, mut record: SessionRecord) -> SessionResult<SessionRecord> {
        let id = record.id().clone();
        self.ensure_writable(&record)?;

        if let Some(state) = self.registry.state(&id).filter(|s| s.is_terminal()) {
            SessionMetrics::record_write_rejected("terminal");
            return Err(SessionError::Invalid { id, state });
        }

        record.stamp_node(self.cache.node_id());
        let ttl = record.effective_ttl(self.config.default_ttl_seconds);

        let written = match self.config.duplicate_policy {
            DuplicatePolicy::Reject => {
                timed("put_if_absent", self.cache.put_if_absent(&id, &record, ttl)).await
            }
            DuplicatePolicy::Overwrite => {
                timed("put_unless_terminal", self.cache.put_unless_terminal(&id, &record, ttl)).await
            }
        }
        .map_err(|e| SessionError::from_cache("store", &id, e))?;

        if !written {
            return Err(self.refused_store(id).await);
        }

        self.registry.track(&id);
        self.refresh_tracked_gauge();
        SessionMetrics::record_created();

        tracing::info!(
            session_id = %id,
            node_id = %self.cache.node_id(),
            ttl_seconds = ttl,
            "Session stored"
        );

        Ok(record)
    }

    /// Generate an id and store a fresh session
    pub async fn create(
        &self,
        attributes: HashMap<String, Value>,
        ttl_seconds: Option<u64>,
    ) -> SessionResult<SessionRecord> {
        let record = SessionRecord::new(SessionId::generate(), ttl_seconds.unwrap_or(0))
            .with_attributes(attributes);
        self.store(record).await
    }

    /// Replace the whole record; fails with `NotFound` once the id is gone
    pub async fn update(&self, mut record: SessionRecord) -> SessionResult<SessionRecord> {
        let id = record.id().clone();
        self.ensure_writable(&record)?;

        if self.registry.is_terminal(&id) {
            SessionMetrics::record_write_rejected("not_found");
            return Err(SessionError::NotFound(id));
        }

        record.touch(Utc::now());
        record.stamp_node(self.cache.node_id());
        let ttl = record.effective_ttl(self.config.default_ttl_seconds);

        let replaced = timed("replace", self.cache.replace(&id, &record, ttl))
            .await
            .map_err(|e| SessionError::from_cache("update", &id, e))?;

        if !replaced {
            self.registry.mark_terminal_if_tracked(&id, SessionState::Invalidated);
            self.refresh_tracked_gauge();
            SessionMetrics::record_write_rejected("not_found");
            tracing::debug!(session_id = %id, "Update of absent session refused");
            return Err(SessionError::NotFound(id));
        }

        self.registry.track(&id);
        SessionMetrics::record_updated();
        tracing::debug!(session_id = %id, node_id = %self.cache.node_id(), "Session updated");

        Ok(record)
    }

    /// Delete a session; succeeds whether or not it existed
    pub async fn remove(&self, id: &SessionId) -> SessionResult<()> {
        self.remove_entry("remove", id).await.map(|_| ())
    }

    /// Logout; returns whether a live session was removed
    pub async fn invalidate(&self, id: &SessionId) -> SessionResult<bool> {
        self.remove_entry("invalidate", id).await
    }

    pub async fn is_valid(&self, id: &SessionId) -> SessionResult<bool> {
        Ok(self.load(id).await?.is_some())
    }

    pub async fn get_attribute(&self, id: &SessionId, key: &str) -> SessionResult<Option<Value>> {
        let record = self.require(id).await?;
        Ok(record.attribute(key)?.cloned())
    }

    pub async fn attributes(&self, id: &SessionId) -> SessionResult<HashMap<String, Value>> {
        let record = self.require(id).await?;
        Ok(record.attributes()?.clone())
    }

    pub async fn set_attribute(
        &self,
        id: &SessionId,
        key: impl Into<String>,
        value: Value,
    ) -> SessionResult<SessionRecord> {
        let mut record = self.require(id).await?;
        record.set_attribute(key, value)?;
        self.update(record).await
    }

    /// Remove one attribute; returns its previous value
    pub async fn remove_attribute(&self, id: &SessionId, key: &str) -> SessionResult<Option<Value>> {
        let mut record = self.require(id).await?;
        let previous = record.remove_attribute(key)?;
        if previous.is_some() {
            self.update(record).await?;
        }
        Ok(previous)
    }

    /// Swap the whole attribute set in one write
    pub async fn replace_attributes(
        &self,
        id: &SessionId,
        attributes: HashMap<String, Value>,
    ) -> SessionResult<SessionRecord> {
        let mut record = self.require(id).await?;
        record.replace_attributes(attributes)?;
        self.update(record).await
    }

    /// Reset the idle timer
    pub async fn touch(&self, id: &SessionId) -> SessionResult<SessionRecord> {
        let record = self.require(id).await?;
        self.update(record).await
    }

    pub fn node_id(&self) -> &str {
        self.cache.node_id()
    }

    pub fn backend_type(&self) -> CacheBackend {
        self.cache.backend_type()
    }

    pub fn cache_health(&self) -> CacheHealthStats {
        self.cache.health()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<LocalSessionRegistry> {
        &self.registry
    }

    /// Sessions this node currently believes valid
    pub fn tracked_count(&self) -> usize {
        self.registry.tracked_count()
    }

    async fn require(&self, id: &SessionId) -> SessionResult<SessionRecord> {
        self.load(id)
            .await?
            .ok_or_else(|| SessionError::NotFound(id.clone()))
    }

    fn ensure_writable(&self, record: &SessionRecord) -> SessionResult<()> {
        if record.is_valid() {
            return Ok(());
        }
        SessionMetrics::record_write_rejected("invalid");
        Err(SessionError::Invalid {
            id: record.id().clone(),
            state: record.state(),
        })
    }

    async fn remove_entry(&self, operation: &'static str, id: &SessionId) -> SessionResult<bool> {
        let removed = self
            .write_tombstone(id, SessionState::Invalidated)
            .await
            .map_err(|e| SessionError::from_cache(operation, id, e))?;

        self.registry.mark_terminal(id, SessionState::Invalidated);
        self.refresh_tracked_gauge();

        if removed {
            SessionMetrics::record_removed();
            tracing::info!(session_id = %id, node_id = %self.cache.node_id(), "Session invalidated");
        } else {
            tracing::debug!(session_id = %id, "Remove of absent session");
        }

        Ok(removed)
    }

    /// Replace the entry with a terminal record; returns whether a valid one was there
    async fn write_tombstone(
        &self,
        id: &SessionId,
        state: SessionState,
    ) -> Result<bool, CacheError> {
        let tombstone = SessionRecord::tombstone(id.clone(), state, self.cache.node_id());
        let previous = timed(
            "tombstone",
            self.cache
                .tombstone(id, &tombstone, self.config.tombstone_ttl_seconds),
        )
        .await?;

        Ok(previous.is_some_and(|record| record.is_valid()))
    }

    /// Work out why the cache refused a new session
    async fn refused_store(&self, id: SessionId) -> SessionError {
        let existing = match timed("get", self.cache.get(&id)).await {
            Ok(existing) => existing,
            Err(e) => return SessionError::from_cache("store", &id, e),
        };

        match existing {
            Some(existing) if !existing.is_valid() => {
                let state = self.registry.mark_terminal(&id, existing.state());
                self.refresh_tracked_gauge();
                SessionMetrics::record_write_rejected("terminal");
                tracing::warn!(
                    session_id = %id,
                    state = %state,
                    "Refused to revive a terminal session"
                );
                SessionError::Invalid { id, state }
            }
            _ => {
                SessionMetrics::record_write_rejected("duplicate");
                tracing::warn!(session_id = %id, "Session id already present in cache");
                SessionError::DuplicateSession(id)
            }
        }
    }

    fn refresh_tracked_gauge(&self) {
        SessionMetrics::set_tracked(self.cache.node_id(), self.registry.tracked_count());
    }
}
