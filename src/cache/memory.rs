//! In-process replicated cache.
//!
//! Every node joins a shared [`MemoryCluster`] and gets its own
//! [`MemoryCache`] handle. Values are held serialized, so each `get` hands
//! out an independent copy the way a networked cache would. Entries leave
//! the cluster by explicit removal, TTL expiry (checked lazily on access and
//! by a periodic sweep) or capacity eviction; each departure is broadcast to
//! the listeners of every node. A tombstone write also counts as a departure:
//! the terminal record stays behind so no node can write the id again.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::session::{SessionId, SessionRecord};

use super::health::{CacheHealth, CacheHealthStats};
use super::traits::{EntryChangeListener, ListenerSet, ReplicatedCache};
use super::types::{CacheBackend, CacheError, CacheEvent, CacheEventKind};

#[derive(Debug, Clone)]
pub struct MemoryClusterConfig {
    /// Maximum number of entries before eviction (0 = unbounded)
    pub max_entries: usize,
    /// Interval of the background expiry sweep
    pub sweep_interval: Duration,
}

impl Default for MemoryClusterConfig {
    fn default() -> Self {
        Self {
            max_entries: 0,
            sweep_interval: Duration::from_millis(500),
        }
    }
}

struct StoredEntry {
    payload: String,
    expires_at: Option<Instant>,
    /// Holds a record that is no longer valid
    terminal: bool,
}

impl StoredEntry {
    fn new(value: &SessionRecord, ttl_seconds: u64) -> Result<Self, CacheError> {
        let payload =
            serde_json::to_string(value).map_err(|e| CacheError::Serialization(e.to_string()))?;
        let expires_at = if ttl_seconds == 0 {
            None
        } else {
            Instant::now().checked_add(Duration::from_secs(ttl_seconds))
        };
        Ok(Self {
            payload,
            expires_at,
            terminal: !value.is_valid(),
        })
    }

    fn is_expired(&self, now: Instant) -> bool {
        matches!(self.expires_at, Some(deadline) if deadline <= now)
    }
}

struct ClusterState {
    entries: DashMap<SessionId, StoredEntry>,
    nodes: DashMap<String, Arc<ListenerSet>>,
    available: AtomicBool,
    config: MemoryClusterConfig,
}

/// Shared storage all in-process nodes replicate through
#[derive(Clone)]
pub struct MemoryCluster {
    state: Arc<ClusterState>,
}

impl MemoryCluster {
    pub fn new() -> Self {
        Self::with_config(MemoryClusterConfig::default())
    }

    pub fn with_config(config: MemoryClusterConfig) -> Self {
        Self {
            state: Arc::new(ClusterState {
                entries: DashMap::new(),
                nodes: DashMap::new(),
                available: AtomicBool::new(true),
                config,
            }),
        }
    }

    /// Create the cache handle for a node
    pub fn join(&self, node_id: impl Into<String>) -> MemoryCache {
        let node_id = node_id.into();
        let listeners = Arc::new(ListenerSet::new());
        self.state.nodes.insert(node_id.clone(), listeners.clone());

        tracing::debug!(node_id = %node_id, "Node joined memory cache cluster");

        MemoryCache {
            node_id,
            cluster: self.clone(),
            listeners,
            health: CacheHealth::new(),
        }
    }

    /// Simulate the cluster becoming unreachable (or reachable again)
    pub fn set_available(&self, available: bool) {
        self.state.available.store(available, Ordering::Release);
    }

    pub fn is_available(&self) -> bool {
        self.state.available.load(Ordering::Acquire)
    }

    /// Number of stored entries, including expired ones not yet swept
    pub fn len(&self) -> usize {
        self.state.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.entries.is_empty()
    }

    /// Remove every expired entry; returns how many were removed
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let expired: Vec<SessionId> = self
            .state
            .entries
            .iter()
            .filter(|entry| entry.value().is_expired(now))
            .map(|entry| entry.key().clone())
            .collect();

        expired
            .iter()
            .filter(|key| self.expire_entry(key, now))
            .count()
    }

    fn expire_entry(&self, key: &SessionId, now: Instant) -> bool {
        let removed = self
            .state
            .entries
            .remove_if(key, |_, entry| entry.is_expired(now));

        match removed {
            Some((key, _)) => {
                self.broadcast(CacheEvent::new(key, CacheEventKind::Expired, None));
                true
            }
            None => false,
        }
    }

    fn enforce_capacity(&self, written: &SessionId) {
        let max_entries = self.state.config.max_entries;
        if max_entries == 0 {
            return;
        }

        while self.state.entries.len() > max_entries {
            // Victim is the entry closest to expiring; entries without TTL last
            let victim = self
                .state
                .entries
                .iter()
                .filter(|entry| entry.key() != written)
                .min_by_key(|entry| (entry.value().expires_at.is_none(), entry.value().expires_at))
                .map(|entry| entry.key().clone());

            let Some(victim) = victim else {
                break;
            };

            if let Some((key, _)) = self.state.entries.remove(&victim) {
                tracing::debug!(session_id = %key, "Evicted entry from memory cache");
                self.broadcast(CacheEvent::new(key, CacheEventKind::Evicted, None));
            }
        }
    }

    fn broadcast(&self, event: CacheEvent) {
        let nodes: Vec<Arc<ListenerSet>> = self
            .state
            .nodes
            .iter()
            .map(|node| node.value().clone())
            .collect();

        for listeners in nodes {
            listeners.notify(&event);
        }
    }
}

impl Default for MemoryCluster {
    fn default() -> Self {
        Self::new()
    }
}

/// One node's handle to a [`MemoryCluster`]
pub struct MemoryCache {
    node_id: String,
    cluster: MemoryCluster,
    listeners: Arc<ListenerSet>,
    health: CacheHealth,
}

impl MemoryCache {
    pub fn cluster(&self) -> &MemoryCluster {
        &self.cluster
    }

    fn ensure_available(&self) -> Result<(), CacheError> {
        if self.cluster.is_available() {
            self.health.record_success();
            Ok(())
        } else {
            self.health.record_failure();
            Err(CacheError::Unavailable(format!(
                "node {} cannot reach the cache cluster",
                self.node_id
            )))
        }
    }

    fn decode(payload: &str) -> Result<SessionRecord, CacheError> {
        serde_json::from_str(payload).map_err(|e| CacheError::Serialization(e.to_string()))
    }
}

#[async_trait]
impl ReplicatedCache for MemoryCache {
    fn node_id(&self) -> &str {
        &self.node_id
    }

    fn backend_type(&self) -> CacheBackend {
        CacheBackend::Memory
    }

    fn health(&self) -> CacheHealthStats {
        self.health.stats()
    }

    async fn put(
        &self,
        key: &SessionId,
        value: &SessionRecord,
        ttl_seconds: u64,
    ) -> Result<(), CacheError> {
        self.ensure_available()?;
        let entry = StoredEntry::new(value, ttl_seconds)?;

        self.cluster.state.entries.insert(key.clone(), entry);
        self.cluster.enforce_capacity(key);
        Ok(())
    }

    async fn put_if_absent(
        &self,
        key: &SessionId,
        value: &SessionRecord,
        ttl_seconds: u64,
    ) -> Result<bool, CacheError> {
        self.ensure_available()?;
        let entry = StoredEntry::new(value, ttl_seconds)?;
        let now = Instant::now();

        let (written, replaced_expired) = match self.cluster.state.entries.entry(key.clone()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_expired(now) {
                    occupied.insert(entry);
                    (true, true)
                } else {
                    (false, false)
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(entry);
                (true, false)
            }
        };

        if replaced_expired {
            self.cluster
                .broadcast(CacheEvent::new(key.clone(), CacheEventKind::Expired, None));
        }
        if written {
            self.cluster.enforce_capacity(key);
        }

        Ok(written)
    }

    async fn replace(
        &self,
        key: &SessionId,
        value: &SessionRecord,
        ttl_seconds: u64,
    ) -> Result<bool, CacheError> {
        self.ensure_available()?;
        let entry = StoredEntry::new(value, ttl_seconds)?;
        let now = Instant::now();

        // None = absent or terminal, Some(false) = expired, Some(true) = replaced
        let outcome = match self.cluster.state.entries.get_mut(key) {
            Some(current) if current.is_expired(now) => Some(false),
            Some(mut current) if !current.terminal => {
                *current = entry;
                Some(true)
            }
            _ => None,
        };

        if outcome == Some(false) {
            self.cluster.expire_entry(key, now);
        }

        Ok(outcome == Some(true))
    }

    async fn put_unless_terminal(
        &self,
        key: &SessionId,
        value: &SessionRecord,
        ttl_seconds: u64,
    ) -> Result<bool, CacheError> {
        self.ensure_available()?;
        let entry = StoredEntry::new(value, ttl_seconds)?;
        let now = Instant::now();

        let (written, replaced_expired) = match self.cluster.state.entries.entry(key.clone()) {
            Entry::Occupied(mut occupied) => {
                let expired = occupied.get().is_expired(now);
                if expired || !occupied.get().terminal {
                    occupied.insert(entry);
                    (true, expired)
                } else {
                    (false, false)
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(entry);
                (true, false)
            }
        };

        if replaced_expired {
            self.cluster
                .broadcast(CacheEvent::new(key.clone(), CacheEventKind::Expired, None));
        }
        if written {
            self.cluster.enforce_capacity(key);
        }

        Ok(written)
    }

    async fn tombstone(
        &self,
        key: &SessionId,
        value: &SessionRecord,
        ttl_seconds: u64,
    ) -> Result<Option<SessionRecord>, CacheError> {
        self.ensure_available()?;
        let entry = StoredEntry::new(value, ttl_seconds)?;
        let now = Instant::now();

        let previous = self.cluster.state.entries.insert(key.clone(), entry);

        self.cluster.broadcast(CacheEvent::new(
            key.clone(),
            CacheEventKind::for_tombstone(value.state()),
            Some(self.node_id.clone()),
        ));
        self.cluster.enforce_capacity(key);

        match previous {
            Some(previous) if !previous.is_expired(now) => {
                Self::decode(&previous.payload).map(Some)
            }
            _ => Ok(None),
        }
    }

    async fn get(&self, key: &SessionId) -> Result<Option<SessionRecord>, CacheError> {
        self.ensure_available()?;
        let now = Instant::now();

        let lookup = self
            .cluster
            .state
            .entries
            .get(key)
            .map(|entry| (entry.is_expired(now), entry.payload.clone()));

        match lookup {
            None => Ok(None),
            Some((true, _)) => {
                self.cluster.expire_entry(key, now);
                Ok(None)
            }
            Some((false, payload)) => Self::decode(&payload).map(Some),
        }
    }

    async fn remove(&self, key: &SessionId) -> Result<bool, CacheError> {
        self.ensure_available()?;
        let now = Instant::now();

        match self.cluster.state.entries.remove(key) {
            Some((key, entry)) if entry.is_expired(now) => {
                self.cluster
                    .broadcast(CacheEvent::new(key, CacheEventKind::Expired, None));
                Ok(false)
            }
            Some((key, _)) => {
                self.cluster.broadcast(CacheEvent::new(
                    key,
                    CacheEventKind::Removed,
                    Some(self.node_id.clone()),
                ));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn subscribe(&self, listener: Arc<dyn EntryChangeListener>) {
        self.listeners.add(listener);
    }

    fn spawn_background(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        let cluster = self.cluster.clone();
        let node_id = self.node_id.clone();
        let period = cluster
            .state
            .config
            .sweep_interval
            .max(Duration::from_millis(1));

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    biased;

                    _ = shutdown.recv() => {
                        tracing::debug!(node_id = %node_id, "Memory cache sweeper stopped");
                        break;
                    }

                    _ = ticker.tick() => {
                        let swept = cluster.sweep_expired();
                        if swept > 0 {
                            tracing::debug!(node_id = %node_id, swept = swept, "Swept expired entries");
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheHealthStatus;
    use crate::session::SessionState;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<CacheEvent>>);

    impl Recorder {
        fn kinds(&self) -> Vec<CacheEventKind> {
            self.0.lock().unwrap().iter().map(|e| e.kind).collect()
        }
    }

    impl EntryChangeListener for Recorder {
        fn on_entry_event(&self, event: CacheEvent) {
            self.0.lock().unwrap().push(event);
        }
    }

    fn record(id: &str) -> SessionRecord {
        SessionRecord::new(SessionId::from(id), 0)
    }

    fn invalidated(id: &str) -> SessionRecord {
        let mut record = record(id);
        record.invalidate().unwrap();
        record
    }

    #[tokio::test]
    async fn test_writes_are_visible_from_other_nodes() {
        let cluster = MemoryCluster::new();
        let a = cluster.join("node-a");
        let b = cluster.join("node-b");

        let id = SessionId::from("s1");
        a.put(&id, &record("s1"), 60).await.unwrap();

        let loaded = b.get(&id).await.unwrap().unwrap();
        assert_eq!(loaded.id(), &id);
        assert_eq!(cluster.len(), 1);
    }

    #[tokio::test]
    async fn test_put_if_absent_and_replace() {
        let cluster = MemoryCluster::new();
        let a = cluster.join("node-a");
        let id = SessionId::from("s1");

        assert!(!a.replace(&id, &record("s1"), 60).await.unwrap());
        assert!(a.put_if_absent(&id, &record("s1"), 60).await.unwrap());
        assert!(!a.put_if_absent(&id, &record("s1"), 60).await.unwrap());
        assert!(a.replace(&id, &record("s1"), 60).await.unwrap());
    }

    #[tokio::test]
    async fn test_tombstone_blocks_later_writes() {
        let cluster = MemoryCluster::new();
        let a = cluster.join("node-a");
        let b = cluster.join("node-b");
        let recorder = Arc::new(Recorder::default());
        b.subscribe(recorder.clone());

        let id = SessionId::from("s1");
        a.put(&id, &record("s1"), 60).await.unwrap();

        let previous = a.tombstone(&id, &invalidated("s1"), 60).await.unwrap();
        assert!(previous.is_some_and(|r| r.is_valid()));
        assert_eq!(cluster.len(), 1);

        assert!(!b.put_if_absent(&id, &record("s1"), 60).await.unwrap());
        assert!(!b.put_unless_terminal(&id, &record("s1"), 60).await.unwrap());
        assert!(!b.replace(&id, &record("s1"), 60).await.unwrap());

        let stored = b.get(&id).await.unwrap().unwrap();
        assert_eq!(stored.state(), SessionState::Invalidated);

        let events = recorder.0.lock().unwrap().clone();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, CacheEventKind::Removed);
        assert_eq!(events[0].origin_node.as_deref(), Some("node-a"));
    }

    #[tokio::test]
    async fn test_expired_tombstone_announces_expiry() {
        let cluster = MemoryCluster::new();
        let a = cluster.join("node-a");
        let recorder = Arc::new(Recorder::default());
        a.subscribe(recorder.clone());

        let id = SessionId::from("s1");
        let mut expired = record("s1");
        expired.expire().unwrap();

        assert!(a.tombstone(&id, &expired, 0).await.unwrap().is_none());
        assert_eq!(recorder.kinds(), vec![CacheEventKind::Expired]);
    }

    #[tokio::test]
    async fn test_put_unless_terminal_overwrites_live_entry() {
        let cluster = MemoryCluster::new();
        let a = cluster.join("node-a");
        let id = SessionId::from("s1");

        assert!(a.put_unless_terminal(&id, &record("s1"), 60).await.unwrap());
        assert!(a.put_unless_terminal(&id, &record("s1"), 60).await.unwrap());
        assert_eq!(cluster.len(), 1);
    }

    #[tokio::test]
    async fn test_lapsed_tombstone_frees_the_key() {
        let cluster = MemoryCluster::new();
        let a = cluster.join("node-a");
        let id = SessionId::from("s1");

        a.tombstone(&id, &invalidated("s1"), 1).await.unwrap();
        tokio::time::sleep(Duration::from_millis(1100)).await;

        assert!(a.put_if_absent(&id, &record("s1"), 60).await.unwrap());
    }

    #[tokio::test]
    async fn test_remove_notifies_every_node() {
        let cluster = MemoryCluster::new();
        let a = cluster.join("node-a");
        let b = cluster.join("node-b");
        let recorder = Arc::new(Recorder::default());
        b.subscribe(recorder.clone());

        let id = SessionId::from("s1");
        a.put(&id, &record("s1"), 60).await.unwrap();

        assert!(a.remove(&id).await.unwrap());
        assert!(!a.remove(&id).await.unwrap());

        let events = recorder.0.lock().unwrap().clone();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, CacheEventKind::Removed);
        assert_eq!(events[0].origin_node.as_deref(), Some("node-a"));
    }

    #[tokio::test]
    async fn test_entries_expire_after_ttl() {
        let cluster = MemoryCluster::new();
        let a = cluster.join("node-a");
        let recorder = Arc::new(Recorder::default());
        a.subscribe(recorder.clone());

        let id = SessionId::from("s1");
        a.put(&id, &record("s1"), 1).await.unwrap();
        assert!(a.get(&id).await.unwrap().is_some());

        tokio::time::sleep(Duration::from_millis(1100)).await;

        assert!(a.get(&id).await.unwrap().is_none());
        assert!(!a.replace(&id, &record("s1"), 1).await.unwrap());
        assert_eq!(recorder.kinds(), vec![CacheEventKind::Expired]);
    }

    #[tokio::test]
    async fn test_sweep_removes_expired_entries() {
        let cluster = MemoryCluster::new();
        let a = cluster.join("node-a");

        a.put(&SessionId::from("short"), &record("short"), 1).await.unwrap();
        a.put(&SessionId::from("long"), &record("long"), 0).await.unwrap();

        tokio::time::sleep(Duration::from_millis(1100)).await;

        assert_eq!(cluster.sweep_expired(), 1);
        assert_eq!(cluster.len(), 1);
    }

    #[tokio::test]
    async fn test_capacity_eviction() {
        let cluster = MemoryCluster::with_config(MemoryClusterConfig {
            max_entries: 2,
            ..Default::default()
        });
        let a = cluster.join("node-a");
        let recorder = Arc::new(Recorder::default());
        a.subscribe(recorder.clone());

        a.put(&SessionId::from("s1"), &record("s1"), 10).await.unwrap();
        a.put(&SessionId::from("s2"), &record("s2"), 100).await.unwrap();
        a.put(&SessionId::from("s3"), &record("s3"), 100).await.unwrap();

        assert_eq!(cluster.len(), 2);
        assert!(a.get(&SessionId::from("s1")).await.unwrap().is_none());

        let events = recorder.0.lock().unwrap().clone();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, CacheEventKind::Evicted);
        assert_eq!(events[0].key, SessionId::from("s1"));
    }

    #[tokio::test]
    async fn test_unavailable_cluster_fails_operations() {
        let cluster = MemoryCluster::new();
        let a = cluster.join("node-a");
        let id = SessionId::from("s1");

        cluster.set_available(false);
        assert!(matches!(
            a.put(&id, &record("s1"), 60).await,
            Err(CacheError::Unavailable(_))
        ));
        assert!(matches!(a.get(&id).await, Err(CacheError::Unavailable(_))));
        assert_eq!(a.health().status, CacheHealthStatus::Unavailable);

        cluster.set_available(true);
        assert!(a.get(&id).await.unwrap().is_none());
        assert_eq!(a.health().total_failures, 2);
    }

    #[tokio::test]
    async fn test_background_sweeper_stops_on_shutdown() {
        let cluster = MemoryCluster::with_config(MemoryClusterConfig {
            max_entries: 0,
            sweep_interval: Duration::from_millis(20),
        });
        let a = Arc::new(cluster.join("node-a"));
        let (shutdown_tx, _) = broadcast::channel(1);

        let handle = a.clone().spawn_background(shutdown_tx.subscribe());
        a.put(&SessionId::from("s1"), &record("s1"), 1).await.unwrap();

        tokio::time::sleep(Duration::from_millis(1200)).await;
        assert!(cluster.is_empty());

        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();
    }
}
