//! Replicated cache contract

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::session::{SessionId, SessionRecord};

use super::health::CacheHealthStats;
use super::types::{CacheBackend, CacheError, CacheEvent};

/// Callback registered with a cache to observe entries leaving it.
///
/// Invoked from the cache's own delivery path, possibly concurrently with
/// store operations and with other invocations. Implementations must not
/// block.
pub trait EntryChangeListener: Send + Sync {
    fn on_entry_event(&self, event: CacheEvent);
}

/// What the session store needs from the distributed cache.
///
/// Writes become visible to every node eventually; replication is the
/// backend's job. `ttl_seconds == 0` stores without expiry.
#[async_trait]
pub trait ReplicatedCache: Send + Sync {
    /// Identifier of the node this handle belongs to
    fn node_id(&self) -> &str;

    fn backend_type(&self) -> CacheBackend;

    fn health(&self) -> CacheHealthStats;

    /// Unconditional write
    async fn put(
        &self,
        key: &SessionId,
        value: &SessionRecord,
        ttl_seconds: u64,
    ) -> Result<(), CacheError>;

    /// Write only if no live entry exists; returns whether it was written
    async fn put_if_absent(
        &self,
        key: &SessionId,
        value: &SessionRecord,
        ttl_seconds: u64,
    ) -> Result<bool, CacheError>;

    /// Write only if a live, valid entry exists; returns whether it was written
    async fn replace(
        &self,
        key: &SessionId,
        value: &SessionRecord,
        ttl_seconds: u64,
    ) -> Result<bool, CacheError>;

    /// Write unless a live terminal entry holds the key; returns whether it was written
    async fn put_unless_terminal(
        &self,
        key: &SessionId,
        value: &SessionRecord,
        ttl_seconds: u64,
    ) -> Result<bool, CacheError>;

    /// Overwrite the entry with a terminal record and announce it to every node.
    ///
    /// The event kind follows the record's state: `Removed` for an
    /// invalidated record, `Expired` otherwise. Returns the previous live
    /// value, if any.
    async fn tombstone(
        &self,
        key: &SessionId,
        value: &SessionRecord,
        ttl_seconds: u64,
    ) -> Result<Option<SessionRecord>, CacheError>;

    async fn get(&self, key: &SessionId) -> Result<Option<SessionRecord>, CacheError>;

    /// Delete; returns whether an entry was present
    async fn remove(&self, key: &SessionId) -> Result<bool, CacheError>;

    /// Register a change listener for removed, expired and evicted entries
    fn subscribe(&self, listener: Arc<dyn EntryChangeListener>);

    /// Start the backend's background work (expiry sweep, event feed)
    fn spawn_background(self: Arc<Self>, shutdown: broadcast::Receiver<()>) -> JoinHandle<()>;
}

/// Registered listeners of one cache handle
#[derive(Default)]
pub struct ListenerSet {
    next_id: AtomicUsize,
    listeners: DashMap<usize, Arc<dyn EntryChangeListener>>,
}

impl ListenerSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, listener: Arc<dyn EntryChangeListener>) -> usize {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners.insert(id, listener);
        id
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    pub fn notify(&self, event: &CacheEvent) {
        // Collect first so no shard lock is held while a listener runs
        let listeners: Vec<_> = self
            .listeners
            .iter()
            .map(|entry| entry.value().clone())
            .collect();

        for listener in listeners {
            listener.on_entry_event(event.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheEventKind;
    use std::sync::Mutex;

    struct Recorder(Mutex<Vec<CacheEvent>>);

    impl EntryChangeListener for Recorder {
        fn on_entry_event(&self, event: CacheEvent) {
            self.0.lock().unwrap().push(event);
        }
    }

    #[test]
    fn test_listener_set_notifies_every_listener() {
        let set = ListenerSet::new();
        let a = Arc::new(Recorder(Mutex::new(Vec::new())));
        let b = Arc::new(Recorder(Mutex::new(Vec::new())));
        set.add(a.clone());
        set.add(b.clone());
        assert_eq!(set.len(), 2);

        let event = CacheEvent::new(SessionId::from("s1"), CacheEventKind::Expired, None);
        set.notify(&event);

        assert_eq!(a.0.lock().unwrap().as_slice(), &[event.clone()]);
        assert_eq!(b.0.lock().unwrap().as_slice(), &[event]);
    }
}
