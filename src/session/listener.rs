//! Invalidation listener
//!
//! The cache invokes [`InvalidationListener`] from its own delivery path.
//! The callback only forwards the event to a channel; [`InvalidationWorker`]
//! applies it to the local registry on a task of its own.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::time::MissedTickBehavior;

use crate::cache::{CacheEvent, EntryChangeListener};
use crate::metrics::{InvalidationMetrics, SessionMetrics};

use super::lifecycle::SessionState;
use super::registry::LocalSessionRegistry;

/// Cache callback that enqueues change events without blocking
pub struct InvalidationListener {
    tx: mpsc::UnboundedSender<CacheEvent>,
}

impl EntryChangeListener for InvalidationListener {
    fn on_entry_event(&self, event: CacheEvent) {
        InvalidationMetrics::record_event(event.kind.as_str());
        if self.tx.send(event).is_err() {
            tracing::debug!("Invalidation worker stopped, dropping cache event");
        }
    }
}

/// Applies queued cache events to the local registry
pub struct InvalidationWorker {
    node_id: String,
    rx: mpsc::UnboundedReceiver<CacheEvent>,
    registry: Arc<LocalSessionRegistry>,
    purge_interval: Duration,
}

/// Create a connected listener/worker pair
pub fn invalidation_channel(
    node_id: String,
    registry: Arc<LocalSessionRegistry>,
    purge_interval: Duration,
) -> (InvalidationListener, InvalidationWorker) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        InvalidationListener { tx },
        InvalidationWorker {
            node_id,
            rx,
            registry,
            purge_interval,
        },
    )
}

impl InvalidationWorker {
    /// Force the terminal state for a tracked id; returns whether anything changed
    pub fn apply(&self, event: &CacheEvent) -> bool {
        let target = SessionState::from(event.kind);
        let applied = self.registry.mark_terminal_if_tracked(&event.key, target);

        if applied {
            InvalidationMetrics::record_applied();
            SessionMetrics::set_tracked(&self.node_id, self.registry.tracked_count());
            tracing::debug!(
                session_id = %event.key,
                kind = event.kind.as_str(),
                origin_node = event.origin_node.as_deref().unwrap_or("-"),
                state = %target,
                "Applied cache event to local session"
            );
        }

        applied
    }

    /// Drain events until shutdown, purging stale tombstones periodically
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        let mut purge = tokio::time::interval(self.purge_interval);
        purge.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick completes immediately
        purge.tick().await;

        tracing::info!(node_id = %self.node_id, "Invalidation worker started");

        loop {
            tokio::select! {
                biased;

                _ = shutdown.recv() => {
                    break;
                }

                event = self.rx.recv() => {
                    match event {
                        Some(event) => {
                            self.apply(&event);
                        }
                        None => break,
                    }
                }

                _ = purge.tick() => {
                    let purged = self.registry.purge_tombstones();
                    if purged > 0 {
                        InvalidationMetrics::record_tombstones_purged(purged);
                        tracing::debug!(purged = purged, "Purged session tombstones");
                    }
                }
            }
        }

        tracing::info!(node_id = %self.node_id, "Invalidation worker stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheEventKind;
    use crate::session::SessionId;

    fn setup() -> (Arc<LocalSessionRegistry>, InvalidationListener, InvalidationWorker) {
        let registry = Arc::new(LocalSessionRegistry::new(Duration::from_secs(60)));
        let (listener, worker) =
            invalidation_channel("node-a".to_string(), registry.clone(), Duration::from_secs(60));
        (registry, listener, worker)
    }

    #[test]
    fn test_apply_marks_tracked_session() {
        let (registry, _listener, worker) = setup();
        let id = SessionId::from("s1");
        registry.track(&id);

        let event = CacheEvent::new(id.clone(), CacheEventKind::Removed, Some("node-b".into()));
        assert!(worker.apply(&event));
        assert_eq!(registry.state(&id), Some(SessionState::Invalidated));
    }

    #[test]
    fn test_apply_maps_eviction_to_expired() {
        let (registry, _listener, worker) = setup();
        let id = SessionId::from("s1");
        registry.track(&id);

        assert!(worker.apply(&CacheEvent::new(id.clone(), CacheEventKind::Evicted, None)));
        assert_eq!(registry.state(&id), Some(SessionState::Expired));
    }

    #[test]
    fn test_apply_ignores_untracked() {
        let (registry, _listener, worker) = setup();
        let id = SessionId::from("elsewhere");

        assert!(!worker.apply(&CacheEvent::new(id.clone(), CacheEventKind::Removed, None)));
        assert_eq!(registry.state(&id), None);
    }

    #[tokio::test]
    async fn test_worker_drains_channel_until_shutdown() {
        let (registry, listener, worker) = setup();
        let id = SessionId::from("s1");
        registry.track(&id);

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = tokio::spawn(worker.run(shutdown_rx));

        listener.on_entry_event(CacheEvent::new(id.clone(), CacheEventKind::Expired, None));

        for _ in 0..50 {
            if registry.is_terminal(&id) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(registry.state(&id), Some(SessionState::Expired));

        shutdown_tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_listener_survives_stopped_worker() {
        let (_registry, listener, worker) = setup();
        drop(worker);
        listener.on_entry_event(CacheEvent::new(
            SessionId::from("s1"),
            CacheEventKind::Removed,
            None,
        ));
    }
}
