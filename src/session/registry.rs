//! Node-local view of the sessions this node has touched

use std::time::{Duration, Instant};

use dashmap::DashMap;

use super::lifecycle::SessionState;
use super::record::SessionId;

#[derive(Debug, Clone, Copy)]
struct LocalEntry {
    state: SessionState,
    updated_at: Instant,
}

/// Last known lifecycle state per session id.
///
/// Terminal entries act as tombstones: they keep this node from reviving an
/// id until `tombstone_ttl` has passed.
pub struct LocalSessionRegistry {
    entries: DashMap<SessionId, LocalEntry>,
    tombstone_ttl: Duration,
}

impl LocalSessionRegistry {
    pub fn new(tombstone_ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            tombstone_ttl,
        }
    }

    /// Record a live session; tombstoned ids stay terminal
    pub fn track(&self, id: &SessionId) {
        let now = Instant::now();
        self.entries
            .entry(id.clone())
            .and_modify(|entry| {
                if entry.state.is_valid() {
                    entry.updated_at = now;
                }
            })
            .or_insert(LocalEntry {
                state: SessionState::Valid,
                updated_at: now,
            });
    }

    /// Force `id` into a terminal state, tracking it if needed.
    ///
    /// An id that is already terminal keeps its first terminal state.
    pub fn mark_terminal(&self, id: &SessionId, state: SessionState) -> SessionState {
        debug_assert!(state.is_terminal());
        let now = Instant::now();
        let mut entry = self.entries.entry(id.clone()).or_insert(LocalEntry {
            state: SessionState::Valid,
            updated_at: now,
        });

        if let Ok(next) = entry.state.transition(state) {
            if next != entry.state {
                entry.state = next;
                entry.updated_at = now;
            }
        }
        entry.state
    }

    /// Like [`mark_terminal`](Self::mark_terminal) but only for ids already
    /// known here; returns whether the entry moved to a terminal state
    pub fn mark_terminal_if_tracked(&self, id: &SessionId, state: SessionState) -> bool {
        let Some(mut entry) = self.entries.get_mut(id) else {
            return false;
        };

        if !entry.state.is_valid() {
            return false;
        }

        match entry.state.transition(state) {
            Ok(next) => {
                entry.state = next;
                entry.updated_at = Instant::now();
                true
            }
            Err(_) => false,
        }
    }

    pub fn state(&self, id: &SessionId) -> Option<SessionState> {
        self.entries.get(id).map(|entry| entry.state)
    }

    pub fn is_terminal(&self, id: &SessionId) -> bool {
        self.state(id).is_some_and(|state| state.is_terminal())
    }

    /// Sessions currently believed valid
    pub fn tracked_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.value().state.is_valid())
            .count()
    }

    pub fn tombstone_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.value().state.is_terminal())
            .count()
    }

    /// Drop tombstones older than the tombstone TTL; returns how many
    pub fn purge_tombstones(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| {
            entry.state.is_valid() || now.duration_since(entry.updated_at) < self.tombstone_ttl
        });
        before.saturating_sub(self.entries.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_track_and_mark_terminal() {
        let registry = LocalSessionRegistry::new(Duration::from_secs(60));
        let id = SessionId::from("s1");

        registry.track(&id);
        assert_eq!(registry.state(&id), Some(SessionState::Valid));
        assert_eq!(registry.tracked_count(), 1);

        assert_eq!(
            registry.mark_terminal(&id, SessionState::Invalidated),
            SessionState::Invalidated
        );
        assert!(registry.is_terminal(&id));
        assert_eq!(registry.tracked_count(), 0);
        assert_eq!(registry.tombstone_count(), 1);
    }

    #[test]
    fn test_terminal_state_is_sticky() {
        let registry = LocalSessionRegistry::new(Duration::from_secs(60));
        let id = SessionId::from("s1");

        registry.mark_terminal(&id, SessionState::Expired);
        registry.track(&id);
        assert_eq!(
            registry.mark_terminal(&id, SessionState::Invalidated),
            SessionState::Expired
        );
        assert_eq!(registry.state(&id), Some(SessionState::Expired));
    }

    #[test]
    fn test_mark_if_tracked_ignores_unknown_ids() {
        let registry = LocalSessionRegistry::new(Duration::from_secs(60));
        let id = SessionId::from("unknown");

        assert!(!registry.mark_terminal_if_tracked(&id, SessionState::Invalidated));
        assert_eq!(registry.state(&id), None);

        registry.track(&id);
        assert!(registry.mark_terminal_if_tracked(&id, SessionState::Invalidated));
        assert!(!registry.mark_terminal_if_tracked(&id, SessionState::Expired));
        assert_eq!(registry.state(&id), Some(SessionState::Invalidated));
    }

    #[test]
    fn test_purge_keeps_live_sessions() {
        let registry = LocalSessionRegistry::new(Duration::ZERO);
        let live = SessionId::from("live");
        let dead = SessionId::from("dead");

        registry.track(&live);
        registry.mark_terminal(&dead, SessionState::Invalidated);

        assert_eq!(registry.purge_tombstones(), 1);
        assert_eq!(registry.state(&live), Some(SessionState::Valid));
        assert_eq!(registry.state(&dead), None);
    }

    #[test]
    fn test_purge_respects_tombstone_ttl() {
        let registry = LocalSessionRegistry::new(Duration::from_secs(3600));
        registry.mark_terminal(&SessionId::from("dead"), SessionState::Expired);

        assert_eq!(registry.purge_tombstones(), 0);
        assert_eq!(registry.tombstone_count(), 1);
    }
}
