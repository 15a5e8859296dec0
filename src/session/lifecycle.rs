//! Session lifecycle state machine
//!
//! A session starts `Valid` and may move once to a terminal state:
//! `Invalidated` after an explicit logout or `Expired` after its idle
//! timeout elapsed. Terminal states never go back to `Valid`.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::cache::CacheEventKind;

use super::error::{SessionError, SessionResult};

/// Lifecycle state of a session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    #[default]
    Valid,
    /// Explicitly invalidated (logout); terminal
    Invalidated,
    /// Idle timeout elapsed; terminal
    Expired,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Valid => "valid",
            SessionState::Invalidated => "invalidated",
            SessionState::Expired => "expired",
        }
    }

    pub fn is_valid(&self) -> bool {
        *self == SessionState::Valid
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_valid()
    }

    /// Move to `to`.
    ///
    /// Only `Valid -> Invalidated` and `Valid -> Expired` change the state.
    /// Re-entering the current terminal state is a no-op; anything else is
    /// rejected with `IllegalTransition`.
    pub fn transition(self, to: SessionState) -> SessionResult<SessionState> {
        match (self, to) {
            (SessionState::Valid, SessionState::Invalidated)
            | (SessionState::Valid, SessionState::Expired) => Ok(to),
            (from, to) if from == to && from.is_terminal() => Ok(from),
            (from, to) => Err(SessionError::IllegalTransition { from, to }),
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<CacheEventKind> for SessionState {
    /// Terminal state implied by a cache change notification.
    fn from(kind: CacheEventKind) -> Self {
        match kind {
            CacheEventKind::Removed => SessionState::Invalidated,
            CacheEventKind::Expired | CacheEventKind::Evicted => SessionState::Expired,
        }
    }
}
