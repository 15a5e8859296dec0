//! Session error taxonomy

use thiserror::Error;

use crate::cache::CacheError;

use super::lifecycle::SessionState;
use super::record::SessionId;

/// Errors returned by session store operations.
///
/// Absent, logged-out and timed-out sessions all surface as `NotFound`;
/// callers treat every variant except `CacheUnavailable` and
/// `Serialization` as "re-authenticate".
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Session not found: {0}")]
    NotFound(SessionId),

    #[error("Session {id} is {state}")]
    Invalid { id: SessionId, state: SessionState },

    #[error("Session already exists: {0}")]
    DuplicateSession(SessionId),

    #[error("Cache unavailable: {0}")]
    CacheUnavailable(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Illegal lifecycle transition from {from} to {to}")]
    IllegalTransition { from: SessionState, to: SessionState },
}

impl SessionError {
    /// Wrap a cache failure with the operation and session it happened on
    pub fn from_cache(operation: &str, id: &SessionId, err: CacheError) -> Self {
        match err {
            CacheError::Unavailable(msg) => {
                Self::CacheUnavailable(format!("{} {}: {}", operation, id, msg))
            }
            CacheError::Serialization(msg) => {
                Self::Serialization(format!("{} {}: {}", operation, id, msg))
            }
        }
    }

    pub fn requires_reauthentication(&self) -> bool {
        matches!(
            self,
            Self::NotFound(_) | Self::Invalid { .. } | Self::DuplicateSession(_)
        )
    }
}

pub type SessionResult<T> = Result<T, SessionError>;
