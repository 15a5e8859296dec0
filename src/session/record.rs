//! Replicated session record

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::error::{SessionError, SessionResult};
use super::lifecycle::SessionState;

/// Opaque, globally unique session identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Generate a fresh random identifier
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for SessionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Unit of state replicated across nodes.
///
/// The record is always written as a whole; there is no field-level patch
/// on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    id: SessionId,
    #[serde(default)]
    attributes: HashMap<String, Value>,
    #[serde(default)]
    validity: SessionState,
    created_at: DateTime<Utc>,
    last_touched_at: DateTime<Utc>,
    /// Idle timeout; 0 means the store default
    #[serde(default)]
    ttl_seconds: u64,
    /// Node that performed the last write
    #[serde(default)]
    node_id: String,
}

impl SessionRecord {
    pub fn new(id: SessionId, ttl_seconds: u64) -> Self {
        let now = Utc::now();
        Self {
            id,
            attributes: HashMap::new(),
            validity: SessionState::Valid,
            created_at: now,
            last_touched_at: now,
            ttl_seconds,
            node_id: String::new(),
        }
    }

    /// Attribute-free terminal record written in place of a departed session
    pub fn tombstone(id: SessionId, state: SessionState, node_id: &str) -> Self {
        debug_assert!(state.is_terminal());
        let mut record = Self::new(id, 0);
        record.validity = state;
        record.node_id = node_id.to_string();
        record
    }

    pub fn with_attributes(mut self, attributes: HashMap<String, Value>) -> Self {
        self.attributes = attributes;
        self
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        self.validity
    }

    pub fn is_valid(&self) -> bool {
        self.validity.is_valid()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn last_touched_at(&self) -> DateTime<Utc> {
        self.last_touched_at
    }

    pub fn ttl_seconds(&self) -> u64 {
        self.ttl_seconds
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    fn ensure_valid(&self) -> SessionResult<()> {
        if self.validity.is_valid() {
            Ok(())
        } else {
            Err(SessionError::Invalid {
                id: self.id.clone(),
                state: self.validity,
            })
        }
    }

    pub fn attribute(&self, key: &str) -> SessionResult<Option<&Value>> {
        self.ensure_valid()?;
        Ok(self.attributes.get(key))
    }

    pub fn attributes(&self) -> SessionResult<&HashMap<String, Value>> {
        self.ensure_valid()?;
        Ok(&self.attributes)
    }

    pub fn set_attribute(&mut self, key: impl Into<String>, value: Value) -> SessionResult<()> {
        self.ensure_valid()?;
        self.attributes.insert(key.into(), value);
        Ok(())
    }

    pub fn remove_attribute(&mut self, key: &str) -> SessionResult<Option<Value>> {
        self.ensure_valid()?;
        Ok(self.attributes.remove(key))
    }

    /// Replace the whole attribute set
    pub fn replace_attributes(&mut self, attributes: HashMap<String, Value>) -> SessionResult<()> {
        self.ensure_valid()?;
        self.attributes = attributes;
        Ok(())
    }

    /// Explicit logout
    pub fn invalidate(&mut self) -> SessionResult<()> {
        self.validity = self.validity.transition(SessionState::Invalidated)?;
        Ok(())
    }

    /// Passive timeout
    pub fn expire(&mut self) -> SessionResult<()> {
        self.validity = self.validity.transition(SessionState::Expired)?;
        Ok(())
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        if now > self.last_touched_at {
            self.last_touched_at = now;
        }
    }

    pub fn effective_ttl(&self, default_ttl_seconds: u64) -> u64 {
        if self.ttl_seconds == 0 {
            default_ttl_seconds
        } else {
            self.ttl_seconds
        }
    }

    /// Whether the idle timeout elapsed at `now`; a zero effective TTL never expires
    pub fn is_idle_expired(&self, now: DateTime<Utc>, default_ttl_seconds: u64) -> bool {
        let ttl = self.effective_ttl(default_ttl_seconds);
        if ttl == 0 {
            return false;
        }
        let ttl = Duration::try_seconds(i64::try_from(ttl).unwrap_or(i64::MAX))
            .unwrap_or(Duration::MAX);
        match self.last_touched_at.checked_add_signed(ttl) {
            Some(deadline) => deadline < now,
            None => false,
        }
    }

    pub(crate) fn stamp_node(&mut self, node_id: &str) {
        if self.node_id != node_id {
            self.node_id = node_id.to_string();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_generated_ids_are_unique() {
        let a = SessionId::generate();
        let b = SessionId::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 32);
    }

    #[test]
    fn test_new_record_is_valid_and_empty() {
        let record = SessionRecord::new(SessionId::from("s1"), 0);
        assert!(record.is_valid());
        assert!(record.attributes().unwrap().is_empty());
        assert_eq!(record.created_at(), record.last_touched_at());
    }

    #[test]
    fn test_attribute_access() {
        let mut record = SessionRecord::new(SessionId::from("s1"), 0);
        record.set_attribute("user", json!("admin")).unwrap();
        assert_eq!(record.attribute("user").unwrap(), Some(&json!("admin")));

        let removed = record.remove_attribute("user").unwrap();
        assert_eq!(removed, Some(json!("admin")));
        assert_eq!(record.attribute("user").unwrap(), None);
    }

    #[test]
    fn test_terminal_record_rejects_attribute_access() {
        let mut record = SessionRecord::new(SessionId::from("s1"), 0);
        record.set_attribute("k", json!(1)).unwrap();
        record.invalidate().unwrap();

        assert!(matches!(
            record.attribute("k"),
            Err(SessionError::Invalid {
                state: SessionState::Invalidated,
                ..
            })
        ));
        assert!(record.set_attribute("k", json!(2)).is_err());
        assert!(record.expire().is_err());
    }

    #[test]
    fn test_idle_expiration() {
        let record = SessionRecord::new(SessionId::from("s1"), 10);
        let created = record.last_touched_at();

        assert!(!record.is_idle_expired(created + Duration::seconds(10), 0));
        assert!(record.is_idle_expired(created + Duration::seconds(11), 0));
    }

    #[test]
    fn test_default_ttl_applies_when_unset() {
        let record = SessionRecord::new(SessionId::from("s1"), 0);
        assert_eq!(record.effective_ttl(30), 30);

        let created = record.last_touched_at();
        assert!(record.is_idle_expired(created + Duration::seconds(31), 30));
        // No TTL at all never expires
        assert!(!record.is_idle_expired(created + Duration::days(365), 0));
    }

    #[test]
    fn test_touch_only_moves_forward() {
        let mut record = SessionRecord::new(SessionId::from("s1"), 0);
        let touched = record.last_touched_at();
        record.touch(touched - Duration::seconds(5));
        assert_eq!(record.last_touched_at(), touched);
        record.touch(touched + Duration::seconds(5));
        assert_eq!(record.last_touched_at(), touched + Duration::seconds(5));
    }

    #[test]
    fn test_tombstone_is_terminal() {
        let record = SessionRecord::tombstone(SessionId::from("s1"), SessionState::Expired, "node-a");
        assert_eq!(record.state(), SessionState::Expired);
        assert_eq!(record.node_id(), "node-a");
        assert!(record.attributes().is_err());
    }

    #[test]
    fn test_json_shape() {
        let mut record = SessionRecord::new(SessionId::from("s1"), 60);
        record.set_attribute("k", json!("v")).unwrap();
        let value = serde_json::to_value(&record).unwrap();

        assert_eq!(value["id"], "s1");
        assert_eq!(value["attributes"]["k"], "v");
        assert_eq!(value["validity"], "valid");
        assert_eq!(value["ttl_seconds"], 60);
    }
}
