//! Session endpoints.

use std::collections::HashMap;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AppError, Result};
use crate::server::AppState;
use crate::session::{SessionError, SessionId, SessionRecord, SessionState};

#[derive(Debug, Default, Deserialize)]
pub struct CreateSessionRequest {
    #[serde(default)]
    pub attributes: HashMap<String, Value>,
    /// Idle timeout override; omitted or 0 uses the store default
    #[serde(default)]
    pub ttl_seconds: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct ReplaceSessionRequest {
    pub attributes: HashMap<String, Value>,
}

#[derive(Debug, Deserialize)]
pub struct SetAttributeRequest {
    pub value: Value,
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub id: String,
    pub state: SessionState,
    pub attributes: HashMap<String, Value>,
    pub created_at: DateTime<Utc>,
    pub last_touched_at: DateTime<Utc>,
    pub ttl_seconds: u64,
    pub node_id: String,
}

impl From<SessionRecord> for SessionResponse {
    fn from(record: SessionRecord) -> Self {
        let attributes = record.attributes().cloned().unwrap_or_default();
        Self {
            id: record.id().to_string(),
            state: record.state(),
            attributes,
            created_at: record.created_at(),
            last_touched_at: record.last_touched_at(),
            ttl_seconds: record.ttl_seconds(),
            node_id: record.node_id().to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AttributeResponse {
    pub session_id: String,
    pub key: String,
    pub value: Value,
}

fn validate_key(key: &str) -> Result<()> {
    if key.trim().is_empty() {
        return Err(AppError::Validation("Attribute key must not be empty".to_string()));
    }
    Ok(())
}

/// POST /api/v1/sessions
pub async fn create_session(
    State(state): State<AppState>,
    Json(request): Json<CreateSessionRequest>,
) -> Result<(StatusCode, Json<SessionResponse>)> {
    let record = state
        .store
        .create(request.attributes, request.ttl_seconds)
        .await?;
    Ok((StatusCode::CREATED, Json(record.into())))
}

/// GET /api/v1/sessions/{id}
pub async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SessionResponse>> {
    let id = SessionId::from(id);
    let record = state
        .store
        .load(&id)
        .await?
        .ok_or(SessionError::NotFound(id))?;
    Ok(Json(record.into()))
}

/// PUT /api/v1/sessions/{id} - replace the whole attribute set
pub async fn replace_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<ReplaceSessionRequest>,
) -> Result<Json<SessionResponse>> {
    let id = SessionId::from(id);
    let record = state
        .store
        .replace_attributes(&id, request.attributes)
        .await?;
    Ok(Json(record.into()))
}

/// DELETE /api/v1/sessions/{id} - logout, idempotent
pub async fn delete_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    state.store.remove(&SessionId::from(id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/v1/sessions/{id}/touch
pub async fn touch_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SessionResponse>> {
    let record = state.store.touch(&SessionId::from(id)).await?;
    Ok(Json(record.into()))
}

/// GET /api/v1/sessions/{id}/attributes/{key}
pub async fn get_attribute(
    State(state): State<AppState>,
    Path((id, key)): Path<(String, String)>,
) -> Result<Json<AttributeResponse>> {
    validate_key(&key)?;
    let id = SessionId::from(id);
    let value = state
        .store
        .get_attribute(&id, &key)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Attribute {} not set on session {}", key, id)))?;

    Ok(Json(AttributeResponse {
        session_id: id.to_string(),
        key,
        value,
    }))
}

/// PUT /api/v1/sessions/{id}/attributes/{key}
pub async fn set_attribute(
    State(state): State<AppState>,
    Path((id, key)): Path<(String, String)>,
    Json(request): Json<SetAttributeRequest>,
) -> Result<Json<SessionResponse>> {
    validate_key(&key)?;
    let record = state
        .store
        .set_attribute(&SessionId::from(id), key, request.value)
        .await?;
    Ok(Json(record.into()))
}

/// DELETE /api/v1/sessions/{id}/attributes/{key}
pub async fn delete_attribute(
    State(state): State<AppState>,
    Path((id, key)): Path<(String, String)>,
) -> Result<StatusCode> {
    validate_key(&key)?;
    state
        .store
        .remove_attribute(&SessionId::from(id), &key)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
