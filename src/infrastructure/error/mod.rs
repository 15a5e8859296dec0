use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::session::SessionError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Serialize)]
struct ErrorBody {
    code: String,
    message: String,
}

/// Check if running in production mode (based on RUN_MODE env var)
fn is_production() -> bool {
    std::env::var("RUN_MODE")
        .map(|m| m == "production" || m == "prod")
        .unwrap_or(false)
}

fn hide_in_production(log_msg: &str, public: &str) -> String {
    if is_production() {
        public.to_string()
    } else {
        log_msg.to_string()
    }
}

fn session_error_parts(err: &SessionError) -> (StatusCode, &'static str, String, String) {
    let log_msg = err.to_string();
    match err {
        SessionError::NotFound(_) => (
            StatusCode::NOT_FOUND,
            "SESSION_NOT_FOUND",
            log_msg.clone(),
            log_msg,
        ),
        SessionError::Invalid { .. } => (
            StatusCode::GONE,
            "SESSION_INVALID",
            log_msg.clone(),
            log_msg,
        ),
        SessionError::DuplicateSession(_) => (
            StatusCode::CONFLICT,
            "DUPLICATE_SESSION",
            log_msg.clone(),
            log_msg,
        ),
        SessionError::IllegalTransition { .. } => (
            StatusCode::CONFLICT,
            "ILLEGAL_TRANSITION",
            log_msg.clone(),
            log_msg,
        ),
        SessionError::CacheUnavailable(_) => (
            StatusCode::SERVICE_UNAVAILABLE,
            "CACHE_UNAVAILABLE",
            hide_in_production(&log_msg, "Service temporarily unavailable"),
            log_msg,
        ),
        SessionError::Serialization(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "SERIALIZATION_ERROR",
            hide_in_production(&log_msg, "Internal server error"),
            log_msg,
        ),
    }
}

impl AppError {
    fn parts(&self) -> (StatusCode, &'static str, String, String) {
        match self {
            AppError::Config(e) => {
                let log_msg = e.to_string();
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "CONFIG_ERROR",
                    hide_in_production(&log_msg, "Configuration error"),
                    log_msg,
                )
            }
            AppError::Session(e) => session_error_parts(e),
            AppError::Validation(msg) => (
                StatusCode::BAD_REQUEST,
                "VALIDATION_ERROR",
                msg.clone(),
                msg.clone(),
            ),
            AppError::NotFound(msg) => (
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                msg.clone(),
                msg.clone(),
            ),
            AppError::Internal(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                hide_in_production(e, "Internal server error"),
                e.clone(),
            ),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        self.parts().0
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, client_message, log_message) = self.parts();

        if status.is_server_error() {
            tracing::error!(
                code = %code,
                status = %status.as_u16(),
                message = %log_message,
                "API error"
            );
        } else {
            tracing::debug!(
                code = %code,
                status = %status.as_u16(),
                message = %log_message,
                "API request rejected"
            );
        }

        let body = ErrorResponse {
            error: ErrorBody {
                code: code.to_string(),
                message: client_message,
            },
        };

        (status, Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{SessionId, SessionState};

    #[test]
    fn test_session_error_status_mapping() {
        let id = SessionId::from("s1");
        let cases = [
            (SessionError::NotFound(id.clone()), StatusCode::NOT_FOUND),
            (
                SessionError::Invalid {
                    id: id.clone(),
                    state: SessionState::Expired,
                },
                StatusCode::GONE,
            ),
            (SessionError::DuplicateSession(id.clone()), StatusCode::CONFLICT),
            (
                SessionError::CacheUnavailable("down".to_string()),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                SessionError::Serialization("bad".to_string()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, expected) in cases {
            assert_eq!(AppError::from(err).status_code(), expected);
        }
    }

    #[test]
    fn test_validation_error_response() {
        let response = AppError::Validation("bad key".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
