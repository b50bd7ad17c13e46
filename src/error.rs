use axum::{
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde_json::json;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Not eligible: {0}")]
    NotEligible(String),

    #[error("Device check incomplete: {0}")]
    DeviceCheckIncomplete(String),

    #[error("Assessment window closed: {0}")]
    WindowClosed(String),

    #[error("Attempt not active: {0}")]
    AttemptNotActive(String),

    #[error("No active session for this token")]
    SessionNotFound,

    #[error("Judge unavailable: {0}")]
    JudgeUnavailable(String),

    #[error("Database error: {0}")]
    Database(sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Validation error: {0}")]
    Validation(#[from] validator::ValidationErrors),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),

    #[error("HTTP error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Stable machine-readable code sent alongside the message.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Config(_) => "config_error",
            Error::BadRequest(_) => "bad_request",
            Error::Unauthorized(_) => "unauthorized",
            Error::NotFound(_) => "not_found",
            Error::NotEligible(_) => "not_eligible",
            Error::DeviceCheckIncomplete(_) => "device_check_incomplete",
            Error::WindowClosed(_) => "window_closed",
            Error::AttemptNotActive(_) => "attempt_not_active",
            Error::SessionNotFound => "session_not_found",
            Error::JudgeUnavailable(_) => "judge_unavailable",
            Error::Validation(_) => "validation_error",
            Error::Json(_) => "invalid_json",
            _ => "internal_error",
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> axum::response::Response {
        let code = self.code();
        let (status, message) = match self {
            Error::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            Error::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            Error::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            Error::NotEligible(msg) => (StatusCode::FORBIDDEN, msg),
            Error::WindowClosed(msg) => (StatusCode::FORBIDDEN, msg),
            Error::DeviceCheckIncomplete(msg) => (StatusCode::PRECONDITION_FAILED, msg),
            Error::AttemptNotActive(msg) => (StatusCode::CONFLICT, msg),
            Error::SessionNotFound => (
                StatusCode::NOT_FOUND,
                "No active session for this token".to_string(),
            ),
            Error::JudgeUnavailable(msg) => (StatusCode::BAD_GATEWAY, msg),
            Error::Validation(err) => (StatusCode::BAD_REQUEST, err.to_string()),
            Error::Json(err) => (StatusCode::BAD_REQUEST, err.to_string()),
            Error::Reqwest(err) => (
                StatusCode::BAD_GATEWAY,
                format!("External service error: {}", err),
            ),
            Error::Database(err) => {
                tracing::error!(error = %err, "database error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "An unexpected error occurred".to_string(),
                )
            }
            other => {
                tracing::error!(error = %other, "unhandled error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "An unexpected error occurred".to_string(),
                )
            }
        };

        let body = Json(json!({ "error": code, "message": message }));
        (status, body).into_response()
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => Error::NotFound("Resource not found".to_string()),
            other => Error::Database(other),
        }
    }
}
