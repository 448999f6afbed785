//! HTTP error mapping.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use sensor_api::StoreError;
use sensor_engine::{IngestError, PageError, SettingsError};

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("storage: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Serialize)]
struct ErrorResponse {
    error: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error, message) = match self {
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", Some(msg)),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", Some(msg)),
            Self::Store(err) => {
                tracing::error!(error = %err, kind = %err.kind(), "storage error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "storage_error",
                    Some("A storage error occurred".to_string()),
                )
            }
        };
        (status, Json(ErrorResponse { error, message })).into_response()
    }
}

impl From<IngestError> for ApiError {
    fn from(e: IngestError) -> Self {
        match e {
            IngestError::Store(err) => ApiError::Store(err),
            other => ApiError::BadRequest(other.to_string()),
        }
    }
}

impl From<PageError> for ApiError {
    fn from(e: PageError) -> Self {
        match e {
            PageError::Cursor(err) => {
                tracing::debug!(error = %err, "rejecting cursor");
                ApiError::BadRequest("bad cursor".to_string())
            }
            PageError::Store(err) => ApiError::Store(err),
        }
    }
}

impl From<SettingsError> for ApiError {
    fn from(e: SettingsError) -> Self {
        match e {
            SettingsError::UnknownKey(_) => ApiError::NotFound(e.to_string()),
            SettingsError::InvalidValue { .. } => ApiError::BadRequest(e.to_string()),
            SettingsError::Store(err) => ApiError::Store(err),
        }
    }
}
