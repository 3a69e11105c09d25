use axum::{Json, http::StatusCode, response::IntoResponse};
use serde_json::json;
use thiserror::Error;

use super::models::ErrorResponse;
use crate::library::LibraryError;
use crate::pipeline::PipelineError;
use crate::sync::SyncError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("payload invalid: {0}")]
    InvalidPayload(String),
    #[error("invalid book id: {0:?}")]
    InvalidBookId(String),
    #[error("archive exceeds the {0} byte limit")]
    PayloadTooLarge(usize),
    #[error("book {0} is already being processed")]
    Conflict(String),
    #[error("resource not found: {0}")]
    NotFound(String),
    #[error("remote storage is unreachable")]
    Offline,
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::InvalidPayload(_) | ApiError::InvalidBookId(_) => StatusCode::BAD_REQUEST,
            ApiError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Offline => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::InvalidPayload(_) => "INVALID_PAYLOAD",
            ApiError::InvalidBookId(_) => "INVALID_BOOK_ID",
            ApiError::PayloadTooLarge(_) => "PAYLOAD_TOO_LARGE",
            ApiError::Conflict(_) => "CONFLICT",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::Offline => "OFFLINE",
            ApiError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }
        let body = ErrorResponse {
            code: self.code(),
            message: self.to_string(),
        };

        (status, Json(json!(body))).into_response()
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(value: serde_json::Error) -> Self {
        ApiError::InvalidPayload(value.to_string())
    }
}

impl From<PipelineError> for ApiError {
    fn from(value: PipelineError) -> Self {
        match value {
            PipelineError::Concurrency(id) => ApiError::Conflict(id),
            PipelineError::InvalidBookId(id) => ApiError::InvalidBookId(id),
            PipelineError::Epub(e) => ApiError::InvalidPayload(e.to_string()),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<LibraryError> for ApiError {
    fn from(value: LibraryError) -> Self {
        match value {
            LibraryError::NotFound(id) => ApiError::NotFound(format!("book {id}")),
            LibraryError::Ledger(e) => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<SyncError> for ApiError {
    fn from(value: SyncError) -> Self {
        match value {
            SyncError::Offline => ApiError::Offline,
            SyncError::BookNotFound(id) => ApiError::NotFound(format!("book {id}")),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_errors_map_to_status() {
        let conflict: ApiError = PipelineError::Concurrency("b".into()).into();
        assert_eq!(conflict.status_code(), StatusCode::CONFLICT);

        let invalid: ApiError = PipelineError::InvalidBookId("a/b".into()).into();
        assert_eq!(invalid.code(), "INVALID_BOOK_ID");
    }

    #[test]
    fn test_sync_offline_is_unavailable() {
        let err: ApiError = SyncError::Offline.into();
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
