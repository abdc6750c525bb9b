//! Unified error handling for the server.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use docsync_engine::{ClientId, Version};
use serde::Serialize;

/// Errors raised while synchronizing a document or touching storage.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error(transparent)]
    Engine(#[from] docsync_engine::Error),

    #[error("document not found: {0}")]
    NotFound(ClientId),

    #[error("version conflict on {id}: expected {expected:?}, found {found:?}")]
    Conflict {
        id: ClientId,
        expected: Option<Version>,
        found: Option<Version>,
    },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("storage io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SyncError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, SyncError::NotFound(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, SyncError::Conflict { .. })
    }

    /// True for failures of the backing store rather than of the request.
    pub fn is_storage(&self) -> bool {
        matches!(
            self,
            SyncError::Database(_)
                | SyncError::Migrate(_)
                | SyncError::Io(_)
                | SyncError::Serialization(_)
        )
    }
}

/// Result type for sync and storage operations.
pub type SyncResult<T> = std::result::Result<T, SyncError>;

/// Application error type.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error("Invalid request: {0}")]
    BadRequest(String),
}

/// Error response body.
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message, details) = match &self {
            AppError::Sync(e) if e.is_storage() => {
                tracing::error!("Storage error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Storage error".to_string(),
                    None,
                )
            }
            AppError::Sync(SyncError::NotFound(id)) => {
                (StatusCode::NOT_FOUND, "Not found".to_string(), Some(id.clone()))
            }
            AppError::Sync(e @ SyncError::Conflict { .. }) => {
                (StatusCode::CONFLICT, e.to_string(), None)
            }
            AppError::Sync(e) => {
                tracing::warn!("Sync error: {:?}", e);
                (StatusCode::BAD_REQUEST, e.to_string(), None)
            }
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone(), None),
        };

        let body = Json(ErrorResponse {
            error: error_message,
            details,
        });

        (status, body).into_response()
    }
}

/// Result type alias for handlers.
pub type Result<T> = std::result::Result<T, AppError>;
