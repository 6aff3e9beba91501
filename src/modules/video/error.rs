use axum::http::StatusCode;
use thiserror::Error;

use super::repository::RepositoryError;
use super::validator::ValidationError;
use crate::common::response::ApiError;
use crate::infrastructure::queue::error::QueueError;
use crate::infrastructure::storage::error::StorageError;

#[derive(Debug, Error)]
pub enum VideoError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("{0} not found")]
    NotFound(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

impl VideoError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            VideoError::Validation(ValidationError::PayloadTooLarge { .. }) => StatusCode::PAYLOAD_TOO_LARGE,
            VideoError::Validation(ValidationError::UnsupportedFormat(_)) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            VideoError::Validation(ValidationError::MissingOwner) => StatusCode::BAD_REQUEST,
            VideoError::NotFound(_) => StatusCode::NOT_FOUND,
            VideoError::Storage(e) if e.is_not_found() => StatusCode::NOT_FOUND,
            VideoError::Repository(RepositoryError::NotFound(_)) => StatusCode::NOT_FOUND,
            VideoError::Queue(QueueError::JobNotFound(_)) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<VideoError> for ApiError {
    fn from(err: VideoError) -> Self {
        let status = err.status_code();
        let message = if status.is_server_error() {
            tracing::error!("Request failed: {}", err);
            "Internal server error".to_string()
        } else {
            err.to_string()
        };
        ApiError(message, status)
    }
}
