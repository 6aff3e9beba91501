use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use utoipa::ToSchema;
use uuid::Uuid;

/// Durable lifecycle of a work item.
///
/// `PENDING` is only ever written on creation. `COMPLETED` is final. A retried
/// attempt may move an `ERROR` item back to `PROCESSING`; nothing moves an
/// item back to `PENDING`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(type_name = "video_status", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VideoStatus {
    Pending,
    Processing,
    Completed,
    Error,
}

impl VideoStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VideoStatus::Pending => "PENDING",
            VideoStatus::Processing => "PROCESSING",
            VideoStatus::Completed => "COMPLETED",
            VideoStatus::Error => "ERROR",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, VideoStatus::Completed | VideoStatus::Error)
    }

    /// States an item may be in when it is moved to `self`.
    pub fn allowed_predecessors(&self) -> &'static [VideoStatus] {
        match self {
            VideoStatus::Pending => &[],
            VideoStatus::Processing => &[VideoStatus::Pending, VideoStatus::Processing, VideoStatus::Error],
            VideoStatus::Completed => &[VideoStatus::Processing],
            VideoStatus::Error => &[VideoStatus::Pending, VideoStatus::Processing, VideoStatus::Error],
        }
    }

    pub fn can_transition_to(&self, next: VideoStatus) -> bool {
        next.allowed_predecessors().contains(self)
    }
}

impl std::fmt::Display for VideoStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Serialize, Deserialize, FromRow, Clone, PartialEq, ToSchema)]
pub struct Video {
    pub id: Uuid,
    pub owner_id: String,
    pub file_name: String,
    pub extension: String,
    pub size_bytes: i64,
    pub status: VideoStatus,
    #[serde(with = "time::serde::iso8601")]
    #[schema(value_type = String, format = DateTime)]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::iso8601")]
    #[schema(value_type = String, format = DateTime)]
    pub updated_at: OffsetDateTime,
}
