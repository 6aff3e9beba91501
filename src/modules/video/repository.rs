use async_trait::async_trait;
use sqlx::PgPool;
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

use super::model::{Video, VideoStatus};

pub type RepositoryResult<T> = Result<T, RepositoryError>;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("Video not found: {0}")]
    NotFound(Uuid),

    #[error("Video {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: Uuid,
        from: VideoStatus,
        to: VideoStatus,
    },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Durable record of every work item. Identity fields are written once on `create`.
#[async_trait]
pub trait JobRecordStore: Send + Sync {
    async fn create(&self, video: &Video) -> RepositoryResult<Video>;

    async fn find_by_id(&self, id: Uuid) -> RepositoryResult<Option<Video>>;

    async fn list_by_owner(&self, owner_id: &str) -> RepositoryResult<Vec<Video>>;

    /// Moves the item to `next` if its current status allows it, bumping `updated_at`.
    async fn transition(&self, id: Uuid, next: VideoStatus) -> RepositoryResult<Video>;

    /// `PENDING`/`PROCESSING` items not updated since `older_than`, oldest first.
    async fn find_unsettled(&self, older_than: OffsetDateTime, limit: i64) -> RepositoryResult<Vec<Video>>;

    /// Bumps `updated_at` of an unsettled item without changing its status.
    async fn touch(&self, id: Uuid) -> RepositoryResult<()>;
}

#[derive(Clone)]
pub struct PgVideoRepository {
    pool: PgPool,
}

impl PgVideoRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobRecordStore for PgVideoRepository {
    async fn create(&self, video: &Video) -> RepositoryResult<Video> {
        let created = sqlx::query_as::<_, Video>(
            r#"
            INSERT INTO videos (id, owner_id, file_name, extension, size_bytes, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING *
            "#,
        )
        .bind(video.id)
        .bind(&video.owner_id)
        .bind(&video.file_name)
        .bind(&video.extension)
        .bind(video.size_bytes)
        .bind(video.status)
        .bind(video.created_at)
        .bind(video.updated_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(created)
    }

    async fn find_by_id(&self, id: Uuid) -> RepositoryResult<Option<Video>> {
        let video = sqlx::query_as::<_, Video>("SELECT * FROM videos WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(video)
    }

    async fn list_by_owner(&self, owner_id: &str) -> RepositoryResult<Vec<Video>> {
        let videos = sqlx::query_as::<_, Video>(
            "SELECT * FROM videos WHERE owner_id = $1 ORDER BY created_at DESC",
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(videos)
    }

    async fn transition(&self, id: Uuid, next: VideoStatus) -> RepositoryResult<Video> {
        let predecessors: Vec<String> = next
            .allowed_predecessors()
            .iter()
            .map(|status| status.as_str().to_string())
            .collect();

        // Guarded in SQL so concurrent writers can't reorder the lifecycle.
        let updated = sqlx::query_as::<_, Video>(
            r#"
            UPDATE videos
            SET status = $2, updated_at = NOW()
            WHERE id = $1 AND status::text = ANY($3)
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(next)
        .bind(&predecessors)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(video) = updated {
            return Ok(video);
        }

        match self.find_by_id(id).await? {
            Some(current) => Err(RepositoryError::InvalidTransition {
                id,
                from: current.status,
                to: next,
            }),
            None => Err(RepositoryError::NotFound(id)),
        }
    }

    async fn find_unsettled(&self, older_than: OffsetDateTime, limit: i64) -> RepositoryResult<Vec<Video>> {
        let videos = sqlx::query_as::<_, Video>(
            r#"
            SELECT * FROM videos
            WHERE status IN ('PENDING', 'PROCESSING') AND updated_at < $1
            ORDER BY updated_at ASC
            LIMIT $2
            "#,
        )
        .bind(older_than)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(videos)
    }

    async fn touch(&self, id: Uuid) -> RepositoryResult<()> {
        let result = sqlx::query(
            "UPDATE videos SET updated_at = NOW() WHERE id = $1 AND status IN ('PENDING', 'PROCESSING')",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(id));
        }
        Ok(())
    }
}
