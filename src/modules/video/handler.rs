use super::dto::{EnqueueResponse, StatusResponse};
use super::model::Video;
use super::validator::MAX_UPLOAD_BYTES;
use crate::common::response::{ApiError, ApiResponse, ApiSuccess};
use crate::common::upload::read_file_field;
use crate::middleware::auth::TokenClaims;
use crate::state::AppState;
use axum::{
    extract::{Multipart, Path, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Extension,
};
use tracing::info;
use uuid::Uuid;

/// Upload a video for frame extraction
///
/// Multipart form with a single `file` field. Returns as soon as the job is queued.
#[utoipa::path(
    post,
    path = "/api/v1/videos",
    request_body(content = String, content_type = "multipart/form-data"),
    responses(
        (status = 201, description = "Video accepted", body = ApiResponse<EnqueueResponse>),
        (status = 400, description = "Bad Request"),
        (status = 401, description = "Unauthorized"),
        (status = 413, description = "File larger than 30 MiB"),
        (status = 415, description = "Unsupported video format"),
        (status = 500, description = "Internal Server Error")
    ),
    tag = "Videos",
    security(("bearer_auth" = []))
)]
pub async fn upload_video(
    State(state): State<AppState>,
    Extension(claims): Extension<TokenClaims>,
    mut multipart: Multipart,
) -> impl IntoResponse {
    let upload = match read_file_field(&mut multipart, MAX_UPLOAD_BYTES).await {
        Ok(upload) => upload,
        Err(e) => return ApiError(e.to_string(), StatusCode::BAD_REQUEST).into_response(),
    };

    info!(owner_id = %claims.sub, file_name = %upload.descriptor.file_name, "Upload received");

    match state.videos.enqueue(upload.descriptor, upload.body, &claims.sub).await {
        Ok(res) => ApiSuccess(
            ApiResponse::success(res, "Video accepted for processing"),
            StatusCode::CREATED,
        )
        .into_response(),
        Err(e) => ApiError::from(e).into_response(),
    }
}

/// Job progress and outcome
#[utoipa::path(
    get,
    path = "/api/v1/videos/status/{job_id}",
    params(
        ("job_id" = String, Path, description = "Job ID returned on upload")
    ),
    responses(
        (status = 200, description = "Job status", body = ApiResponse<StatusResponse>),
        (status = 404, description = "Job Not Found")
    ),
    tag = "Videos",
    security(("bearer_auth" = []))
)]
pub async fn get_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> impl IntoResponse {
    match state.videos.status(&job_id).await {
        Ok(res) => ApiSuccess(ApiResponse::success(res, "Job status retrieved"), StatusCode::OK).into_response(),
        Err(e) => ApiError::from(e).into_response(),
    }
}

#[utoipa::path(
    get,
    path = "/api/v1/videos",
    responses(
        (status = 200, description = "Caller's videos, newest first", body = ApiResponse<Vec<Video>>)
    ),
    tag = "Videos",
    security(("bearer_auth" = []))
)]
pub async fn list_videos(
    State(state): State<AppState>,
    Extension(claims): Extension<TokenClaims>,
) -> impl IntoResponse {
    match state.videos.list_for_owner(&claims.sub).await {
        Ok(res) => ApiSuccess(ApiResponse::success(res, "Videos retrieved successfully"), StatusCode::OK).into_response(),
        Err(e) => ApiError::from(e).into_response(),
    }
}

#[utoipa::path(
    get,
    path = "/api/v1/videos/{id}",
    params(
        ("id" = Uuid, Path, description = "Video ID")
    ),
    responses(
        (status = 200, description = "Get Video", body = ApiResponse<Video>),
        (status = 404, description = "Video Not Found")
    ),
    tag = "Videos",
    security(("bearer_auth" = []))
)]
pub async fn get_video(
    State(state): State<AppState>,
    Extension(claims): Extension<TokenClaims>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    match state.videos.find_by_id(&claims.sub, id).await {
        Ok(res) => ApiSuccess(ApiResponse::success(res, "Video retrieved successfully"), StatusCode::OK).into_response(),
        Err(e) => ApiError::from(e).into_response(),
    }
}

/// Download the frames archive
#[utoipa::path(
    get,
    path = "/api/v1/videos/{id}/download",
    params(
        ("id" = Uuid, Path, description = "Video ID")
    ),
    responses(
        (status = 200, description = "Zip of extracted frames", content_type = "application/zip", body = Vec<u8>),
        (status = 404, description = "No archive for this video")
    ),
    tag = "Videos",
    security(("bearer_auth" = []))
)]
pub async fn download_frames(
    State(state): State<AppState>,
    Extension(claims): Extension<TokenClaims>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    match state.videos.download(&claims.sub, id).await {
        Ok(archive) => (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, "application/zip".to_string()),
                (
                    header::CONTENT_DISPOSITION,
                    format!("attachment; filename=\"{}\"", archive.file_name),
                ),
            ],
            archive.body,
        )
            .into_response(),
        Err(e) => ApiError::from(e).into_response(),
    }
}
