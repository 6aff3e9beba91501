use axum::extract::DefaultBodyLimit;
use axum::middleware;
use axum::routing::get;
use axum::Router;
use crate::state::AppState;

pub mod dto;
pub mod error;
pub mod handler;
pub mod model;
pub mod repository;
pub mod service;
pub mod validator;

pub fn router(state: AppState) -> axum::Router<AppState> {
    // The upload reader enforces its own ceiling and reports 413 past it.
    Router::new()
        .route(
            "/",
            get(handler::list_videos)
                .post(handler::upload_video)
                .layer(DefaultBodyLimit::disable()),
        )
        .route("/status/{job_id}", get(handler::get_status))
        .route("/{id}", get(handler::get_video))
        .route("/{id}/download", get(handler::download_frames))
        .route_layer(middleware::from_fn_with_state(
            state,
            crate::middleware::auth::auth_middleware,
        ))
}
