use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};

use crate::infrastructure::queue::state::JobState;
use crate::modules::video::dto::{EnqueueResponse, ProcessingOutput, StatusResponse};
use crate::modules::video::model::{Video, VideoStatus};

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::modules::video::handler::upload_video,
        crate::modules::video::handler::get_status,
        crate::modules::video::handler::list_videos,
        crate::modules::video::handler::get_video,
        crate::modules::video::handler::download_frames,
    ),
    components(
        schemas(
            EnqueueResponse, StatusResponse, ProcessingOutput,
            Video, VideoStatus, JobState,
        )
    ),
    tags(
        (name = "Videos", description = "Video upload and frame extraction")
    ),
    security(
        ("bearer_auth" = [])
    ),
    modifiers(&SecurityAddon)
)]
pub struct ApiDoc;

pub struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}
