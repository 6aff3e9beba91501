use std::sync::Arc;

use crate::config::settings::AppConfig;
use crate::infrastructure::redis::client::RedisService;
use crate::modules::video::service::VideoService;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub redis: RedisService,
    pub videos: VideoService,
}

impl AppState {
    pub fn new(config: Arc<AppConfig>, redis: RedisService, videos: VideoService) -> Self {
        Self {
            config,
            redis,
            videos,
        }
    }
}
