use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use dotenvy::dotenv;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod app;
mod common;
mod config;
mod docs;
mod infrastructure;
mod middleware;
mod modules;
mod routes;
mod state;
mod workers;

#[cfg(test)]
mod testing;

use config::settings::AppConfig;
use infrastructure::db::pool::{connect_to_db, run_migrations};
use infrastructure::media::ffmpeg::FfmpegTransformer;
use infrastructure::queue::rabbitmq::RabbitMqService;
use infrastructure::queue::state::RedisJobStateStore;
use infrastructure::queue::BrokerJobQueue;
use infrastructure::redis::client::RedisService;
use infrastructure::storage::build_storage;
use modules::video::repository::PgVideoRepository;
use modules::video::service::VideoService;
use modules::video::validator::UploadValidator;
use state::AppState;
use workers::consumer::{JobRunner, WorkerPool};
use workers::processor::VideoProcessor;
use workers::reconciler::Reconciler;

const CONSUMER_RESTART_DELAY: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("frame_pipeline=info,tower_http=info"));
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(env_filter)
        .init();

    info!("Starting server...");

    let config = Arc::new(AppConfig::new().context("Invalid configuration")?);

    let db = connect_to_db(&config.database_url)
        .await
        .context("Failed to connect to PostgreSQL")?;
    run_migrations(&db).await.context("Failed to run migrations")?;

    let redis = RedisService::new(&config.queue.redis_url)
        .await
        .context("Failed to connect to Redis")?;

    let rabbit = RabbitMqService::new(&config.queue.rabbitmq_url)
        .await
        .context("Failed to connect to RabbitMQ")?;
    let retry_queue = config.queue.retry_queue_name();
    rabbit
        .declare_topology(&config.queue.queue_name, &retry_queue)
        .await
        .context("Failed to declare queues")?;

    let storage = build_storage(&config.storage).await;
    let records = Arc::new(PgVideoRepository::new(db));
    let states = Arc::new(RedisJobStateStore::new(
        redis.clone(),
        &config.queue.queue_name,
        config.queue.job_retention,
    ));
    let queue = Arc::new(BrokerJobQueue::new(
        rabbit.clone(),
        states.clone(),
        config.queue.queue_name.clone(),
        retry_queue.clone(),
    ));

    let videos = VideoService::new(
        UploadValidator::system(),
        storage.clone(),
        records.clone(),
        queue.clone(),
        states.clone(),
        config.clone(),
    );

    let processor = VideoProcessor::new(
        storage,
        records.clone(),
        Arc::new(FfmpegTransformer::new(config.worker.frame_rate)),
        config.worker.output_file_name.clone(),
    );
    let pool = WorkerPool::new(
        rabbit,
        JobRunner::new(processor, states.clone(), queue),
        config.queue.queue_name.clone(),
        retry_queue,
        config.worker.concurrency,
    );
    tokio::spawn(pool.run_forever(CONSUMER_RESTART_DELAY));

    let reconciler = Reconciler::new(videos.clone(), records, states, config.reconcile.clone());
    tokio::spawn(async move { reconciler.run().await });

    let app = app::create_app(AppState::new(config.clone(), redis, videos));

    let addr = format!("0.0.0.0:{}", config.server_port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Server running on http://{}", addr);

    axum::serve(listener, app).await?;
    Ok(())
}
