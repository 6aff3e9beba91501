use std::env;
use std::str::FromStr;

#[derive(Debug, Clone, Copy)]
pub enum EnvKey {
    ServerPort,
    DatabaseUrl,
    RedisUrl,
    RabbitMqUrl,
    QueueName,
    QueueAttempts,
    QueueBackoffMs,
    StorageMode,
    S3Bucket,
    S3Endpoint,
    S3Region,
    S3AccessKey,
    S3SecretKey,
    LocalStorageRoot,
    OutputFileName,
    FrameRate,
    WorkerConcurrency,
    JobRetentionSecs,
    ReconcileEnabled,
    ReconcileIntervalSecs,
    ReconcileStaleSecs,
    JwtSecret,
}

impl EnvKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvKey::ServerPort => "APP_PORT",
            EnvKey::DatabaseUrl => "DATABASE_URL",
            EnvKey::RedisUrl => "REDIS_URL",
            EnvKey::RabbitMqUrl => "RABBITMQ_URL",
            EnvKey::QueueName => "QUEUE_NAME",
            EnvKey::QueueAttempts => "QUEUE_ATTEMPTS",
            EnvKey::QueueBackoffMs => "QUEUE_BACKOFF_MS",
            EnvKey::StorageMode => "STORAGE_MODE",
            EnvKey::S3Bucket => "AWS_S3_BUCKET",
            EnvKey::S3Endpoint => "AWS_ENDPOINT",
            EnvKey::S3Region => "AWS_REGION",
            EnvKey::S3AccessKey => "AWS_ACCESS_KEY_ID",
            EnvKey::S3SecretKey => "AWS_SECRET_ACCESS_KEY",
            EnvKey::LocalStorageRoot => "LOCAL_STORAGE_ROOT",
            EnvKey::OutputFileName => "OUTPUT_FILE_NAME",
            EnvKey::FrameRate => "FRAME_RATE",
            EnvKey::WorkerConcurrency => "WORKER_CONCURRENCY",
            EnvKey::JobRetentionSecs => "JOB_RETENTION_SECS",
            EnvKey::ReconcileEnabled => "RECONCILE_ENABLED",
            EnvKey::ReconcileIntervalSecs => "RECONCILE_INTERVAL_SECS",
            EnvKey::ReconcileStaleSecs => "RECONCILE_STALE_SECS",
            EnvKey::JwtSecret => "JWT_SECRET",
        }
    }
}

pub fn get(key: EnvKey) -> Result<String, env::VarError> {
    env::var(key.as_str())
}

pub fn get_or(key: EnvKey, default: &str) -> String {
    env::var(key.as_str()).unwrap_or_else(|_| default.to_string())
}

/// Unset and blank values both read as `None`.
pub fn get_opt(key: EnvKey) -> Option<String> {
    env::var(key.as_str())
        .ok()
        .filter(|value| !value.trim().is_empty())
}

/// Unset falls back to `default`; a value that does not parse is an error.
pub fn get_parsed<T: FromStr>(key: EnvKey, default: T) -> Result<T, String> {
    parse_or(get_opt(key), default)
}

pub fn get_flag(key: EnvKey, default: bool) -> Result<bool, String> {
    flag_or(get_opt(key), default)
}

pub fn parse_or<T: FromStr>(raw: Option<String>, default: T) -> Result<T, String> {
    match raw {
        Some(val) => val
            .trim()
            .parse::<T>()
            .map_err(|_| format!("'{}' is not a valid value", val.trim())),
        None => Ok(default),
    }
}

pub fn flag_or(raw: Option<String>, default: bool) -> Result<bool, String> {
    let Some(val) = raw else {
        return Ok(default);
    };
    match val.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Ok(true),
        "0" | "false" | "no" => Ok(false),
        other => Err(format!("'{}' is not a boolean", other)),
    }
}
