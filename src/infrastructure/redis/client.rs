use redis::{aio::MultiplexedConnection, Client, RedisResult};
use tracing::info;

/// Shared Redis handle: job state hashes and the revoked-token list.
#[derive(Clone)]
pub struct RedisService {
    client: Client,
}

impl RedisService {
    /// Opens a client without touching the network.
    pub fn from_url(connection_string: &str) -> RedisResult<Self> {
        Ok(Self {
            client: Client::open(connection_string)?,
        })
    }

    pub async fn new(connection_string: &str) -> RedisResult<Self> {
        let service = Self::from_url(connection_string)?;

        service.ping().await?;

        info!("✅ Connected to Redis");
        Ok(service)
    }

    pub async fn get_conn(&self) -> RedisResult<MultiplexedConnection> {
        self.client.get_multiplexed_async_connection().await
    }

    pub async fn ping(&self) -> RedisResult<()> {
        let mut conn = self.get_conn().await?;
        redis::cmd("PING").query_async::<()>(&mut conn).await
    }
}
