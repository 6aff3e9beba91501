use lapin::{
    options::*,
    types::{AMQPValue, FieldTable, LongString, ShortString},
    BasicProperties, Channel, Connection, ConnectionProperties, Consumer,
};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::infrastructure::queue::error::{QueueError, QueueResult};

#[derive(Clone)]
pub struct RabbitMqService {
    url: String,
    conn: Arc<Mutex<Connection>>,
    channel: Arc<Mutex<Channel>>,
}

impl RabbitMqService {
    async fn connect(url: &str) -> QueueResult<(Connection, Channel)> {
        info!("Connecting to RabbitMQ");
        let conn = Connection::connect(url, ConnectionProperties::default()).await?;
        let channel = conn.create_channel().await?;

        info!("✅ Connected to RabbitMQ");
        Ok((conn, channel))
    }

    pub async fn new(url: &str) -> QueueResult<Self> {
        let (conn, channel) = Self::connect(url).await?;

        Ok(Self {
            url: url.to_string(),
            conn: Arc::new(Mutex::new(conn)),
            channel: Arc::new(Mutex::new(channel)),
        })
    }

    async fn reconnect(&self) -> QueueResult<()> {
        warn!("RabbitMQ connection dropped, reconnecting...");
        let (conn, channel) = Self::connect(&self.url).await?;
        *self.conn.lock().await = conn;
        *self.channel.lock().await = channel;
        Ok(())
    }

    /// Declares the work queue and its retry queue.
    ///
    /// Messages parked on the retry queue carry a per-message TTL and are
    /// dead-lettered back onto the work queue when it expires.
    pub async fn declare_topology(&self, queue: &str, retry_queue: &str) -> QueueResult<()> {
        let channel = self.channel.lock().await;
        declare_topology_on(&channel, queue, retry_queue).await
    }

    async fn publish_internal(&self, queue: &str, payload: &[u8], properties: BasicProperties) -> QueueResult<()> {
        let channel = self.channel.lock().await;

        channel
            .basic_publish(
                "",
                queue,
                BasicPublishOptions::default(),
                payload,
                properties,
            )
            .await?
            .await?;

        Ok(())
    }

    async fn publish_with(&self, queue: &str, payload: &[u8], properties: BasicProperties) -> QueueResult<()> {
        retry_after_reconnect(
            "publish",
            move || self.publish_internal(queue, payload, properties.clone()),
            move || self.reconnect(),
        )
        .await
    }

    pub async fn publish(&self, queue: &str, payload: &[u8]) -> QueueResult<()> {
        self.publish_with(queue, payload, persistent()).await
    }

    /// Parks `payload` on `retry_queue` until `delay` has elapsed.
    pub async fn publish_delayed(&self, retry_queue: &str, payload: &[u8], delay: Duration) -> QueueResult<()> {
        let expiration = ShortString::from(delay.as_millis().max(1).to_string());
        self.publish_with(retry_queue, payload, persistent().with_expiration(expiration))
            .await
    }

    /// Opens a dedicated channel for a consumer so publishing never waits on it.
    ///
    /// A connection the broker dropped is replaced before giving up, so a
    /// restarted consumer does not keep retrying on a dead connection.
    pub async fn consumer(&self, queue: &str, retry_queue: &str, tag: &str, prefetch: u16) -> QueueResult<Consumer> {
        let channel = retry_after_reconnect(
            "channel open",
            move || async move {
                let conn = self.conn.lock().await;
                conn.create_channel().await.map_err(QueueError::from)
            },
            move || self.reconnect(),
        )
        .await?;

        declare_topology_on(&channel, queue, retry_queue).await?;
        channel.basic_qos(prefetch, BasicQosOptions::default()).await?;

        let consumer = channel
            .basic_consume(
                queue,
                tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;

        Ok(consumer)
    }
}

/// Runs `op`, and once more after `reconnect` if the first try fails.
async fn retry_after_reconnect<T, Op, OpFut, Re, ReFut>(what: &str, mut op: Op, reconnect: Re) -> QueueResult<T>
where
    Op: FnMut() -> OpFut,
    OpFut: Future<Output = QueueResult<T>>,
    Re: FnOnce() -> ReFut,
    ReFut: Future<Output = QueueResult<()>>,
{
    match op().await {
        Ok(value) => Ok(value),
        Err(e) => {
            warn!("RabbitMQ {} failed: {}. Retrying after reconnect.", what, e);
            reconnect().await?;
            op().await
        }
    }
}

fn persistent() -> BasicProperties {
    BasicProperties::default()
        .with_delivery_mode(2)
        .with_content_type(ShortString::from("application/json"))
}

async fn declare_topology_on(channel: &Channel, queue: &str, retry_queue: &str) -> QueueResult<()> {
    channel
        .queue_declare(
            queue,
            QueueDeclareOptions {
                durable: true,
                ..QueueDeclareOptions::default()
            },
            FieldTable::default(),
        )
        .await?;

    let mut retry_args = FieldTable::default();
    retry_args.insert(
        ShortString::from("x-dead-letter-exchange"),
        AMQPValue::LongString(LongString::from("")),
    );
    retry_args.insert(
        ShortString::from("x-dead-letter-routing-key"),
        AMQPValue::LongString(LongString::from(queue)),
    );

    channel
        .queue_declare(
            retry_queue,
            QueueDeclareOptions {
                durable: true,
                ..QueueDeclareOptions::default()
            },
            retry_args,
        )
        .await?;

    Ok(())
}
