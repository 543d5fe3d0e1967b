//! Redis pub/sub event bus.

use async_trait::async_trait;
use futures::StreamExt;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::EventBus;
use crate::error::{ErrorCode, MedicError, Result};

const CHANNEL_CAPACITY: usize = 256;

/// Event bus over Redis pub/sub.
///
/// Publishes go through a shared connection manager; each subscription holds
/// its own pub/sub connection and forwards messages into an mpsc channel.
pub struct RedisEventBus {
    client: redis::Client,
    publisher: ConnectionManager,
    op_timeout: Duration,
}

impl RedisEventBus {
    /// Connect to the bus. Fails when the URL is invalid or the initial
    /// connection cannot be established.
    pub async fn connect(url: &str, op_timeout: Duration) -> Result<Self> {
        let client = redis::Client::open(url).map_err(|e| {
            MedicError::with_internal(
                ErrorCode::BusUnavailable,
                "Invalid event bus URL",
                e.to_string(),
            )
        })?;

        let publisher = tokio::time::timeout(op_timeout, ConnectionManager::new(client.clone()))
            .await
            .map_err(|_| {
                MedicError::new(ErrorCode::BusUnavailable, "Event bus connection timed out")
            })??;

        debug!(url = %url, "Connected to event bus");

        Ok(Self {
            client,
            publisher,
            op_timeout,
        })
    }
}

#[async_trait]
impl EventBus for RedisEventBus {
    async fn publish(&self, subject: &str, payload: &[u8]) -> Result<()> {
        let mut conn = self.publisher.clone();
        let receivers: i64 = tokio::time::timeout(
            self.op_timeout,
            conn.publish(subject, payload),
        )
        .await
        .map_err(|_| MedicError::new(ErrorCode::PublishFailed, "Event bus publish timed out"))??;

        debug!(subject = %subject, receivers = receivers, "Published event");
        Ok(())
    }

    async fn subscribe(&self, subject: &str) -> Result<mpsc::Receiver<Vec<u8>>> {
        let conn = tokio::time::timeout(self.op_timeout, self.client.get_async_connection())
            .await
            .map_err(|_| {
                MedicError::new(ErrorCode::SubscribeFailed, "Event bus subscribe timed out")
            })??;
        let mut pubsub = conn.into_pubsub();
        pubsub.subscribe(subject).await?;

        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let subject = subject.to_string();

        tokio::spawn(async move {
            let mut stream = pubsub.on_message();
            while let Some(msg) = stream.next().await {
                let payload: Vec<u8> = match msg.get_payload() {
                    Ok(payload) => payload,
                    Err(e) => {
                        warn!(subject = %subject, error = %e, "Undecodable bus message");
                        continue;
                    }
                };
                if tx.send(payload).await.is_err() {
                    break;
                }
            }
            debug!(subject = %subject, "Subscription stream ended");
        });

        Ok(rx)
    }
}
