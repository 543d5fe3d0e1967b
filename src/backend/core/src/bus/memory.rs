//! In-memory event bus backed by tokio broadcast channels.
//!
//! One broadcast channel per subject; subscribers that fall behind lose the
//! oldest messages, matching the at-most-once bus contract.

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{broadcast, mpsc};
use tracing::debug;

use super::EventBus;
use crate::error::Result;

const CHANNEL_CAPACITY: usize = 256;

/// In-memory bus for tests and single-process deployments.
#[derive(Default)]
pub struct MemoryBus {
    channels: DashMap<String, broadcast::Sender<Vec<u8>>>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn channel(&self, subject: &str) -> broadcast::Sender<Vec<u8>> {
        self.channels
            .entry(subject.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }
}

#[async_trait]
impl EventBus for MemoryBus {
    async fn publish(&self, subject: &str, payload: &[u8]) -> Result<()> {
        // A send error only means nobody is subscribed yet.
        let _ = self.channel(subject).send(payload.to_vec());
        Ok(())
    }

    async fn subscribe(&self, subject: &str) -> Result<mpsc::Receiver<Vec<u8>>> {
        let mut upstream = self.channel(subject).subscribe();
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let subject = subject.to_string();

        tokio::spawn(async move {
            loop {
                match upstream.recv().await {
                    Ok(payload) => {
                        if tx.send(payload).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(subject = %subject, skipped = skipped, "Subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::EventBusExt;

    #[tokio::test]
    async fn test_publish_reaches_subscriber() {
        let bus = MemoryBus::new();
        let mut rx = bus.subscribe("metrics").await.unwrap();

        bus.publish("metrics", b"{\"x\":1}").await.unwrap();

        let payload = rx.recv().await.unwrap();
        assert_eq!(payload, b"{\"x\":1}");
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_ok() {
        let bus = MemoryBus::new();
        assert!(bus.publish("metrics", b"{}").await.is_ok());
    }

    #[tokio::test]
    async fn test_subjects_are_isolated() {
        let bus = MemoryBus::new();
        let mut metrics = bus.subscribe("metrics").await.unwrap();
        let mut detections = bus.subscribe("detections").await.unwrap();

        bus.publish_json("detections", &serde_json::json!({"id": "d-1"}))
            .await
            .unwrap();

        let payload = detections.recv().await.unwrap();
        assert!(String::from_utf8_lossy(&payload).contains("d-1"));
        assert!(metrics.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_multiple_subscribers_fan_out() {
        let bus = MemoryBus::new();
        let mut a = bus.subscribe("actions.status").await.unwrap();
        let mut b = bus.subscribe("actions.status").await.unwrap();

        bus.publish("actions.status", b"payload").await.unwrap();

        assert_eq!(a.recv().await.unwrap(), b"payload");
        assert_eq!(b.recv().await.unwrap(), b"payload");
    }
}
