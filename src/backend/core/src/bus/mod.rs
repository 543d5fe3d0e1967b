//! Event bus: fire-and-forget fanout between services.
//!
//! Subjects carry JSON payloads with at-most-once semantics; consumers are
//! expected to be idempotent and MUST ignore unknown fields. The Redis
//! implementation backs production; the in-memory implementation backs tests
//! and single-process deployments.

mod events;
mod memory;
mod redis;
pub mod subjects;

pub use events::{
    ActionCompletedEvent, ActionStatusEvent, ApprovalEvent, RollbackRequest,
};
pub use memory::MemoryBus;
pub use redis::RedisEventBus;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::error::Result;

/// A fire-and-forget publish/subscribe bus.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publish a raw JSON payload on a subject.
    async fn publish(&self, subject: &str, payload: &[u8]) -> Result<()>;

    /// Subscribe to a subject. Messages published after this call arrive on
    /// the receiver; earlier messages are gone.
    async fn subscribe(&self, subject: &str) -> Result<mpsc::Receiver<Vec<u8>>>;
}

/// Typed helpers over the raw byte surface.
#[async_trait]
pub trait EventBusExt: EventBus {
    /// Serialize and publish a typed payload.
    async fn publish_json<T: Serialize + Sync>(&self, subject: &str, payload: &T) -> Result<()> {
        let bytes = serde_json::to_vec(payload)?;
        self.publish(subject, &bytes).await
    }
}

impl<B: EventBus + ?Sized> EventBusExt for B {}

/// Decode a bus payload, tolerating unknown fields.
pub fn decode<T: DeserializeOwned>(payload: &[u8]) -> Result<T> {
    Ok(serde_json::from_slice(payload)?)
}
