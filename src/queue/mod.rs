//! Message queue seam between the orchestrator and the workers.
//!
//! Semantics follow the usual at-least-once broker contract: a delivery
//! stays leased until it is acked, nacked, or its lease expires; nacked
//! and expired deliveries come back with an incremented attempt count,
//! and deliveries past the attempt threshold are dead-lettered.

pub mod memory;

use async_trait::async_trait;
use tokio::sync::mpsc;

pub use memory::MemoryQueue;

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("queue backend is closed")]
    Closed,
    #[error("no such subscription: {0}")]
    UnknownSubscription(String),
}

/// Stream of deliveries handed to a subscriber.
pub type DeliveryStream = mpsc::UnboundedReceiver<Delivery>;

#[derive(Debug)]
pub(crate) enum Disposition {
    Ack { message_id: String },
    Nack { message_id: String },
    ModifyLease { message_id: String, seconds: u64 },
}

/// One leased message. Consuming methods settle it; dropping a delivery
/// without settling lets the lease expire and the message redeliver.
#[derive(Debug)]
pub struct Delivery {
    pub message_id: String,
    pub data: Vec<u8>,
    /// 1 on first delivery, incremented on every redelivery.
    pub attempt: u32,
    control: mpsc::UnboundedSender<Disposition>,
}

impl Delivery {
    pub(crate) fn new(
        message_id: String,
        data: Vec<u8>,
        attempt: u32,
        control: mpsc::UnboundedSender<Disposition>,
    ) -> Self {
        Self { message_id, data, attempt, control }
    }

    pub fn ack(self) {
        let _ = self.control.send(Disposition::Ack { message_id: self.message_id });
    }

    pub fn nack(self) {
        let _ = self.control.send(Disposition::Nack { message_id: self.message_id });
    }

    /// Push the lease deadline `seconds` from now.
    pub fn modify_lease(&self, seconds: u64) {
        let _ = self.control.send(Disposition::ModifyLease {
            message_id: self.message_id.clone(),
            seconds,
        });
    }
}

#[async_trait]
pub trait Queue: Send + Sync {
    /// Publish a payload to a topic, returning the assigned message id.
    async fn publish(&self, topic: &str, data: Vec<u8>) -> Result<String, QueueError>;

    /// Attach a subscriber to a topic. One subscriber per topic; a new
    /// subscription replaces the previous one.
    async fn subscribe(&self, topic: &str) -> Result<DeliveryStream, QueueError>;
}
