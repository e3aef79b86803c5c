//! Process-local queue backend.
//!
//! Each topic gets one broker task owning the pending list and in-flight
//! leases; publishers and deliveries talk to it over channels. Useful for
//! single-node deployments and tests; a broker-backed implementation of
//! the same trait is the multi-node path.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::time::{Duration, Instant};
use tracing::{debug, warn};

use super::{Delivery, DeliveryStream, Disposition, Queue, QueueError};

#[derive(Debug, Clone, Deserialize)]
pub struct MemoryQueueConfig {
    /// Seconds a delivery stays leased before it redelivers.
    #[serde(default = "default_lease_secs")]
    pub lease_secs: u64,
    /// Deliveries beyond this count are dropped (dead-lettered).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_lease_secs() -> u64 {
    60
}
fn default_max_attempts() -> u32 {
    5
}

impl Default for MemoryQueueConfig {
    fn default() -> Self {
        Self {
            lease_secs: default_lease_secs(),
            max_attempts: default_max_attempts(),
        }
    }
}

enum Command {
    Publish {
        message_id: String,
        data: Vec<u8>,
    },
    Subscribe {
        reply: oneshot::Sender<DeliveryStream>,
    },
}

pub struct MemoryQueue {
    config: MemoryQueueConfig,
    topics: Mutex<HashMap<String, mpsc::UnboundedSender<Command>>>,
}

impl MemoryQueue {
    pub fn new(config: MemoryQueueConfig) -> Self {
        Self {
            config,
            topics: Mutex::new(HashMap::new()),
        }
    }

    async fn topic_handle(&self, topic: &str) -> mpsc::UnboundedSender<Command> {
        let mut topics = self.topics.lock().await;
        topics
            .entry(topic.to_string())
            .or_insert_with(|| {
                let (tx, rx) = mpsc::unbounded_channel();
                tokio::spawn(broker(topic.to_string(), self.config.clone(), rx));
                tx
            })
            .clone()
    }
}

#[async_trait]
impl Queue for MemoryQueue {
    async fn publish(&self, topic: &str, data: Vec<u8>) -> Result<String, QueueError> {
        let message_id = uuid::Uuid::new_v4().to_string();
        self.topic_handle(topic)
            .await
            .send(Command::Publish {
                message_id: message_id.clone(),
                data,
            })
            .map_err(|_| QueueError::Closed)?;
        Ok(message_id)
    }

    async fn subscribe(&self, topic: &str) -> Result<DeliveryStream, QueueError> {
        let (reply, stream) = oneshot::channel();
        self.topic_handle(topic)
            .await
            .send(Command::Subscribe { reply })
            .map_err(|_| QueueError::Closed)?;
        stream.await.map_err(|_| QueueError::Closed)
    }
}

struct Stored {
    message_id: String,
    data: Vec<u8>,
    /// Times the message has already been delivered.
    deliveries: u32,
}

struct InFlight {
    message: Stored,
    deadline: Instant,
}

async fn broker(topic: String, config: MemoryQueueConfig, mut commands: mpsc::UnboundedReceiver<Command>) {
    let (control_tx, mut control_rx) = mpsc::unbounded_channel::<Disposition>();
    let mut pending: VecDeque<Stored> = VecDeque::new();
    let mut in_flight: HashMap<String, InFlight> = HashMap::new();
    let mut subscriber: Option<mpsc::UnboundedSender<Delivery>> = None;

    loop {
        let next_deadline = in_flight
            .values()
            .map(|f| f.deadline)
            .min()
            .unwrap_or_else(|| Instant::now() + Duration::from_secs(3600));

        tokio::select! {
            command = commands.recv() => {
                match command {
                    Some(Command::Publish { message_id, data }) => {
                        pending.push_back(Stored { message_id, data, deliveries: 0 });
                    }
                    Some(Command::Subscribe { reply }) => {
                        let (tx, rx) = mpsc::unbounded_channel();
                        subscriber = Some(tx);
                        let _ = reply.send(rx);
                    }
                    None => {
                        debug!("Topic '{}' closed, broker stopping", topic);
                        return;
                    }
                }
            }
            disposition = control_rx.recv() => {
                match disposition {
                    Some(Disposition::Ack { message_id }) => {
                        in_flight.remove(&message_id);
                    }
                    Some(Disposition::Nack { message_id }) => {
                        if let Some(flight) = in_flight.remove(&message_id) {
                            pending.push_back(flight.message);
                        }
                    }
                    Some(Disposition::ModifyLease { message_id, seconds }) => {
                        if let Some(flight) = in_flight.get_mut(&message_id) {
                            flight.deadline = Instant::now() + Duration::from_secs(seconds);
                        }
                    }
                    // control_tx lives in this scope, so the channel
                    // cannot close before the broker does
                    None => return,
                }
            }
            _ = tokio::time::sleep_until(next_deadline) => {
                let now = Instant::now();
                let expired: Vec<String> = in_flight
                    .iter()
                    .filter(|(_, f)| f.deadline <= now)
                    .map(|(id, _)| id.clone())
                    .collect();
                for id in expired {
                    if let Some(flight) = in_flight.remove(&id) {
                        debug!("Lease expired for message {} on '{}'", id, topic);
                        pending.push_back(flight.message);
                    }
                }
            }
        }

        flush(&topic, &config, &mut pending, &mut in_flight, &mut subscriber, &control_tx);
    }
}

fn flush(
    topic: &str,
    config: &MemoryQueueConfig,
    pending: &mut VecDeque<Stored>,
    in_flight: &mut HashMap<String, InFlight>,
    subscriber: &mut Option<mpsc::UnboundedSender<Delivery>>,
    control_tx: &mpsc::UnboundedSender<Disposition>,
) {
    while subscriber.is_some() {
        let Some(mut message) = pending.pop_front() else {
            return;
        };
        if message.deliveries >= config.max_attempts {
            warn!(
                "Message {} on '{}' exceeded {} attempts, dead-lettering",
                message.message_id, topic, config.max_attempts
            );
            continue;
        }
        message.deliveries += 1;
        let delivery = Delivery::new(
            message.message_id.clone(),
            message.data.clone(),
            message.deliveries,
            control_tx.clone(),
        );
        let sent = subscriber
            .as_ref()
            .map(|tx| tx.send(delivery).is_ok())
            .unwrap_or(false);
        if sent {
            let deadline = Instant::now() + Duration::from_secs(config.lease_secs);
            in_flight.insert(message.message_id.clone(), InFlight { message, deadline });
        } else {
            // subscriber went away; undo the delivery count and hold
            message.deliveries -= 1;
            pending.push_front(message);
            *subscriber = None;
            return;
        }
    }
}
