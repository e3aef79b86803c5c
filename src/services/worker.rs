//! The analysis worker: pulls queue deliveries and runs them through the
//! service under a concurrency cap, keeping leases alive for slow audits.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::config::WorkerConfig;
use crate::queue::{Delivery, Queue};
use crate::services::{AnalysisService, ProcessOutcome};

#[derive(Debug, Clone, Default)]
pub struct WorkerOptions {
    /// Stop after this many messages have been handled.
    pub max_messages: Option<u64>,
    /// Stop after the queue stays idle this long.
    pub idle_timeout: Option<Duration>,
    /// Serial processing, pausing for Enter before each message.
    pub debug: bool,
}

pub struct Worker {
    config: WorkerConfig,
    service: Arc<AnalysisService>,
    queue: Arc<dyn Queue>,
    processed: AtomicU64,
}

impl Worker {
    pub fn new(config: WorkerConfig, service: Arc<AnalysisService>, queue: Arc<dyn Queue>) -> Self {
        Self { config, service, queue, processed: AtomicU64::new(0) }
    }

    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    /// Run until shutdown: ctrl-c, the message cap, or the idle timeout.
    pub async fn run(self: Arc<Self>, options: WorkerOptions) -> anyhow::Result<u64> {
        let mut deliveries = self.queue.subscribe(&self.config.topic).await?;
        info!(
            "Worker listening on '{}' (concurrency {})",
            self.config.topic, self.config.max_concurrency
        );

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency.max(1)));
        let mut tasks: JoinSet<()> = JoinSet::new();

        loop {
            if let Some(max) = options.max_messages {
                if self.processed.load(Ordering::Relaxed) >= max {
                    info!("Reached the cap of {} messages, shutting down", max);
                    break;
                }
            }

            let next = async {
                match options.idle_timeout {
                    Some(idle) => tokio::time::timeout(idle, deliveries.recv())
                        .await
                        .unwrap_or_else(|_| {
                            info!("No messages for {:?}, shutting down", idle);
                            None
                        }),
                    None => deliveries.recv().await,
                }
            };
            let delivery = tokio::select! {
                delivery = next => match delivery {
                    Some(delivery) => delivery,
                    None => break,
                },
                _ = tokio::signal::ctrl_c() => {
                    info!("Interrupt received, shutting down");
                    break;
                }
            };

            if options.debug {
                // the pause comes first so the pre-processing state can be
                // inspected; a generous lease keeps the broker from
                // redelivering while the operator reads
                delivery.modify_lease(self.config.lease_extension_cap_secs.max(600));
                self.pause_for_enter().await;
                self.handle(delivery).await;
                continue;
            }

            let permit = semaphore.clone().acquire_owned().await?;
            let worker = Arc::clone(&self);
            tasks.spawn(async move {
                worker.handle(delivery).await;
                drop(permit);
            });
            // reap finished tasks without blocking
            while tasks.try_join_next().is_some() {}
        }

        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                error!("Worker task panicked: {}", e);
            }
        }
        Ok(self.processed.load(Ordering::Relaxed))
    }

    /// Process one delivery, extending its lease while the audit runs.
    async fn handle(&self, delivery: Delivery) {
        let message_id = delivery.message_id.clone();
        debug!("Handling message {} (attempt {})", message_id, delivery.attempt);

        // the future outlives the ack/nack move of the delivery, so it
        // gets its own copy of the payload
        let payload = delivery.data.clone();
        let process = self.service.process_from_message(&payload);
        tokio::pin!(process);

        let extension = self.config.lease_extension_secs;
        let cap = self.config.lease_extension_cap_secs;
        let mut extended: u64 = 0;
        let mut next_extend =
            tokio::time::Instant::now() + Duration::from_secs(self.config.lease_safety_secs);

        let outcome = loop {
            tokio::select! {
                outcome = &mut process => break outcome,
                _ = tokio::time::sleep_until(next_extend), if extended < cap => {
                    delivery.modify_lease(extension);
                    extended += extension;
                    next_extend = tokio::time::Instant::now()
                        + Duration::from_secs(extension.saturating_sub(self.config.lease_safety_secs).max(1));
                    debug!("Extended lease of {} ({}s total)", message_id, extended);
                }
            }
        };

        self.processed.fetch_add(1, Ordering::Relaxed);
        match outcome {
            ProcessOutcome::Completed => {
                info!("Message {} completed", message_id);
                delivery.ack();
            }
            ProcessOutcome::Skipped(reason) => {
                info!("Message {} skipped: {}", message_id, reason);
                delivery.ack();
            }
            ProcessOutcome::Transient(reason) => {
                warn!("Message {} failed transiently: {}", message_id, reason);
                delivery.nack();
            }
            ProcessOutcome::Permanent(reason) => {
                error!("Message {} failed permanently: {}", message_id, reason);
                delivery.nack();
            }
        }
    }

    /// Debug mode: hold between messages so state can be inspected.
    async fn pause_for_enter(&self) {
        use tokio::io::AsyncBufReadExt;
        info!("Debug mode: press Enter to continue");
        let mut line = String::new();
        let mut reader = tokio::io::BufReader::new(tokio::io::stdin());
        if let Err(e) = reader.read_line(&mut line).await {
            warn!("Could not read stdin: {}", e);
        }
    }
}
