//! Worker commands.

use std::sync::Arc;
use std::time::Duration;

use super::AppContext;
use crate::services::{Worker, WorkerOptions};

pub async fn cmd_start(
    ctx: &AppContext,
    max_messages: Option<u64>,
    timeout_secs: Option<u64>,
    debug: bool,
) -> anyhow::Result<()> {
    let options = WorkerOptions {
        max_messages,
        idle_timeout: timeout_secs.map(Duration::from_secs),
        debug,
    };
    let worker = Arc::new(Worker::new(
        ctx.config.worker.clone(),
        Arc::clone(&ctx.service),
        Arc::clone(&ctx.queue) as _,
    ));
    let processed = worker.run(options).await?;
    println!("Worker stopped after handling {processed} messages");
    Ok(())
}
