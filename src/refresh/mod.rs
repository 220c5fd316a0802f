//! Background refresh: the queue worker and the pre-warming scheduler.

pub mod scheduler;
pub mod worker;

pub use scheduler::{Scheduler, Trigger, TriggerKind, TriggerReport};
pub use worker::{JobOutcome, Worker};

use crate::queue::JobQueue;
use crate::services::Service;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};

/// Runs the worker and the scheduler side by side until shutdown.
pub struct RefreshService {
    worker: Worker,
    scheduler: Arc<Scheduler>,
    queue: Arc<dyn JobQueue>,
}

impl RefreshService {
    pub fn new(worker: Worker, scheduler: Scheduler, queue: Arc<dyn JobQueue>) -> Self {
        Self {
            worker,
            scheduler: Arc::new(scheduler),
            queue,
        }
    }
}

#[async_trait]
impl Service for RefreshService {
    fn name(&self) -> &'static str {
        "refresh"
    }

    async fn run(self: Box<Self>, shutdown: broadcast::Receiver<()>) -> anyhow::Result<()> {
        // Jobs left active by a previous process would never be picked up again
        match self.queue.release_active().await {
            Ok(0) => {}
            Ok(n) => info!(released = n, "Released orphaned active jobs"),
            Err(e) => warn!(error = ?e, "Failed to release orphaned jobs"),
        }

        let scheduler = self.scheduler.clone();
        tokio::join!(
            self.worker.run(shutdown.resubscribe()),
            scheduler.run(shutdown),
        );
        Ok(())
    }
}
