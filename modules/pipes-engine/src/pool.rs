//! Concurrent queue consumer.
//!
//! Each pool task loops: reserve a batch → hand payloads to the worker →
//! complete, retry with backoff, or dead-letter. Permanent failures are
//! dead-lettered on first sight; transient ones until `max_attempts`.

use std::sync::Arc;
use std::time::Duration;

use pipes_store::{ObjectStore, QueuedTask, TaskQueue};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::config::PipesConfig;
use crate::error::Result;
use crate::worker::{Outcome, Worker};

const MAX_BACKOFF: Duration = Duration::from_secs(300);

#[derive(Debug, Clone)]
pub struct PoolSettings {
    pub concurrency: usize,
    pub poll_interval: Duration,
    pub batch_size: usize,
    pub lease: Duration,
    pub max_attempts: i32,
    pub retry_base: Duration,
}

impl From<&PipesConfig> for PoolSettings {
    fn from(config: &PipesConfig) -> Self {
        Self {
            concurrency: config.worker_concurrency,
            poll_interval: config.poll_interval,
            batch_size: config.batch_size,
            lease: config.lease,
            max_attempts: config.max_attempts,
            retry_base: config.retry_base,
        }
    }
}

/// What happened to one reserved task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskResult {
    Applied,
    Duplicate,
    Retried,
    DeadLettered,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DrainStats {
    pub applied: usize,
    pub duplicates: usize,
    pub retried: usize,
    pub dead_lettered: usize,
}

impl DrainStats {
    fn record(&mut self, result: TaskResult) {
        match result {
            TaskResult::Applied => self.applied += 1,
            TaskResult::Duplicate => self.duplicates += 1,
            TaskResult::Retried => self.retried += 1,
            TaskResult::DeadLettered => self.dead_lettered += 1,
        }
    }
}

pub struct WorkerPool<S: ObjectStore, Q: TaskQueue> {
    worker: Arc<Worker<S>>,
    queue: Arc<Q>,
    settings: PoolSettings,
}

impl<S: ObjectStore, Q: TaskQueue> Clone for WorkerPool<S, Q> {
    fn clone(&self) -> Self {
        Self {
            worker: self.worker.clone(),
            queue: self.queue.clone(),
            settings: self.settings.clone(),
        }
    }
}

impl<S, Q> WorkerPool<S, Q>
where
    S: ObjectStore + 'static,
    Q: TaskQueue + 'static,
{
    pub fn new(worker: Worker<S>, queue: Q, settings: PoolSettings) -> Self {
        Self {
            worker: Arc::new(worker),
            queue: Arc::new(queue),
            settings,
        }
    }

    pub fn queue(&self) -> &Q {
        &self.queue
    }

    /// Run until `shutdown` flips to true. In-flight batches finish first.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> Result<()> {
        info!(concurrency = self.settings.concurrency, "Starting pipes worker pool");

        let mut loops = JoinSet::new();
        for slot in 0..self.settings.concurrency.max(1) {
            let pool = self.clone();
            let shutdown = shutdown.clone();
            loops.spawn(async move { pool.poll_loop(slot, shutdown).await });
        }

        let mut first_error = None;
        while let Some(joined) = loops.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(error = %e, "Worker loop stopped with error");
                    first_error.get_or_insert(e);
                }
                Err(e) => warn!(error = %e, "Worker loop panicked"),
            }
        }

        info!("Pipes worker pool stopped");
        first_error.map_or(Ok(()), Err)
    }

    /// Process until nothing is available to reserve. Tasks scheduled for a
    /// later retry are left in the queue.
    pub async fn drain(&self) -> Result<DrainStats> {
        let mut stats = DrainStats::default();
        loop {
            let tasks = self
                .queue
                .reserve(self.settings.batch_size, self.settings.lease)
                .await?;
            if tasks.is_empty() {
                return Ok(stats);
            }
            for task in tasks {
                stats.record(self.process(task).await?);
            }
        }
    }

    async fn poll_loop(&self, slot: usize, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        debug!(slot, "Worker loop started");
        loop {
            let stopping = *shutdown.borrow();
            if stopping {
                break;
            }

            let tasks = match self
                .queue
                .reserve(self.settings.batch_size, self.settings.lease)
                .await
            {
                Ok(tasks) => tasks,
                Err(e) => {
                    warn!(slot, error = %e, "Failed to reserve tasks");
                    Vec::new()
                }
            };

            if tasks.is_empty() {
                tokio::select! {
                    _ = tokio::time::sleep(self.settings.poll_interval) => {}
                    changed = shutdown.changed() => {
                        // Sender dropped: treat as shutdown.
                        if changed.is_err() {
                            break;
                        }
                    }
                }
                continue;
            }

            for task in tasks {
                if let Err(e) = self.process(task).await {
                    // The lease runs out and the task comes back on its own.
                    warn!(slot, error = %e, "Failed to settle task");
                }
            }
        }
        debug!(slot, "Worker loop stopped");
        Ok(())
    }

    /// Hand one task to the worker and settle it with the queue.
    pub async fn process(&self, task: QueuedTask) -> Result<TaskResult> {
        match self.worker.handle(&task.payload).await {
            Ok(Outcome::Applied { .. }) => {
                self.queue.complete(task.id).await?;
                Ok(TaskResult::Applied)
            }
            Ok(Outcome::Duplicate { .. }) => {
                self.queue.complete(task.id).await?;
                Ok(TaskResult::Duplicate)
            }
            Err(e) if e.is_permanent() => {
                warn!(task = task.id, error = %e, "Dead-lettering malformed envelope");
                self.queue.dead_letter(task.id, &e.to_string()).await?;
                Ok(TaskResult::DeadLettered)
            }
            Err(e) if task.attempts >= self.settings.max_attempts => {
                warn!(
                    task = task.id,
                    attempts = task.attempts,
                    error = %e,
                    "Dead-lettering envelope after exhausting retries"
                );
                self.queue.dead_letter(task.id, &e.to_string()).await?;
                Ok(TaskResult::DeadLettered)
            }
            Err(e) => {
                let delay = backoff(self.settings.retry_base, task.attempts);
                warn!(
                    task = task.id,
                    attempts = task.attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Envelope failed, scheduling retry"
                );
                self.queue.retry(task.id, delay, &e.to_string()).await?;
                Ok(TaskResult::Retried)
            }
        }
    }
}

/// `base * 2^(attempts - 1)`, capped.
fn backoff(base: Duration, attempts: i32) -> Duration {
    let exponent = attempts.saturating_sub(1).clamp(0, 16) as u32;
    base.saturating_mul(1 << exponent).min(MAX_BACKOFF)
}
