//! Worker execution loop.
//!
//! One `Worker` per consumer registration. For each delivery it drives the
//! task through `Running` to `Completed` or `Failed`, persists every status
//! before settling the delivery, and settles exactly once.
//!
//! Store writes are best effort: a failed write is logged and processing
//! carries on, since only status visibility is lost. Transport errors
//! (consume or settle) end the loop and are returned to the caller.

use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, warn};

use crate::error::{Error, Result};
use crate::model::{Status, Task};
use crate::store::StatusStore;
use crate::telemetry::metrics::MetricsSink;
use crate::telemetry::task::{record_state_transition, start_task_span};
use crate::transport::{Delivery, DeliveryTransport};

use super::executor::{ExecutionOutcome, Executor};

/// Retry policy for the worker loop.
#[derive(Debug, Clone, Default)]
pub struct WorkerConfig {
    /// Deliveries allowed per task before a retryable failure becomes
    /// permanent. `None` requeues retryable failures forever.
    pub max_attempts: Option<u32>,
}

impl WorkerConfig {
    /// Should a failed delivery on `attempt` go back to the transport?
    pub fn should_requeue(&self, retryable: bool, attempt: u32) -> bool {
        retryable && self.max_attempts.is_none_or(|max| attempt < max)
    }
}

/// The capabilities a worker is built from. Cheap to clone.
#[derive(Clone)]
pub struct WorkerContext {
    pub transport: Arc<dyn DeliveryTransport>,
    pub store: Arc<dyn StatusStore>,
    pub executor: Arc<dyn Executor>,
    pub metrics: Arc<dyn MetricsSink>,
}

pub struct Worker {
    id: usize,
    ctx: WorkerContext,
    config: WorkerConfig,
}

impl Worker {
    pub fn new(id: usize, ctx: WorkerContext, config: WorkerConfig) -> Self {
        Self { id, ctx, config }
    }

    /// Consume deliveries until `shutdown` is cancelled.
    ///
    /// Cancellation is only observed between deliveries: a delivery already
    /// received is processed and settled before the loop exits.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        let mut consumer = self
            .ctx
            .transport
            .consume(&format!("worker-{}", self.id))
            .await?;
        info!(worker = self.id, "worker started");

        loop {
            let delivery = tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    info!(worker = self.id, "worker shutting down");
                    return Ok(());
                }
                delivery = consumer.next() => delivery?,
            };
            self.process(delivery).await?;
        }
    }

    /// Process and settle one delivery.
    pub async fn process(&self, delivery: Delivery) -> Result<()> {
        let task: Task = match serde_json::from_slice(&delivery.body) {
            Ok(task) => task,
            Err(e) => {
                // No usable task id, so no status write: drop it for good.
                let err = Error::Decode(e);
                warn!(
                    worker = self.id,
                    attempt = delivery.attempt,
                    "{err}, rejecting delivery"
                );
                return delivery.nack(false).await;
            }
        };

        let span = start_task_span(self.id, &task.id, task.priority, delivery.attempt);
        self.execute(task, delivery, &span)
            .instrument(span.clone())
            .await
    }

    async fn execute(&self, task: Task, delivery: Delivery, span: &tracing::Span) -> Result<()> {
        let attempt = delivery.attempt;
        let priority = task.priority;
        let started = Instant::now();

        // The body is never rewritten, so a redelivery can only follow a
        // failed (or abandoned) earlier delivery.
        let previous = if attempt > 1 { Status::Failed } else { task.status };
        record_state_transition(span, previous, Status::Running);
        let running = task.with_status(Status::Running, attempt);
        self.persist(&running).await;

        match self.ctx.executor.execute(&running).await {
            ExecutionOutcome::Succeeded => {
                record_state_transition(span, Status::Running, Status::Completed);
                self.persist(&running.with_status(Status::Completed, attempt))
                    .await;

                let elapsed = started.elapsed();
                self.ctx.metrics.task_processed(priority, elapsed);
                info!(
                    task.id = %running.id,
                    duration_ms = elapsed.as_millis() as u64,
                    "task completed"
                );
                delivery.ack().await
            }
            ExecutionOutcome::Failed { reason, retryable } => {
                let requeue = self.config.should_requeue(retryable, attempt);
                record_state_transition(span, Status::Running, Status::Failed);
                self.persist(&running.with_status(Status::Failed, attempt))
                    .await;

                self.ctx.metrics.task_failed(priority, requeue);
                warn!(
                    task.id = %running.id,
                    attempt,
                    retryable,
                    requeue,
                    %reason,
                    "task failed"
                );
                delivery.nack(requeue).await
            }
        }
    }

    async fn persist(&self, task: &Task) {
        match self.ctx.store.set(task).await {
            Ok(()) => debug!(task.id = %task.id, status = %task.status, "status persisted"),
            Err(e) => warn!(
                task.id = %task.id,
                status = %task.status,
                "status write failed, continuing: {e}"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unbounded_policy_always_requeues_retryable_failures() {
        let config = WorkerConfig::default();
        assert!(config.should_requeue(true, 1));
        assert!(config.should_requeue(true, 10_000));
        assert!(!config.should_requeue(false, 1));
    }

    #[test]
    fn capped_policy_stops_at_max_attempts() {
        let config = WorkerConfig {
            max_attempts: Some(3),
        };
        assert!(config.should_requeue(true, 1));
        assert!(config.should_requeue(true, 2));
        assert!(!config.should_requeue(true, 3));
        assert!(!config.should_requeue(true, 4));
        assert!(!config.should_requeue(false, 1));
    }
}
