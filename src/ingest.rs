//! Task ingestion: the public API for submitting work and polling status.

use std::sync::Arc;

use tracing::{error, info};

use crate::error::{Error, Result};
use crate::model::{NewTask, Task, TaskId};
use crate::store::StatusStore;
use crate::telemetry::metrics::MetricsSink;
use crate::transport::DeliveryTransport;

/// Accepts new tasks and answers status queries. Cheap to clone.
#[derive(Clone)]
pub struct Ingestion {
    transport: Arc<dyn DeliveryTransport>,
    store: Arc<dyn StatusStore>,
    metrics: Arc<dyn MetricsSink>,
}

impl Ingestion {
    pub fn new(
        transport: Arc<dyn DeliveryTransport>,
        store: Arc<dyn StatusStore>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            transport,
            store,
            metrics,
        }
    }

    /// Record a new task as `Pending`, then publish it for delivery.
    ///
    /// The record is written first: a task that cannot be recorded is never
    /// published (`Error::Storage`). If publishing fails after the write
    /// (`Error::Scheduling`), the `Pending` record stays behind with no
    /// delivery; reconciling it is left to an external reaper.
    pub async fn submit(&self, new: NewTask) -> Result<Task> {
        let task = new.into_task();

        self.store.set(&task).await.map_err(|e| {
            error!(task.id = %task.id, "error storing initial task state: {e}");
            match e {
                Error::Storage(_) => e,
                other => Error::Storage(other.to_string()),
            }
        })?;

        self.transport.publish(&task).await.map_err(|e| {
            error!(task.id = %task.id, "error publishing task: {e}");
            Error::Scheduling {
                id: task.id,
                source: Box::new(e),
            }
        })?;

        self.metrics.task_submitted(task.priority);
        info!(task.id = %task.id, task.priority = %task.priority, "task submitted");
        Ok(task)
    }

    /// Latest recorded state of a task. `Error::NotFound` for unknown ids.
    pub async fn get_status(&self, id: TaskId) -> Result<Task> {
        self.store.get(id).await
    }
}
